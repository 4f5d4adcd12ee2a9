//! Canopy - typed model graphs synchronized with a repository server
//!
//! Canopy lets application code declare strongly-typed domain types for a
//! graph-shaped document, derive a metamodel (a "language") from those
//! declarations, and exchange node trees with a remote model repository
//! over HTTP.
//!
//! # Architecture
//!
//! The codebase is layered, leaves first:
//!
//! - [`model`] - Classifiers, features, generic nodes, proxies
//! - [`meta`] - Declarative type descriptors, the derivation engine, and
//!   the domain-type registry
//! - [`binding`] - Typed accessors over a generic node's feature storage
//! - [`chunk`] - The flat wire form of node sets and its codec
//! - [`repo`] - The blocking repository synchronization client
//!
//! # Correctness Invariants
//!
//! 1. Metamodel derivation is deterministic: identical input yields
//!    identical classifier and feature ids/keys
//! 2. A node has at most one parent; containment is never shared
//! 3. Nodes whose content was not transferred are explicit proxy variants,
//!    never resolved-looking placeholders
//! 4. Repository failures surface with URL, status and payload context;
//!    nothing is retried or corrected silently

pub mod binding;
pub mod chunk;
pub mod meta;
pub mod model;
pub mod repo;
