//! Metamodel layer: declarative type descriptors, the derivation engine
//! and the domain-type registry.
//!
//! Languages are not written by hand. Domain code declares
//! [`describe::TypeDescriptor`] tables, [`builder::derive_language`] turns
//! a batch of them into a [`crate::model::Language`] with deterministic
//! ids/keys, and every derived classifier lands in a
//! [`registry::MetamodelRegistry`] owned by the caller.

pub mod builder;
pub mod builtins;
pub mod describe;
pub mod registry;

pub use builder::{derive_language, DeriveError};
pub use describe::{
    BaseKind, Described, FeatureDescriptor, FeatureKind, TypeDescriptor, TypeKey,
};
pub use registry::{
    MetamodelRegistry, PrimitiveDeserializer, PrimitiveSerializer, RegisteredClassifier,
    RegistryError,
};
