//! model
//!
//! The classifier type graph and generic nodes shared by every other
//! component.
//!
//! # Modules
//!
//! - [`id`] - Validated node identifiers and the shared id sanitizer
//! - [`language`] - Languages, classifiers, features, meta pointers
//! - [`node`] - Generic dynamic nodes, reference values, proxies

pub mod id;
pub mod language;
pub mod node;

pub use id::{clean_id_fragment, IdError, NodeId};
pub use language::{
    feature_by_key, feature_by_name, find_classifier, Classifier, ClassifierKind, Feature,
    Language, LanguageVersion, MetaPointer, Multiplicity,
};
pub use node::{Node, NodeError, NodeRef, PropertyValue, ReferenceValue};
