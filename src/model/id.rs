//! model::id
//!
//! Node identifiers and the shared id sanitization routine.
//!
//! # Design
//!
//! Every node and metamodel element carries a stable string identifier.
//! The wire codec only accepts identifiers drawn from `[A-Za-z0-9_-]`, so
//! [`NodeId`] enforces that character set at construction time, and all
//! derived identifiers (language ids, classifier ids, feature keys) are
//! produced through the single [`clean_id_fragment`] routine. Ids derived
//! from type and feature names are therefore never rejected at the
//! serialization boundary.
//!
//! # Examples
//!
//! ```
//! use canopy::model::id::{NodeId, clean_id_fragment};
//!
//! let id = NodeId::new("partition-root-1").unwrap();
//! assert_eq!(id.as_str(), "partition-root-1");
//!
//! assert!(NodeId::new("").is_err());
//! assert!(NodeId::new("has space").is_err());
//!
//! assert_eq!(clean_id_fragment("com.example.Task"), "com_example_Task");
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from identifier validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("node id cannot be empty")]
    Empty,

    #[error("node id contains character {ch:?} outside [A-Za-z0-9_-]: {id}")]
    InvalidCharacter { id: String, ch: char },
}

/// A validated node identifier.
///
/// Identifiers are non-empty strings over `[A-Za-z0-9_-]`. Invalid values
/// cannot be represented, so a stored tree never contains an id the server
/// would reject.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    /// Create a new validated node id.
    ///
    /// # Errors
    ///
    /// Returns `IdError` if the id is empty or contains a character outside
    /// `[A-Za-z0-9_-]`.
    pub fn new(id: impl Into<String>) -> Result<Self, IdError> {
        let id = id.into();
        if id.is_empty() {
            return Err(IdError::Empty);
        }
        if let Some(ch) = id.chars().find(|c| !is_id_char(*c)) {
            return Err(IdError::InvalidCharacter { id, ch });
        }
        Ok(Self(id))
    }

    /// A fresh random node id (`node-id-<uuid>`).
    pub fn random() -> Self {
        Self(format!("node-id-{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for NodeId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NodeId> for String {
    fn from(value: NodeId) -> Self {
        value.0
    }
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Sanitize a name fragment for use inside a derived identifier or key.
///
/// `.`, spaces and `/` become `_`; any other character outside
/// `[A-Za-z0-9_-]` is stripped. This is the one routine used everywhere ids
/// are derived, so identical input always yields identical identifiers.
pub fn clean_id_fragment(name: &str) -> String {
    name.chars()
        .filter_map(|c| match c {
            '.' | ' ' | '/' => Some('_'),
            c if is_id_char(c) => Some(c),
            _ => None,
        })
        .collect()
}
