//! model::language
//!
//! The classifier type graph: languages, classifiers, features.
//!
//! # Types
//!
//! - [`Language`] - A named set of classifiers with a stable id and key
//! - [`Classifier`] - Concept, Annotation, Interface or PrimitiveType
//! - [`Feature`] - Property, Containment or Reference of a classifier
//! - [`Multiplicity`] - Optional / Single / ZeroToMany / OneToMany
//! - [`MetaPointer`] - Wire-level pointer to a classifier or feature
//! - [`LanguageVersion`] - Specification version keying registry tables
//!
//! # Invariants
//!
//! - Classifier and feature ids/keys are derived deterministically from the
//!   language id/key and cleaned element names (see [`crate::model::id`])
//! - Concepts and Annotations extend at most one other classifier
//! - Features are keyed by name within their declaring classifier

use serde::{Deserialize, Serialize};

use super::id::clean_id_fragment;

/// Specification version of the wire format.
///
/// The wire format exists in more than one mutually-incompatible version;
/// metamodel registry tables are kept per version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LanguageVersion {
    V2023_1,
    V2024_1,
}

impl LanguageVersion {
    /// The version new clients speak by default.
    pub const CURRENT: LanguageVersion = LanguageVersion::V2024_1;

    /// All supported versions, used when seeding built-in registry tables.
    pub const ALL: [LanguageVersion; 2] = [LanguageVersion::V2023_1, LanguageVersion::V2024_1];

    pub fn as_str(&self) -> &'static str {
        match self {
            LanguageVersion::V2023_1 => "2023.1",
            LanguageVersion::V2024_1 => "2024.1",
        }
    }
}

impl std::fmt::Display for LanguageVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire-level pointer to a classifier or feature: the owning language's key
/// and version plus the element's own key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetaPointer {
    pub language: String,
    pub version: String,
    pub key: String,
}

impl MetaPointer {
    pub fn new(
        language: impl Into<String>,
        version: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            language: language.into(),
            version: version.into(),
            key: key.into(),
        }
    }
}

impl std::fmt::Display for MetaPointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}@{}", self.language, self.key, self.version)
    }
}

/// Multiplicity of a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Multiplicity {
    /// Zero or one value.
    Optional,
    /// Exactly one value.
    Single,
    /// Zero to many values.
    ZeroToMany,
    /// One to many values.
    OneToMany,
}

impl Multiplicity {
    pub fn optional(&self) -> bool {
        matches!(self, Multiplicity::Optional | Multiplicity::ZeroToMany)
    }

    pub fn multiple(&self) -> bool {
        matches!(self, Multiplicity::ZeroToMany | Multiplicity::OneToMany)
    }
}

/// A feature of a classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Feature {
    /// A scalar attribute typed by a primitive type.
    Property {
        name: String,
        id: String,
        key: String,
        /// Pointer to the primitive type of the value.
        primitive: MetaPointer,
        optional: bool,
    },
    /// An owned child relationship.
    Containment {
        name: String,
        id: String,
        key: String,
        /// Pointer to the classifier of contained children.
        target: MetaPointer,
        multiplicity: Multiplicity,
    },
    /// A non-owning pointer to a node elsewhere in the graph.
    Reference {
        name: String,
        id: String,
        key: String,
        /// Pointer to the classifier of referenced nodes.
        target: MetaPointer,
        multiplicity: Multiplicity,
    },
}

impl Feature {
    pub fn name(&self) -> &str {
        match self {
            Feature::Property { name, .. }
            | Feature::Containment { name, .. }
            | Feature::Reference { name, .. } => name,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Feature::Property { key, .. }
            | Feature::Containment { key, .. }
            | Feature::Reference { key, .. } => key,
        }
    }
}

/// What kind of classifier an element is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClassifierKind {
    Concept {
        is_abstract: bool,
        /// Valid as the root of an independently retrievable subtree.
        is_partition: bool,
        /// Key of the single extended concept, if any.
        extended: Option<String>,
    },
    Annotation {
        /// Key of the single extended annotation, if any.
        extended: Option<String>,
    },
    /// Structural interface: never extended, contributes no features to
    /// concepts declaring it as a supertype.
    Interface,
    /// Scalar value type usable by properties.
    Primitive,
}

/// A named type descriptor belonging to a [`Language`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classifier {
    pub name: String,
    pub id: String,
    pub key: String,
    pub kind: ClassifierKind,
    pub features: Vec<Feature>,
}

impl Classifier {
    /// Key of the classifier this one extends, if any.
    pub fn extended(&self) -> Option<&str> {
        match &self.kind {
            ClassifierKind::Concept { extended, .. } | ClassifierKind::Annotation { extended } => {
                extended.as_deref()
            }
            _ => None,
        }
    }

    /// Derived id for an element contained in this classifier: the owner's
    /// prefix (id minus the `language-` wrapper and `-id` suffix) plus the
    /// cleaned element name.
    pub fn id_for_contained(&self, name: &str) -> String {
        derive_contained(&self.id, name, "id")
    }

    /// Derived key for an element contained in this classifier.
    pub fn key_for_contained(&self, name: &str) -> String {
        derive_contained(&self.key, name, "key")
    }

    /// Look up a feature declared directly on this classifier.
    pub fn feature_by_name(&self, name: &str) -> Option<&Feature> {
        self.features.iter().find(|f| f.name() == name)
    }
}

/// A language: a named, versioned set of classifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Language {
    pub name: String,
    pub id: String,
    pub key: String,
    /// The language's own version string carried in meta pointers.
    pub version: String,
    pub elements: Vec<Classifier>,
}

impl Language {
    /// Create an empty language with derived id and key.
    ///
    /// The id is `language-<cleaned-lowercased-name>-id` and the key is
    /// formed the same way. The language-level id is case-insensitive, so
    /// the name is lowercased before cleaning.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let cleaned = clean_id_fragment(&name.to_lowercase());
        Self {
            id: format!("language-{cleaned}-id"),
            key: format!("language-{cleaned}-key"),
            name,
            version: "1".to_string(),
            elements: Vec::new(),
        }
    }

    /// Derived id for an element contained in this language.
    pub fn id_for_contained(&self, name: &str) -> String {
        derive_contained(&self.id, name, "id")
    }

    /// Derived key for an element contained in this language.
    pub fn key_for_contained(&self, name: &str) -> String {
        derive_contained(&self.key, name, "key")
    }

    /// Wire pointer to one of this language's elements.
    pub fn pointer_to(&self, classifier: &Classifier) -> MetaPointer {
        MetaPointer::new(&self.key, &self.version, &classifier.key)
    }

    pub fn classifier_by_name(&self, name: &str) -> Option<&Classifier> {
        self.elements.iter().find(|c| c.name == name)
    }

    pub fn classifier_by_key(&self, key: &str) -> Option<&Classifier> {
        self.elements.iter().find(|c| c.key == key)
    }
}

/// Derive a contained element's id or key: strip the conventional
/// `language-` wrapper and the trailing `-id`/`-key`, append the cleaned
/// element name, restore the suffix.
fn derive_contained(owner: &str, name: &str, suffix: &str) -> String {
    let prefix = owner
        .strip_prefix("language-")
        .unwrap_or(owner)
        .strip_suffix(&format!("-{suffix}"))
        .unwrap_or(owner);
    format!("{prefix}-{}-{suffix}", clean_id_fragment(name))
}

/// Find a classifier by meta pointer among a set of languages.
pub fn find_classifier<'a>(languages: &'a [Language], ptr: &MetaPointer) -> Option<&'a Classifier> {
    languages
        .iter()
        .find(|l| l.key == ptr.language && l.version == ptr.version)
        .and_then(|l| l.classifier_by_key(&ptr.key))
}

/// Look up a feature by name on a classifier, walking the extended chain
/// through the given languages.
pub fn feature_by_name<'a>(
    languages: &'a [Language],
    classifier: &'a Classifier,
    name: &str,
) -> Option<&'a Feature> {
    let mut current = Some(classifier);
    while let Some(c) = current {
        if let Some(f) = c.feature_by_name(name) {
            return Some(f);
        }
        current = c
            .extended()
            .and_then(|key| languages.iter().find_map(|l| l.classifier_by_key(key)));
    }
    None
}

/// Look up a feature by key on a classifier, walking the extended chain.
pub fn feature_by_key<'a>(
    languages: &'a [Language],
    classifier: &'a Classifier,
    key: &str,
) -> Option<&'a Feature> {
    let mut current = Some(classifier);
    while let Some(c) = current {
        if let Some(f) = c.features.iter().find(|f| f.key() == key) {
            return Some(f);
        }
        current = c
            .extended()
            .and_then(|k| languages.iter().find_map(|l| l.classifier_by_key(k)));
    }
    None
}
