//! meta::describe
//!
//! Declarative descriptors for domain types.
//!
//! # Design
//!
//! Instead of inspecting host-language types at runtime, each domain type
//! carries an explicit feature-description table: a static list of
//! (name, kind, target) entries plus supertypes and flags. The derivation
//! engine consumes these tables; nothing in the crate introspects types.
//! Tables are usually written by hand next to the domain type; a build-time
//! generator can produce them just as well.

use crate::model::node::Node;

/// Stable identity of a domain type, replacing runtime type identity as the
/// registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeKey(pub &'static str);

impl std::fmt::Display for TypeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

/// What a descriptor becomes when derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseKind {
    Concept,
    Annotation,
    Interface,
    Primitive,
}

/// Classification of one declared feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    /// Scalar attribute of a registered primitive type.
    Property { scalar: TypeKey },
    /// Owned child, at most one.
    ContainmentSingle { target: TypeKey },
    /// Owned children, zero to many.
    ContainmentMany { target: TypeKey },
    /// Non-owning pointer, at most one.
    ReferenceSingle { target: TypeKey },
    /// Non-owning pointers, zero to many.
    ReferenceMany { target: TypeKey },
}

/// One entry of a type's feature-description table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureDescriptor {
    pub name: &'static str,
    pub kind: FeatureKind,
    /// Derived/computed features are excluded from the classifier.
    pub derived: bool,
}

impl FeatureDescriptor {
    pub const fn new(name: &'static str, kind: FeatureKind) -> Self {
        Self {
            name,
            kind,
            derived: false,
        }
    }

    pub const fn derived(name: &'static str, kind: FeatureKind) -> Self {
        Self {
            name,
            kind,
            derived: true,
        }
    }
}

/// The full descriptor of a domain type.
#[derive(Debug, Clone, Copy)]
pub struct TypeDescriptor {
    pub name: &'static str,
    pub key: TypeKey,
    pub base: BaseKind,
    /// Declared supertypes by key; at most one may resolve to a node type.
    pub supertypes: &'static [TypeKey],
    pub features: &'static [FeatureDescriptor],
    pub is_abstract: bool,
    pub is_partition: bool,
    /// Optional factory used during decode to build a bare instance of this
    /// type (the incoming wire id is assigned afterwards). Types without a
    /// factory decode as plain generic nodes.
    pub factory: Option<fn() -> Node>,
}

impl TypeDescriptor {
    pub const fn concept(
        name: &'static str,
        key: TypeKey,
        supertypes: &'static [TypeKey],
        features: &'static [FeatureDescriptor],
    ) -> Self {
        Self {
            name,
            key,
            base: BaseKind::Concept,
            supertypes,
            features,
            is_abstract: false,
            is_partition: false,
            factory: None,
        }
    }

    pub const fn abstract_concept(
        name: &'static str,
        key: TypeKey,
        supertypes: &'static [TypeKey],
        features: &'static [FeatureDescriptor],
    ) -> Self {
        let mut d = Self::concept(name, key, supertypes, features);
        d.is_abstract = true;
        d
    }

    pub const fn partition(
        name: &'static str,
        key: TypeKey,
        supertypes: &'static [TypeKey],
        features: &'static [FeatureDescriptor],
    ) -> Self {
        let mut d = Self::concept(name, key, supertypes, features);
        d.is_partition = true;
        d
    }

    pub const fn annotation(
        name: &'static str,
        key: TypeKey,
        supertypes: &'static [TypeKey],
        features: &'static [FeatureDescriptor],
    ) -> Self {
        Self {
            name,
            key,
            base: BaseKind::Annotation,
            supertypes,
            features,
            is_abstract: false,
            is_partition: false,
            factory: None,
        }
    }

    pub const fn interface(
        name: &'static str,
        key: TypeKey,
        features: &'static [FeatureDescriptor],
    ) -> Self {
        Self {
            name,
            key,
            base: BaseKind::Interface,
            supertypes: &[],
            features,
            is_abstract: false,
            is_partition: false,
            factory: None,
        }
    }

    pub const fn primitive(name: &'static str, key: TypeKey) -> Self {
        Self {
            name,
            key,
            base: BaseKind::Primitive,
            supertypes: &[],
            features: &[],
            is_abstract: false,
            is_partition: false,
            factory: None,
        }
    }

    pub const fn with_factory(mut self, factory: fn() -> Node) -> Self {
        self.factory = Some(factory);
        self
    }
}

/// Implemented by domain types that expose a descriptor table.
pub trait Described {
    fn descriptor() -> &'static TypeDescriptor;

    fn type_key() -> TypeKey {
        Self::descriptor().key
    }
}
