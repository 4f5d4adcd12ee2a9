//! Typed binding layer: static domain wrappers over generic nodes.
//!
//! # Design
//!
//! A domain type wraps a [`Node`] and implements [`TypedNode`], which
//! supplies typed accessors as default methods over the node's name-keyed
//! storage. Wrappers hold no cached metamodel state: the classifier is
//! looked up through the registry on every call that needs it, so a
//! wrapper constructed before its language was derived works once the
//! registry is populated.
//!
//! Single-valued containment has two deliberate write shapes:
//! [`TypedNode::set_single_child_if_empty`] fails when a child is already
//! present, [`TypedNode::replace_single_child`] evicts it. Callers pick
//! one; there is no setter whose behavior depends on current state.

pub mod containment;
pub mod reference;

use thiserror::Error;

use crate::meta::describe::Described;
use crate::meta::describe::TypeKey;
use crate::meta::registry::{MetamodelRegistry, RegisteredClassifier};
use crate::model::language::LanguageVersion;
use crate::model::node::{Node, NodeError, NodeRef, PropertyValue, ReferenceValue};

pub use containment::ContainmentList;
pub use reference::TypedRef;

/// Errors from typed access.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BindingError {
    #[error("reference {name} is single-valued but holds {count} values")]
    MultipleValuesOnSingleReference { name: String, count: usize },

    #[error("containment {name} already holds a child")]
    ChildAlreadyPresent { name: String },

    #[error("property {name} does not hold a {expected}")]
    PropertyType { name: String, expected: &'static str },

    #[error("no classifier registered for domain type {type_key}")]
    UnresolvedClassifier { type_key: TypeKey },

    #[error("expected an instance of {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("could not materialize proxy: {0}")]
    Deproxify(String),

    #[error(transparent)]
    Node(#[from] NodeError),
}

/// Conversion from stored property values into typed scalars.
pub trait FromPropertyValue: Sized {
    const EXPECTED: &'static str;

    fn from_property(value: &PropertyValue) -> Option<Self>;
}

impl FromPropertyValue for String {
    const EXPECTED: &'static str = "string";

    fn from_property(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::String(s) | PropertyValue::Custom(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FromPropertyValue for i64 {
    const EXPECTED: &'static str = "integer";

    fn from_property(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl FromPropertyValue for bool {
    const EXPECTED: &'static str = "boolean";

    fn from_property(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// Implemented by domain wrappers around a generic node.
pub trait TypedNode: Described {
    fn node(&self) -> &Node;

    fn node_mut(&mut self) -> &mut Node;

    /// The classifier registered for this domain type. Resolved through
    /// the registry on every call, never cached in the wrapper.
    fn classifier<'a>(
        &self,
        registry: &'a MetamodelRegistry,
        version: LanguageVersion,
    ) -> Result<&'a RegisteredClassifier, BindingError> {
        registry
            .classifier(Self::type_key(), version)
            .ok_or(BindingError::UnresolvedClassifier {
                type_key: Self::type_key(),
            })
    }

    // --- properties ---

    fn get_property<V: FromPropertyValue>(&self, name: &str) -> Result<Option<V>, BindingError> {
        match self.node().property(name) {
            None => Ok(None),
            Some(value) => V::from_property(value)
                .map(Some)
                .ok_or_else(|| BindingError::PropertyType {
                    name: name.to_string(),
                    expected: V::EXPECTED,
                }),
        }
    }

    fn set_property(&mut self, name: &str, value: impl Into<PropertyValue>) {
        self.node_mut().set_property(name, value);
    }

    fn clear_property(&mut self, name: &str) {
        self.node_mut().clear_property(name);
    }

    // --- references ---

    /// The sole value of a single-valued reference.
    ///
    /// # Errors
    ///
    /// Fails when the underlying storage holds more than one value; a
    /// single-valued reference with multiple values is model corruption,
    /// not a case to silently pick from.
    fn get_single_reference(&self, name: &str) -> Result<Option<&ReferenceValue>, BindingError> {
        let values = self.node().reference_values(name);
        match values.len() {
            0 => Ok(None),
            1 => Ok(Some(&values[0])),
            count => Err(BindingError::MultipleValuesOnSingleReference {
                name: name.to_string(),
                count,
            }),
        }
    }

    /// Replace the sole value of a single-valued reference; `None` clears.
    fn set_single_reference(&mut self, name: &str, value: Option<ReferenceValue>) {
        self.node_mut().set_only_reference_value(name, value);
    }

    fn get_references(&self, name: &str) -> &[ReferenceValue] {
        self.node().reference_values(name)
    }

    fn set_references(&mut self, name: &str, values: Vec<ReferenceValue>) {
        self.node_mut().set_reference_values(name, values);
    }

    fn add_reference(&mut self, name: &str, value: ReferenceValue) {
        self.node_mut().add_reference_value(name, value);
    }

    /// Typed view of a single-valued reference.
    fn get_typed_reference<T: Described>(
        &self,
        name: &str,
    ) -> Result<Option<TypedRef<T>>, BindingError> {
        Ok(self.get_single_reference(name)?.map(TypedRef::from_value))
    }

    fn set_typed_reference<T: Described>(&mut self, name: &str, value: Option<TypedRef<T>>) {
        self.set_single_reference(name, value.map(|r| r.value()));
    }

    // --- containments ---

    fn get_children(&self, name: &str) -> &[NodeRef] {
        self.node().children_in(name)
    }

    /// The child of a single-valued containment, if any.
    fn get_single_child(&self, name: &str) -> Option<&NodeRef> {
        self.node().children_in(name).first()
    }

    /// Set the child of a single-valued containment, failing when one is
    /// already present.
    fn set_single_child_if_empty(&mut self, name: &str, child: Node) -> Result<(), BindingError> {
        if !self.node().children_in(name).is_empty() {
            return Err(BindingError::ChildAlreadyPresent {
                name: name.to_string(),
            });
        }
        self.node_mut()
            .add_child(name, NodeRef::Resolved(Box::new(child)))?;
        Ok(())
    }

    /// Set the child of a single-valued containment, evicting any current
    /// child; `None` clears. The evicted children are returned unparented.
    fn replace_single_child(
        &mut self,
        name: &str,
        child: Option<Node>,
    ) -> Result<Vec<NodeRef>, BindingError> {
        let mut evicted = self.node_mut().clear_containment(name);
        for slot in &mut evicted {
            if let NodeRef::Resolved(node) = slot {
                node.parent = None;
            }
        }
        if let Some(child) = child {
            self.node_mut()
                .add_child(name, NodeRef::Resolved(Box::new(child)))?;
        }
        Ok(evicted)
    }

    /// Live, add-only view of a multi-valued containment.
    fn containment_list(&mut self, name: &str) -> ContainmentList<'_> {
        ContainmentList::new(self.node_mut(), name)
    }
}
