//! binding::reference
//!
//! Typed single-valued references.
//!
//! A [`TypedRef`] carries the target identifier and resolve hint of a
//! reference value plus a phantom domain type. It never owns the target
//! node; materializing one goes through a caller-supplied fetch, usually
//! backed by the repository client.

use std::marker::PhantomData;

use crate::meta::describe::Described;
use crate::meta::registry::MetamodelRegistry;
use crate::model::id::NodeId;
use crate::model::language::LanguageVersion;
use crate::model::node::{Node, ReferenceValue};

use super::BindingError;

/// A typed, non-owning reference to a node of domain type `T`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedRef<T> {
    pub resolve_info: Option<String>,
    pub target: Option<NodeId>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Described> TypedRef<T> {
    /// An empty reference: no target, no hint.
    pub fn none() -> Self {
        Self {
            resolve_info: None,
            target: None,
            _marker: PhantomData,
        }
    }

    /// A reference known only by target identifier.
    pub fn to_proxy(target: NodeId) -> Self {
        Self {
            resolve_info: None,
            target: Some(target),
            _marker: PhantomData,
        }
    }

    /// A reference to a materialized node, verified to be an instance of
    /// `T` (or a subtype) through the registry.
    pub fn to_node(
        node: &Node,
        registry: &MetamodelRegistry,
        version: LanguageVersion,
    ) -> Result<Self, BindingError> {
        let expected = registry
            .classifier(T::type_key(), version)
            .ok_or(BindingError::UnresolvedClassifier {
                type_key: T::type_key(),
            })?;
        let actual = node
            .classifier
            .as_ref()
            .ok_or_else(|| BindingError::TypeMismatch {
                expected: expected.classifier.key.clone(),
                actual: "<no classifier>".to_string(),
            })?;
        if !registry.is_instance_of(&actual.key, &expected.classifier.key, version) {
            return Err(BindingError::TypeMismatch {
                expected: expected.classifier.key.clone(),
                actual: actual.key.clone(),
            });
        }
        Ok(Self::to_proxy(node.id.clone()))
    }

    pub fn from_value(value: &ReferenceValue) -> Self {
        Self {
            resolve_info: value.resolve_info.clone(),
            target: value.target.clone(),
            _marker: PhantomData,
        }
    }

    pub fn value(&self) -> ReferenceValue {
        ReferenceValue {
            resolve_info: self.resolve_info.clone(),
            target: self.target.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.target.is_none()
    }

    /// Materialize the target through a caller-supplied fetch and verify
    /// the fetched node's type. Empty references resolve to `None`.
    pub fn resolve<F>(
        &self,
        registry: &MetamodelRegistry,
        version: LanguageVersion,
        fetch: F,
    ) -> Result<Option<Node>, BindingError>
    where
        F: FnOnce(&NodeId) -> Result<Node, BindingError>,
    {
        let Some(target) = &self.target else {
            return Ok(None);
        };
        let node = fetch(target)?;
        // Re-run the instance check on the fetched node; the repository is
        // not obliged to return what the hint promised.
        Self::to_node(&node, registry, version)?;
        Ok(Some(node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::builder::derive_language;
    use crate::meta::builtins;
    use crate::meta::describe::{TypeDescriptor, TypeKey};

    const ITEM: TypeDescriptor = TypeDescriptor::abstract_concept(
        "Item",
        TypeKey("tasks.Item"),
        &[builtins::NODE],
        &[],
    );
    const TASK: TypeDescriptor =
        TypeDescriptor::concept("Task", TypeKey("tasks.Task"), &[TypeKey("tasks.Item")], &[]);
    const NOTE: TypeDescriptor =
        TypeDescriptor::concept("Note", TypeKey("tasks.Note"), &[builtins::NODE], &[]);

    struct Item;

    impl Described for Item {
        fn descriptor() -> &'static TypeDescriptor {
            &ITEM
        }
    }

    fn registry() -> MetamodelRegistry {
        let mut registry = MetamodelRegistry::with_builtins();
        derive_language(
            "tasks",
            &[&ITEM, &TASK, &NOTE],
            &mut registry,
            LanguageVersion::CURRENT,
        )
        .unwrap();
        registry
    }

    fn typed_node(registry: &MetamodelRegistry, key: TypeKey, id: &str) -> Node {
        let pointer = registry
            .classifier(key, LanguageVersion::CURRENT)
            .unwrap()
            .pointer
            .clone();
        Node::new(NodeId::new(id).unwrap()).with_classifier(pointer)
    }

    #[test]
    fn to_node_accepts_subtypes() {
        let registry = registry();
        let task = typed_node(&registry, TypeKey("tasks.Task"), "t1");
        let reference = TypedRef::<Item>::to_node(&task, &registry, LanguageVersion::CURRENT)
            .unwrap();
        assert_eq!(reference.target, Some(NodeId::new("t1").unwrap()));
    }

    #[test]
    fn to_node_rejects_unrelated_types() {
        let registry = registry();
        let note = typed_node(&registry, TypeKey("tasks.Note"), "n1");
        assert!(matches!(
            TypedRef::<Item>::to_node(&note, &registry, LanguageVersion::CURRENT),
            Err(BindingError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn empty_reference_resolves_to_none() {
        let registry = registry();
        let reference = TypedRef::<Item>::none();
        let resolved = reference
            .resolve(&registry, LanguageVersion::CURRENT, |_| {
                panic!("fetch must not run for empty references")
            })
            .unwrap();
        assert!(resolved.is_none());
    }

    #[test]
    fn resolve_verifies_the_fetched_node() {
        let registry = registry();
        let reference = TypedRef::<Item>::to_proxy(NodeId::new("n1").unwrap());
        let note = typed_node(&registry, TypeKey("tasks.Note"), "n1");
        let outcome = reference.resolve(&registry, LanguageVersion::CURRENT, |_| Ok(note.clone()));
        assert!(matches!(outcome, Err(BindingError::TypeMismatch { .. })));
    }

    #[test]
    fn round_trips_through_reference_values() {
        let value = ReferenceValue {
            resolve_info: Some("the task".into()),
            target: Some(NodeId::new("t1").unwrap()),
        };
        let typed = TypedRef::<Item>::from_value(&value);
        assert_eq!(typed.value(), value);
    }
}
