//! chunk::codec
//!
//! Encoding node trees into chunks and decoding chunks back into trees.
//!
//! # Design
//!
//! The encoder and decoder translate between name-keyed node storage and
//! key-pointer wire records, using the languages handed to them. Decoding
//! is policy-driven: whenever a structurally required node has no record in
//! the chunk (a child beyond the retrieval depth, a parent outside the
//! transfer, a reference target in another partition), the configured
//! [`UnavailablePolicy`] decides between a proxy, an absence, and a hard
//! failure.
//!
//! Instance construction during decode goes through an [`Instantiator`]:
//! classifiers with a registered factory produce domain-shaped nodes,
//! everything else decodes as a plain generic node.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::meta::registry::{PrimitiveDeserializer, PrimitiveSerializer};
use crate::model::id::NodeId;
use crate::model::language::{
    find_classifier, Classifier, Feature, Language, MetaPointer,
};
use crate::model::node::{Node, NodeError, NodeRef, PropertyValue, ReferenceValue};

use super::{
    SerializedChunk, SerializedContainment, SerializedNode, SerializedProperty,
    SerializedReference, SerializedReferenceTarget, UsedLanguage,
};

/// Errors from encoding or decoding chunks.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("node {id} has no classifier and cannot be serialized")]
    MissingClassifier { id: NodeId },

    #[error("no known classifier for pointer {pointer}")]
    UnknownClassifier { pointer: MetaPointer },

    #[error("classifier of node {node} has no feature named {name}")]
    UnknownFeature { node: NodeId, name: String },

    #[error("classifier of node {node} has no feature with key {key}")]
    UnknownFeatureKey { node: NodeId, key: String },

    #[error("feature {name} of node {node} is not of the expected kind")]
    FeatureKindMismatch { node: NodeId, name: String },

    #[error("node {id} required as {role} but not present in the chunk")]
    Unavailable { id: NodeId, role: &'static str },

    #[error("invalid value for {feature} of node {node}: {message}")]
    Value {
        node: NodeId,
        feature: String,
        message: String,
    },

    #[error("containment records of node {id} form a cycle")]
    ContainmentCycle { id: NodeId },

    #[error(transparent)]
    Node(#[from] NodeError),
}

/// What to do when a structurally required node has no record in the chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailablePolicy {
    /// Keep the identifier as a proxy.
    Proxy,
    /// Drop the slot entirely.
    Absent,
    /// Fail the whole decode.
    Fail,
}

/// Decode-time instance factories, keyed by classifier id.
#[derive(Debug, Default)]
pub struct Instantiator {
    factories: BTreeMap<String, fn() -> Node>,
}

impl Instantiator {
    pub fn register(&mut self, classifier_id: String, factory: fn() -> Node) {
        self.factories.insert(classifier_id, factory);
    }

    /// Build a bare instance for the classifier, assigning the incoming
    /// wire identifier and pointer. Falls back to a plain generic node when
    /// no factory is registered.
    pub fn instantiate(&self, classifier_id: &str, id: NodeId, pointer: MetaPointer) -> Node {
        match self.factories.get(classifier_id) {
            Some(factory) => {
                let mut node = factory();
                node.id = id;
                node.classifier = Some(pointer);
                node
            }
            None => Node::new(id).with_classifier(pointer),
        }
    }
}

/// Scalar codecs keyed by primitive-type element key. Unregistered keys
/// fall back to the built-in string/integer/boolean conversions, and past
/// those to opaque custom text.
#[derive(Debug, Default)]
pub struct PrimitiveCodecs {
    serializers: BTreeMap<String, PrimitiveSerializer>,
    deserializers: BTreeMap<String, PrimitiveDeserializer>,
}

impl PrimitiveCodecs {
    pub fn register_serializer(&mut self, primitive_key: String, serializer: PrimitiveSerializer) {
        self.serializers.insert(primitive_key, serializer);
    }

    pub fn register_deserializer(
        &mut self,
        primitive_key: String,
        deserializer: PrimitiveDeserializer,
    ) {
        self.deserializers.insert(primitive_key, deserializer);
    }

    /// Wire text for a property value.
    pub fn serialize(&self, primitive_key: &str, value: &PropertyValue) -> String {
        if let Some(serializer) = self.serializers.get(primitive_key) {
            return serializer(value);
        }
        match value {
            PropertyValue::String(s) | PropertyValue::Custom(s) => s.clone(),
            PropertyValue::Int(i) => i.to_string(),
            PropertyValue::Bool(b) => b.to_string(),
        }
    }

    /// Property value for wire text.
    pub fn deserialize(&self, primitive_key: &str, text: &str) -> Result<PropertyValue, String> {
        if let Some(deserializer) = self.deserializers.get(primitive_key) {
            return deserializer(text);
        }
        match primitive_key {
            "builtins-String-key" => Ok(PropertyValue::String(text.to_string())),
            "builtins-Integer-key" => text
                .parse::<i64>()
                .map(PropertyValue::Int)
                .map_err(|e| format!("not an integer: {e}")),
            "builtins-Boolean-key" => match text {
                "true" => Ok(PropertyValue::Bool(true)),
                "false" => Ok(PropertyValue::Bool(false)),
                other => Err(format!("not a boolean: {other}")),
            },
            _ => Ok(PropertyValue::Custom(text.to_string())),
        }
    }
}

/// Find a feature by name on a classifier, walking the extended chain, and
/// report the language declaring it (needed for the feature's wire
/// pointer, which names the declaring language).
fn feature_with_owner<'a>(
    languages: &'a [Language],
    classifier: &'a Classifier,
    name: &str,
) -> Option<(&'a Language, &'a Feature)> {
    let mut current = Some(classifier);
    while let Some(c) = current {
        if let Some(feature) = c.feature_by_name(name) {
            let owner = languages
                .iter()
                .find(|l| l.classifier_by_key(&c.key).is_some())?;
            return Some((owner, feature));
        }
        current = c
            .extended()
            .and_then(|key| languages.iter().find_map(|l| l.classifier_by_key(key)));
    }
    None
}

/// Find a feature by element key, walking the extended chain.
fn feature_with_key<'a>(
    languages: &'a [Language],
    classifier: &'a Classifier,
    key: &str,
) -> Option<&'a Feature> {
    let mut current = Some(classifier);
    while let Some(c) = current {
        if let Some(feature) = c.features.iter().find(|f| f.key() == key) {
            return Some(feature);
        }
        current = c
            .extended()
            .and_then(|k| languages.iter().find_map(|l| l.classifier_by_key(k)));
    }
    None
}

/// Serializes node trees into chunks.
pub struct Encoder<'a> {
    languages: &'a [Language],
    codecs: &'a PrimitiveCodecs,
    format_version: String,
}

impl<'a> Encoder<'a> {
    pub fn new(
        languages: &'a [Language],
        codecs: &'a PrimitiveCodecs,
        format_version: impl Into<String>,
    ) -> Self {
        Self {
            languages,
            codecs,
            format_version: format_version.into(),
        }
    }

    /// Encode a node and all its resolved descendants. Proxy children
    /// contribute their id to the parent's containment list but no record.
    pub fn encode_tree(&self, root: &Node) -> Result<SerializedChunk, CodecError> {
        let mut nodes = Vec::new();
        self.encode_into(root, &mut nodes)?;
        Ok(self.finish(nodes))
    }

    /// Encode exactly the given nodes, without descending into children.
    pub fn encode_nodes(&self, nodes: &[&Node]) -> Result<SerializedChunk, CodecError> {
        let mut records = Vec::new();
        for node in nodes {
            records.push(self.encode_node(node)?);
        }
        Ok(self.finish(records))
    }

    fn encode_into(
        &self,
        node: &Node,
        out: &mut Vec<SerializedNode>,
    ) -> Result<(), CodecError> {
        out.push(self.encode_node(node)?);
        for child in node.children() {
            if let NodeRef::Resolved(child) = child {
                self.encode_into(child, out)?;
            }
        }
        Ok(())
    }

    fn encode_node(&self, node: &Node) -> Result<SerializedNode, CodecError> {
        let pointer = node
            .classifier
            .clone()
            .ok_or_else(|| CodecError::MissingClassifier { id: node.id.clone() })?;
        let classifier = find_classifier(self.languages, &pointer)
            .ok_or_else(|| CodecError::UnknownClassifier { pointer: pointer.clone() })?;

        let mut properties = Vec::new();
        for name in node.property_names() {
            let (owner, feature) = feature_with_owner(self.languages, classifier, name)
                .ok_or_else(|| CodecError::UnknownFeature {
                    node: node.id.clone(),
                    name: name.to_string(),
                })?;
            let Feature::Property { key, primitive, .. } = feature else {
                return Err(CodecError::FeatureKindMismatch {
                    node: node.id.clone(),
                    name: name.to_string(),
                });
            };
            let value = node
                .property(name)
                .map(|v| self.codecs.serialize(&primitive.key, v));
            properties.push(SerializedProperty {
                property: MetaPointer::new(&owner.key, &owner.version, key),
                value,
            });
        }

        let mut containments = Vec::new();
        for name in node.containment_names() {
            let (owner, feature) = feature_with_owner(self.languages, classifier, name)
                .ok_or_else(|| CodecError::UnknownFeature {
                    node: node.id.clone(),
                    name: name.to_string(),
                })?;
            let Feature::Containment { key, .. } = feature else {
                return Err(CodecError::FeatureKindMismatch {
                    node: node.id.clone(),
                    name: name.to_string(),
                });
            };
            containments.push(SerializedContainment {
                containment: MetaPointer::new(&owner.key, &owner.version, key),
                children: node.children_in(name).iter().map(|c| c.id().clone()).collect(),
            });
        }

        let mut references = Vec::new();
        for name in node.reference_names() {
            let (owner, feature) = feature_with_owner(self.languages, classifier, name)
                .ok_or_else(|| CodecError::UnknownFeature {
                    node: node.id.clone(),
                    name: name.to_string(),
                })?;
            let Feature::Reference { key, .. } = feature else {
                return Err(CodecError::FeatureKindMismatch {
                    node: node.id.clone(),
                    name: name.to_string(),
                });
            };
            references.push(SerializedReference {
                reference: MetaPointer::new(&owner.key, &owner.version, key),
                targets: node
                    .reference_values(name)
                    .iter()
                    .map(|v| SerializedReferenceTarget {
                        resolve_info: v.resolve_info.clone(),
                        reference: v.target.clone(),
                    })
                    .collect(),
            });
        }

        Ok(SerializedNode {
            id: node.id.clone(),
            classifier: pointer,
            properties,
            containments,
            references,
            annotations: node.annotations.clone(),
            parent: node.parent.clone(),
        })
    }

    fn finish(&self, nodes: Vec<SerializedNode>) -> SerializedChunk {
        let mut used: Vec<UsedLanguage> = Vec::new();
        let mut note = |ptr: &MetaPointer| {
            let pair = UsedLanguage {
                key: ptr.language.clone(),
                version: ptr.version.clone(),
            };
            if !used.contains(&pair) {
                used.push(pair);
            }
        };
        for record in &nodes {
            note(&record.classifier);
            for p in &record.properties {
                note(&p.property);
            }
            for c in &record.containments {
                note(&c.containment);
            }
            for r in &record.references {
                note(&r.reference);
            }
        }
        SerializedChunk {
            serialization_format_version: self.format_version.clone(),
            languages: used,
            nodes,
        }
    }
}

/// Reconstructs node trees from chunks under configurable unavailability
/// policies.
pub struct Decoder<'a> {
    languages: &'a [Language],
    instantiator: &'a Instantiator,
    codecs: &'a PrimitiveCodecs,
    unavailable_children: UnavailablePolicy,
    unavailable_parent: UnavailablePolicy,
    unavailable_reference_target: UnavailablePolicy,
}

impl<'a> Decoder<'a> {
    pub fn new(
        languages: &'a [Language],
        instantiator: &'a Instantiator,
        codecs: &'a PrimitiveCodecs,
    ) -> Self {
        Self {
            languages,
            instantiator,
            codecs,
            unavailable_children: UnavailablePolicy::Fail,
            unavailable_parent: UnavailablePolicy::Absent,
            unavailable_reference_target: UnavailablePolicy::Proxy,
        }
    }

    pub fn unavailable_children(mut self, policy: UnavailablePolicy) -> Self {
        self.unavailable_children = policy;
        self
    }

    pub fn unavailable_parent(mut self, policy: UnavailablePolicy) -> Self {
        self.unavailable_parent = policy;
        self
    }

    pub fn unavailable_reference_target(mut self, policy: UnavailablePolicy) -> Self {
        self.unavailable_reference_target = policy;
        self
    }

    /// Decode a chunk into its root trees. A record is a root when its
    /// parent is null or has no record in the chunk.
    pub fn decode(&self, chunk: &SerializedChunk) -> Result<Vec<Node>, CodecError> {
        let index: BTreeMap<&NodeId, &SerializedNode> =
            chunk.nodes.iter().map(|n| (&n.id, n)).collect();
        let mut roots = Vec::new();
        let mut visited = BTreeSet::new();
        for record in &chunk.nodes {
            let is_root = record
                .parent
                .as_ref()
                .is_none_or(|p| !index.contains_key(p));
            if is_root {
                roots.push(self.decode_record(record, &index, &mut visited)?);
            }
        }
        // Every record must be reachable from some root; mutually-parented
        // records would otherwise silently vanish.
        if let Some(orphan) = chunk.nodes.iter().find(|n| !visited.contains(&n.id)) {
            return Err(CodecError::ContainmentCycle {
                id: orphan.id.clone(),
            });
        }
        Ok(roots)
    }

    fn decode_record(
        &self,
        record: &SerializedNode,
        index: &BTreeMap<&NodeId, &SerializedNode>,
        visited: &mut BTreeSet<NodeId>,
    ) -> Result<Node, CodecError> {
        if !visited.insert(record.id.clone()) {
            return Err(CodecError::ContainmentCycle {
                id: record.id.clone(),
            });
        }
        let classifier = find_classifier(self.languages, &record.classifier).ok_or_else(|| {
            CodecError::UnknownClassifier {
                pointer: record.classifier.clone(),
            }
        })?;
        let mut node = self.instantiator.instantiate(
            &classifier.id,
            record.id.clone(),
            record.classifier.clone(),
        );

        node.parent = match &record.parent {
            None => None,
            Some(parent) if index.contains_key(parent) => Some(parent.clone()),
            Some(parent) => match self.unavailable_parent {
                UnavailablePolicy::Proxy => Some(parent.clone()),
                UnavailablePolicy::Absent => None,
                UnavailablePolicy::Fail => {
                    return Err(CodecError::Unavailable {
                        id: parent.clone(),
                        role: "parent",
                    });
                }
            },
        };

        for property in &record.properties {
            let feature = feature_with_key(self.languages, classifier, &property.property.key)
                .ok_or_else(|| CodecError::UnknownFeatureKey {
                    node: record.id.clone(),
                    key: property.property.key.clone(),
                })?;
            let Feature::Property { name, primitive, .. } = feature else {
                return Err(CodecError::FeatureKindMismatch {
                    node: record.id.clone(),
                    name: feature.name().to_string(),
                });
            };
            if let Some(text) = &property.value {
                let value = self
                    .codecs
                    .deserialize(&primitive.key, text)
                    .map_err(|message| CodecError::Value {
                        node: record.id.clone(),
                        feature: name.clone(),
                        message,
                    })?;
                node.set_property(name.clone(), value);
            }
        }

        for containment in &record.containments {
            let feature = feature_with_key(self.languages, classifier, &containment.containment.key)
                .ok_or_else(|| CodecError::UnknownFeatureKey {
                    node: record.id.clone(),
                    key: containment.containment.key.clone(),
                })?;
            let Feature::Containment { name, .. } = feature else {
                return Err(CodecError::FeatureKindMismatch {
                    node: record.id.clone(),
                    name: feature.name().to_string(),
                });
            };
            let name = name.clone();
            for child_id in &containment.children {
                match index.get(child_id) {
                    Some(child_record) => {
                        let child = self.decode_record(child_record, index, visited)?;
                        node.add_child(name.clone(), NodeRef::Resolved(Box::new(child)))?;
                    }
                    None => match self.unavailable_children {
                        UnavailablePolicy::Proxy => {
                            node.add_child(name.clone(), NodeRef::Proxy(child_id.clone()))?;
                        }
                        UnavailablePolicy::Absent => {}
                        UnavailablePolicy::Fail => {
                            return Err(CodecError::Unavailable {
                                id: child_id.clone(),
                                role: "child",
                            });
                        }
                    },
                }
            }
        }

        for reference in &record.references {
            let feature = feature_with_key(self.languages, classifier, &reference.reference.key)
                .ok_or_else(|| CodecError::UnknownFeatureKey {
                    node: record.id.clone(),
                    key: reference.reference.key.clone(),
                })?;
            let Feature::Reference { name, .. } = feature else {
                return Err(CodecError::FeatureKindMismatch {
                    node: record.id.clone(),
                    name: feature.name().to_string(),
                });
            };
            let mut values = Vec::new();
            for target in &reference.targets {
                let target_id = match &target.reference {
                    None => None,
                    Some(id) if index.contains_key(id) => Some(id.clone()),
                    Some(id) => match self.unavailable_reference_target {
                        UnavailablePolicy::Proxy => Some(id.clone()),
                        UnavailablePolicy::Absent => None,
                        UnavailablePolicy::Fail => {
                            return Err(CodecError::Unavailable {
                                id: id.clone(),
                                role: "reference target",
                            });
                        }
                    },
                };
                values.push(ReferenceValue {
                    resolve_info: target.resolve_info.clone(),
                    target: target_id,
                });
            }
            node.set_reference_values(name.clone(), values);
        }

        node.annotations = record.annotations.clone();
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::builder::derive_language;
    use crate::meta::builtins;
    use crate::meta::describe::{FeatureDescriptor, FeatureKind, TypeDescriptor, TypeKey};
    use crate::meta::registry::MetamodelRegistry;
    use crate::model::language::LanguageVersion;

    const TASK_LIST: TypeDescriptor = TypeDescriptor::partition(
        "TaskList",
        TypeKey("tasks.TaskList"),
        &[builtins::NODE],
        &[FeatureDescriptor::new(
            "items",
            FeatureKind::ContainmentMany {
                target: TypeKey("tasks.Task"),
            },
        )],
    );

    const TASK: TypeDescriptor = TypeDescriptor::concept(
        "Task",
        TypeKey("tasks.Task"),
        &[builtins::NODE],
        &[
            FeatureDescriptor::new(
                "name",
                FeatureKind::Property {
                    scalar: builtins::STRING,
                },
            ),
            FeatureDescriptor::new(
                "points",
                FeatureKind::Property {
                    scalar: builtins::INTEGER,
                },
            ),
            FeatureDescriptor::new(
                "blockedBy",
                FeatureKind::ReferenceMany {
                    target: TypeKey("tasks.Task"),
                },
            ),
            FeatureDescriptor::new(
                "subtasks",
                FeatureKind::ContainmentMany {
                    target: TypeKey("tasks.Task"),
                },
            ),
        ],
    );

    struct Fixture {
        languages: Vec<Language>,
        registry: MetamodelRegistry,
        instantiator: Instantiator,
        codecs: PrimitiveCodecs,
    }

    fn fixture() -> Fixture {
        let mut registry = MetamodelRegistry::with_builtins();
        let lang = derive_language(
            "tasks",
            &[&TASK_LIST, &TASK],
            &mut registry,
            LanguageVersion::CURRENT,
        )
        .unwrap();
        let languages = vec![lang, builtins::language(LanguageVersion::CURRENT)];
        let mut instantiator = Instantiator::default();
        registry.prepare_instantiator(&mut instantiator, LanguageVersion::CURRENT);
        let mut codecs = PrimitiveCodecs::default();
        registry.prepare_primitive_codecs(&mut codecs);
        Fixture {
            languages,
            registry,
            instantiator,
            codecs,
        }
    }

    fn id(s: &str) -> NodeId {
        NodeId::new(s).unwrap()
    }

    fn task(f: &Fixture, node_id: &str, name: &str) -> Node {
        let pointer = f
            .registry
            .classifier(TypeKey("tasks.Task"), LanguageVersion::CURRENT)
            .unwrap()
            .pointer
            .clone();
        let mut node = Node::new(id(node_id)).with_classifier(pointer);
        node.set_property("name", name);
        node
    }

    #[test]
    fn encode_tree_produces_pointer_keyed_records() {
        let f = fixture();
        let list_pointer = f
            .registry
            .classifier(TypeKey("tasks.TaskList"), LanguageVersion::CURRENT)
            .unwrap()
            .pointer
            .clone();
        let mut list = Node::new(id("list")).with_classifier(list_pointer);
        let mut t = task(&f, "t1", "write docs");
        t.set_property("points", 3i64);
        list.add_child("items", NodeRef::Resolved(Box::new(t))).unwrap();

        let encoder = Encoder::new(&f.languages, &f.codecs, "2024.1");
        let chunk = encoder.encode_tree(&list).unwrap();

        assert_eq!(chunk.nodes.len(), 2);
        let record = chunk.record(&id("t1")).unwrap();
        assert_eq!(record.classifier.key, "tasks-Task-key");
        assert_eq!(record.parent, Some(id("list")));
        let name = record
            .properties
            .iter()
            .find(|p| p.property.key == "tasks-Task-name-key")
            .unwrap();
        assert_eq!(name.value.as_deref(), Some("write docs"));
        let points = record
            .properties
            .iter()
            .find(|p| p.property.key == "tasks-Task-points-key")
            .unwrap();
        assert_eq!(points.value.as_deref(), Some("3"));
        let list_record = chunk.record(&id("list")).unwrap();
        assert_eq!(list_record.containments[0].children, vec![id("t1")]);
        assert!(chunk
            .languages
            .iter()
            .any(|l| l.key == "language-tasks-key"));
    }

    #[test]
    fn proxy_children_encode_as_ids_without_records() {
        let f = fixture();
        let mut t = task(&f, "t1", "parent");
        t.add_child("subtasks", NodeRef::Proxy(id("far"))).unwrap();

        let encoder = Encoder::new(&f.languages, &f.codecs, "2024.1");
        let chunk = encoder.encode_tree(&t).unwrap();

        assert_eq!(chunk.nodes.len(), 1);
        assert_eq!(chunk.nodes[0].containments[0].children, vec![id("far")]);
    }

    #[test]
    fn missing_classifier_fails_encoding() {
        let f = fixture();
        let bare = Node::new(id("n"));
        let encoder = Encoder::new(&f.languages, &f.codecs, "2024.1");
        assert!(matches!(
            encoder.encode_tree(&bare),
            Err(CodecError::MissingClassifier { .. })
        ));
    }

    #[test]
    fn decode_rebuilds_the_tree() {
        let f = fixture();
        let mut root = task(&f, "t1", "root");
        root.set_property("points", 8i64);
        let child = task(&f, "t2", "child");
        root.add_child("subtasks", NodeRef::Resolved(Box::new(child)))
            .unwrap();

        let encoder = Encoder::new(&f.languages, &f.codecs, "2024.1");
        let chunk = encoder.encode_tree(&root).unwrap();
        let decoder = Decoder::new(&f.languages, &f.instantiator, &f.codecs);
        let roots = decoder.decode(&chunk).unwrap();

        assert_eq!(roots.len(), 1);
        let decoded = &roots[0];
        assert_eq!(decoded.id, id("t1"));
        assert_eq!(decoded.property("points"), Some(&PropertyValue::Int(8)));
        let child = decoded.children_in("subtasks")[0].as_resolved().unwrap();
        assert_eq!(
            child.property("name"),
            Some(&PropertyValue::String("child".into()))
        );
        assert_eq!(child.parent, Some(id("t1")));
    }

    #[test]
    fn unavailable_child_follows_policy() {
        let f = fixture();
        let mut t = task(&f, "t1", "parent");
        t.add_child("subtasks", NodeRef::Proxy(id("far"))).unwrap();
        let encoder = Encoder::new(&f.languages, &f.codecs, "2024.1");
        let chunk = encoder.encode_tree(&t).unwrap();

        let base = Decoder::new(&f.languages, &f.instantiator, &f.codecs);
        assert!(matches!(
            base.decode(&chunk),
            Err(CodecError::Unavailable { role: "child", .. })
        ));

        let proxied = Decoder::new(&f.languages, &f.instantiator, &f.codecs)
            .unavailable_children(UnavailablePolicy::Proxy)
            .decode(&chunk)
            .unwrap();
        assert!(proxied[0].children_in("subtasks")[0].is_proxy());

        let dropped = Decoder::new(&f.languages, &f.instantiator, &f.codecs)
            .unavailable_children(UnavailablePolicy::Absent)
            .decode(&chunk)
            .unwrap();
        assert!(dropped[0].children_in("subtasks").is_empty());
    }

    #[test]
    fn unavailable_parent_follows_policy() {
        let f = fixture();
        let mut t = task(&f, "t1", "detached");
        t.parent = Some(id("elsewhere"));
        let encoder = Encoder::new(&f.languages, &f.codecs, "2024.1");
        let chunk = encoder.encode_nodes(&[&t]).unwrap();

        let absent = Decoder::new(&f.languages, &f.instantiator, &f.codecs)
            .decode(&chunk)
            .unwrap();
        assert_eq!(absent[0].parent, None);

        let proxied = Decoder::new(&f.languages, &f.instantiator, &f.codecs)
            .unavailable_parent(UnavailablePolicy::Proxy)
            .decode(&chunk)
            .unwrap();
        assert_eq!(proxied[0].parent, Some(id("elsewhere")));

        assert!(matches!(
            Decoder::new(&f.languages, &f.instantiator, &f.codecs)
                .unavailable_parent(UnavailablePolicy::Fail)
                .decode(&chunk),
            Err(CodecError::Unavailable { role: "parent", .. })
        ));
    }

    #[test]
    fn unavailable_reference_target_follows_policy() {
        let f = fixture();
        let mut t = task(&f, "t1", "blocked");
        t.add_reference_value("blockedBy", ReferenceValue::to_target(id("elsewhere")));
        let encoder = Encoder::new(&f.languages, &f.codecs, "2024.1");
        let chunk = encoder.encode_nodes(&[&t]).unwrap();

        // The default keeps out-of-chunk targets as ids; references are
        // non-owning, so an id is already the full value.
        let kept = Decoder::new(&f.languages, &f.instantiator, &f.codecs)
            .decode(&chunk)
            .unwrap();
        assert_eq!(
            kept[0].reference_values("blockedBy")[0].target,
            Some(id("elsewhere"))
        );

        let dropped = Decoder::new(&f.languages, &f.instantiator, &f.codecs)
            .unavailable_reference_target(UnavailablePolicy::Absent)
            .decode(&chunk)
            .unwrap();
        assert_eq!(dropped[0].reference_values("blockedBy")[0].target, None);
    }

    #[test]
    fn unknown_classifier_fails_decoding() {
        let f = fixture();
        let chunk = SerializedChunk {
            serialization_format_version: "2024.1".into(),
            languages: Vec::new(),
            nodes: vec![SerializedNode {
                id: id("n"),
                classifier: MetaPointer::new("language-nowhere-key", "1", "nowhere-X-key"),
                properties: Vec::new(),
                containments: Vec::new(),
                references: Vec::new(),
                annotations: Vec::new(),
                parent: None,
            }],
        };
        let decoder = Decoder::new(&f.languages, &f.instantiator, &f.codecs);
        assert!(matches!(
            decoder.decode(&chunk),
            Err(CodecError::UnknownClassifier { .. })
        ));
    }

    #[test]
    fn mutually_parented_records_are_rejected() {
        let f = fixture();
        let pointer = f
            .registry
            .classifier(TypeKey("tasks.Task"), LanguageVersion::CURRENT)
            .unwrap()
            .pointer
            .clone();
        let record = |node_id: &str, parent: &str, child: &str| SerializedNode {
            id: id(node_id),
            classifier: pointer.clone(),
            properties: Vec::new(),
            containments: vec![SerializedContainment {
                containment: MetaPointer::new(
                    "language-tasks-key",
                    "1",
                    "tasks-Task-subtasks-key",
                ),
                children: vec![id(child)],
            }],
            references: Vec::new(),
            annotations: Vec::new(),
            parent: Some(id(parent)),
        };
        let chunk = SerializedChunk {
            serialization_format_version: "2024.1".into(),
            languages: Vec::new(),
            nodes: vec![record("a", "b", "b"), record("b", "a", "a")],
        };
        let decoder = Decoder::new(&f.languages, &f.instantiator, &f.codecs);
        assert!(matches!(
            decoder.decode(&chunk),
            Err(CodecError::ContainmentCycle { .. })
        ));
    }

    #[test]
    fn custom_primitive_codecs_round_trip() {
        let mut registry = MetamodelRegistry::with_builtins();
        const INSTANT: TypeDescriptor =
            TypeDescriptor::primitive("Instant", TypeKey("tasks.Instant"));
        const EVENT: TypeDescriptor = TypeDescriptor::concept(
            "Event",
            TypeKey("tasks.Event"),
            &[builtins::NODE],
            &[FeatureDescriptor::new(
                "at",
                FeatureKind::Property {
                    scalar: TypeKey("tasks.Instant"),
                },
            )],
        );
        let lang = derive_language(
            "tasks",
            &[&INSTANT, &EVENT],
            &mut registry,
            LanguageVersion::CURRENT,
        )
        .unwrap();
        registry
            .set_primitive_codecs(
                TypeKey("tasks.Instant"),
                LanguageVersion::CURRENT,
                |v| match v {
                    PropertyValue::Custom(s) => format!("@{s}"),
                    other => panic!("unexpected value {other:?}"),
                },
                |text| {
                    text.strip_prefix('@')
                        .map(|s| PropertyValue::Custom(s.to_string()))
                        .ok_or_else(|| "missing marker".to_string())
                },
            )
            .unwrap();

        let languages = vec![lang, builtins::language(LanguageVersion::CURRENT)];
        let mut codecs = PrimitiveCodecs::default();
        registry.prepare_primitive_codecs(&mut codecs);
        let instantiator = Instantiator::default();

        let event_pointer = registry
            .classifier(TypeKey("tasks.Event"), LanguageVersion::CURRENT)
            .unwrap()
            .pointer
            .clone();
        let mut event = Node::new(id("e1")).with_classifier(event_pointer);
        event.set_property("at", PropertyValue::Custom("noon".into()));

        let encoder = Encoder::new(&languages, &codecs, "2024.1");
        let chunk = encoder.encode_tree(&event).unwrap();
        assert_eq!(chunk.nodes[0].properties[0].value.as_deref(), Some("@noon"));

        let decoder = Decoder::new(&languages, &instantiator, &codecs);
        let decoded = decoder.decode(&chunk).unwrap();
        assert_eq!(
            decoded[0].property("at"),
            Some(&PropertyValue::Custom("noon".into()))
        );
    }

    #[test]
    fn factory_registered_types_decode_through_their_factory() {
        let f = fixture();
        let mut registry = MetamodelRegistry::with_builtins();
        const FLAGGED: TypeDescriptor = TypeDescriptor::concept(
            "Flagged",
            TypeKey("tasks.Flagged"),
            &[builtins::NODE],
            &[],
        )
        .with_factory(|| {
            let mut n = Node::new(NodeId::random());
            n.set_property("seeded", true);
            n
        });
        let lang = derive_language(
            "flags",
            &[&FLAGGED],
            &mut registry,
            LanguageVersion::CURRENT,
        )
        .unwrap();
        let mut instantiator = Instantiator::default();
        registry.prepare_instantiator(&mut instantiator, LanguageVersion::CURRENT);

        let pointer = registry
            .classifier(TypeKey("tasks.Flagged"), LanguageVersion::CURRENT)
            .unwrap()
            .pointer
            .clone();
        let chunk = SerializedChunk {
            serialization_format_version: "2024.1".into(),
            languages: Vec::new(),
            nodes: vec![SerializedNode {
                id: id("f1"),
                classifier: pointer,
                properties: Vec::new(),
                containments: Vec::new(),
                references: Vec::new(),
                annotations: Vec::new(),
                parent: None,
            }],
        };
        let languages = vec![lang];
        let decoder = Decoder::new(&languages, &instantiator, &f.codecs);
        let decoded = decoder.decode(&chunk).unwrap();
        assert_eq!(decoded[0].id, id("f1"));
        assert_eq!(decoded[0].property("seeded"), Some(&PropertyValue::Bool(true)));
    }
}
