//! model::node
//!
//! Generic, dynamically-typed model nodes.
//!
//! # Design
//!
//! A [`Node`] stores its state by feature name: a map of property values,
//! an ordered child list per containment, a value list per reference. Typed
//! domain wrappers (see [`crate::binding`]) read and write through this
//! storage, so the same node can be introspected, serialized and statically
//! accessed.
//!
//! A node whose content was intentionally not transferred is represented by
//! [`NodeRef::Proxy`], a tagged variant carrying only the identifier.
//! Callers must match on the variant; there is no node-shaped placeholder
//! that throws on access.
//!
//! # Invariants
//!
//! - Children are owned: a node can appear under exactly one containment
//!   slot of exactly one parent (ownership enforces no sharing)
//! - Child lists never contain holes; removal compacts the list
//! - Reference targets are identifiers, never owned nodes (references are
//!   non-owning by construction)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::id::NodeId;
use super::language::MetaPointer;

/// Errors from generic node operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NodeError {
    #[error("node {id} is a proxy; only its identifier is available")]
    Proxy { id: NodeId },

    #[error("node {child} already has parent {parent}; remove it first")]
    AlreadyParented { child: NodeId, parent: NodeId },
}

/// A scalar property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    String(String),
    Int(i64),
    Bool(bool),
    /// Wire text of a custom primitive type, decoded by a registered codec.
    Custom(String),
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

/// A value of a reference feature: an optional target identifier plus an
/// optional human-readable resolve hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceValue {
    pub resolve_info: Option<String>,
    pub target: Option<NodeId>,
}

impl ReferenceValue {
    pub fn to_target(target: NodeId) -> Self {
        Self {
            resolve_info: None,
            target: Some(target),
        }
    }
}

/// A node either fully materialized or known only by identifier.
///
/// Proxies stand in wherever a full node was intentionally not transferred:
/// children beyond a retrieval depth limit, targets outside the retrieved
/// partition. Matching on the variant forces the unresolved case to be
/// handled where it occurs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeRef {
    Resolved(Box<Node>),
    Proxy(NodeId),
}

impl NodeRef {
    /// The identifier, available for both variants.
    pub fn id(&self) -> &NodeId {
        match self {
            NodeRef::Resolved(node) => &node.id,
            NodeRef::Proxy(id) => id,
        }
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self, NodeRef::Proxy(_))
    }

    pub fn as_resolved(&self) -> Option<&Node> {
        match self {
            NodeRef::Resolved(node) => Some(node),
            NodeRef::Proxy(_) => None,
        }
    }

    pub fn as_resolved_mut(&mut self) -> Option<&mut Node> {
        match self {
            NodeRef::Resolved(node) => Some(node),
            NodeRef::Proxy(_) => None,
        }
    }

    /// The full node, or `NodeError::Proxy` when only the id is known.
    pub fn expect_resolved(&self) -> Result<&Node, NodeError> {
        match self {
            NodeRef::Resolved(node) => Ok(node),
            NodeRef::Proxy(id) => Err(NodeError::Proxy { id: id.clone() }),
        }
    }
}

/// An instance of a Concept or Annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Classifier pointer; may be absent on instances constructed before
    /// their language was derived (resolved lazily through the registry).
    pub classifier: Option<MetaPointer>,
    /// Identifier of the parent node. A parent id without a surrounding
    /// owning node (e.g. on the root of a retrieved subtree) is by
    /// definition a proxy parent: known by id, content not transferred.
    pub parent: Option<NodeId>,
    properties: BTreeMap<String, PropertyValue>,
    children: BTreeMap<String, Vec<NodeRef>>,
    references: BTreeMap<String, Vec<ReferenceValue>>,
    pub annotations: Vec<NodeId>,
}

impl Node {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            classifier: None,
            parent: None,
            properties: BTreeMap::new(),
            children: BTreeMap::new(),
            references: BTreeMap::new(),
            annotations: Vec::new(),
        }
    }

    pub fn with_classifier(mut self, classifier: MetaPointer) -> Self {
        self.classifier = Some(classifier);
        self
    }

    // --- properties ---

    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<PropertyValue>) {
        self.properties.insert(name.into(), value.into());
    }

    pub fn clear_property(&mut self, name: &str) {
        self.properties.remove(name);
    }

    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    // --- containments ---

    /// Children under the named containment, in insertion order.
    pub fn children_in(&self, containment: &str) -> &[NodeRef] {
        self.children.get(containment).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All children across all containments.
    pub fn children(&self) -> impl Iterator<Item = &NodeRef> {
        self.children.values().flatten()
    }

    pub fn containment_names(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(String::as_str)
    }

    /// Append a child under the named containment.
    ///
    /// Taking the child by value enforces the single-parent invariant: the
    /// child cannot simultaneously sit under another slot. A resolved child
    /// that still carries a foreign parent id is rejected; its parent
    /// pointer is updated to this node otherwise.
    pub fn add_child(&mut self, containment: impl Into<String>, mut child: NodeRef) -> Result<(), NodeError> {
        if let NodeRef::Resolved(node) = &mut child {
            match &node.parent {
                Some(parent) if *parent != self.id => {
                    return Err(NodeError::AlreadyParented {
                        child: node.id.clone(),
                        parent: parent.clone(),
                    });
                }
                _ => node.parent = Some(self.id.clone()),
            }
        }
        self.children.entry(containment.into()).or_default().push(child);
        Ok(())
    }

    /// Remove the child with the given id from whichever containment holds
    /// it, returning it. The list is compacted; no hole is left behind.
    pub fn remove_child(&mut self, id: &NodeId) -> Option<NodeRef> {
        for slot in self.children.values_mut() {
            if let Some(pos) = slot.iter().position(|c| c.id() == id) {
                let mut removed = slot.remove(pos);
                if let NodeRef::Resolved(node) = &mut removed {
                    node.parent = None;
                }
                return Some(removed);
            }
        }
        None
    }

    /// Remove all children under the named containment.
    pub fn clear_containment(&mut self, containment: &str) -> Vec<NodeRef> {
        self.children.remove(containment).unwrap_or_default()
    }

    // --- references ---

    pub fn reference_values(&self, reference: &str) -> &[ReferenceValue] {
        self.references.get(reference).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn set_reference_values(
        &mut self,
        reference: impl Into<String>,
        values: Vec<ReferenceValue>,
    ) {
        let reference = reference.into();
        if values.is_empty() {
            self.references.remove(&reference);
        } else {
            self.references.insert(reference, values);
        }
    }

    /// Replace the sole value of a single-valued reference; `None` clears it.
    pub fn set_only_reference_value(
        &mut self,
        reference: impl Into<String>,
        value: Option<ReferenceValue>,
    ) {
        self.set_reference_values(reference, value.into_iter().collect());
    }

    pub fn add_reference_value(&mut self, reference: impl Into<String>, value: ReferenceValue) {
        self.references.entry(reference.into()).or_default().push(value);
    }

    pub fn reference_names(&self) -> impl Iterator<Item = &str> {
        self.references.keys().map(String::as_str)
    }

    // --- traversal ---

    /// Walk all resolved descendants depth-first.
    ///
    /// Fails with `NodeError::Proxy` on the first proxy child encountered:
    /// a partial tree cannot claim to enumerate its descendants.
    pub fn walk_descendants(&self) -> Result<Vec<&Node>, NodeError> {
        let mut out = Vec::new();
        self.collect_descendants(&mut out)?;
        Ok(out)
    }

    fn collect_descendants<'a>(&'a self, out: &mut Vec<&'a Node>) -> Result<(), NodeError> {
        for child in self.children() {
            let node = child.expect_resolved()?;
            out.push(node);
            node.collect_descendants(out)?;
        }
        Ok(())
    }

    /// Find a node by id in this tree (self included), ignoring proxies.
    pub fn find_by_id(&self, id: &NodeId) -> Option<&Node> {
        if &self.id == id {
            return Some(self);
        }
        self.children()
            .filter_map(NodeRef::as_resolved)
            .find_map(|c| c.find_by_id(id))
    }
}
