//! binding::containment
//!
//! A live, add-only list view over a multi-valued containment.

use crate::model::node::{Node, NodeRef};

use super::BindingError;

/// Mutable view over one containment of one node.
///
/// The view reads through to the node on every call, so children added
/// through other paths are visible immediately. Only appends are offered;
/// removal and reordering go through [`Node::remove_child`] directly,
/// keeping the mutation surface of bulk appends small.
pub struct ContainmentList<'a> {
    node: &'a mut Node,
    containment: String,
}

impl<'a> ContainmentList<'a> {
    pub(crate) fn new(node: &'a mut Node, containment: &str) -> Self {
        Self {
            node,
            containment: containment.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.node.children_in(&self.containment).len()
    }

    pub fn is_empty(&self) -> bool {
        self.node.children_in(&self.containment).is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&NodeRef> {
        self.node.children_in(&self.containment).get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeRef> {
        self.node.children_in(&self.containment).iter()
    }

    /// Append a child, reporting whether the list grew.
    pub fn push(&mut self, child: Node) -> Result<bool, BindingError> {
        self.push_ref(NodeRef::Resolved(Box::new(child)))
    }

    /// Append a child or proxy, reporting whether the list grew.
    pub fn push_ref(&mut self, child: NodeRef) -> Result<bool, BindingError> {
        let before = self.len();
        self.node.add_child(self.containment.clone(), child)?;
        Ok(self.len() > before)
    }

    /// Append every node in order, stopping at the first failure.
    pub fn extend(&mut self, children: impl IntoIterator<Item = Node>) -> Result<(), BindingError> {
        for child in children {
            self.push(child)?;
        }
        Ok(())
    }
}
