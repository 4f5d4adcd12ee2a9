//! Wire-format chunks: the serialized interchange form of node graphs.
//!
//! # Design
//!
//! A [`SerializedChunk`] is a flat, self-describing record set: a format
//! version, the (language key, version) pairs in use, and one record per
//! node. Records reference each other by identifier only; structure is
//! reconstructed by the codec (see [`codec`]). The same chunk shape is the
//! body of every bulk repository request and response.
//!
//! # Invariants
//!
//! - Records are unique by id within a chunk
//! - Combining chunks is add-if-absent: on id collision the record already
//!   present wins
//! - A chunk knows nothing about classifiers beyond their pointers; it can
//!   be manipulated without any registry

pub mod codec;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::id::NodeId;
use crate::model::language::MetaPointer;

/// Structural errors on raw chunks.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("chunk has no root record")]
    NoRoot,

    #[error("chunk has more than one root record: {first} and {second}")]
    AmbiguousRoot { first: NodeId, second: NodeId },

    #[error("chunk has no record for node {id}")]
    MissingRecord { id: NodeId },
}

/// A (language key, language version) pair used by a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsedLanguage {
    pub key: String,
    pub version: String,
}

/// One serialized property: feature pointer plus wire text, null when the
/// property is unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedProperty {
    pub property: MetaPointer,
    pub value: Option<String>,
}

/// One serialized containment: feature pointer plus ordered child ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedContainment {
    pub containment: MetaPointer,
    pub children: Vec<NodeId>,
}

/// One target of a serialized reference. The target id may be null when
/// only the resolve hint is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedReferenceTarget {
    pub resolve_info: Option<String>,
    pub reference: Option<NodeId>,
}

/// One serialized reference: feature pointer plus targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedReference {
    pub reference: MetaPointer,
    pub targets: Vec<SerializedReferenceTarget>,
}

/// The flat record of a single node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedNode {
    pub id: NodeId,
    pub classifier: MetaPointer,
    pub properties: Vec<SerializedProperty>,
    pub containments: Vec<SerializedContainment>,
    pub references: Vec<SerializedReference>,
    pub annotations: Vec<NodeId>,
    pub parent: Option<NodeId>,
}

impl SerializedNode {
    /// All ids this record points at structurally: children and
    /// annotations, not reference targets.
    fn owned_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.containments
            .iter()
            .flat_map(|c| c.children.iter())
            .chain(self.annotations.iter())
    }
}

/// A self-describing set of serialized node records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedChunk {
    pub serialization_format_version: String,
    pub languages: Vec<UsedLanguage>,
    pub nodes: Vec<SerializedNode>,
}

impl SerializedChunk {
    pub fn new(serialization_format_version: impl Into<String>) -> Self {
        Self {
            serialization_format_version: serialization_format_version.into(),
            languages: Vec::new(),
            nodes: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The record for a node id, if present.
    pub fn record(&self, id: &NodeId) -> Option<&SerializedNode> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.iter().map(|n| &n.id)
    }

    /// The single root record: a node whose parent is null or whose parent
    /// has no record in this chunk (a proxy parent).
    ///
    /// Counting a proxy parent as a root is a deliberate widening over
    /// requiring a literal null: the chunk of a retrieved subtree carries
    /// the subtree root's parent id without its record, and such a chunk
    /// still has exactly one root.
    ///
    /// # Errors
    ///
    /// `NoRoot` on an empty or rootless chunk, `AmbiguousRoot` when more
    /// than one record qualifies.
    pub fn root(&self) -> Result<&SerializedNode, ChunkError> {
        let present: BTreeSet<&NodeId> = self.ids().collect();
        let mut roots = self
            .nodes
            .iter()
            .filter(|n| n.parent.as_ref().is_none_or(|p| !present.contains(p)));
        let first = roots.next().ok_or(ChunkError::NoRoot)?;
        if let Some(second) = roots.next() {
            return Err(ChunkError::AmbiguousRoot {
                first: first.id.clone(),
                second: second.id.clone(),
            });
        }
        Ok(first)
    }

    /// Merge another chunk into this one. Records already present by id
    /// win; the language list becomes the deduplicated union.
    pub fn combine(&mut self, other: SerializedChunk) {
        for language in other.languages {
            if !self.languages.contains(&language) {
                self.languages.push(language);
            }
        }
        let present: BTreeSet<NodeId> = self.ids().cloned().collect();
        for node in other.nodes {
            if !present.contains(&node.id) {
                self.nodes.push(node);
            }
        }
    }

    /// Extract the structural closure of one record: the record itself plus
    /// everything reachable through containments and annotations.
    ///
    /// The language list of the result is recomputed from the pointers the
    /// kept records actually use.
    ///
    /// # Errors
    ///
    /// `MissingRecord` when the closure escapes the chunk, i.e. a child or
    /// annotation id has no record here.
    pub fn subchunk_for(&self, id: &NodeId) -> Result<SerializedChunk, ChunkError> {
        let mut kept: Vec<&SerializedNode> = Vec::new();
        let mut seen: BTreeSet<&NodeId> = BTreeSet::new();
        let mut queue = vec![id];
        while let Some(next) = queue.pop() {
            if !seen.insert(next) {
                continue;
            }
            let record = self.record(next).ok_or_else(|| ChunkError::MissingRecord {
                id: next.clone(),
            })?;
            kept.push(record);
            queue.extend(record.owned_ids());
        }

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
        for record in &kept {
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

        Ok(SerializedChunk {
            serialization_format_version: self.serialization_format_version.clone(),
            languages: used,
            nodes: kept.into_iter().cloned().collect(),
        })
    }
}
