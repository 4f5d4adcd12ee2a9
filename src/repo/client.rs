//! repo::client
//!
//! The repository synchronization client: partition lifecycle, depth-limited
//! retrieval, tree storage, composite mutations, ancestor walks and
//! inspection.
//!
//! # Design
//!
//! Every operation is a blocking call with no retries and no session state
//! beyond the registered languages and fixed connection parameters.
//! Composite operations (`append_tree`, the reference and property setters,
//! `clear_containment`) are non-atomic read-modify-write sequences built
//! from two or three requests; a concurrent external mutation between the
//! retrieve and the store is a lost-update race this client does not detect.
//! Running them concurrently against the same node id requires external
//! coordination.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::chunk::codec::{Decoder, Encoder, Instantiator, PrimitiveCodecs, UnavailablePolicy};
use crate::chunk::SerializedChunk;
use crate::meta::builtins;
use crate::meta::registry::MetamodelRegistry;
use crate::model::id::NodeId;
use crate::model::language::{
    feature_by_name, find_classifier, ClassifierKind, Feature, Language, LanguageVersion,
    MetaPointer,
};
use crate::model::node::{Node, NodeRef, PropertyValue, ReferenceValue};

use super::error::RepoError;
use super::lowlevel::{Connection, LowLevelClient, StoreOperation};

/// Depth limit used for whole-subtree retrieval. Kept below the largest
/// integer JavaScript-backed servers handle exactly.
pub const MAX_DEPTH: i32 = i32::MAX;

/// How much of a node's subtree a retrieval materializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalMode {
    /// The node itself; children become proxies.
    SingleNode,
    /// The full reachable subtree; truncation is a protocol violation.
    EntireSubtree,
}

impl RetrievalMode {
    fn depth_limit(&self) -> i32 {
        match self {
            RetrievalMode::SingleNode => 0,
            RetrievalMode::EntireSubtree => MAX_DEPTH,
        }
    }
}

/// Connection parameters of a [`RepoClient`].
#[derive(Debug, Clone)]
pub struct RepoClientConfig {
    pub hostname: String,
    pub port: u16,
    pub client_id: String,
    pub repository: String,
    pub authorization_token: Option<String>,
    pub connect_timeout: Duration,
    pub call_timeout: Duration,
}

impl Default for RepoClientConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            port: 3005,
            client_id: "canopy-client".to_string(),
            repository: "default".to_string(),
            authorization_token: None,
            connect_timeout: Duration::from_secs(60),
            call_timeout: Duration::from_secs(60),
        }
    }
}

impl RepoClientConfig {
    fn base_url(&self) -> String {
        format!("http://{}:{}", self.hostname, self.port)
    }
}

/// One entry of a bulk reference update.
#[derive(Debug, Clone)]
pub struct ReferenceData {
    pub container: NodeId,
    pub reference: String,
    pub targets: Vec<NodeId>,
}

/// (language key, classifier key) identifying a classifier in inspection
/// results.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClassifierKey {
    pub language: String,
    pub classifier: String,
}

/// Matching ids plus the server-reported total for one classifier. The
/// size may exceed `ids.len()` when the server truncated under a limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierResult {
    pub ids: BTreeSet<NodeId>,
    pub size: usize,
}

/// One flattened record of a node-tree inspection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NodeInfo {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub depth: usize,
}

/// The success envelope wrapping every bulk response.
#[derive(Debug, Deserialize)]
struct ResponseEnvelope {
    success: bool,
    #[serde(default)]
    messages: Vec<serde_json::Value>,
    chunk: Option<SerializedChunk>,
}

#[derive(Debug, Deserialize)]
struct NodeTreeEnvelope {
    success: bool,
    #[serde(default)]
    messages: Vec<serde_json::Value>,
    #[serde(default)]
    data: Vec<NodeInfo>,
}

#[derive(Debug, Deserialize)]
struct RawClassifierEntry {
    language: String,
    classifier: String,
    ids: Vec<NodeId>,
    size: usize,
}

fn render_messages(messages: &[serde_json::Value]) -> Vec<String> {
    messages.iter().map(|m| m.to_string()).collect()
}

/// Parse a bulk response body and enforce the envelope contract: a false
/// success flag is a hard failure regardless of HTTP status; messages on a
/// successful response are logged.
fn process_envelope(body: &str) -> Result<ResponseEnvelope, RepoError> {
    let envelope: ResponseEnvelope = serde_json::from_str(body)
        .map_err(|e| RepoError::Protocol(format!("malformed response envelope: {e}")))?;
    if !envelope.success {
        return Err(RepoError::Rejected {
            messages: render_messages(&envelope.messages),
        });
    }
    if !envelope.messages.is_empty() {
        warn!(messages = ?envelope.messages, "server response carried messages");
    }
    Ok(envelope)
}

fn require_chunk(envelope: ResponseEnvelope) -> Result<SerializedChunk, RepoError> {
    envelope
        .chunk
        .ok_or_else(|| RepoError::Protocol("successful envelope without chunk".to_string()))
}

/// Blocking synchronization client for a partitioned repository.
pub struct RepoClient {
    low: LowLevelClient,
    version: LanguageVersion,
    languages: Vec<Language>,
    instantiator: Instantiator,
    codecs: PrimitiveCodecs,
}

impl RepoClient {
    pub fn new(config: RepoClientConfig) -> Result<Self, RepoError> {
        Self::with_version(config, LanguageVersion::CURRENT)
    }

    pub fn with_version(
        config: RepoClientConfig,
        version: LanguageVersion,
    ) -> Result<Self, RepoError> {
        let low = LowLevelClient::new(Connection {
            base_url: config.base_url(),
            client_id: config.client_id,
            repository: config.repository,
            authorization_token: config.authorization_token,
            connect_timeout: config.connect_timeout,
            call_timeout: config.call_timeout,
        })?;
        Ok(Self {
            low,
            version,
            languages: vec![builtins::language(version)],
            instantiator: Instantiator::default(),
            codecs: PrimitiveCodecs::default(),
        })
    }

    /// Register a language for serialization. Append-only; expected to
    /// stabilize before concurrent use.
    pub fn register_language(&mut self, language: Language) {
        self.languages.push(language);
    }

    /// Install the registry's decode factories and custom scalar codecs.
    pub fn prepare_from_registry(&mut self, registry: &MetamodelRegistry) {
        registry.prepare_instantiator(&mut self.instantiator, self.version);
        registry.prepare_primitive_codecs(&mut self.codecs);
    }

    // --- admin ---

    pub fn create_repository(&self, history: bool) -> Result<(), RepoError> {
        self.low.create_repository(history)
    }

    pub fn create_database(&self) -> Result<(), RepoError> {
        self.low.create_database()
    }

    pub fn init(&self) -> Result<(), RepoError> {
        self.low.init()
    }

    // --- partition lifecycle ---

    /// Create a partition from a childless root. A root that already has
    /// children must be split: create the partition first, then append.
    pub fn create_partition(&self, root: &Node) -> Result<(), RepoError> {
        if root.children().next().is_some() {
            return Err(RepoError::PartitionWithChildren {
                id: root.id.clone(),
            });
        }
        self.validate_tree(root)?;
        let payload = self.encode_payload(root)?;
        let body = self.low.store(&payload, StoreOperation::CreatePartitions)?;
        process_envelope(&body).map(|_| ())
    }

    pub fn delete_partition(&self, id: &NodeId) -> Result<(), RepoError> {
        let body = self.low.delete_partition(id)?;
        process_envelope(&body).map(|_| ())
    }

    pub fn list_partition_ids(&self) -> Result<Vec<NodeId>, RepoError> {
        let body = self.low.list_partitions()?;
        let chunk = require_chunk(process_envelope(&body)?)?;
        Ok(chunk.ids().cloned().collect())
    }

    // --- retrieval ---

    /// Retrieve nodes in one batched request and decode them into trees.
    ///
    /// An id the server has never seen simply contributes nothing to the
    /// result; an empty outcome is distinguishable from transport failure
    /// by the call succeeding. Under [`RetrievalMode::EntireSubtree`] a
    /// child record missing from the response fails the whole call.
    pub fn retrieve(
        &self,
        ids: &[NodeId],
        mode: RetrievalMode,
        with_proxy_parent: bool,
    ) -> Result<Vec<Node>, RepoError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let chunk = self.retrieve_chunk(ids, mode.depth_limit())?;
        let nodes = self.decoder(mode, with_proxy_parent).decode(&chunk)?;
        Ok(nodes)
    }

    /// Retrieve exactly one node. Unlike [`RepoClient::retrieve`], the
    /// requested id being absent from the response is an error here.
    pub fn retrieve_one(
        &self,
        id: &NodeId,
        mode: RetrievalMode,
        with_proxy_parent: bool,
    ) -> Result<Node, RepoError> {
        let chunk = self.retrieve_chunk(std::slice::from_ref(id), mode.depth_limit())?;
        if chunk.record(id).is_none() {
            return Err(RepoError::MissingIds {
                requested: vec![id.clone()],
                returned: chunk.ids().cloned().collect(),
            });
        }
        let nodes = self.decoder(mode, with_proxy_parent).decode(&chunk)?;
        nodes
            .into_iter()
            .find(|n| &n.id == id)
            .ok_or_else(|| RepoError::Protocol(format!("node {id} vanished during decoding")))
    }

    fn retrieve_chunk(&self, ids: &[NodeId], depth_limit: i32) -> Result<SerializedChunk, RepoError> {
        let body = self.low.retrieve(ids, depth_limit)?;
        require_chunk(process_envelope(&body)?)
    }

    fn decoder(&self, mode: RetrievalMode, with_proxy_parent: bool) -> Decoder<'_> {
        let children = match mode {
            RetrievalMode::SingleNode => UnavailablePolicy::Proxy,
            // A truncated whole-subtree answer is a protocol violation.
            RetrievalMode::EntireSubtree => UnavailablePolicy::Fail,
        };
        let parent = if with_proxy_parent {
            UnavailablePolicy::Proxy
        } else {
            UnavailablePolicy::Absent
        };
        Decoder::new(&self.languages, &self.instantiator, &self.codecs)
            .unavailable_children(children)
            .unavailable_parent(parent)
            .unavailable_reference_target(UnavailablePolicy::Proxy)
    }

    // --- structural lookups (no full decode) ---

    /// Whether the repository holds a node with this id. Answered from a
    /// depth-zero retrieval inspected structurally.
    pub fn is_node_existing(&self, id: &NodeId) -> Result<bool, RepoError> {
        let chunk = self.retrieve_chunk(std::slice::from_ref(id), 0)?;
        Ok(chunk.record(id).is_some())
    }

    /// The parent id of an existing node. Unlike an existence check, the
    /// node being absent is a caller mistake, not an expected outcome.
    pub fn parent_id(&self, id: &NodeId) -> Result<Option<NodeId>, RepoError> {
        let chunk = self.retrieve_chunk(std::slice::from_ref(id), 0)?;
        let record = chunk
            .record(id)
            .ok_or_else(|| RepoError::UnexistingNode { id: id.clone() })?;
        Ok(record.parent.clone())
    }

    // --- storage ---

    /// Serialize the whole reachable tree and submit it as one request.
    pub fn store_tree(&self, root: &Node) -> Result<(), RepoError> {
        self.validate_tree(root)?;
        let payload = self.encode_payload(root)?;
        let body = self.low.store(&payload, StoreOperation::Store)?;
        process_envelope(&body).map(|_| ())
    }

    /// Store several trees in one request.
    pub fn store_trees(&self, roots: &[&Node]) -> Result<(), RepoError> {
        for root in roots {
            self.validate_tree(root)?;
        }
        let encoder = Encoder::new(&self.languages, &self.codecs, self.version.as_str());
        let mut chunk = SerializedChunk::new(self.version.as_str());
        for root in roots {
            chunk.combine(encoder.encode_tree(root)?);
        }
        let payload = serde_json::to_string(&chunk)
            .map_err(|e| RepoError::Protocol(format!("chunk serialization failed: {e}")))?;
        let body = self.low.store(&payload, StoreOperation::Store)?;
        process_envelope(&body).map(|_| ())
    }

    fn encode_payload(&self, root: &Node) -> Result<String, RepoError> {
        let encoder = Encoder::new(&self.languages, &self.codecs, self.version.as_str());
        let chunk = encoder.encode_tree(root)?;
        serde_json::to_string(&chunk)
            .map_err(|e| RepoError::Protocol(format!("chunk serialization failed: {e}")))
    }

    fn validate_tree(&self, node: &Node) -> Result<(), RepoError> {
        if node.classifier.is_none() {
            return Err(RepoError::InvalidTree {
                id: node.id.clone(),
                reason: "node has no classifier".to_string(),
            });
        }
        for child in node.children() {
            if let NodeRef::Resolved(child) = child {
                self.validate_tree(child)?;
            }
        }
        Ok(())
    }

    // --- composite mutations (non-atomic) ---

    /// Append a tree under a containment of a stored node.
    ///
    /// Non-atomic: retrieve the container, mutate in memory, re-fetch its
    /// current parent id, store, then re-check the resulting child count.
    /// With an explicit `index`, the container must currently hold exactly
    /// that many children; a mismatch means the caller's view is stale and
    /// nothing is stored.
    pub fn append_tree(
        &self,
        tree: Node,
        container_id: &NodeId,
        containment: &str,
        index: Option<usize>,
    ) -> Result<(), RepoError> {
        let mut container = self.retrieve_one(container_id, RetrievalMode::SingleNode, true)?;
        let feature = self
            .feature_of(&container, containment)
            .cloned()
            .filter(|f| matches!(f, Feature::Containment { .. }))
            .ok_or_else(|| RepoError::NoSuchContainment {
                node: container_id.clone(),
                name: containment.to_string(),
            })?;
        let Feature::Containment { key, multiplicity, .. } = &feature else {
            unreachable!("filtered above");
        };
        let current = container.children_in(containment).len();
        if !multiplicity.multiple() && current > 0 {
            return Err(RepoError::SingleContainmentOccupied {
                node: container_id.clone(),
                name: containment.to_string(),
            });
        }
        if let Some(expected) = index {
            if current != expected {
                return Err(RepoError::StaleContainmentIndex {
                    expected,
                    actual: current,
                });
            }
        }
        container.add_child(containment, NodeRef::Resolved(Box::new(tree)))?;
        // The parent pointer may have moved since the retrieve; store the
        // current one.
        container.parent = self.parent_id(container_id)?;
        self.store_tree(&container)?;

        let expected = current + 1;
        let chunk = self.retrieve_chunk(std::slice::from_ref(container_id), 0)?;
        let actual = chunk
            .record(container_id)
            .and_then(|record| {
                record
                    .containments
                    .iter()
                    .find(|c| &c.containment.key == key)
                    .map(|c| c.children.len())
            })
            .unwrap_or(0);
        if actual != expected {
            return Err(RepoError::PostStoreCountMismatch {
                node: container_id.clone(),
                expected,
                actual,
            });
        }
        debug!(container = %container_id, containment, "appended tree");
        Ok(())
    }

    /// Attach an annotation instance to a stored node.
    ///
    /// Non-atomic read-modify-write like [`RepoClient::append_tree`]:
    /// retrieve the target (single node, proxy parent), attach in memory,
    /// store target and annotation in one request. The annotation record
    /// is parented to the target and listed among its annotation ids.
    pub fn append_annotation(
        &self,
        mut annotation: Node,
        target_id: &NodeId,
    ) -> Result<(), RepoError> {
        let is_annotation = annotation
            .classifier
            .as_ref()
            .and_then(|p| find_classifier(&self.languages, p))
            .is_some_and(|c| matches!(c.kind, ClassifierKind::Annotation { .. }));
        if !is_annotation {
            return Err(RepoError::NotAnAnnotation {
                id: annotation.id.clone(),
            });
        }
        let mut target = self.retrieve_one(target_id, RetrievalMode::SingleNode, true)?;
        annotation.parent = Some(target_id.clone());
        target.annotations.push(annotation.id.clone());
        self.store_trees(&[&target, &annotation])?;
        debug!(target = %target_id, annotation = %annotation.id, "appended annotation");
        Ok(())
    }

    /// Replace the values of a single-valued reference with the given
    /// targets (empty clears, one sets; more than one is rejected, as is a
    /// multi-valued feature).
    pub fn set_references(
        &self,
        targets: &[NodeId],
        container_id: &NodeId,
        reference: &str,
    ) -> Result<(), RepoError> {
        let mut container = self.retrieve_one(container_id, RetrievalMode::SingleNode, true)?;
        self.apply_reference_targets(&mut container, reference, targets)?;
        self.store_tree(&container)
    }

    /// Convenience form of [`RepoClient::set_references`] for the 0/1 case.
    pub fn set_single_reference(
        &self,
        target: Option<&NodeId>,
        container_id: &NodeId,
        reference: &str,
    ) -> Result<(), RepoError> {
        let targets: Vec<NodeId> = target.cloned().into_iter().collect();
        self.set_references(&targets, container_id, reference)
    }

    /// Apply several reference updates with one batched retrieve and one
    /// store.
    pub fn set_references_bulk(&self, updates: &[ReferenceData]) -> Result<(), RepoError> {
        if updates.is_empty() {
            return Ok(());
        }
        let ids: Vec<NodeId> = updates.iter().map(|u| u.container.clone()).collect();
        let containers = self.retrieve(&ids, RetrievalMode::SingleNode, true)?;
        let mut by_id: BTreeMap<NodeId, Node> =
            containers.into_iter().map(|n| (n.id.clone(), n)).collect();
        for update in updates {
            if !by_id.contains_key(&update.container) {
                return Err(RepoError::MissingIds {
                    requested: vec![update.container.clone()],
                    returned: by_id.keys().cloned().collect(),
                });
            }
            let container = by_id
                .get_mut(&update.container)
                .expect("presence checked above");
            let targets = update.targets.clone();
            self.apply_reference_targets_owned(container, &update.reference, targets)?;
        }
        let roots: Vec<&Node> = by_id.values().collect();
        self.store_trees(&roots)
    }

    fn apply_reference_targets(
        &self,
        container: &mut Node,
        reference: &str,
        targets: &[NodeId],
    ) -> Result<(), RepoError> {
        self.apply_reference_targets_owned(container, reference, targets.to_vec())
    }

    fn apply_reference_targets_owned(
        &self,
        container: &mut Node,
        reference: &str,
        targets: Vec<NodeId>,
    ) -> Result<(), RepoError> {
        let feature = self
            .feature_of(container, reference)
            .ok_or_else(|| RepoError::NoSuchReference {
                node: container.id.clone(),
                name: reference.to_string(),
            })?;
        let Feature::Reference { multiplicity, .. } = feature else {
            return Err(RepoError::NoSuchReference {
                node: container.id.clone(),
                name: reference.to_string(),
            });
        };
        if multiplicity.multiple() || targets.len() > 1 {
            return Err(RepoError::ReferenceIsMultiple {
                node: container.id.clone(),
                name: reference.to_string(),
            });
        }
        let values = targets.into_iter().map(ReferenceValue::to_target).collect();
        container.set_reference_values(reference, values);
        Ok(())
    }

    /// Append one target to the current value list of a reference.
    pub fn add_reference(
        &self,
        target: &NodeId,
        resolve_info: Option<String>,
        container_id: &NodeId,
        reference: &str,
    ) -> Result<(), RepoError> {
        let mut container = self.retrieve_one(container_id, RetrievalMode::SingleNode, true)?;
        let feature = self.feature_of(&container, reference);
        if !matches!(feature, Some(Feature::Reference { .. })) {
            return Err(RepoError::NoSuchReference {
                node: container_id.clone(),
                name: reference.to_string(),
            });
        }
        container.add_reference_value(
            reference,
            ReferenceValue {
                resolve_info,
                target: Some(target.clone()),
            },
        );
        self.store_tree(&container)
    }

    /// Set one property of a stored node.
    pub fn set_property(
        &self,
        node_id: &NodeId,
        property: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<(), RepoError> {
        let mut node = self.retrieve_one(node_id, RetrievalMode::SingleNode, true)?;
        node.set_property(property, value);
        self.store_tree(&node)
    }

    /// Ids of the children currently under a containment.
    pub fn children_in_containment(
        &self,
        container_id: &NodeId,
        containment: &str,
    ) -> Result<Vec<NodeId>, RepoError> {
        let container = self.retrieve_one(container_id, RetrievalMode::SingleNode, true)?;
        Ok(container
            .children_in(containment)
            .iter()
            .map(|c| c.id().clone())
            .collect())
    }

    /// Remove every child under a containment of a stored node.
    pub fn clear_containment(
        &self,
        container_id: &NodeId,
        containment: &str,
    ) -> Result<(), RepoError> {
        let mut container = self.retrieve_one(container_id, RetrievalMode::SingleNode, true)?;
        container.clear_containment(containment);
        self.store_tree(&container)
    }

    // --- ancestor resolution ---

    /// All ancestor ids, nearest first. One parent-lookup request per hop;
    /// the chain length is not known in advance, so no batching.
    pub fn ancestor_ids(&self, id: &NodeId) -> Result<Vec<NodeId>, RepoError> {
        let mut ancestors = Vec::new();
        let mut current = self.parent_id(id)?;
        while let Some(parent) = current {
            current = self.parent_id(&parent)?;
            ancestors.push(parent);
        }
        Ok(ancestors)
    }

    /// Walk upward from a node until an ancestor's classifier satisfies
    /// the predicate; `None` when the chain ends first. The match is
    /// returned as a single node, or as its whole subtree under
    /// [`RetrievalMode::EntireSubtree`].
    pub fn retrieve_ancestor(
        &self,
        node: &Node,
        predicate: impl Fn(&MetaPointer) -> bool,
        mode: RetrievalMode,
    ) -> Result<Option<Node>, RepoError> {
        let mut current = node.parent.clone();
        while let Some(parent_id) = current {
            let parent = self.retrieve_one(&parent_id, RetrievalMode::SingleNode, true)?;
            if parent.classifier.as_ref().is_some_and(&predicate) {
                return match mode {
                    RetrievalMode::SingleNode => Ok(Some(parent)),
                    RetrievalMode::EntireSubtree => self
                        .retrieve_one(&parent_id, RetrievalMode::EntireSubtree, true)
                        .map(Some),
                };
            }
            current = parent.parent;
        }
        Ok(None)
    }

    // --- inspection ---

    /// Per-classifier node ids and reported totals.
    pub fn nodes_by_classifier(
        &self,
        limit: Option<usize>,
    ) -> Result<BTreeMap<ClassifierKey, ClassifierResult>, RepoError> {
        let body = self.low.nodes_by_classifier(limit)?;
        let entries: Vec<RawClassifierEntry> = serde_json::from_str(&body)
            .map_err(|e| RepoError::Protocol(format!("malformed inspection response: {e}")))?;
        Ok(entries
            .into_iter()
            .map(|entry| {
                (
                    ClassifierKey {
                        language: entry.language,
                        classifier: entry.classifier,
                    },
                    ClassifierResult {
                        ids: entry.ids.into_iter().collect(),
                        size: entry.size,
                    },
                )
            })
            .collect())
    }

    /// Flattened (id, parent, depth) records for lightweight structural
    /// inspection without decoding payloads.
    pub fn node_tree(
        &self,
        ids: &[NodeId],
        depth_limit: Option<i32>,
    ) -> Result<Vec<NodeInfo>, RepoError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let body = self.low.node_tree(ids, depth_limit)?;
        let envelope: NodeTreeEnvelope = serde_json::from_str(&body)
            .map_err(|e| RepoError::Protocol(format!("malformed node-tree response: {e}")))?;
        if !envelope.success {
            return Err(RepoError::Rejected {
                messages: render_messages(&envelope.messages),
            });
        }
        Ok(envelope.data)
    }

    fn feature_of<'a>(&'a self, node: &Node, name: &str) -> Option<&'a Feature> {
        let pointer = node.classifier.as_ref()?;
        let classifier = find_classifier(&self.languages, pointer)?;
        feature_by_name(&self.languages, classifier, name)
    }
}
