//! repo::error
//!
//! Failure taxonomy of the synchronization client.
//!
//! Four families: transport failures (connection refused, timeout) carry
//! the attempted URL and a truncated payload preview; HTTP failures carry
//! status and body, store failures additionally the outgoing payload;
//! application-level rejections carry the server's message list; and
//! consistency errors carry the ids and counts needed to diagnose the
//! mismatch without reproducing it. Nothing here is retried or corrected
//! automatically.

use thiserror::Error;

use crate::chunk::codec::CodecError;
use crate::chunk::ChunkError;
use crate::model::id::NodeId;
use crate::model::node::NodeError;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RepoError {
    /// The HTTP client itself could not be constructed.
    #[error("client configuration error: {0}")]
    Config(String),

    /// Connection-level failure before any response arrived.
    #[error("transport failure calling {url}: {message} (payload: {payload_preview})")]
    Transport {
        url: String,
        payload_preview: String,
        message: String,
    },

    /// Non-2xx response.
    #[error("request to {url} failed with status {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    /// Non-2xx response to a store operation; keeps the outgoing payload
    /// so the failure is diagnosable offline.
    #[error("store to {url} failed with status {status}: {body}")]
    StoreFailed {
        url: String,
        payload: String,
        status: u16,
        body: String,
    },

    /// 2xx response whose envelope carried `success: false`.
    #[error("server rejected the request: {messages:?}")]
    Rejected { messages: Vec<String> },

    /// The response did not contain every requested id.
    #[error("requested ids {requested:?} but the server returned {returned:?}")]
    MissingIds {
        requested: Vec<NodeId>,
        returned: Vec<NodeId>,
    },

    /// A parent lookup targeted an id the server does not know.
    #[error("node {id} does not exist in the repository")]
    UnexistingNode { id: NodeId },

    /// A partition root must be submitted alone; children attach afterward.
    #[error("node {id} has children and cannot be created as a partition")]
    PartitionWithChildren { id: NodeId },

    /// The node handed to an annotation append is not an annotation
    /// instance.
    #[error("node {id} is not an instance of an annotation classifier")]
    NotAnAnnotation { id: NodeId },

    #[error("classifier of node {node} has no containment named {name}")]
    NoSuchContainment { node: NodeId, name: String },

    #[error("classifier of node {node} has no reference named {name}")]
    NoSuchReference { node: NodeId, name: String },

    /// Appending into a single-valued containment that already has a child.
    #[error("single containment {name} of node {node} already holds a child")]
    SingleContainmentOccupied { node: NodeId, name: String },

    /// A single-valued reference setter was used on a multi-valued feature
    /// or handed more than one target.
    #[error("reference {name} of node {node} is not single-valued here")]
    ReferenceIsMultiple { node: NodeId, name: String },

    /// The caller's view of the containment is stale: an explicit insertion
    /// index did not match the current child count.
    #[error("containment index is stale: expected {expected} children, found {actual}")]
    StaleContainmentIndex { expected: usize, actual: usize },

    /// The post-store re-check found a different child count than the
    /// append produced.
    #[error("after storing, node {node} holds {actual} children instead of {expected}")]
    PostStoreCountMismatch {
        node: NodeId,
        expected: usize,
        actual: usize,
    },

    /// The tree handed to a store operation is not storable as-is.
    #[error("tree rooted at {id} is not storable: {reason}")]
    InvalidTree { id: NodeId, reason: String },

    /// The response body did not have the promised shape.
    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Chunk(#[from] ChunkError),

    #[error(transparent)]
    Node(#[from] NodeError),
}
