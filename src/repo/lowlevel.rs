//! repo::lowlevel
//!
//! Raw protocol calls against the repository server.
//!
//! # Design
//!
//! One thin method per endpoint, each returning the raw response body as a
//! string. Higher-level decoding, envelope processing and consistency
//! checks live in [`crate::repo::client`]; this layer owns URLs, query
//! parameters, the authorization header, gzip compression of store bodies
//! and the transport failure taxonomy.
//!
//! Store bodies are gzip-compressed and fully buffered before sending, so
//! the effective `Content-Length` is always exact; streamed compression is
//! not used.

use std::io::Write;
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use tracing::debug;

use crate::model::id::NodeId;

use super::error::RepoError;

/// Longest payload prefix kept in transport errors.
const PAYLOAD_PREVIEW_LIMIT: usize = 1000;

/// Which store endpoint a chunk is submitted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StoreOperation {
    Store,
    CreatePartitions,
}

impl StoreOperation {
    fn path(&self) -> &'static str {
        match self {
            StoreOperation::Store => "/bulk/store",
            StoreOperation::CreatePartitions => "/bulk/createPartitions",
        }
    }
}

/// Connection parameters, fixed at construction.
#[derive(Debug, Clone)]
pub(crate) struct Connection {
    pub base_url: String,
    pub client_id: String,
    pub repository: String,
    pub authorization_token: Option<String>,
    pub connect_timeout: Duration,
    pub call_timeout: Duration,
}

/// Blocking protocol client. One HTTP client, built once with fixed
/// connect and call timeouts.
#[derive(Debug)]
pub(crate) struct LowLevelClient {
    http: Client,
    conn: Connection,
}

impl LowLevelClient {
    pub fn new(conn: Connection) -> Result<Self, RepoError> {
        let http = Client::builder()
            .connect_timeout(conn.connect_timeout)
            .timeout(conn.call_timeout)
            .build()
            .map_err(|e| RepoError::Config(e.to_string()))?;
        Ok(Self { http, conn })
    }

    pub fn create_repository(&self, history: bool) -> Result<(), RepoError> {
        let url = self.url("/createRepository");
        let request = self
            .decorate(self.http.post(&url))
            .query(&[("history", history.to_string())]);
        self.send(request, &url, "").map(|_| ())
    }

    pub fn create_database(&self) -> Result<(), RepoError> {
        let url = self.url("/createDatabase");
        let request = self.authorize(self.http.post(&url));
        self.send(request, &url, "").map(|_| ())
    }

    pub fn init(&self) -> Result<(), RepoError> {
        let url = self.url("/init");
        let request = self.decorate(self.http.post(&url));
        self.send(request, &url, "").map(|_| ())
    }

    pub fn retrieve(&self, ids: &[NodeId], depth_limit: i32) -> Result<String, RepoError> {
        let url = self.url("/bulk/retrieve");
        let body = serde_json::json!({ "ids": ids }).to_string();
        debug!(%url, depth_limit, count = ids.len(), "retrieving nodes");
        let request = self
            .decorate(self.http.post(&url))
            .query(&[("depthLimit", depth_limit.to_string())])
            .header(CONTENT_TYPE, "application/json")
            .body(body.clone());
        self.send(request, &url, &body)
    }

    pub fn store(&self, payload: &str, operation: StoreOperation) -> Result<String, RepoError> {
        let url = self.url(operation.path());
        debug!(%url, bytes = payload.len(), "storing chunk");
        let compressed = gzip(payload)?;
        let request = self
            .decorate(self.http.post(&url))
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_ENCODING, "gzip")
            .body(compressed);
        let response = self.execute(request, &url, payload)?;
        let status = response.status();
        let body = self.read_body(response, &url, payload)?;
        if !status.is_success() {
            return Err(RepoError::StoreFailed {
                url,
                payload: payload.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    pub fn delete_partition(&self, id: &NodeId) -> Result<String, RepoError> {
        let url = self.url("/bulk/deletePartitions");
        let body = serde_json::json!([id]).to_string();
        let request = self
            .decorate(self.http.post(&url))
            .header(CONTENT_TYPE, "application/json")
            .body(body.clone());
        self.send(request, &url, &body)
    }

    pub fn list_partitions(&self) -> Result<String, RepoError> {
        let url = self.url("/bulk/listPartitions");
        let request = self.decorate(self.http.post(&url));
        self.send(request, &url, "")
    }

    pub fn nodes_by_classifier(&self, limit: Option<usize>) -> Result<String, RepoError> {
        let url = self.url("/inspection/nodesByClassifier");
        let mut request = self.decorate(self.http.get(&url));
        if let Some(limit) = limit {
            request = request.query(&[("limit", limit.to_string())]);
        }
        self.send(request, &url, "")
    }

    pub fn node_tree(&self, ids: &[NodeId], depth_limit: Option<i32>) -> Result<String, RepoError> {
        let url = self.url("/additional/getNodeTree");
        let body = serde_json::json!({ "ids": ids }).to_string();
        let mut request = self
            .decorate(self.http.post(&url))
            .header(CONTENT_TYPE, "application/json")
            .body(body.clone());
        if let Some(depth) = depth_limit {
            request = request.query(&[("depthLimit", depth.to_string())]);
        }
        self.send(request, &url, &body)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.conn.base_url, path)
    }

    /// Query parameters and headers common to repository-scoped requests.
    fn decorate(&self, request: RequestBuilder) -> RequestBuilder {
        self.authorize(request).query(&[
            ("clientId", self.conn.client_id.as_str()),
            ("repository", self.conn.repository.as_str()),
        ])
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.conn.authorization_token {
            Some(token) => request.header("Authorization", token),
            None => request,
        }
    }

    fn execute(
        &self,
        request: RequestBuilder,
        url: &str,
        payload: &str,
    ) -> Result<Response, RepoError> {
        request.send().map_err(|e| RepoError::Transport {
            url: url.to_string(),
            payload_preview: preview(payload),
            message: e.to_string(),
        })
    }

    fn read_body(&self, response: Response, url: &str, payload: &str) -> Result<String, RepoError> {
        response.text().map_err(|e| RepoError::Transport {
            url: url.to_string(),
            payload_preview: preview(payload),
            message: e.to_string(),
        })
    }

    /// Execute, fail on non-2xx, return the body.
    fn send(&self, request: RequestBuilder, url: &str, payload: &str) -> Result<String, RepoError> {
        let response = self.execute(request, url, payload)?;
        let status = response.status();
        let body = self.read_body(response, url, payload)?;
        if !status.is_success() {
            return Err(RepoError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

fn gzip(payload: &str) -> Result<Vec<u8>, RepoError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(payload.as_bytes())
        .and_then(|()| encoder.finish())
        .map_err(|e| RepoError::Config(format!("gzip compression failed: {e}")))
}

fn preview(payload: &str) -> String {
    if payload.len() <= PAYLOAD_PREVIEW_LIMIT {
        return payload.to_string();
    }
    let mut end = PAYLOAD_PREVIEW_LIMIT;
    while !payload.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [{} bytes total]", &payload[..end], payload.len())
}
