//! Repository synchronization: blocking HTTP operations against a
//! partitioned model repository.
//!
//! [`client::RepoClient`] is the public surface; [`lowlevel`] owns the raw
//! protocol (URLs, query parameters, gzip bodies, transport errors).

pub mod client;
pub mod error;
mod lowlevel;

pub use client::{
    ClassifierKey, ClassifierResult, NodeInfo, ReferenceData, RepoClient, RepoClientConfig,
    RetrievalMode, MAX_DEPTH,
};
pub use error::RepoError;
