//! Node error types

use hypercorn_crypto::KeyError;
use hypercorn_feed::FeedError;
use hypercorn_trust_mesh::TrustStoreError;
use thiserror::Error;

use crate::message::SchemaError;

pub type Result<T> = std::result::Result<T, NodeError>;

#[derive(Debug, Error)]
pub enum NodeError {
    /// Bad caller input. Nothing was changed.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A feed entry does not match the message schema
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Storage error: {0}")]
    Storage(#[source] FeedError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Node is not listening")]
    NotListening,

    #[error("Node is closed")]
    Closed,

    #[error("Trust store error: {0}")]
    TrustStore(#[from] TrustStoreError),

    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<FeedError> for NodeError {
    fn from(err: FeedError) -> Self {
        if err.is_not_found() {
            NodeError::NotFound(err.to_string())
        } else {
            NodeError::Storage(err)
        }
    }
}

impl From<tokio::task::JoinError> for NodeError {
    fn from(err: tokio::task::JoinError) -> Self {
        NodeError::Task(err.to_string())
    }
}
