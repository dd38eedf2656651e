//! Feed error types

use hypercorn_core::FeedKey;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Feed not found: {0}")]
    FeedNotFound(FeedKey),

    #[error("Entry not found: feed={feed} index={index}")]
    EntryNotFound { feed: FeedKey, index: u64 },

    #[error("Feed {0} is not writable")]
    NotWritable(FeedKey),

    #[error("Feed {0} is not ready")]
    NotReady(FeedKey),

    #[error("Feed {0} is closed")]
    Closed(FeedKey),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl FeedError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            FeedError::EntryNotFound { .. } | FeedError::FeedNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, FeedError>;
