//! Trust store contract consumed by the node

use hypercorn_core::FeedKey;
use hypercorn_crypto::{ChainError, TrustLink};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrustStoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid trust link: {0}")]
    InvalidLink(#[from] ChainError),

    #[error("Link attributed to {attributed} but signed by {signer}")]
    IssuerMismatch { attributed: FeedKey, signer: FeedKey },

    #[error("Trust store is closed")]
    Closed,

    #[error("Trust store lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, TrustStoreError>;

/// Propagation sink for trust links.
pub trait TrustStore: Send + Sync {
    /// Record that `issuer` issued `link`.
    ///
    /// Returns false when an equal or longer-lived link for the same
    /// issuer and subject is already recorded.
    fn add_link(&self, issuer: FeedKey, link: &TrustLink) -> Result<bool>;

    /// Flush and release storage. Later calls to `add_link` fail.
    fn close(&self) -> Result<()>;
}
