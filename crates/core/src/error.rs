//! Core error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for Hypercorn
#[derive(Debug, Error)]
pub enum CoreError {
    /// A feed key could not be decoded
    #[error("Invalid feed key: {0}")]
    InvalidKey(String),

    /// Configuration is malformed
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
