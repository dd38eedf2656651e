//! Core functionality for the Hypercorn social feed node.
//!
//! This crate provides the fundamental types, configuration and logging
//! shared by every other Hypercorn crate: feed identities, reply references,
//! node configuration and the tracing setup.

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::{LogFormat, NodeConfig};
pub use error::{CoreError, Result};
pub use types::{current_timestamp_secs, FeedKey, ReplyRef};
