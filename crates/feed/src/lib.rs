//! Append-only feeds for Hypercorn.
//!
//! A feed is the log owned by one identity. This crate provides:
//! - [`Feed`] handles in *full* or *sparse* mode with a ready/closed lifecycle
//! - [`Watcher`]s that deliver entries in index order from any offset
//! - Reply annotations stored next to the entries they point at
//! - Pluggable storage: in-process memory logs and SQLite logs
//!
//! Handles opened through the same [`FeedStore`] share one log per key, so an
//! append on any handle wakes the watchers of every other handle.

pub mod backend;
pub mod error;
pub mod feed;
pub mod memory;
pub mod sqlite;
pub mod store;

pub use backend::{LogBackend, LogStorage};
pub use error::{FeedError, Result};
pub use feed::{Feed, FeedEntry, FeedMode, OpenOptions, ReadyState, Watcher};
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;
pub use store::FeedStore;
