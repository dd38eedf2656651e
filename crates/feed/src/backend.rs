//! Storage seams behind a feed.

use hypercorn_core::{FeedKey, ReplyRef};

use crate::error::Result;

/// Raw append-only storage for one feed.
///
/// Entries are opaque byte strings indexed from 0 without gaps. Reply
/// annotations are local bookkeeping and are not part of the log itself.
pub trait LogStorage: Send {
    /// Number of entries in the log
    fn len(&self) -> Result<u64>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Append an entry, returning its index
    fn append(&mut self, entry: &[u8]) -> Result<u64>;

    fn get(&self, index: u64) -> Result<Option<Vec<u8>>>;

    /// Record that `reply` answers the entry at `index`.
    /// Returns false when the annotation was already present.
    fn add_reply(&mut self, index: u64, reply: ReplyRef) -> Result<bool>;

    fn replies(&self, index: u64) -> Result<Vec<ReplyRef>>;
}

/// Opens the storage for a feed key.
pub trait LogBackend: Send + Sync {
    /// Open the log for `key`, creating it if needed
    fn open_log(&self, key: &FeedKey) -> Result<Box<dyn LogStorage>>;

    /// Open the log for `key` only if it already exists. Nothing is created.
    fn open_existing(&self, key: &FeedKey) -> Result<Option<Box<dyn LogStorage>>>;

    /// Backend name for diagnostics
    fn name(&self) -> &'static str;
}
