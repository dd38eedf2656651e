//! Feed handles and watchers.

use hypercorn_core::{FeedKey, ReplyRef};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::debug;

use crate::backend::LogStorage;
use crate::error::{FeedError, Result};

/// Replication depth of a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedMode {
    /// Complete local replica, kept open for the lifetime of a follow
    Full,
    /// On-demand access for a single operation
    Sparse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Opening,
    Ready,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOptions {
    pub mode: FeedMode,
    pub writable: bool,
}

impl OpenOptions {
    pub fn full() -> Self {
        Self {
            mode: FeedMode::Full,
            writable: false,
        }
    }

    pub fn sparse() -> Self {
        Self {
            mode: FeedMode::Sparse,
            writable: false,
        }
    }

    /// Allow appends. Only the owner of the key should open its feed this way.
    pub fn writable(mut self) -> Self {
        self.writable = true;
        self
    }
}

/// One decoded log entry with the replies annotated onto it
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub index: u64,
    pub value: Value,
    pub replies: Vec<ReplyRef>,
}

/// Log shared by every handle of one key. `head` carries the log length.
pub(crate) struct LogCell {
    key: FeedKey,
    storage: Mutex<Box<dyn LogStorage>>,
    head: watch::Sender<u64>,
}

impl LogCell {
    pub(crate) fn new(key: FeedKey, storage: Box<dyn LogStorage>) -> Result<Self> {
        let len = storage.len()?;
        let (head, _) = watch::channel(len);
        Ok(Self {
            key,
            storage: Mutex::new(storage),
            head,
        })
    }

    fn storage(&self) -> Result<MutexGuard<'_, Box<dyn LogStorage>>> {
        self.storage
            .lock()
            .map_err(|_| FeedError::Backend(format!("log lock poisoned for {}", self.key)))
    }

    fn len(&self) -> u64 {
        *self.head.borrow()
    }

    fn append(&self, bytes: &[u8]) -> Result<u64> {
        let mut storage = self.storage()?;
        let index = storage.append(bytes)?;
        // Head is published under the storage lock and never moves backwards
        self.head.send_replace(index + 1);
        Ok(index)
    }

    fn read(&self, index: u64) -> Result<FeedEntry> {
        let (bytes, replies) = {
            let storage = self.storage()?;
            let bytes = storage.get(index)?.ok_or(FeedError::EntryNotFound {
                feed: self.key,
                index,
            })?;
            (bytes, storage.replies(index)?)
        };
        Ok(FeedEntry {
            index,
            value: serde_json::from_slice(&bytes)?,
            replies,
        })
    }

    fn add_reply(&self, index: u64, reply: ReplyRef) -> Result<bool> {
        if index >= self.len() {
            return Err(FeedError::EntryNotFound {
                feed: self.key,
                index,
            });
        }
        self.storage()?.add_reply(index, reply)
    }
}

/// Handle onto one feed.
///
/// A handle must be closed exactly once by whoever owns it. Closing a handle
/// ends its watchers but leaves other handles of the same key untouched.
pub struct Feed {
    key: FeedKey,
    options: OpenOptions,
    state: watch::Sender<ReadyState>,
    cell: Arc<LogCell>,
}

impl Feed {
    pub(crate) fn new(key: FeedKey, options: OpenOptions, cell: Arc<LogCell>) -> Self {
        let (state, _) = watch::channel(ReadyState::Opening);
        Self {
            key,
            options,
            state,
            cell,
        }
    }

    pub(crate) fn mark_ready(&self) {
        self.state.send_if_modified(|state| {
            if *state == ReadyState::Opening {
                *state = ReadyState::Ready;
                true
            } else {
                false
            }
        });
    }

    pub fn key(&self) -> FeedKey {
        self.key
    }

    pub fn mode(&self) -> FeedMode {
        self.options.mode
    }

    pub fn is_writable(&self) -> bool {
        self.options.writable
    }

    pub fn state(&self) -> ReadyState {
        *self.state.borrow()
    }

    /// Wait until the handle leaves `Opening`.
    pub async fn ready(&self) -> Result<()> {
        let mut rx = self.state.subscribe();
        let state = *rx
            .wait_for(|state| *state != ReadyState::Opening)
            .await
            .map_err(|_| FeedError::Closed(self.key))?;
        match state {
            ReadyState::Closed => Err(FeedError::Closed(self.key)),
            _ => Ok(()),
        }
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state() {
            ReadyState::Ready => Ok(()),
            ReadyState::Opening => Err(FeedError::NotReady(self.key)),
            ReadyState::Closed => Err(FeedError::Closed(self.key)),
        }
    }

    /// Append a JSON value, returning the index the log assigned to it.
    pub async fn append(&self, value: &Value) -> Result<u64> {
        self.ensure_ready()?;
        if !self.options.writable {
            return Err(FeedError::NotWritable(self.key));
        }
        let bytes = serde_json::to_vec(value)?;
        let index = self.cell.append(&bytes)?;
        debug!(feed = %self.key, index, "Appended entry");
        Ok(index)
    }

    pub async fn len(&self) -> Result<u64> {
        self.ensure_ready()?;
        Ok(self.cell.len())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    pub async fn get(&self, index: u64) -> Result<FeedEntry> {
        self.ensure_ready()?;
        self.cell.read(index)
    }

    /// Page through the feed newest first, skipping the `offset` newest
    /// entries and returning at most `limit`.
    pub async fn timeline(&self, offset: u64, limit: usize) -> Result<Vec<FeedEntry>> {
        self.ensure_ready()?;
        let len = self.cell.len();
        if offset > 0 && offset >= len {
            return Err(FeedError::EntryNotFound {
                feed: self.key,
                index: offset,
            });
        }

        let newest = len.saturating_sub(offset);
        let oldest = newest.saturating_sub(limit as u64);
        (oldest..newest)
            .rev()
            .map(|index| self.cell.read(index))
            .collect()
    }

    /// Annotate the entry at `index` with a reply living in another feed.
    /// Annotations are local and allowed on read-only handles.
    pub async fn add_reply(&self, index: u64, reply: ReplyRef) -> Result<bool> {
        self.ensure_ready()?;
        let added = self.cell.add_reply(index, reply)?;
        debug!(feed = %self.key, index, reply_feed = %reply.feed_key, reply_index = reply.index, added, "Reply annotated");
        Ok(added)
    }

    /// Deliver entries from `from` onwards, then keep following appends.
    pub fn watch(&self, from: u64) -> Result<Watcher> {
        if self.state() == ReadyState::Closed {
            return Err(FeedError::Closed(self.key));
        }
        Ok(Watcher {
            key: self.key,
            next: from,
            cell: self.cell.clone(),
            head: self.cell.head.subscribe(),
            state: self.state.subscribe(),
        })
    }

    /// Close this handle. Watchers created from it end.
    pub async fn close(&self) -> Result<()> {
        let previous = self.state.send_replace(ReadyState::Closed);
        if previous != ReadyState::Closed {
            debug!(feed = %self.key, mode = ?self.options.mode, "Feed closed");
        }
        Ok(())
    }
}

impl std::fmt::Debug for Feed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Feed")
            .field("key", &self.key)
            .field("mode", &self.options.mode)
            .field("writable", &self.options.writable)
            .field("state", &self.state())
            .finish()
    }
}

/// Ordered entry stream over one feed handle
pub struct Watcher {
    key: FeedKey,
    next: u64,
    cell: Arc<LogCell>,
    head: watch::Receiver<u64>,
    state: watch::Receiver<ReadyState>,
}

impl Watcher {
    pub fn key(&self) -> FeedKey {
        self.key
    }

    /// Index of the next entry to be delivered
    pub fn position(&self) -> u64 {
        self.next
    }

    /// Next entry in index order, waiting for appends as needed.
    ///
    /// `Ok(None)` once the handle is closed. An entry that cannot be read is
    /// skipped after its error is returned, so callers can keep going.
    pub async fn next(&mut self) -> Result<Option<FeedEntry>> {
        loop {
            if *self.state.borrow_and_update() == ReadyState::Closed {
                return Ok(None);
            }

            let head = *self.head.borrow_and_update();
            if self.next < head {
                let index = self.next;
                self.next += 1;
                return self.cell.read(index).map(Some);
            }

            tokio::select! {
                changed = self.head.changed() => {
                    if changed.is_err() {
                        return Ok(None);
                    }
                }
                changed = self.state.changed() => {
                    if changed.is_err() {
                        return Ok(None);
                    }
                }
            }
        }
    }
}
