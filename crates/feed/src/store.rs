//! Opens feed handles over a log backend.

use hypercorn_core::FeedKey;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};
use tracing::debug;

use crate::backend::LogBackend;
use crate::error::{FeedError, Result};
use crate::feed::{Feed, FeedMode, LogCell, OpenOptions};
use crate::memory::MemoryBackend;
use crate::sqlite::SqliteBackend;

/// Entry point for opening feeds.
///
/// Keeps one live log per key for as long as any handle references it, so
/// all handles of a key share appends and wake-ups.
pub struct FeedStore {
    backend: Arc<dyn LogBackend>,
    cells: Mutex<HashMap<FeedKey, Weak<LogCell>>>,
}

impl FeedStore {
    pub fn new(backend: impl LogBackend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
            cells: Mutex::new(HashMap::new()),
        }
    }

    pub fn memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    pub fn sqlite(root: impl Into<PathBuf>) -> Self {
        Self::new(SqliteBackend::new(root))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    fn cell(&self, key: FeedKey, create: bool) -> Result<Arc<LogCell>> {
        let mut cells = self
            .cells
            .lock()
            .map_err(|_| FeedError::Backend("feed store lock poisoned".to_string()))?;

        if let Some(cell) = cells.get(&key).and_then(Weak::upgrade) {
            return Ok(cell);
        }

        cells.retain(|_, cell| cell.strong_count() > 0);
        let storage = if create {
            self.backend.open_log(&key)?
        } else {
            self.backend
                .open_existing(&key)?
                .ok_or(FeedError::FeedNotFound(key))?
        };
        let cell = Arc::new(LogCell::new(key, storage)?);
        cells.insert(key, Arc::downgrade(&cell));
        Ok(cell)
    }

    /// Open a ready handle.
    ///
    /// Full handles create the feed's storage if it does not exist yet.
    /// Sparse handles only reach feeds that already exist and fail with
    /// [`FeedError::FeedNotFound`] otherwise, leaving no storage behind.
    pub async fn open(&self, key: FeedKey, options: OpenOptions) -> Result<Arc<Feed>> {
        let cell = self.cell(key, options.mode == FeedMode::Full)?;
        let feed = Arc::new(Feed::new(key, options, cell));
        feed.mark_ready();

        debug!(
            feed = %key,
            mode = ?options.mode,
            writable = options.writable,
            backend = self.backend.name(),
            "Feed opened"
        );
        Ok(feed)
    }
}

impl std::fmt::Debug for FeedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedStore")
            .field("backend", &self.backend.name())
            .finish_non_exhaustive()
    }
}
