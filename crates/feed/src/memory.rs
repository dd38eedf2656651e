//! In-process feed storage.
//!
//! Logs live as long as the backend does, independent of open handles. Nodes
//! sharing one backend (through one [`crate::FeedStore`]) see each other's
//! feeds, which stands in for replication in tests and local setups.

use hypercorn_core::{FeedKey, ReplyRef};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::backend::{LogBackend, LogStorage};
use crate::error::{FeedError, Result};

#[derive(Debug, Default)]
struct MemoryLog {
    entries: Vec<Vec<u8>>,
    replies: BTreeMap<u64, Vec<ReplyRef>>,
}

/// Storage handle onto a shared memory log
struct MemoryStorage {
    log: Arc<Mutex<MemoryLog>>,
}

impl MemoryStorage {
    fn log(&self) -> Result<MutexGuard<'_, MemoryLog>> {
        self.log
            .lock()
            .map_err(|_| FeedError::Backend("memory log lock poisoned".to_string()))
    }
}

impl LogStorage for MemoryStorage {
    fn len(&self) -> Result<u64> {
        Ok(self.log()?.entries.len() as u64)
    }

    fn append(&mut self, entry: &[u8]) -> Result<u64> {
        let mut log = self.log()?;
        log.entries.push(entry.to_vec());
        Ok(log.entries.len() as u64 - 1)
    }

    fn get(&self, index: u64) -> Result<Option<Vec<u8>>> {
        let log = self.log()?;
        Ok(usize::try_from(index)
            .ok()
            .and_then(|i| log.entries.get(i))
            .cloned())
    }

    fn add_reply(&mut self, index: u64, reply: ReplyRef) -> Result<bool> {
        let mut log = self.log()?;
        let replies = log.replies.entry(index).or_default();
        if replies.contains(&reply) {
            return Ok(false);
        }
        replies.push(reply);
        Ok(true)
    }

    fn replies(&self, index: u64) -> Result<Vec<ReplyRef>> {
        Ok(self
            .log()?
            .replies
            .get(&index)
            .cloned()
            .unwrap_or_default())
    }
}

/// Memory-backed log storage
#[derive(Debug, Default)]
pub struct MemoryBackend {
    logs: Mutex<HashMap<FeedKey, Arc<Mutex<MemoryLog>>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogBackend for MemoryBackend {
    fn open_log(&self, key: &FeedKey) -> Result<Box<dyn LogStorage>> {
        let mut logs = self
            .logs
            .lock()
            .map_err(|_| FeedError::Backend("memory backend lock poisoned".to_string()))?;
        let log = logs.entry(*key).or_default().clone();
        Ok(Box::new(MemoryStorage { log }))
    }

    fn open_existing(&self, key: &FeedKey) -> Result<Option<Box<dyn LogStorage>>> {
        let logs = self
            .logs
            .lock()
            .map_err(|_| FeedError::Backend("memory backend lock poisoned".to_string()))?;
        Ok(logs.get(key).map(|log| {
            Box::new(MemoryStorage { log: log.clone() }) as Box<dyn LogStorage>
        }))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
