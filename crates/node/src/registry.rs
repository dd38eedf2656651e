//! Feed Registry
//!
//! Owns every long-lived feed handle of a node together with the task that
//! watches it. Watch tasks forward entries, in index order, into the single
//! event channel consumed by the coordinator.

use futures::future::join_all;
use hypercorn_core::FeedKey;
use hypercorn_feed::{Feed, FeedEntry, FeedStore, OpenOptions};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{NodeError, Result};

/// One entry observed on a watched feed.
///
/// `entry` is `None` when the log could not produce the entry at `index`;
/// the event still lets the consumer move past it.
#[derive(Debug, Clone)]
pub struct FeedEvent {
    pub source: FeedKey,
    pub index: u64,
    pub entry: Option<FeedEntry>,
}

struct WatchHandle {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl WatchHandle {
    async fn stop(self, key: FeedKey) {
        let _ = self.stop.send(());
        if let Err(e) = self.task.await {
            warn!(feed = %key, error = %e, "Watch task ended abnormally");
        }
    }
}

struct TrackedFeed {
    feed: Arc<Feed>,
    watch: Option<WatchHandle>,
}

impl TrackedFeed {
    async fn shutdown(self) -> Result<()> {
        let key = self.feed.key();
        if let Some(watch) = self.watch {
            watch.stop(key).await;
        }
        self.feed.close().await?;
        Ok(())
    }
}

pub struct FeedRegistry {
    store: Arc<FeedStore>,
    local: FeedKey,
    feeds: Mutex<HashMap<FeedKey, TrackedFeed>>,
    events: mpsc::Sender<FeedEvent>,
    closed: AtomicBool,
}

impl FeedRegistry {
    pub fn new(store: Arc<FeedStore>, local: FeedKey, events: mpsc::Sender<FeedEvent>) -> Self {
        Self {
            store,
            local,
            feeds: Mutex::new(HashMap::new()),
            events,
            closed: AtomicBool::new(false),
        }
    }

    pub fn local(&self) -> FeedKey {
        self.local
    }

    pub fn store(&self) -> &Arc<FeedStore> {
        &self.store
    }

    /// Open the local feed, full and writable, and start watching it from
    /// its first entry. Returns the tracked handle if it is already open.
    pub async fn open_main(&self) -> Result<Arc<Feed>> {
        let mut feeds = self.feeds.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(NodeError::Closed);
        }
        if let Some(tracked) = feeds.get(&self.local) {
            return Ok(tracked.feed.clone());
        }

        let feed = self
            .store
            .open(self.local, OpenOptions::full().writable())
            .await?;
        let watch = match self.spawn_watch(&feed, 0) {
            Ok(watch) => watch,
            Err(e) => {
                let _ = feed.close().await;
                return Err(e);
            }
        };

        feeds.insert(
            self.local,
            TrackedFeed {
                feed: feed.clone(),
                watch: Some(watch),
            },
        );
        info!(feed = %self.local, "Main feed opened");
        Ok(feed)
    }

    /// The local feed, once `open_main` has succeeded
    pub async fn main(&self) -> Option<Arc<Feed>> {
        self.get(&self.local).await
    }

    pub async fn get(&self, key: &FeedKey) -> Option<Arc<Feed>> {
        self.feeds
            .lock()
            .await
            .get(key)
            .map(|tracked| tracked.feed.clone())
    }

    pub async fn contains(&self, key: &FeedKey) -> bool {
        self.feeds.lock().await.contains_key(key)
    }

    /// Tracked keys, sorted
    pub async fn keys(&self) -> Vec<FeedKey> {
        let mut keys: Vec<_> = self.feeds.lock().await.keys().copied().collect();
        keys.sort();
        keys
    }

    pub async fn handles(&self) -> Vec<Arc<Feed>> {
        self.feeds
            .lock()
            .await
            .values()
            .map(|tracked| tracked.feed.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.feeds.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Run `f` against a handle for `key`.
    ///
    /// A tracked handle is lent as is. Otherwise a sparse handle is opened
    /// for the duration of `f` and closed afterwards, whatever `f` returns.
    pub async fn borrow_feed<T, F, Fut>(&self, key: FeedKey, f: F) -> Result<T>
    where
        F: FnOnce(Arc<Feed>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(feed) = self.get(&key).await {
            return f(feed).await;
        }

        let feed = self.store.open(key, OpenOptions::sparse()).await?;
        let result = match feed.ready().await {
            Ok(()) => f(feed.clone()).await,
            Err(e) => Err(e.into()),
        };

        if let Err(e) = feed.close().await {
            warn!(feed = %key, error = %e, "Failed to close borrowed feed");
        }
        debug!(feed = %key, "Borrowed feed released");
        result
    }

    /// Track `key` with a full handle and a watch from its first entry.
    ///
    /// Returns false when the key is already tracked. The key is only
    /// registered once its watch is attached.
    pub async fn adopt(&self, key: FeedKey) -> Result<bool> {
        let mut feeds = self.feeds.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(NodeError::Closed);
        }
        if feeds.contains_key(&key) {
            return Ok(false);
        }

        let feed = self.store.open(key, OpenOptions::full()).await?;
        let watch = match self.spawn_watch(&feed, 0) {
            Ok(watch) => watch,
            Err(e) => {
                let _ = feed.close().await;
                return Err(e);
            }
        };

        feeds.insert(
            key,
            TrackedFeed {
                feed,
                watch: Some(watch),
            },
        );
        info!(feed = %key, "Following feed");
        Ok(true)
    }

    /// Stop watching and close `key`. The local feed is never released.
    pub async fn release(&self, key: FeedKey) -> Result<bool> {
        if key == self.local {
            debug!(feed = %key, "Refusing to release the main feed");
            return Ok(false);
        }

        let tracked = self.feeds.lock().await.remove(&key);
        let Some(tracked) = tracked else {
            return Ok(false);
        };

        tracked.shutdown().await?;
        info!(feed = %key, "Unfollowed feed");
        Ok(true)
    }

    /// Close every tracked handle, the main feed last. Later adopts fail.
    pub async fn close_all(&self) -> Result<()> {
        let drained: Vec<(FeedKey, TrackedFeed)> = {
            let mut feeds = self.feeds.lock().await;
            self.closed.store(true, Ordering::SeqCst);
            feeds.drain().collect()
        };

        let (main, others): (Vec<_>, Vec<_>) =
            drained.into_iter().partition(|(key, _)| *key == self.local);

        let count = others.len();
        let mut results = join_all(others.into_iter().map(|(_, tracked)| tracked.shutdown())).await;
        for (_, tracked) in main {
            results.push(tracked.shutdown().await);
        }

        debug!(followed = count, "Registry closed");
        results.into_iter().collect::<Result<Vec<()>>>().map(|_| ())
    }

    fn spawn_watch(&self, feed: &Feed, from: u64) -> Result<WatchHandle> {
        let mut watcher = feed.watch(from)?;
        let events = self.events.clone();
        let key = feed.key();
        let (stop, mut stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = &mut stop_rx => break,
                    next = watcher.next() => next,
                };

                let event = match next {
                    Ok(Some(entry)) => FeedEvent {
                        source: key,
                        index: entry.index,
                        entry: Some(entry),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        let index = watcher.position().saturating_sub(1);
                        warn!(feed = %key, index, error = %e, "Failed to read feed entry");
                        FeedEvent {
                            source: key,
                            index,
                            entry: None,
                        }
                    }
                };

                tokio::select! {
                    _ = &mut stop_rx => break,
                    sent = events.send(event) => {
                        if sent.is_err() {
                            debug!(feed = %key, "Event channel closed");
                            break;
                        }
                    }
                }
            }
            debug!(feed = %key, "Watch stopped");
        });

        debug!(feed = %key, from, "Watch attached");
        Ok(WatchHandle { stop, task })
    }
}

impl std::fmt::Debug for FeedRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedRegistry")
            .field("local", &self.local)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
