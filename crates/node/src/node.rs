//! The Hypercorn node: public API over the registry, coordinator and trust
//! store.

use hypercorn_core::{current_timestamp_secs, FeedKey, NodeConfig, ReplyRef};
use hypercorn_crypto::{KeyPair, TrustLink};
use hypercorn_feed::{Feed, FeedEntry, FeedStore};
use hypercorn_trust_mesh::{TrustLedger, TrustStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::coordinator::{Coordinator, Progress};
use crate::error::{NodeError, Result};
use crate::message::{Message, PostMessage, TrustMessage};
use crate::registry::{FeedEvent, FeedRegistry};

/// Options for [`Node::trust`]
#[derive(Debug, Clone, Default)]
pub struct TrustOptions {
    /// Lifetime of the link in seconds. Defaults to the configured expiry.
    pub expires_in: Option<u64>,
    pub description: Option<String>,
}

/// A trust link that has been issued and is being appended to the local feed
#[derive(Debug)]
pub struct PendingTrust {
    link: TrustLink,
    appended: JoinHandle<Result<u64>>,
}

impl PendingTrust {
    /// The issued link, available before the append completes
    pub fn link(&self) -> &TrustLink {
        &self.link
    }

    /// Wait for the append, returning the index of the trust entry
    pub async fn confirmed(self) -> Result<u64> {
        self.appended.await?
    }
}

/// Entry a post replies to, as given by a caller
#[derive(Debug, Clone)]
pub struct ReplyTarget {
    /// Hex or base64 feed key
    pub feed_key: String,
    pub index: u64,
}

#[derive(Debug, Clone, Default)]
pub struct PostRequest {
    pub content: String,
    pub reply_to: Option<ReplyTarget>,
}

#[derive(Debug)]
pub struct PostOutcome {
    /// Index of the post on the local feed
    pub index: u64,
    /// Result of annotating the replied-to entry, when the post is a reply
    pub reply_annotation: Option<Result<()>>,
}

/// A decoded entry with its reply annotations
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    pub index: u64,
    pub message: Message,
    pub replies: Vec<ReplyRef>,
}

impl TimelineEntry {
    fn decode(entry: FeedEntry) -> Result<Self> {
        Ok(Self {
            index: entry.index,
            message: Message::from_entry(&entry.value)?,
            replies: entry.replies,
        })
    }
}

struct CoordinatorHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Runtime {
    events: Option<mpsc::Receiver<FeedEvent>>,
    coordinator: Option<CoordinatorHandle>,
    closed: bool,
}

pub struct Node {
    config: NodeConfig,
    keypair: KeyPair,
    just_created: AtomicBool,
    registry: Arc<FeedRegistry>,
    trust: Arc<dyn TrustStore>,
    progress: Arc<Progress>,
    runtime: Mutex<Runtime>,
}

impl Node {
    /// Assemble a node from its collaborators. Nothing is opened until
    /// [`Node::listen`].
    pub fn new(
        config: NodeConfig,
        keypair: KeyPair,
        store: Arc<FeedStore>,
        trust: Arc<dyn TrustStore>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.event_buffer.max(1));
        let local = keypair.public_key();

        Self {
            just_created: AtomicBool::new(keypair.just_created()),
            registry: Arc::new(FeedRegistry::new(store, local, tx)),
            trust,
            progress: Arc::new(Progress::new()),
            runtime: Mutex::new(Runtime {
                events: Some(rx),
                ..Runtime::default()
            }),
            config,
            keypair,
        }
    }

    /// Open a node persisted under `config.storage_dir`: key pair, SQLite
    /// feeds and the SQLite trust ledger.
    pub fn open(config: NodeConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| NodeError::Validation(e.to_string()))?;

        let keypair = KeyPair::load_or_create(config.keypair_path())?;
        let store = Arc::new(FeedStore::sqlite(config.feeds_dir()));
        let trust: Arc<dyn TrustStore> = Arc::new(TrustLedger::open(config.trust_store_path())?);

        info!(
            feed = %keypair.public_key(),
            storage = %config.storage_dir.display(),
            "Node opened"
        );
        Ok(Self::new(config, keypair, store, trust))
    }

    pub fn feed_key(&self) -> FeedKey {
        self.keypair.public_key()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<FeedRegistry> {
        &self.registry
    }

    /// Open the main feed, start the coordinator and, for a freshly created
    /// identity, write the `open` introduction as entry 0.
    pub async fn listen(&self) -> Result<()> {
        let mut runtime = self.runtime.lock().await;
        if runtime.closed {
            return Err(NodeError::Closed);
        }
        if runtime.coordinator.is_some() {
            return Ok(());
        }
        let events = runtime.events.take().ok_or(NodeError::Closed)?;

        let main = match self.registry.open_main().await {
            Ok(main) => main,
            Err(e) => {
                runtime.events = Some(events);
                return Err(e);
            }
        };

        if let Err(e) = self.introduce(&main).await {
            runtime.events = Some(events);
            return Err(e);
        }

        let (shutdown, shutdown_rx) = oneshot::channel();
        let coordinator = Coordinator::new(
            self.registry.clone(),
            self.trust.clone(),
            self.progress.clone(),
        );
        let task = tokio::spawn(coordinator.run(events, shutdown_rx));
        runtime.coordinator = Some(CoordinatorHandle { shutdown, task });

        info!(feed = %self.feed_key(), backend = self.registry.store().backend_name(), "Node listening");
        Ok(())
    }

    /// Write the `open` message as entry 0 of a freshly created identity.
    /// `just_created` is only cleared once the entry is on the feed.
    async fn introduce(&self, main: &Feed) -> Result<()> {
        if !self.just_created.load(Ordering::SeqCst) {
            return Ok(());
        }
        if main.is_empty().await? {
            let index = main.append(&Message::open().to_entry()).await?;
            info!(feed = %self.feed_key(), index, "Wrote open message");
        }
        self.just_created.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub async fn is_listening(&self) -> bool {
        self.runtime.lock().await.coordinator.is_some()
    }

    /// Stop the coordinator and close every feed and the trust store.
    ///
    /// A node that never listened only closes its trust store.
    pub async fn close(&self) -> Result<()> {
        let mut runtime = self.runtime.lock().await;
        if runtime.closed {
            return Ok(());
        }
        runtime.closed = true;
        runtime.events = None;

        let Some(coordinator) = runtime.coordinator.take() else {
            self.trust.close()?;
            info!(feed = %self.feed_key(), "Node closed");
            return Ok(());
        };

        let _ = coordinator.shutdown.send(());
        if let Err(e) = coordinator.task.await {
            warn!(error = %e, "Coordinator task ended abnormally");
        }

        let trust = self.trust.clone();
        let (trust_closed, registry_closed) =
            tokio::join!(async move { trust.close() }, self.registry.close_all());
        trust_closed?;
        registry_closed?;

        info!(feed = %self.feed_key(), "Node closed");
        Ok(())
    }

    async fn main_feed(&self) -> Result<Arc<Feed>> {
        self.registry.main().await.ok_or(NodeError::NotListening)
    }

    fn parse_key(&self, encoded: &str) -> Result<FeedKey> {
        FeedKey::parse(encoded).map_err(|e| NodeError::Validation(e.to_string()))
    }

    fn parse_followee(&self, encoded: &str) -> Result<FeedKey> {
        let key = self.parse_key(encoded)?;
        if key == self.feed_key() {
            return Err(NodeError::Validation(
                "cannot follow or unfollow the node's own feed".to_string(),
            ));
        }
        Ok(key)
    }

    /// Append a `follow` message. The coordinator starts tracking the feed
    /// once it processes the entry.
    pub async fn follow(&self, feed_key: &str) -> Result<u64> {
        let key = self.parse_followee(feed_key)?;
        let main = self.main_feed().await?;
        let index = main
            .append(&Message::Follow { feed_key: key }.to_entry())
            .await?;
        debug!(feed = %key, index, "Follow appended");
        Ok(index)
    }

    pub async fn unfollow(&self, feed_key: &str) -> Result<u64> {
        let key = self.parse_followee(feed_key)?;
        let main = self.main_feed().await?;
        let index = main
            .append(&Message::Unfollow { feed_key: key }.to_entry())
            .await?;
        debug!(feed = %key, index, "Unfollow appended");
        Ok(index)
    }

    /// Issue a trust link for `subject` and append it to the local feed.
    ///
    /// The link is returned right away; the append is reported through
    /// [`PendingTrust::confirmed`].
    pub async fn trust(&self, subject: &str, options: TrustOptions) -> Result<PendingTrust> {
        let subject = self.parse_key(subject)?;
        let expires_in = options
            .expires_in
            .unwrap_or(self.config.default_trust_expiry_secs);
        let expires_at = current_timestamp_secs().saturating_add(expires_in);
        let link = self.keypair.issue_link(subject, expires_at);

        let entry = Message::Trust(TrustMessage {
            expires_at,
            feed_key: subject,
            link: link.clone(),
            description: options.description,
        })
        .to_entry();

        let main = self.registry.main().await;
        let appended = tokio::spawn(async move {
            let main = main.ok_or(NodeError::NotListening)?;
            let index = main.append(&entry).await?;
            debug!(subject = %subject, index, "Trust appended");
            Ok::<u64, NodeError>(index)
        });

        info!(subject = %subject, expires_at, "Trust link issued");
        Ok(PendingTrust { link, appended })
    }

    /// Append a post. A reply also annotates the target entry; failing to do
    /// so is reported in the outcome but keeps the post.
    pub async fn post(&self, request: PostRequest) -> Result<PostOutcome> {
        let reply_to = request
            .reply_to
            .map(|target| Ok::<_, NodeError>(ReplyRef::new(self.parse_key(&target.feed_key)?, target.index)))
            .transpose()?;

        let main = self.main_feed().await?;
        let index = main
            .append(
                &Message::Post(PostMessage {
                    content: request.content,
                    reply_to,
                })
                .to_entry(),
            )
            .await?;
        debug!(feed = %self.feed_key(), index, "Post appended");

        let reply_annotation = match reply_to {
            Some(target) => {
                let annotation = ReplyRef::new(self.feed_key(), index);
                let result = self
                    .registry
                    .borrow_feed(target.feed_key, |feed| async move {
                        feed.add_reply(target.index, annotation)
                            .await
                            .map(|_| ())
                            .map_err(NodeError::from)
                    })
                    .await;
                if let Err(e) = &result {
                    warn!(
                        target = %target.feed_key,
                        target_index = target.index,
                        index,
                        error = %e,
                        "Failed to annotate reply"
                    );
                }
                Some(result)
            }
            None => None,
        };

        Ok(PostOutcome {
            index,
            reply_annotation,
        })
    }

    /// Entries of `feed_key`, newest first, skipping the `offset` newest.
    /// Entries that fail validation are left out.
    pub async fn get_timeline(
        &self,
        feed_key: &str,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<TimelineEntry>> {
        if limit == 0 || limit > self.config.max_timeline_limit {
            return Err(NodeError::Validation(format!(
                "limit must be between 1 and {}",
                self.config.max_timeline_limit
            )));
        }
        let key = self.parse_key(feed_key)?;

        let entries = self
            .registry
            .borrow_feed(key, |feed| async move {
                feed.timeline(offset, limit).await.map_err(NodeError::from)
            })
            .await?;

        Ok(entries
            .into_iter()
            .filter_map(|entry| {
                let index = entry.index;
                match TimelineEntry::decode(entry) {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        warn!(feed = %key, index, error = %e, "Skipping invalid timeline entry");
                        None
                    }
                }
            })
            .collect())
    }

    pub async fn get_message(&self, feed_key: &str, index: u64) -> Result<TimelineEntry> {
        let key = self.parse_key(feed_key)?;
        let entry = self
            .registry
            .borrow_feed(key, |feed| async move {
                feed.get(index).await.map_err(NodeError::from)
            })
            .await?;
        TimelineEntry::decode(entry)
    }

    /// Keys of the followed feeds
    pub async fn following(&self) -> Vec<FeedKey> {
        let local = self.feed_key();
        self.registry
            .keys()
            .await
            .into_iter()
            .filter(|key| *key != local)
            .collect()
    }

    /// Next index the coordinator will process for `key`
    pub fn position(&self, key: &FeedKey) -> u64 {
        self.progress.position(key)
    }

    /// Wait until every entry currently in a tracked feed has been processed.
    pub async fn flush(&self) -> Result<()> {
        if !self.is_listening().await {
            return Err(NodeError::NotListening);
        }

        loop {
            let changed = self.progress.changed();
            tokio::pin!(changed);
            changed.as_mut().enable();

            if self.caught_up().await {
                return Ok(());
            }
            changed.await;
        }
    }

    async fn caught_up(&self) -> bool {
        for feed in self.registry.handles().await {
            // Handles closed under us belong to feeds being released
            let Ok(len) = feed.len().await else {
                continue;
            };
            if self.progress.position(&feed.key()) < len {
                return false;
            }
        }
        true
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("feed_key", &self.feed_key())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
