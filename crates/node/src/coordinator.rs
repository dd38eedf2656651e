//! Social graph coordinator.
//!
//! Single consumer of the registry's event channel. Entries of the local feed
//! drive the follow set and the local trust links; entries of followed feeds
//! only ever contribute trust links attributed to that feed.

use hypercorn_core::FeedKey;
use hypercorn_trust_mesh::TrustStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::futures::Notified;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, info, warn};

use crate::message::{Message, TrustMessage};
use crate::registry::{FeedEvent, FeedRegistry};

/// Next unprocessed index per feed. Positions only move forward.
#[derive(Debug, Default)]
pub struct Progress {
    positions: Mutex<HashMap<FeedKey, u64>>,
    notify: Notify,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self, key: &FeedKey) -> u64 {
        self.positions
            .lock()
            .map(|positions| positions.get(key).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn advance(&self, key: FeedKey, next: u64) {
        if let Ok(mut positions) = self.positions.lock() {
            let position = positions.entry(key).or_insert(0);
            if next > *position {
                *position = next;
            }
        }
        self.notify.notify_waiters();
    }

    pub fn has_processed(&self, key: &FeedKey, index: u64) -> bool {
        index < self.position(key)
    }

    /// Future resolved by the next `advance`
    pub fn changed(&self) -> Notified<'_> {
        self.notify.notified()
    }
}

pub struct Coordinator {
    local: FeedKey,
    registry: Arc<FeedRegistry>,
    trust: Arc<dyn TrustStore>,
    progress: Arc<Progress>,
}

impl Coordinator {
    pub fn new(
        registry: Arc<FeedRegistry>,
        trust: Arc<dyn TrustStore>,
        progress: Arc<Progress>,
    ) -> Self {
        Self {
            local: registry.local(),
            registry,
            trust,
            progress,
        }
    }

    /// Consume feed events until `shutdown` fires or every watch is gone.
    pub async fn run(
        self,
        mut events: mpsc::Receiver<FeedEvent>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        info!(feed = %self.local, "Coordinator started");
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
            }
        }
        info!(feed = %self.local, "Coordinator stopped");
    }

    pub async fn handle_event(&self, event: FeedEvent) {
        let FeedEvent {
            source,
            index,
            entry,
        } = event;

        // Stale events of a feed released while they were queued
        if source != self.local && !self.registry.contains(&source).await {
            debug!(feed = %source, index, "Dropping event from untracked feed");
            return;
        }
        if self.progress.has_processed(&source, index) {
            debug!(feed = %source, index, "Entry already processed");
            return;
        }

        if let Some(entry) = entry {
            match Message::from_entry(&entry.value) {
                Ok(message) if source == self.local => self.handle_local(index, message).await,
                Ok(message) => self.handle_external(source, index, message),
                Err(e) => warn!(feed = %source, index, error = %e, "Dropping invalid message"),
            }
        }

        self.progress.advance(source, index + 1);
    }

    async fn handle_local(&self, index: u64, message: Message) {
        let local = self.local;
        match message {
            Message::Open { protocol, version } => {
                info!(feed = %local, index, %protocol, version, "Feed opened");
            }
            Message::Follow { feed_key } => {
                if feed_key == local {
                    debug!(index, "Ignoring follow of own feed");
                    return;
                }
                match self.registry.adopt(feed_key).await {
                    Ok(true) => debug!(feed = %feed_key, index, "Follow applied"),
                    Ok(false) => debug!(feed = %feed_key, index, "Already following"),
                    Err(e) => warn!(feed = %feed_key, index, error = %e, "Failed to follow feed"),
                }
            }
            Message::Unfollow { feed_key } => match self.registry.release(feed_key).await {
                Ok(true) => debug!(feed = %feed_key, index, "Unfollow applied"),
                Ok(false) => debug!(feed = %feed_key, index, "Not following"),
                Err(e) => warn!(feed = %feed_key, index, error = %e, "Failed to unfollow feed"),
            },
            Message::Trust(trust) => self.record_trust(local, index, &trust),
            Message::Post(_) => debug!(feed = %local, index, "Post observed"),
            Message::Unknown { kind } => {
                debug!(feed = %local, index, %kind, "Ignoring unknown message type")
            }
        }
    }

    fn handle_external(&self, source: FeedKey, index: u64, message: Message) {
        match message {
            Message::Trust(trust) => self.record_trust(source, index, &trust),
            other => debug!(feed = %source, index, kind = other.kind(), "Ignoring message"),
        }
    }

    fn record_trust(&self, issuer: FeedKey, index: u64, trust: &TrustMessage) {
        match self.trust.add_link(issuer, &trust.link) {
            Ok(true) => info!(
                issuer = %issuer,
                subject = %trust.feed_key,
                index,
                "Trust link stored"
            ),
            Ok(false) => debug!(issuer = %issuer, subject = %trust.feed_key, index, "Trust link known"),
            Err(e) => warn!(issuer = %issuer, index, error = %e, "Failed to store trust link"),
        }
    }
}
