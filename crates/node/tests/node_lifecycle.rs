//! Listen, close, restart and input validation

mod common;

use common::{listening_node, memory_node, random_key, settle, temp_storage};
use hypercorn_core::{FeedKey, NodeConfig, ReplyRef};
use hypercorn_crypto::KeyPair;
use hypercorn_feed::{FeedError, FeedStore, LogBackend, LogStorage, MemoryBackend, OpenOptions};
use hypercorn_node::{
    Message, Node, NodeError, PostRequest, ReplyTarget, TrustOptions, PROTOCOL, PROTOCOL_VERSION,
};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[tokio::test]
async fn test_fresh_node_writes_open_message() {
    let store = Arc::new(FeedStore::memory());
    let (node, _ledger) = listening_node(&store).await;
    let key = node.feed_key().to_hex();

    let entry = node.get_message(&key, 0).await.unwrap();
    assert_eq!(
        entry.message,
        Message::Open {
            protocol: PROTOCOL.to_string(),
            version: PROTOCOL_VERSION,
        }
    );

    let raw = store
        .open(node.feed_key(), OpenOptions::sparse())
        .await
        .unwrap();
    assert_eq!(
        raw.get(0).await.unwrap().value,
        json!({"type": "open", "payload": {"protocol": "hypercorn", "version": 1}})
    );
    raw.close().await.unwrap();

    node.close().await.unwrap();
}

#[tokio::test]
async fn test_listen_is_idempotent() {
    let store = Arc::new(FeedStore::memory());
    let (node, _ledger) = listening_node(&store).await;
    node.listen().await.unwrap();
    settle(&node).await;

    let timeline = node
        .get_timeline(&node.feed_key().to_hex(), 0, 10)
        .await
        .unwrap();
    assert_eq!(timeline.len(), 1);
    assert_eq!(node.registry().len().await, 1);

    node.close().await.unwrap();
}

#[tokio::test]
async fn test_loaded_identity_skips_open_message() {
    let store = Arc::new(FeedStore::memory());
    let keypair = KeyPair::from_seed(&[9u8; 32]);
    let node = Node::new(
        NodeConfig::default(),
        keypair,
        store.clone(),
        Arc::new(hypercorn_trust_mesh::TrustLedger::in_memory()),
    );
    node.listen().await.unwrap();

    let main = node.registry().main().await.unwrap();
    assert!(main.is_empty().await.unwrap());

    node.close().await.unwrap();
}

#[tokio::test]
async fn test_close_without_listen_closes_trust_store() {
    let store = Arc::new(FeedStore::memory());
    let (node, ledger) = memory_node(&store);

    node.close().await.unwrap();
    node.close().await.unwrap();

    assert!(ledger.is_closed());
    assert!(matches!(node.listen().await, Err(NodeError::Closed)));
}

#[tokio::test]
async fn test_close_closes_tracked_feeds() {
    let store = Arc::new(FeedStore::memory());
    let (node, ledger) = listening_node(&store).await;
    let followed = random_key();
    node.follow(&followed.to_hex()).await.unwrap();
    settle(&node).await;

    let main = node.registry().main().await.unwrap();
    let feed = node.registry().get(&followed).await.unwrap();

    node.close().await.unwrap();

    assert_eq!(main.state(), hypercorn_feed::ReadyState::Closed);
    assert_eq!(feed.state(), hypercorn_feed::ReadyState::Closed);
    assert!(node.registry().is_empty().await);
    assert!(ledger.is_closed());
}

#[tokio::test]
async fn test_operations_before_listen() {
    let store = Arc::new(FeedStore::memory());
    let (node, _ledger) = memory_node(&store);
    let subject = random_key();

    assert!(matches!(
        node.follow(&subject.to_hex()).await,
        Err(NodeError::NotListening)
    ));
    assert!(matches!(node.flush().await, Err(NodeError::NotListening)));

    let pending = node
        .trust(&subject.to_base64(), TrustOptions::default())
        .await
        .unwrap();
    assert_eq!(pending.link().subject(), subject);
    assert!(pending.link().verify().is_ok());
    assert!(matches!(
        pending.confirmed().await,
        Err(NodeError::NotListening)
    ));

    node.close().await.unwrap();
}

#[tokio::test]
async fn test_rejects_malformed_input() {
    let store = Arc::new(FeedStore::memory());
    let (node, _ledger) = listening_node(&store).await;
    let own = node.feed_key().to_hex();

    assert!(matches!(
        node.follow("not-a-key").await,
        Err(NodeError::Validation(_))
    ));
    assert!(matches!(
        node.follow(&own).await,
        Err(NodeError::Validation(_))
    ));
    assert!(matches!(
        node.unfollow(&own).await,
        Err(NodeError::Validation(_))
    ));
    assert!(matches!(
        node.trust("abc", TrustOptions::default()).await,
        Err(NodeError::Validation(_))
    ));
    assert!(matches!(
        node.get_timeline(&own, 0, 0).await,
        Err(NodeError::Validation(_))
    ));
    assert!(matches!(
        node.get_timeline(&own, 0, 101).await,
        Err(NodeError::Validation(_))
    ));
    assert!(matches!(
        node.get_message("", 0).await,
        Err(NodeError::Validation(_))
    ));

    // Nothing was appended besides the open message
    let main = node.registry().main().await.unwrap();
    assert_eq!(main.len().await.unwrap(), 1);

    node.close().await.unwrap();
}

#[tokio::test]
async fn test_restart_restores_follows() {
    let storage = temp_storage();
    let followed = random_key();

    {
        let node = Node::open(NodeConfig::with_storage_dir(&storage)).unwrap();
        node.listen().await.unwrap();
        node.follow(&followed.to_base64()).await.unwrap();
        settle(&node).await;
        assert_eq!(node.following().await, vec![followed]);
        node.close().await.unwrap();
    }

    let node = Node::open(NodeConfig::with_storage_dir(&storage)).unwrap();
    node.listen().await.unwrap();
    settle(&node).await;

    assert_eq!(node.following().await, vec![followed]);

    // open + follow, no second introduction
    let timeline = node
        .get_timeline(&node.feed_key().to_hex(), 0, 10)
        .await
        .unwrap();
    assert_eq!(timeline.len(), 2);
    assert!(matches!(timeline[1].message, Message::Open { .. }));
    assert_eq!(
        timeline[0].message,
        Message::Follow {
            feed_key: followed
        }
    );

    node.close().await.unwrap();
    std::fs::remove_dir_all(&storage).ok();
}

#[tokio::test]
async fn test_restart_keeps_identity() {
    let storage = temp_storage();

    let first = Node::open(NodeConfig::with_storage_dir(&storage)).unwrap();
    let key = first.feed_key();
    first.close().await.unwrap();

    let second = Node::open(NodeConfig::with_storage_dir(&storage)).unwrap();
    assert_eq!(second.feed_key(), key);
    second.close().await.unwrap();

    std::fs::remove_dir_all(&storage).ok();
}

/// Memory logs whose appends fail while `failing` is set
struct FailingBackend {
    inner: MemoryBackend,
    failing: Arc<AtomicBool>,
}

struct FailingLog {
    inner: Box<dyn LogStorage>,
    failing: Arc<AtomicBool>,
}

impl LogStorage for FailingLog {
    fn len(&self) -> hypercorn_feed::Result<u64> {
        self.inner.len()
    }

    fn append(&mut self, entry: &[u8]) -> hypercorn_feed::Result<u64> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(FeedError::Backend("disk full".to_string()));
        }
        self.inner.append(entry)
    }

    fn get(&self, index: u64) -> hypercorn_feed::Result<Option<Vec<u8>>> {
        self.inner.get(index)
    }

    fn add_reply(&mut self, index: u64, reply: ReplyRef) -> hypercorn_feed::Result<bool> {
        self.inner.add_reply(index, reply)
    }

    fn replies(&self, index: u64) -> hypercorn_feed::Result<Vec<ReplyRef>> {
        self.inner.replies(index)
    }
}

impl FailingBackend {
    fn wrap(&self, inner: Box<dyn LogStorage>) -> Box<dyn LogStorage> {
        Box::new(FailingLog {
            inner,
            failing: self.failing.clone(),
        })
    }
}

impl LogBackend for FailingBackend {
    fn open_log(&self, key: &FeedKey) -> hypercorn_feed::Result<Box<dyn LogStorage>> {
        Ok(self.wrap(self.inner.open_log(key)?))
    }

    fn open_existing(&self, key: &FeedKey) -> hypercorn_feed::Result<Option<Box<dyn LogStorage>>> {
        Ok(self.inner.open_existing(key)?.map(|log| self.wrap(log)))
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

#[tokio::test]
async fn test_listen_retries_introduction_after_failed_append() {
    let failing = Arc::new(AtomicBool::new(true));
    let store = Arc::new(FeedStore::new(FailingBackend {
        inner: MemoryBackend::new(),
        failing: failing.clone(),
    }));
    let node = Node::new(
        NodeConfig::default(),
        KeyPair::generate(),
        store,
        Arc::new(hypercorn_trust_mesh::TrustLedger::in_memory()),
    );

    assert!(matches!(node.listen().await, Err(NodeError::Storage(_))));
    assert!(!node.is_listening().await);

    failing.store(false, Ordering::SeqCst);
    node.listen().await.unwrap();
    settle(&node).await;

    let entry = node.get_message(&node.feed_key().to_hex(), 0).await.unwrap();
    assert!(matches!(entry.message, Message::Open { .. }));

    node.close().await.unwrap();
}

#[tokio::test]
async fn test_lookup_of_unknown_feed_leaves_no_storage() {
    let storage = temp_storage();
    let config = NodeConfig::with_storage_dir(&storage);
    let feeds_dir = config.feeds_dir();
    let node = Node::open(config).unwrap();
    node.listen().await.unwrap();
    let stranger = random_key();

    assert!(matches!(
        node.get_timeline(&stranger.to_hex(), 0, 10).await,
        Err(NodeError::NotFound(_))
    ));
    assert!(matches!(
        node.get_message(&stranger.to_base64(), 0).await,
        Err(NodeError::NotFound(_))
    ));
    let outcome = node
        .post(PostRequest {
            content: "hello?".to_string(),
            reply_to: Some(ReplyTarget {
                feed_key: stranger.to_hex(),
                index: 0,
            }),
        })
        .await
        .unwrap();
    assert!(matches!(
        outcome.reply_annotation,
        Some(Err(NodeError::NotFound(_)))
    ));

    assert!(!feeds_dir.join(stranger.to_hex()).exists());
    assert!(feeds_dir.join(node.feed_key().to_hex()).exists());
    assert_eq!(node.registry().len().await, 1);

    node.close().await.unwrap();
    std::fs::remove_dir_all(&storage).ok();
}
