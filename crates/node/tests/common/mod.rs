//! Shared helpers for node integration tests

#![allow(dead_code)]

use hypercorn_core::NodeConfig;
use hypercorn_crypto::KeyPair;
use hypercorn_feed::FeedStore;
use hypercorn_node::Node;
use hypercorn_trust_mesh::TrustLedger;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// A node over `store` with an in-memory ledger the test can inspect.
///
/// Nodes built over the same store see each other's appends, which stands in
/// for replication.
pub fn memory_node(store: &Arc<FeedStore>) -> (Node, Arc<TrustLedger>) {
    let ledger = Arc::new(TrustLedger::in_memory());
    let node = Node::new(
        NodeConfig::default(),
        KeyPair::generate(),
        store.clone(),
        ledger.clone(),
    );
    (node, ledger)
}

pub async fn listening_node(store: &Arc<FeedStore>) -> (Node, Arc<TrustLedger>) {
    let (node, ledger) = memory_node(store);
    node.listen().await.unwrap();
    (node, ledger)
}

/// Wait for the coordinator to catch up, failing the test instead of hanging.
pub async fn settle(node: &Node) {
    tokio::time::timeout(Duration::from_secs(5), node.flush())
        .await
        .expect("coordinator did not catch up")
        .unwrap();
}

pub fn random_key() -> hypercorn_core::FeedKey {
    KeyPair::generate().public_key()
}

pub fn temp_storage() -> PathBuf {
    std::env::temp_dir().join(format!("hypercorn_node_{}", uuid::Uuid::new_v4()))
}
