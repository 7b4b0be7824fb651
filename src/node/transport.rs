use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::{crypto::Hash, node::message::BroadcastMessage};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("No value stored under key {0}")]
    NotFound(String),

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Store failed: {0}")]
    Store(String),

    #[error("Broadcast failed: {0}")]
    Broadcast(String),
}

/// The overlay network as the engine sees it: retrieve and publish blocks
/// under a key, and fan out messages to peers. Implementations must apply
/// their own timeouts.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, key: Hash) -> Result<Vec<u8>, TransportError>;

    /// Publish a value under a key; returns the number of peers that stored
    /// it. A placement count of zero is a failure.
    async fn store_at(&self, key: Hash, data: Vec<u8>) -> Result<usize, TransportError>;

    async fn broadcast(&self, message: BroadcastMessage) -> Result<(), TransportError>;
}

/// In-process transport backed by a shared map. Used when the node runs
/// without an overlay network, and by tests.
#[derive(Default)]
pub struct LocalTransport {
    store: RwLock<HashMap<Hash, Vec<u8>>>,
}

impl LocalTransport {
    pub fn new() -> LocalTransport {
        LocalTransport::default()
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn fetch(&self, key: Hash) -> Result<Vec<u8>, TransportError> {
        self.store
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or_else(|| TransportError::NotFound(key.dump_hex()))
    }

    async fn store_at(&self, key: Hash, data: Vec<u8>) -> Result<usize, TransportError> {
        self.store.write().await.insert(key, data);
        Ok(1)
    }

    async fn broadcast(&self, _message: BroadcastMessage) -> Result<(), TransportError> {
        Ok(())
    }
}
