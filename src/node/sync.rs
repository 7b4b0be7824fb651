use std::{
    sync::{atomic::Ordering, Arc},
    time::Duration,
};

use log::{info, warn};
use thiserror::Error;
use tokio::{task::JoinHandle, time::sleep};

use crate::{
    core::{block::Block, blockchain::SharedBlockchain},
    node::transport::{Transport, TransportError},
};

/// Delay between two background sync attempts
pub const SYNC_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Failed to decode fetched block: {0}")]
    Decode(String),

    #[error("Fetched block was rejected")]
    Rejected,
}

/// Fetch the block stored under the current tip hash and apply it
pub(crate) async fn do_sync(
    blockchain: &SharedBlockchain,
    transport: &Arc<dyn Transport>,
) -> Result<(), SyncError> {
    let raw = transport.fetch(blockchain.tip_hash()).await?;

    let (block, _): (Block, _) = bincode::decode_from_slice(&raw, bincode::config::standard())
        .map_err(|e| SyncError::Decode(e.to_string()))?;

    if !blockchain.add_block(&block) {
        warn!("Sync: received bad block");
        return Err(SyncError::Rejected);
    }

    Ok(())
}

/// Pull successor blocks until none are left, then mark the node synced
pub async fn sync(blockchain: &SharedBlockchain, transport: &Arc<dyn Transport>) {
    info!("Start syncing at height {}", blockchain.height());

    while do_sync(blockchain, transport).await.is_ok() {}

    blockchain.set_synced(true);
    info!("Synced at height {}", blockchain.height());
}

/// Background poll keeping the chain close to the network tip. Every block
/// it applies preempts the miner, whose candidate is now stale.
pub fn start_sync_poller(
    blockchain: SharedBlockchain,
    transport: Arc<dyn Transport>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if do_sync(&blockchain, &transport).await.is_err() {
                sleep(SYNC_POLL_INTERVAL).await;
                continue;
            }

            blockchain.must_stop.store(true, Ordering::Relaxed);
            sleep(SYNC_POLL_INTERVAL).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::blockchain::{Blockchain, BlockchainOptions},
        node::{stats::Stats, transport::LocalTransport},
    };
    use std::sync::atomic::AtomicBool;

    const EASY_TARGET: [u8; 32] = [0xFF; 32];

    fn test_node(dir: &tempfile::TempDir) -> SharedBlockchain {
        let blockchain = Blockchain::new(BlockchainOptions {
            folder: dir.path().to_path_buf(),
            ..Default::default()
        })
        .unwrap();
        blockchain.force_target(EASY_TARGET);
        Arc::new(blockchain)
    }

    fn mine_on(blockchain: &Blockchain) -> Block {
        let mut candidate = blockchain.build_candidate().unwrap();
        assert!(candidate.mine(&Stats::new(), &AtomicBool::new(false)));
        candidate
    }

    #[tokio::test]
    async fn test_sync_with_no_peers_reaches_synced() {
        let dir = tempfile::tempdir().unwrap();
        let blockchain = test_node(&dir);
        let transport: Arc<dyn Transport> = Arc::new(LocalTransport::new());

        sync(&blockchain, &transport).await;
        assert!(blockchain.synced());
        assert_eq!(blockchain.height(), 0);
    }

    #[tokio::test]
    async fn test_sync_applies_stored_successors() {
        let dir_miner = tempfile::tempdir().unwrap();
        let dir_late = tempfile::tempdir().unwrap();
        let miner = test_node(&dir_miner);
        let late = test_node(&dir_late);
        let transport: Arc<dyn Transport> = Arc::new(LocalTransport::new());

        // A remote miner published two blocks, keyed by the tip they extend
        for _ in 0..2 {
            let tip_hash = miner.tip_hash();
            let block = mine_on(&miner);
            assert!(miner.add_block(&block));
            let raw = bincode::encode_to_vec(&block, bincode::config::standard()).unwrap();
            transport.store_at(tip_hash, raw).await.unwrap();
        }

        sync(&late, &transport).await;
        assert!(late.synced());
        assert_eq!(late.height(), 2);
        assert_eq!(late.tip_hash(), miner.tip_hash());
    }

    #[tokio::test]
    async fn test_sync_stops_at_a_bad_block() {
        let dir = tempfile::tempdir().unwrap();
        let blockchain = test_node(&dir);
        let transport: Arc<dyn Transport> = Arc::new(LocalTransport::new());

        transport
            .store_at(blockchain.tip_hash(), vec![0xBA, 0xD0])
            .await
            .unwrap();

        sync(&blockchain, &transport).await;
        assert!(blockchain.synced());
        assert_eq!(blockchain.height(), 0);
    }
}
