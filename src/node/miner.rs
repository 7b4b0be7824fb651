use std::sync::{atomic::Ordering, Arc};

use log::{info, warn};
use tokio::task::JoinHandle;

use crate::{
    core::blockchain::SharedBlockchain,
    node::{stats::Stats, sync, transport::Transport},
};

/// Mine candidates on top of the tip until the task is aborted. A raised
/// `must_stop` (new block arrived, or a local send wants into the next
/// candidate) discards the current candidate and rebuilds from the new tip.
/// Found blocks are published under the hash of the tip they extend, then
/// picked back up through sync.
pub fn start_miner(
    blockchain: SharedBlockchain,
    transport: Arc<dyn Transport>,
    stats: Arc<Stats>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let mut candidate = match blockchain.build_candidate() {
                Ok(candidate) => candidate,
                Err(e) => {
                    warn!("Cannot build mining candidate: {e}");
                    return;
                }
            };
            let prev_hash = candidate.header.prec_hash;

            let worker_chain = blockchain.clone();
            let worker_stats = stats.clone();
            let mined = tokio::task::spawn_blocking(move || {
                let found = candidate.mine(&worker_stats, &worker_chain.must_stop);
                (candidate, found)
            })
            .await;

            let (block, found) = match mined {
                Ok(result) => result,
                Err(e) => {
                    warn!("Mining worker died: {e}");
                    return;
                }
            };

            if !found {
                blockchain.must_stop.store(false, Ordering::Relaxed);
                continue;
            }

            info!("Found block {}", block.header.hash.dump_hex());

            let raw = match bincode::encode_to_vec(&block, bincode::config::standard()) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("Cannot encode mined block: {e}");
                    continue;
                }
            };

            match transport.store_at(prev_hash, raw).await {
                Ok(placements) if placements > 0 => {
                    stats.count_found_block();
                    // Learn through sync whether peers accepted it
                    if let Err(e) = sync::do_sync(&blockchain, &transport).await {
                        warn!("Post-mine sync failed: {e}");
                    }
                }
                Ok(_) => {
                    warn!(
                        "Nobody stored mined block {}",
                        block.header.hash.dump_hex()
                    );
                }
                Err(e) => {
                    warn!(
                        "Error storing mined block {}: {e}",
                        block.header.hash.dump_hex()
                    );
                }
            }
        }
    })
}
