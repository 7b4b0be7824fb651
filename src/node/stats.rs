use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{task::JoinHandle, time::interval};

/// Mining throughput counters, shared between the miner thread and the
/// ticker that folds them once per second
#[derive(Debug, Default)]
pub struct Stats {
    hashes: AtomicU64,
    hash_rate: AtomicU64,
    found_blocks: AtomicU64,
}

impl Stats {
    pub fn new() -> Stats {
        Stats::default()
    }

    /// Called by the miner on every attempted nonce
    pub fn count_hash(&self) {
        self.hashes.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold the attempt counter into the per-second rate
    pub fn update(&self) {
        let hashes = self.hashes.swap(0, Ordering::Relaxed);
        self.hash_rate.store(hashes, Ordering::Relaxed);
    }

    /// Hashes per second, as of the last fold
    pub fn hash_rate(&self) -> u64 {
        self.hash_rate.load(Ordering::Relaxed)
    }

    pub fn count_found_block(&self) {
        self.found_blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn found_blocks(&self) -> u64 {
        self.found_blocks.load(Ordering::Relaxed)
    }
}

/// Fold the mining counters once per second
pub fn start_stats_ticker(stats: Arc<Stats>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(Duration::from_secs(1));
        loop {
            tick.tick().await;
            stats.update();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_folds_the_counter() {
        let stats = Stats::new();
        for _ in 0..5 {
            stats.count_hash();
        }
        assert_eq!(stats.hash_rate(), 0);

        stats.update();
        assert_eq!(stats.hash_rate(), 5);

        stats.update();
        assert_eq!(stats.hash_rate(), 0);
    }

    #[test]
    fn test_found_blocks_accumulate() {
        let stats = Stats::new();
        stats.count_found_block();
        stats.count_found_block();
        assert_eq!(stats.found_blocks(), 2);
    }
}
