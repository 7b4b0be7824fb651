use std::{
    process,
    sync::{Arc, Once},
    time::Duration,
};

use flexi_logger::{Duplicate, FileSpec, Logger};
use futures::future::join_all;
use log::info;
use thiserror::Error;
use tokio::{task::JoinHandle, time::sleep};

use crate::{
    core::blockchain::{Blockchain, BlockchainError, BlockchainOptions, SharedBlockchain},
    node::{
        dispatcher,
        message::{BroadcastMessage, MessageError},
        miner,
        stats::{start_stats_ticker, Stats},
        sync,
        transport::{LocalTransport, Transport, TransportError},
    },
};

static LOGGER_INIT: Once = Once::new();

#[derive(Error, Debug)]
pub enum NodeError {
    #[error(transparent)]
    Blockchain(#[from] BlockchainError),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// A running node: the ledger engine plus its long lived tasks
pub struct Node {
    pub blockchain: SharedBlockchain,
    pub transport: Arc<dyn Transport>,
    pub stats: Arc<Stats>,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    /// Create a node with the in-process transport, used when no overlay
    /// network is wired in
    pub fn new(options: BlockchainOptions) -> Result<Node, NodeError> {
        Self::new_with_transport(options, Arc::new(LocalTransport::new()))
    }

    pub fn new_with_transport(
        options: BlockchainOptions,
        transport: Arc<dyn Transport>,
    ) -> Result<Node, NodeError> {
        Self::init_logger(&options);

        Ok(Node {
            blockchain: Arc::new(Blockchain::new(options)?),
            transport,
            stats: Arc::new(Stats::new()),
            tasks: vec![],
        })
    }

    // Only initialize the logger once
    fn init_logger(options: &BlockchainOptions) {
        LOGGER_INIT.call_once(|| {
            let spec = match options.verbose {
                0 => "warn",
                1 => "info",
                _ => "debug",
            };

            let log_path = options.folder.join("logs");
            if std::fs::create_dir_all(&log_path).is_err() {
                return;
            }

            if let Ok(logger) = Logger::try_with_str(spec) {
                logger
                    .log_to_file(FileSpec::default().directory(&log_path))
                    .duplicate_to_stderr(Duplicate::Info)
                    .start()
                    .ok();
            }
        });
    }

    /// Sync with the network, then take up the duties the options ask for.
    /// A send directive broadcasts, waits for propagation and exits the
    /// process.
    pub async fn start(&mut self) -> Result<(), NodeError> {
        sync::sync(&self.blockchain, &self.transport).await;

        self.tasks.push(sync::start_sync_poller(
            self.blockchain.clone(),
            self.transport.clone(),
        ));

        let options = self.blockchain.options().clone();

        if options.wallets {
            self.show_wallets();
        }

        if let Some(directive) = &options.send {
            self.send_to(directive).await?;
            sleep(Duration::from_secs(5)).await;
            process::exit(0);
        }

        if options.stats || options.mine {
            self.tasks.push(start_stats_ticker(self.stats.clone()));
        }

        if options.mine {
            self.tasks.push(miner::start_miner(
                self.blockchain.clone(),
                self.transport.clone(),
                self.stats.clone(),
            ));
        }

        Ok(())
    }

    /// Build, admit and broadcast a transfer. Reserved outputs are released
    /// when the broadcast fails.
    pub async fn send_to(&self, directive: &str) -> Result<(), NodeError> {
        let tx = self.blockchain.send_to(directive)?;
        let message = BroadcastMessage::new_transaction(&tx)?;

        if let Err(e) = self.transport.broadcast(message).await {
            self.blockchain.release_transaction(&tx);
            return Err(NodeError::Transport(e));
        }

        info!("Broadcast transaction {}", tx.stamp.hash.dump_hex());
        Ok(())
    }

    /// Inbound fan-out message from the overlay
    pub fn handle_broadcast(&self, message: BroadcastMessage) {
        dispatcher::on_broadcast(&self.blockchain, message);
    }

    /// Inbound stored block from the overlay; returns whether to keep it
    pub fn handle_store(&self, raw: &[u8]) -> bool {
        dispatcher::on_store(&self.blockchain, raw)
    }

    fn show_wallets(&self) {
        for wallet in self.blockchain.wallets().values() {
            info!(
                "{}: {} ({} coins)",
                wallet.name,
                wallet.address(),
                self.blockchain.funds(&wallet.address())
            );
        }
    }

    /// Stop background tasks and persist snapshots
    pub async fn stop(&mut self) {
        let tasks: Vec<JoinHandle<()>> = self.tasks.drain(..).collect();
        for task in &tasks {
            task.abort();
        }
        let _ = join_all(tasks).await;

        self.blockchain.store_snapshots();
    }
}
