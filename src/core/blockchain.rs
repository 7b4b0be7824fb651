use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, RwLock,
    },
};

use log::{error, info, warn};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    core::{
        block::{genesis_header, Block, BlockError, BlockHeader},
        difficulty::{self, RETARGET_INTERVAL},
        economics::get_block_reward,
        snapshot::{self, SnapshotError, SnapshotStore},
        transaction::{Transaction, TransactionError},
        utils::now_timestamp,
        utxo::{UtxoError, UtxoSet},
    },
    crypto::{
        keys::sanitize,
        wallets::{load_wallets, Wallet, WalletError, MAIN_WALLET},
        Hash,
    },
    node::mempool::Mempool,
};

pub type SharedBlockchain = Arc<Blockchain>;

#[derive(Error, Debug)]
pub enum BlockchainError {
    #[error("Bad send format, expected <amount>:<address>")]
    BadSendFormat,

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("No main wallet loaded")]
    NoMainWallet,

    #[error("Transaction was rejected by the pending pool")]
    TransactionRejected,

    #[error(transparent)]
    Block(#[from] BlockError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Utxo(#[from] UtxoError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Wallet(#[from] WalletError),
}

/// Runtime options of a node, mirrors the command line surface
#[derive(Debug, Clone, Default)]
pub struct BlockchainOptions {
    pub bootstrap_addr: String,
    pub listen_addr: String,
    pub folder: PathBuf,
    pub send: Option<String>,
    pub mine: bool,
    pub wallets: bool,
    pub stats: bool,
    pub verbose: u8,
}

/// A credit or debit of the local wallet, derived from applied blocks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTx {
    pub address: String,
    pub timestamp: i64,
    pub amount: i64,
}

struct ChainState {
    headers: Vec<BlockHeader>,
    last_target: [u8; 32],
    utxos: UtxoSet,
    mempool: Mempool,
    history: Vec<HistoryTx>,
    synced: bool,
}

impl ChainState {
    fn tip(&self) -> &BlockHeader {
        &self.headers[self.headers.len() - 1]
    }
}

/// The ledger engine: header chain, unspent set and pending pool behind a
/// single reader-writer lock. The lock is never held across transport calls
/// or disk writes; snapshots are serialized under the lock and written after
/// releasing it.
pub struct Blockchain {
    state: RwLock<ChainState>,
    snapshots: SnapshotStore,
    wallets: HashMap<String, Wallet>,
    main_wallet: Wallet,
    main_address: String,
    options: BlockchainOptions,
    /// Raised to preempt the miner; cleared by the miner when it rebuilds
    pub must_stop: AtomicBool,
}

impl Blockchain {
    pub fn new(options: BlockchainOptions) -> Result<Blockchain, BlockchainError> {
        let snapshots = SnapshotStore::new(&options.folder)?;
        let wallets = load_wallets(&options.folder)?;
        let main_wallet = wallets
            .get(MAIN_WALLET)
            .cloned()
            .ok_or(BlockchainError::NoMainWallet)?;
        let main_address = main_wallet.address();

        let mut state = ChainState {
            headers: vec![genesis_header().clone()],
            last_target: difficulty::BASE_TARGET,
            utxos: UtxoSet::new(),
            mempool: Mempool::new(),
            history: vec![],
            synced: false,
        };

        match Self::load_snapshots(&snapshots) {
            Ok(Some((headers, utxos))) => {
                info!(
                    "Resuming from snapshot at height {}",
                    headers[headers.len() - 1].height
                );
                state.last_target = Self::replay_targets(&headers);
                state.headers = headers;
                state.utxos = utxos;
            }
            Ok(None) => {}
            Err(e) => warn!("Discarding stored snapshots: {e}"),
        }

        Ok(Blockchain {
            state: RwLock::new(state),
            snapshots,
            wallets,
            main_wallet,
            main_address,
            options,
            must_stop: AtomicBool::new(false),
        })
    }

    /// Load both snapshot files and verify the chain invariant end to end.
    /// Anything short of a genesis-rooted, fully linked chain is discarded.
    fn load_snapshots(
        snapshots: &SnapshotStore,
    ) -> Result<Option<(Vec<BlockHeader>, UtxoSet)>, SnapshotError> {
        let Some(headers) = snapshots.load_headers()? else {
            return Ok(None);
        };
        let Some(utxos) = snapshots.load_unspent()? else {
            return Ok(None);
        };

        if headers.first().map(|h| h.hash) != Some(genesis_header().hash)
            || !Self::verify_chain(&headers)
        {
            return Err(SnapshotError::Decode(
                "stored header chain fails verification".to_string(),
            ));
        }

        Ok(Some((headers, utxos)))
    }

    /// End to end linkage check of a header list
    pub fn verify_chain(headers: &[BlockHeader]) -> bool {
        headers.windows(2).all(|pair| {
            pair[1].prec_hash == pair[0].hash && pair[1].height == pair[0].height + 1
        })
    }

    /// Replay the retarget schedule over a restored header list to recover
    /// the current target
    fn replay_targets(headers: &[BlockHeader]) -> [u8; 32] {
        let mut last_target = difficulty::BASE_TARGET;

        for header in headers {
            if header.height > 0 && header.height % RETARGET_INTERVAL == 0 {
                let window_start = &headers[(header.height - RETARGET_INTERVAL) as usize];
                last_target = difficulty::retarget(
                    &header.target,
                    header.timestamp - window_start.timestamp,
                );
            }
        }

        last_target
    }

    pub fn tip(&self) -> BlockHeader {
        self.state.read().unwrap().tip().clone()
    }

    pub fn tip_hash(&self) -> Hash {
        self.state.read().unwrap().tip().hash
    }

    pub fn height(&self) -> u64 {
        self.state.read().unwrap().tip().height
    }

    pub fn synced(&self) -> bool {
        self.state.read().unwrap().synced
    }

    pub fn set_synced(&self, synced: bool) {
        self.state.write().unwrap().synced = synced;
    }

    pub fn options(&self) -> &BlockchainOptions {
        &self.options
    }

    pub fn wallets(&self) -> &HashMap<String, Wallet> {
        &self.wallets
    }

    pub fn main_wallet(&self) -> &Wallet {
        &self.main_wallet
    }

    pub fn main_address(&self) -> &str {
        &self.main_address
    }

    /// Total value payable to an address
    pub fn funds(&self, address: &str) -> u64 {
        self.state.read().unwrap().utxos.funds(address)
    }

    /// Current network difficulty
    pub fn difficulty(&self) -> BigUint {
        difficulty::difficulty(&self.state.read().unwrap().last_target)
    }

    /// Projected difficulty of the next retarget
    pub fn next_difficulty(&self) -> BigUint {
        let state = self.state.read().unwrap();
        difficulty::next_difficulty(
            &state.last_target,
            state.headers.len(),
            state.tip().timestamp,
            now_timestamp(),
        )
    }

    pub fn time_since_last_block(&self) -> i64 {
        now_timestamp() - self.state.read().unwrap().tip().timestamp
    }

    pub fn waiting_transaction_count(&self) -> usize {
        self.state.read().unwrap().mempool.len()
    }

    /// Credits and debits of the local wallet, in block order
    pub fn history(&self) -> Vec<HistoryTx> {
        self.state.read().unwrap().history.clone()
    }

    /// Pending transactions involving the local wallet, stamped with the
    /// current time since they have no committed one yet
    pub fn own_waiting(&self) -> Vec<HistoryTx> {
        let state = self.state.read().unwrap();
        let now = now_timestamp();

        state
            .mempool
            .transactions()
            .iter()
            .filter_map(|tx| {
                let entry = self.history_entry(tx, now);
                (entry.amount != 0).then_some(entry)
            })
            .collect()
    }

    /// Validate and admit a broadcast transaction to the pending pool
    pub fn accept_transaction(&self, tx: Transaction) -> bool {
        let mut state = self.state.write().unwrap();
        let ChainState { utxos, mempool, .. } = &mut *state;

        mempool.add(tx, utxos)
    }

    /// Validation-only check of a candidate successor, no state change
    pub fn check_new(&self, block: &Block) -> Result<(), BlockError> {
        let state = self.state.read().unwrap();
        block.verify_new(state.tip(), &state.last_target, &state.utxos)
    }

    /// Verify and apply a block received from the network or the local
    /// miner. Returns false when the block is rejected; state is unchanged
    /// in that case.
    pub fn add_block(&self, block: &Block) -> bool {
        if let Err(e) = self.check_new(block) {
            error!(
                "Cannot add block {}: {e}",
                block.header.hash.dump_hex()
            );
            return false;
        }

        let encoded = {
            let mut state = self.state.write().unwrap();

            // The tip may have moved while the read lock was released
            if block.header.prec_hash != state.tip().hash
                || block.header.height != state.tip().height + 1
            {
                error!("Cannot add block: tip moved during validation");
                return false;
            }

            state.headers.push(block.header.clone());

            if let Err(e) = state.utxos.apply_block(block) {
                error!("Refusing further mutation, chain state is corrupt: {e}");
                return false;
            }

            let entries: Vec<HistoryTx> = block
                .transactions
                .iter()
                .map(|tx| self.history_entry_for_block(tx, block))
                .filter(|entry| entry.amount != 0)
                .collect();
            state.history.extend(entries);

            state.mempool.remove_all(&block.transactions);

            if block.header.height % RETARGET_INTERVAL == 0 {
                let window_start =
                    state.headers[(block.header.height - RETARGET_INTERVAL) as usize].timestamp;
                let elapsed = block.header.timestamp - window_start;
                state.last_target = difficulty::retarget(&block.header.target, elapsed);
                info!(
                    "Difficulty retargeted to {}",
                    difficulty::difficulty(&state.last_target)
                );
            }

            (
                snapshot::encode_headers(&state.headers),
                snapshot::encode_unspent(&state.utxos),
            )
        };

        match encoded.0 {
            Ok(buf) => {
                if let Err(e) = self.snapshots.write_headers(&buf) {
                    warn!("Cannot store last headers: {e}");
                }
            }
            Err(e) => warn!("Cannot store last headers: {e}"),
        }
        match encoded.1 {
            Ok(buf) => {
                if let Err(e) = self.snapshots.write_unspent(&buf) {
                    warn!("Cannot store unspents: {e}");
                }
            }
            Err(e) => warn!("Cannot store unspents: {e}"),
        }

        true
    }

    /// Build the next mining candidate: a coinbase paying the local wallet
    /// followed by every pending transaction still valid against the chain,
    /// simulated in order. The pending pool is drained.
    pub fn build_candidate(&self) -> Result<Block, BlockchainError> {
        let mut state = self.state.write().unwrap();
        let tip = state.tip().clone();
        let target = state.last_target;

        let height = tip.height + 1;
        let coinbase =
            Transaction::new_coinbase(&self.main_wallet.private, get_block_reward(height))?;

        let mut simulated = state.utxos.clone();
        simulated.apply_transaction(&coinbase)?;

        let mut transactions = vec![coinbase];
        for tx in state.mempool.take_all() {
            match tx.validate_transfer(&simulated) {
                Ok(()) => {
                    simulated.apply_transaction(&tx)?;
                    transactions.push(tx);
                }
                Err(e) => {
                    warn!(
                        "Dropping pending transaction {}: {e}",
                        tx.stamp.hash.dump_hex()
                    );
                }
            }
        }

        Ok(Block::new_candidate(&tip, target, transactions))
    }

    /// Parse a `<amount>:<address>` directive, build a signed transfer from
    /// the local wallet and admit it to the pending pool. The miner is
    /// preempted so the next candidate includes it. Returns the transaction
    /// for broadcasting.
    pub fn send_to(&self, directive: &str) -> Result<Transaction, BlockchainError> {
        let (amount, dest) = directive
            .split_once(':')
            .ok_or(BlockchainError::BadSendFormat)?;
        let amount: u64 = amount
            .parse()
            .map_err(|_| BlockchainError::InvalidAmount(amount.to_string()))?;
        if amount == 0 || dest.is_empty() {
            return Err(BlockchainError::BadSendFormat);
        }

        let tx = {
            let mut state = self.state.write().unwrap();

            let selection = state.utxos.select_for(&self.main_address, amount);
            if selection.is_empty() {
                return Err(TransactionError::InsufficientFunds(amount).into());
            }

            let (ins, outs) =
                UtxoSet::build_in_out(&selection, amount, dest, &self.main_address);
            let tx = Transaction::new(ins, outs, &self.main_wallet.private)?;

            let ChainState { utxos, mempool, .. } = &mut *state;
            utxos.mark_targeted(&self.main_address, &selection);
            if !mempool.add(tx.clone(), utxos) {
                utxos.reset_targeted(&tx);
                return Err(BlockchainError::TransactionRejected);
            }

            tx
        };

        self.must_stop.store(true, Ordering::Relaxed);
        Ok(tx)
    }

    /// Withdraw a transaction whose broadcast failed, releasing the outputs
    /// it had reserved
    pub fn release_transaction(&self, tx: &Transaction) {
        let mut state = self.state.write().unwrap();
        state.utxos.reset_targeted(tx);
        state.mempool.remove_all(std::slice::from_ref(tx));
    }

    /// Persist both snapshots, called on shutdown
    pub fn store_snapshots(&self) {
        let encoded = {
            let state = self.state.read().unwrap();
            (
                snapshot::encode_headers(&state.headers),
                snapshot::encode_unspent(&state.utxos),
            )
        };

        if let Ok(buf) = &encoded.0 {
            if let Err(e) = self.snapshots.write_headers(buf) {
                warn!("Cannot store last headers: {e}");
            }
        }
        if let Ok(buf) = &encoded.1 {
            if let Err(e) = self.snapshots.write_unspent(buf) {
                warn!("Cannot store unspents: {e}");
            }
        }
    }

    fn history_entry_for_block(&self, tx: &Transaction, block: &Block) -> HistoryTx {
        let mut entry = self.history_entry(tx, block.header.timestamp);

        if tx.is_coinbase() && tx.outs.len() == 1 && tx.outs[0].address == self.main_address {
            entry.address = format!("Miner reward (block {})", block.header.height);
        }

        entry
    }

    /// Signed effect of a transaction on the local wallet: debits when the
    /// local key sent coins away, credits when an output pays it
    fn history_entry(&self, tx: &Transaction, timestamp: i64) -> HistoryTx {
        let own = tx.stamp.pub_key == self.main_wallet.public;
        let mut amount: i64 = 0;
        let mut address = sanitize(&tx.stamp.pub_key);

        for out in &tx.outs {
            if own && out.address != self.main_address {
                amount -= out.value as i64;
                address = out.address.clone();
            }
            if !own && out.address == self.main_address {
                amount += out.value as i64;
            }
            if tx.is_coinbase() && tx.outs.len() == 1 && out.address == self.main_address {
                amount += out.value as i64;
            }
        }

        HistoryTx {
            address,
            timestamp,
            amount,
        }
    }

    #[cfg(test)]
    pub(crate) fn force_target(&self, target: [u8; 32]) {
        self.state.write().unwrap().last_target = target;
    }

    #[cfg(test)]
    pub(crate) fn last_target(&self) -> [u8; 32] {
        self.state.read().unwrap().last_target
    }

    #[cfg(test)]
    pub(crate) fn header_at(&self, height: u64) -> BlockHeader {
        self.state.read().unwrap().headers[height as usize].clone()
    }
}
