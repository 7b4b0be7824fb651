use std::sync::{atomic::AtomicBool, atomic::Ordering, OnceLock};

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::{
    core::{
        difficulty,
        economics::get_block_reward,
        transaction::{Transaction, TransactionError},
        utils::now_timestamp,
        utxo::{UtxoError, UtxoSet},
    },
    crypto::{merkle_tree::merkle_root, Hash},
};

/// Accepted wall clock drift for incoming block timestamps, in seconds
pub const MAX_TIMESTAMP_SKEW: i64 = 2 * 60 * 60;

/// Timestamp baked into the genesis header
const GENESIS_TIMESTAMP: i64 = 1_609_459_200;

#[derive(Error, Debug)]
pub enum BlockError {
    #[error("Header does not extend the current tip")]
    AppendMismatch,

    #[error("Header hash does not match its contents")]
    HashMismatch,

    #[error("Header hash does not meet the current target")]
    PowInsufficient,

    #[error("Header target differs from the network target")]
    WrongTarget,

    #[error("Block timestamp is out of range")]
    TimestampOutOfRange,

    #[error("Merkle root does not commit to the block's transactions")]
    MerkleMismatch,

    #[error("Block does not start with a coinbase")]
    MissingCoinbase,

    #[error("Invalid transaction: {0}")]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Utxo(#[from] UtxoError),
}

/// The part of a block committed to the header chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct BlockHeader {
    pub height: u64,
    pub timestamp: i64,
    pub prec_hash: Hash,
    pub hash: Hash,
    pub target: [u8; 32],
    pub nonce: u64,
    pub merkle_root: Hash,
}

impl BlockHeader {
    /// Hash over every header field except `hash` itself, all fixed width
    /// big-endian
    pub fn compute_hash(&self) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.height.to_be_bytes());
        hasher.update(self.timestamp.to_be_bytes());
        hasher.update(self.prec_hash.dump_buf());
        hasher.update(self.target);
        hasher.update(self.nonce.to_be_bytes());
        hasher.update(self.merkle_root.dump_buf());

        Hash::new_from_buf(hasher.finalize().into())
    }
}

/// The fixed first header every node starts from
pub fn genesis_header() -> &'static BlockHeader {
    static GENESIS: OnceLock<BlockHeader> = OnceLock::new();

    GENESIS.get_or_init(|| {
        let mut header = BlockHeader {
            height: 0,
            timestamp: GENESIS_TIMESTAMP,
            prec_hash: Hash::ZERO,
            hash: Hash::ZERO,
            target: difficulty::BASE_TARGET,
            nonce: 0,
            merkle_root: Hash::ZERO,
        };
        header.hash = header.compute_hash();
        header
    })
}

/// A full block: header plus ordered transactions, coinbase first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Assemble an unmined candidate on top of `tip`
    pub fn new_candidate(
        tip: &BlockHeader,
        target: [u8; 32],
        transactions: Vec<Transaction>,
    ) -> Block {
        let stamps: Vec<Hash> = transactions.iter().map(|tx| tx.stamp.hash).collect();

        Block {
            header: BlockHeader {
                height: tip.height + 1,
                timestamp: now_timestamp().max(tip.timestamp + 1),
                prec_hash: tip.hash,
                hash: Hash::ZERO,
                target,
                nonce: 0,
                merkle_root: merkle_root(&stamps),
            },
            transactions,
        }
    }

    /// Full validation of a direct successor of `tip`. Transactions are
    /// checked against the unspent set simulated forward through the block,
    /// so each one sees the state left by its predecessors.
    pub fn verify_new(
        &self,
        tip: &BlockHeader,
        current_target: &[u8; 32],
        utxos: &UtxoSet,
    ) -> Result<(), BlockError> {
        if self.header.height != tip.height + 1 || self.header.prec_hash != tip.hash {
            return Err(BlockError::AppendMismatch);
        }
        if self.header.target != *current_target {
            return Err(BlockError::WrongTarget);
        }
        if self.header.compute_hash() != self.header.hash {
            return Err(BlockError::HashMismatch);
        }
        if !self.header.hash.meets_target(current_target) {
            return Err(BlockError::PowInsufficient);
        }
        if self.header.timestamp <= tip.timestamp
            || self.header.timestamp > now_timestamp() + MAX_TIMESTAMP_SKEW
        {
            return Err(BlockError::TimestampOutOfRange);
        }

        let stamps: Vec<Hash> = self.transactions.iter().map(|tx| tx.stamp.hash).collect();
        if merkle_root(&stamps) != self.header.merkle_root {
            return Err(BlockError::MerkleMismatch);
        }

        let reward = get_block_reward(self.header.height);
        match self.transactions.first() {
            Some(coinbase) if coinbase.is_coinbase() => coinbase.validate_coinbase(reward)?,
            _ => return Err(BlockError::MissingCoinbase),
        }

        let mut simulated = utxos.clone();
        simulated.apply_transaction(&self.transactions[0])?;
        for tx in &self.transactions[1..] {
            if tx.is_coinbase() {
                return Err(BlockError::Transaction(TransactionError::MalformedCoinbase));
            }
            tx.validate_transfer(&simulated)?;
            simulated.apply_transaction(tx)?;
        }

        Ok(())
    }

    /// Stamp and proof-of-work checks for a historic block. Replayed blocks
    /// never mutate chain state.
    pub fn verify_old(&self) -> Result<(), BlockError> {
        if self.header.compute_hash() != self.header.hash {
            return Err(BlockError::HashMismatch);
        }
        if !self.header.hash.meets_target(&self.header.target) {
            return Err(BlockError::PowInsufficient);
        }
        for tx in &self.transactions {
            tx.verify_stamp()?;
        }

        Ok(())
    }

    /// Search for a nonce whose header hash meets the target. Returns false
    /// when preempted through `must_stop`, which is observed on every
    /// attempt.
    pub fn mine(&mut self, stats: &crate::node::stats::Stats, must_stop: &AtomicBool) -> bool {
        loop {
            if must_stop.load(Ordering::Relaxed) {
                return false;
            }

            self.header.hash = self.header.compute_hash();
            stats.count_hash();

            if self.header.hash.meets_target(&self.header.target) {
                return true;
            }

            self.header.nonce = self.header.nonce.wrapping_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::economics::BLOCK_REWARD,
        crypto::keys::{sanitize, Private},
        node::stats::Stats,
    };

    const EASY_TARGET: [u8; 32] = [0xFF; 32];

    fn mined_successor(key: &Private, tip: &BlockHeader) -> Block {
        let coinbase = Transaction::new_coinbase(key, BLOCK_REWARD).unwrap();
        let mut block = Block::new_candidate(tip, EASY_TARGET, vec![coinbase]);
        assert!(block.mine(&Stats::new(), &AtomicBool::new(false)));
        block
    }

    #[test]
    fn test_genesis_is_deterministic() {
        let genesis = genesis_header();
        assert_eq!(genesis.height, 0);
        assert_eq!(genesis.prec_hash, Hash::ZERO);
        assert_eq!(genesis.hash, genesis.compute_hash());
    }

    #[test]
    fn test_header_hash_excludes_hash_field() {
        let mut header = genesis_header().clone();
        let before = header.compute_hash();
        header.hash = Hash::digest(b"scribble");
        assert_eq!(header.compute_hash(), before);

        header.nonce += 1;
        assert_ne!(header.compute_hash(), before);
    }

    #[test]
    fn test_mined_successor_is_valid() {
        let key = Private::new_random();
        let utxos = UtxoSet::new();
        let block = mined_successor(&key, genesis_header());

        assert!(block
            .verify_new(genesis_header(), &EASY_TARGET, &utxos)
            .is_ok());
    }

    #[test]
    fn test_wrong_prec_hash_is_rejected() {
        let key = Private::new_random();
        let utxos = UtxoSet::new();
        let mut block = mined_successor(&key, genesis_header());
        block.header.prec_hash = Hash::digest(b"elsewhere");
        block.header.hash = block.header.compute_hash();

        assert!(matches!(
            block.verify_new(genesis_header(), &EASY_TARGET, &utxos),
            Err(BlockError::AppendMismatch)
        ));
    }

    #[test]
    fn test_stale_hash_is_rejected() {
        let key = Private::new_random();
        let utxos = UtxoSet::new();
        let mut block = mined_successor(&key, genesis_header());
        block.header.nonce += 1;

        assert!(matches!(
            block.verify_new(genesis_header(), &EASY_TARGET, &utxos),
            Err(BlockError::HashMismatch)
        ));
    }

    #[test]
    fn test_insufficient_pow_is_rejected() {
        let key = Private::new_random();
        let utxos = UtxoSet::new();
        let mut block = mined_successor(&key, genesis_header());

        // A hash can never meet the impossible all-zero target
        block.header.target = [0u8; 32];
        block.header.hash = block.header.compute_hash();

        assert!(matches!(
            block.verify_new(genesis_header(), &[0u8; 32], &utxos),
            Err(BlockError::PowInsufficient)
        ));
    }

    #[test]
    fn test_foreign_target_is_rejected() {
        let key = Private::new_random();
        let utxos = UtxoSet::new();
        let block = mined_successor(&key, genesis_header());

        assert!(matches!(
            block.verify_new(genesis_header(), &difficulty::BASE_TARGET, &utxos),
            Err(BlockError::WrongTarget)
        ));
    }

    #[test]
    fn test_timestamp_must_advance() {
        let key = Private::new_random();
        let utxos = UtxoSet::new();
        let mut block = mined_successor(&key, genesis_header());
        block.header.timestamp = genesis_header().timestamp;
        assert!(block.mine(&Stats::new(), &AtomicBool::new(false)));

        assert!(matches!(
            block.verify_new(genesis_header(), &EASY_TARGET, &utxos),
            Err(BlockError::TimestampOutOfRange)
        ));
    }

    #[test]
    fn test_far_future_timestamp_is_rejected() {
        let key = Private::new_random();
        let utxos = UtxoSet::new();
        let mut block = mined_successor(&key, genesis_header());
        block.header.timestamp = now_timestamp() + MAX_TIMESTAMP_SKEW + 60;
        assert!(block.mine(&Stats::new(), &AtomicBool::new(false)));

        assert!(matches!(
            block.verify_new(genesis_header(), &EASY_TARGET, &utxos),
            Err(BlockError::TimestampOutOfRange)
        ));
    }

    #[test]
    fn test_wrong_coinbase_value_is_rejected() {
        let key = Private::new_random();
        let utxos = UtxoSet::new();
        let coinbase = Transaction::new_coinbase(&key, BLOCK_REWARD + 1).unwrap();
        let mut block = Block::new_candidate(genesis_header(), EASY_TARGET, vec![coinbase]);
        assert!(block.mine(&Stats::new(), &AtomicBool::new(false)));

        assert!(matches!(
            block.verify_new(genesis_header(), &EASY_TARGET, &utxos),
            Err(BlockError::Transaction(TransactionError::MalformedCoinbase))
        ));
    }

    #[test]
    fn test_missing_coinbase_is_rejected() {
        let utxos = UtxoSet::new();
        let mut block = Block::new_candidate(genesis_header(), EASY_TARGET, vec![]);
        assert!(block.mine(&Stats::new(), &AtomicBool::new(false)));

        assert!(matches!(
            block.verify_new(genesis_header(), &EASY_TARGET, &utxos),
            Err(BlockError::MissingCoinbase)
        ));
    }

    #[test]
    fn test_tampered_transaction_list_breaks_merkle_root() {
        let key = Private::new_random();
        let utxos = UtxoSet::new();
        let mut block = mined_successor(&key, genesis_header());
        block
            .transactions
            .push(Transaction::new_coinbase(&key, BLOCK_REWARD).unwrap());
        assert!(block.mine(&Stats::new(), &AtomicBool::new(false)));

        assert!(matches!(
            block.verify_new(genesis_header(), &EASY_TARGET, &utxos),
            Err(BlockError::MerkleMismatch)
        ));
    }

    #[test]
    fn test_intra_block_spend_of_earlier_output() {
        let key = Private::new_random();
        let address = sanitize(&key.to_public());

        // Block 1 funds the sender
        let mut utxos = UtxoSet::new();
        let funding = mined_successor(&key, genesis_header());
        utxos.apply_block(&funding).unwrap();

        // Block 2 spends the coinbase of block 1
        let selection = utxos.select_for(&address, 40);
        let (ins, outs) = UtxoSet::build_in_out(&selection, 40, "dest", &address);
        let transfer = Transaction::new(ins, outs, &key).unwrap();
        let coinbase = Transaction::new_coinbase(&key, BLOCK_REWARD).unwrap();
        let mut block =
            Block::new_candidate(&funding.header, EASY_TARGET, vec![coinbase, transfer]);
        assert!(block.mine(&Stats::new(), &AtomicBool::new(false)));

        assert!(block
            .verify_new(&funding.header, &EASY_TARGET, &utxos)
            .is_ok());
    }

    #[test]
    fn test_double_spend_within_block_is_rejected() {
        let key = Private::new_random();
        let address = sanitize(&key.to_public());

        let mut utxos = UtxoSet::new();
        let funding = mined_successor(&key, genesis_header());
        utxos.apply_block(&funding).unwrap();

        let selection = utxos.select_for(&address, 40);
        let (ins, outs) = UtxoSet::build_in_out(&selection, 40, "dest", &address);
        let spend = Transaction::new(ins.clone(), outs.clone(), &key).unwrap();
        let respend = Transaction::new(ins, vec![outs[0].clone()], &key).unwrap();

        let coinbase = Transaction::new_coinbase(&key, BLOCK_REWARD).unwrap();
        let mut block = Block::new_candidate(
            &funding.header,
            EASY_TARGET,
            vec![coinbase, spend, respend],
        );
        assert!(block.mine(&Stats::new(), &AtomicBool::new(false)));

        assert!(matches!(
            block.verify_new(&funding.header, &EASY_TARGET, &utxos),
            Err(BlockError::Transaction(TransactionError::UnknownInput(..)))
        ));
    }

    #[test]
    fn test_verify_old_checks_stamps_and_pow() {
        let key = Private::new_random();
        let utxos = UtxoSet::new();
        let block = mined_successor(&key, genesis_header());
        assert!(block.verify_old().is_ok());

        let mut tampered = block.clone();
        tampered.transactions[0].outs[0].value += 1;
        let stamps: Vec<Hash> = tampered.transactions.iter().map(|tx| tx.stamp.hash).collect();
        tampered.header.merkle_root = merkle_root(&stamps);
        assert!(tampered.mine(&Stats::new(), &AtomicBool::new(false)));
        assert!(tampered.verify_old().is_err());
    }

    #[test]
    fn test_mine_observes_cancellation() {
        let key = Private::new_random();
        let coinbase = Transaction::new_coinbase(&key, BLOCK_REWARD).unwrap();
        let mut block = Block::new_candidate(genesis_header(), [0u8; 32], vec![coinbase]);

        let cancelled = AtomicBool::new(true);
        assert!(!block.mine(&Stats::new(), &cancelled));
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let key = Private::new_random();
        let block = mined_successor(&key, genesis_header());

        let raw = bincode::encode_to_vec(&block, bincode::config::standard()).unwrap();
        let (decoded, _): (Block, _) =
            bincode::decode_from_slice(&raw, bincode::config::standard()).unwrap();
        assert_eq!(block, decoded);
    }
}
