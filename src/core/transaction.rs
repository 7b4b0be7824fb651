use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    core::utxo::UtxoSet,
    crypto::{
        keys::{sanitize, Private, Public},
        Hash,
    },
};

#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Transaction signature does not verify")]
    InvalidSignature,

    #[error("Input {0}:{1} is not an unspent output of the sender")]
    UnknownInput(String, u32),

    #[error("Transaction spends more than its inputs hold")]
    ValueImbalance,

    #[error("Malformed coinbase transaction")]
    MalformedCoinbase,

    #[error("Not enough available funds to send {0}")]
    InsufficientFunds(u64),

    #[error("Failed to encode transaction: {0}")]
    Encode(String),
}

/// Reference to an output of an earlier transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct TxIn {
    pub prev_hash: Hash,
    pub prev_idx: u32,
}

/// Value assigned to an address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct TxOut {
    pub value: u64,
    pub address: String,
}

/// Sender public key, signature, and content hash of a transaction.
/// The hash covers the inputs and outputs only, never the stamp itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct Stamp {
    pub pub_key: Public,
    pub sig: Vec<u8>,
    pub hash: Hash,
}

/// A transfer of value, or (with no inputs) the coinbase of a block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct Transaction {
    pub ins: Vec<TxIn>,
    pub outs: Vec<TxOut>,
    pub stamp: Stamp,
}

impl Transaction {
    /// Hash over the canonical encoding of inputs and outputs
    pub fn content_hash(ins: &[TxIn], outs: &[TxOut]) -> Result<Hash, TransactionError> {
        let buf = bincode::encode_to_vec(
            (ins.to_vec(), outs.to_vec()),
            bincode::config::standard(),
        )
        .map_err(|e| TransactionError::Encode(e.to_string()))?;

        Ok(Hash::digest(&buf))
    }

    /// Build and sign a transaction
    pub fn new(
        ins: Vec<TxIn>,
        outs: Vec<TxOut>,
        key: &Private,
    ) -> Result<Transaction, TransactionError> {
        let hash = Self::content_hash(&ins, &outs)?;
        let stamp = Stamp {
            pub_key: key.to_public(),
            sig: key.sign(&hash),
            hash,
        };

        Ok(Transaction { ins, outs, stamp })
    }

    /// The first transaction of a block: no inputs, one output paying the
    /// reward to the miner's own address
    pub fn new_coinbase(miner: &Private, reward: u64) -> Result<Transaction, TransactionError> {
        let outs = vec![TxOut {
            value: reward,
            address: sanitize(&miner.to_public()),
        }];

        Self::new(vec![], outs, miner)
    }

    pub fn is_coinbase(&self) -> bool {
        self.ins.is_empty()
    }

    /// Check that the stamp hash matches the content and that the signature
    /// verifies under the stamped public key
    pub fn verify_stamp(&self) -> Result<(), TransactionError> {
        let hash = Self::content_hash(&self.ins, &self.outs)?;

        if hash != self.stamp.hash || !self.stamp.pub_key.verify(&self.stamp.sig, &hash) {
            return Err(TransactionError::InvalidSignature);
        }

        Ok(())
    }

    /// Validate a coinbase: single output of exactly `reward`, paid to the
    /// miner's own address
    pub fn validate_coinbase(&self, reward: u64) -> Result<(), TransactionError> {
        self.verify_stamp()?;

        if !self.is_coinbase()
            || self.outs.len() != 1
            || self.outs[0].value != reward
            || self.outs[0].address != sanitize(&self.stamp.pub_key)
        {
            return Err(TransactionError::MalformedCoinbase);
        }

        Ok(())
    }

    /// Validate a transfer against the current unspent set: every input must
    /// be an outstanding output of the sender, referenced at most once, and
    /// the outputs must not exceed the inputs. Any surplus is burned.
    pub fn validate_transfer(&self, utxos: &UtxoSet) -> Result<(), TransactionError> {
        self.verify_stamp()?;

        let sender = sanitize(&self.stamp.pub_key);
        let mut seen: Vec<(Hash, u32)> = Vec::with_capacity(self.ins.len());
        let mut in_total: u64 = 0;

        for txin in &self.ins {
            let reference = (txin.prev_hash, txin.prev_idx);
            if seen.contains(&reference) {
                return Err(TransactionError::UnknownInput(
                    txin.prev_hash.dump_hex(),
                    txin.prev_idx,
                ));
            }
            seen.push(reference);

            let unspent = utxos.find(&sender, txin).ok_or_else(|| {
                TransactionError::UnknownInput(txin.prev_hash.dump_hex(), txin.prev_idx)
            })?;
            in_total += unspent.out.value;
        }

        let out_total: u64 = self.outs.iter().map(|out| out.value).sum();
        if out_total > in_total {
            return Err(TransactionError::ValueImbalance);
        }

        Ok(())
    }

    /// Validate either kind of transaction; `reward` is the expected
    /// coinbase value at the containing height
    pub fn validate(&self, utxos: &UtxoSet, reward: u64) -> Result<(), TransactionError> {
        if self.is_coinbase() {
            self.validate_coinbase(reward)
        } else {
            self.validate_transfer(utxos)
        }
    }
}
