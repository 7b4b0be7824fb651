use std::collections::HashMap;

use bincode::{Decode, Encode};
use log::error;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    core::{
        block::Block,
        transaction::{Transaction, TxIn, TxOut},
    },
    crypto::{keys::sanitize, Hash},
};

#[derive(Error, Debug)]
pub enum UtxoError {
    /// A block that passed validation consumed an output we do not hold.
    /// Chain state must be considered corrupt.
    #[error("Unspent output {0}:{1} vanished while applying an accepted block")]
    Inconsistency(String, u32),
}

/// An output not yet consumed by any accepted transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct UnspentTxOut {
    pub out: TxOut,
    /// Hash of the producing transaction
    pub tx_hash: Hash,
    /// Index in the producing transaction's outputs
    pub in_idx: u32,
    /// Reserved by a pending local transaction
    pub is_targeted: bool,
}

/// All outstanding outputs, keyed by the address they pay. Entries keep
/// their insertion order, which makes coin selection deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct UtxoSet {
    by_address: HashMap<String, Vec<UnspentTxOut>>,
}

impl UtxoSet {
    pub fn new() -> UtxoSet {
        UtxoSet::default()
    }

    /// Outstanding output of `address` matching an input reference
    pub fn find(&self, address: &str, txin: &TxIn) -> Option<&UnspentTxOut> {
        self.by_address
            .get(address)?
            .iter()
            .find(|unspent| unspent.tx_hash == txin.prev_hash && unspent.in_idx == txin.prev_idx)
    }

    /// Consume the inputs and append the outputs of a single transaction
    pub fn apply_transaction(&mut self, tx: &Transaction) -> Result<(), UtxoError> {
        let sender = sanitize(&tx.stamp.pub_key);

        for txin in &tx.ins {
            self.remove(&sender, txin)?;
        }

        for (idx, out) in tx.outs.iter().enumerate() {
            self.by_address
                .entry(out.address.clone())
                .or_default()
                .push(UnspentTxOut {
                    out: out.clone(),
                    tx_hash: tx.stamp.hash,
                    in_idx: idx as u32,
                    is_targeted: false,
                });
        }

        Ok(())
    }

    /// Apply every transaction of an accepted block, in block order
    pub fn apply_block(&mut self, block: &Block) -> Result<(), UtxoError> {
        for tx in &block.transactions {
            self.apply_transaction(tx)?;
        }

        Ok(())
    }

    // Removal matches on (producing hash, output index): the backing vector
    // relocates entries, so nothing may rely on their storage position.
    fn remove(&mut self, address: &str, txin: &TxIn) -> Result<(), UtxoError> {
        let position = self.by_address.get_mut(address).and_then(|outs| {
            outs.iter()
                .position(|unspent| {
                    unspent.tx_hash == txin.prev_hash && unspent.in_idx == txin.prev_idx
                })
                .map(|idx| {
                    outs.remove(idx);
                    outs.is_empty()
                })
        });

        match position {
            Some(now_empty) => {
                if now_empty {
                    self.by_address.remove(address);
                }
                Ok(())
            }
            None => {
                error!(
                    "Cannot find unspent output {}:{} of an apparently valid block",
                    txin.prev_hash.dump_hex(),
                    txin.prev_idx
                );
                Err(UtxoError::Inconsistency(
                    txin.prev_hash.dump_hex(),
                    txin.prev_idx,
                ))
            }
        }
    }

    /// Total value payable to an address
    pub fn funds(&self, address: &str) -> u64 {
        self.by_address
            .get(address)
            .map(|outs| outs.iter().map(|unspent| unspent.out.value).sum())
            .unwrap_or(0)
    }

    /// Pick outputs of `address` in insertion order until they cover
    /// `value`, skipping entries already reserved by a pending transaction.
    /// Returns an empty selection when the available funds cannot cover it.
    pub fn select_for(&self, address: &str, value: u64) -> Vec<UnspentTxOut> {
        let mut selected = vec![];
        let mut total = 0u64;

        for unspent in self.by_address.get(address).into_iter().flatten() {
            if unspent.is_targeted {
                continue;
            }

            total += unspent.out.value;
            selected.push(unspent.clone());

            if total > value {
                break;
            }
        }

        if total < value {
            return vec![];
        }

        selected
    }

    /// Reserve outputs picked for a transaction about to be broadcast
    pub fn mark_targeted(&mut self, address: &str, selection: &[UnspentTxOut]) {
        if let Some(outs) = self.by_address.get_mut(address) {
            for unspent in outs {
                if selection
                    .iter()
                    .any(|s| s.tx_hash == unspent.tx_hash && s.in_idx == unspent.in_idx)
                {
                    unspent.is_targeted = true;
                }
            }
        }
    }

    /// Release outputs reserved by a transaction that could not be broadcast
    pub fn reset_targeted(&mut self, tx: &Transaction) {
        let sender = sanitize(&tx.stamp.pub_key);

        if let Some(outs) = self.by_address.get_mut(&sender) {
            for txin in &tx.ins {
                if let Some(unspent) = outs
                    .iter_mut()
                    .find(|u| u.tx_hash == txin.prev_hash && u.in_idx == txin.prev_idx)
                {
                    unspent.is_targeted = false;
                }
            }
        }
    }

    /// Turn a selection into transfer inputs and outputs, paying `value` to
    /// `dest` and returning any surplus to `change_address`
    pub fn build_in_out(
        selection: &[UnspentTxOut],
        value: u64,
        dest: &str,
        change_address: &str,
    ) -> (Vec<TxIn>, Vec<TxOut>) {
        let ins = selection
            .iter()
            .map(|unspent| TxIn {
                prev_hash: unspent.tx_hash,
                prev_idx: unspent.in_idx,
            })
            .collect();

        let total: u64 = selection.iter().map(|unspent| unspent.out.value).sum();
        let mut outs = vec![TxOut {
            value,
            address: dest.to_string(),
        }];
        if total > value {
            outs.push(TxOut {
                value: total - value,
                address: change_address.to_string(),
            });
        }

        (ins, outs)
    }

    #[cfg(test)]
    pub(crate) fn insert_for_tests(&mut self, address: &str, tx_hash: Hash, in_idx: u32, value: u64) {
        self.by_address
            .entry(address.to_string())
            .or_default()
            .push(UnspentTxOut {
                out: TxOut {
                    value,
                    address: address.to_string(),
                },
                tx_hash,
                in_idx,
                is_targeted: false,
            });
    }
}
