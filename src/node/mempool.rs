use log::warn;

use crate::core::{transaction::Transaction, utxo::UtxoSet};

/// Transactions accepted from the network but not yet sealed in a block.
/// Unordered, keyed by stamp hash.
#[derive(Debug, Default)]
pub struct Mempool {
    transactions: Vec<Transaction>,
}

impl Mempool {
    pub fn new() -> Mempool {
        Mempool::default()
    }

    pub fn contains(&self, tx: &Transaction) -> bool {
        self.transactions
            .iter()
            .any(|pending| pending.stamp.hash == tx.stamp.hash)
    }

    /// Admit a transaction. Duplicates, coinbases, validation failures and
    /// double spends against another pending transaction are turned away.
    pub fn add(&mut self, tx: Transaction, utxos: &UtxoSet) -> bool {
        if self.contains(&tx) || tx.is_coinbase() {
            return false;
        }

        if let Err(e) = tx.validate_transfer(utxos) {
            warn!("Rejected transaction {}: {e}", tx.stamp.hash.dump_hex());
            return false;
        }

        if self.double_spends(&tx) {
            warn!(
                "Rejected transaction {}: input already spent by a pending transaction",
                tx.stamp.hash.dump_hex()
            );
            return false;
        }

        self.transactions.push(tx);
        true
    }

    fn double_spends(&self, tx: &Transaction) -> bool {
        self.transactions
            .iter()
            .flat_map(|pending| &pending.ins)
            .any(|spent| tx.ins.contains(spent))
    }

    /// Move every pending transaction into a mining candidate
    pub fn take_all(&mut self) -> Vec<Transaction> {
        std::mem::take(&mut self.transactions)
    }

    /// Drop every pending transaction sealed in an applied block
    pub fn remove_all(&mut self, sealed: &[Transaction]) {
        self.transactions
            .retain(|pending| !sealed.iter().any(|tx| tx.stamp.hash == pending.stamp.hash));
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}
