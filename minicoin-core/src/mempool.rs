use crate::transaction::Transaction;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// Pending non-coinbase transactions keyed by `tx_id`. No ordering, no
/// eviction, no size bound.
#[derive(Default)]
pub struct Mempool {
    txs: Mutex<HashMap<String, Transaction>>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a transaction, overwriting any entry with the same `tx_id`.
    pub fn add_tx(&self, tx: Transaction) {
        let mut txs = self.txs.lock().unwrap();
        if txs.contains_key(&tx.tx_id) {
            debug!(tx_id = %tx.tx_id, "transaction already in mempool, overwriting");
        }
        txs.insert(tx.tx_id.clone(), tx);
    }

    /// Delete a transaction if present; absence is not an error.
    pub fn remove_tx(&self, tx_id: &str) {
        let mut txs = self.txs.lock().unwrap();
        if txs.remove(tx_id).is_none() {
            debug!(%tx_id, "transaction not found in mempool");
        }
    }

    pub fn contains(&self, tx_id: &str) -> bool {
        self.txs.lock().unwrap().contains_key(tx_id)
    }

    pub fn len(&self) -> usize {
        self.txs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of up to `max` pending transactions, in arbitrary order.
    pub fn pending(&self, max: usize) -> Vec<Transaction> {
        let txs = self.txs.lock().unwrap();
        txs.values().take(max).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(tag: u8) -> Transaction {
        Transaction {
            tx_id: hex::encode([tag; 32]),
            sender: String::new(),
            recipient: String::new(),
            amount: 1,
            inputs: vec![],
            outputs: vec![],
            timestamp: String::new(),
            is_coinbase: false,
        }
    }

    #[test]
    fn add_and_remove() {
        let mempool = Mempool::new();
        mempool.add_tx(tx(1));
        assert!(mempool.contains(&hex::encode([1u8; 32])));
        mempool.remove_tx(&hex::encode([1u8; 32]));
        assert!(mempool.is_empty());
    }

    #[test]
    fn add_overwrites_same_id() {
        let mempool = Mempool::new();
        mempool.add_tx(tx(1));
        let mut other = tx(1);
        other.amount = 9;
        mempool.add_tx(other);
        assert_eq!(mempool.len(), 1);
    }

    #[test]
    fn remove_missing_is_silent() {
        let mempool = Mempool::new();
        mempool.remove_tx("missing");
        assert!(mempool.is_empty());
    }

    #[test]
    fn pending_respects_max() {
        let mempool = Mempool::new();
        for tag in 0..5 {
            mempool.add_tx(tx(tag));
        }
        assert_eq!(mempool.pending(3).len(), 3);
        assert_eq!(mempool.pending(10).len(), 5);
    }
}
