//! The persistence seam. Chain components mutate state through a
//! [`ChainStore`], so the same code runs against the on-disk store and the
//! in-memory one used by tests and ephemeral nodes. Memory is always applied
//! after a successful store write; after a crash the store is the source of
//! truth and memory is rebuilt from it.

use crate::block::Block;
use crate::transaction::Transaction;
use crate::utxo::{Utxo, UtxoMap};
use std::collections::HashMap;
use std::sync::Mutex;
use std::{error::Error, fmt};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing store failed.
    Backend(String),
    /// A stored record could not be encoded or decoded.
    Codec(String),
    /// The tip pointer references a block that cannot be read back.
    TipCorrupt(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Backend(e) => write!(f, "store backend error: {}", e),
            StoreError::Codec(e) => write!(f, "store codec error: {}", e),
            StoreError::TipCorrupt(e) => write!(f, "tip pointer corrupt: {}", e),
        }
    }
}

impl Error for StoreError {}

/// Transactional persistence for blocks and UTXOs.
pub trait ChainStore: Send + Sync {
    /// Persist a block under its hash and move the tip pointer to it, as one
    /// atomic store transaction.
    fn write_block(&self, block: &Block) -> Result<(), StoreError>;

    /// Read the whole chain back in ascending height order by walking the tip
    /// pointer backwards through `prev_hash`.
    fn load_blocks_from_tip(&self) -> Result<Vec<Block>, StoreError>;

    /// Apply one transaction's effect to the UTXO bucket: delete every key
    /// spent by its inputs and write every output, as one atomic store
    /// transaction. Keys have the form `"{tx_id}_{index}"`.
    fn write_utxos(&self, tx: &Transaction) -> Result<(), StoreError>;

    /// Read the whole UTXO bucket back into a two-level map.
    fn load_utxos(&self) -> Result<UtxoMap, StoreError>;
}

/// Run a persistence operation up to `attempts` times, returning the last
/// error once the attempts are exhausted.
pub fn retry_persist<T>(
    attempts: usize,
    what: &str,
    mut op: impl FnMut() -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    let mut last_err = None;
    for attempt in 1..=attempts {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!(%what, attempt, attempts, error = %e, "persistence attempt failed");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| StoreError::Backend("no attempts made".into())))
}

/// In-memory [`ChainStore`]. Backs tests and ephemeral nodes; mirrors the
/// key layout of the persistent store.
#[derive(Default)]
pub struct MemStore {
    blocks: Mutex<HashMap<String, Block>>,
    tip: Mutex<Option<String>>,
    utxos: Mutex<HashMap<String, Utxo>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChainStore for MemStore {
    fn write_block(&self, block: &Block) -> Result<(), StoreError> {
        let mut blocks = self.blocks.lock().unwrap();
        let mut tip = self.tip.lock().unwrap();
        blocks.insert(block.hash.clone(), block.clone());
        *tip = Some(block.hash.clone());
        Ok(())
    }

    fn load_blocks_from_tip(&self) -> Result<Vec<Block>, StoreError> {
        let blocks = self.blocks.lock().unwrap();
        let tip = self.tip.lock().unwrap();

        let mut chain = Vec::new();
        let mut cursor = tip.clone();
        while let Some(hash) = cursor {
            let block = blocks
                .get(&hash)
                .ok_or_else(|| StoreError::TipCorrupt(format!("missing block {}", hash)))?;
            chain.push(block.clone());
            cursor = if block.prev_hash.is_empty() {
                None
            } else {
                Some(block.prev_hash.clone())
            };
        }
        chain.reverse();
        Ok(chain)
    }

    fn write_utxos(&self, tx: &Transaction) -> Result<(), StoreError> {
        let mut utxos = self.utxos.lock().unwrap();
        for input in &tx.inputs {
            utxos.remove(&format!("{}_{}", input.prev_tx_id, input.output_index));
        }
        for (index, output) in tx.outputs.iter().enumerate() {
            let key = format!("{}_{}", tx.tx_id, index);
            utxos.insert(
                key,
                Utxo {
                    tx_id: tx.tx_id.clone(),
                    output_index: index as u32,
                    value: output.value,
                    script_pub_key: output.script_pub_key.clone(),
                },
            );
        }
        Ok(())
    }

    fn load_utxos(&self) -> Result<UtxoMap, StoreError> {
        let utxos = self.utxos.lock().unwrap();
        let mut map = UtxoMap::new();
        for utxo in utxos.values() {
            map.entry(utxo.tx_id.clone())
                .or_default()
                .insert(utxo.output_index, utxo.clone());
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn retry_returns_first_success() {
        let calls = AtomicUsize::new(0);
        let result = retry_persist(3, "test op", || {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(StoreError::Backend("transient".into()))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn retry_escalates_last_error() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = retry_persist(3, "test op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Backend("still down".into()))
        });
        assert_eq!(result, Err(StoreError::Backend("still down".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
