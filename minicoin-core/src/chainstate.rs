/*!
The aggregate owning the blockchain, the UTXO set, and the mempool, with
block finalization as its single mutating entry point.

Finalization is one logical step: header validation, deep transaction
validation against the current UTXO set, block append, UTXO update, and
mempool pruning. A dedicated lock serializes the whole step so the gossip
ingress path and the local mining path cannot interleave.
*/

use crate::block::{Block, BlockError, Blockchain};
use crate::event::{BlockReceived, EventBus};
use crate::mempool::Mempool;
use crate::script::{unlock_utxo, ScriptError};
use crate::store::{ChainStore, StoreError};
use crate::utxo::UtxoSet;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::{error::Error, fmt};
use tracing::info;

/// Why a transaction failed deep validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxRejection {
    /// The referenced UTXO does not exist.
    MissingUtxo { prev_tx_id: String, output_index: u32 },
    /// The referenced UTXO is already spent by an earlier input of the same
    /// block.
    DoubleSpend { prev_tx_id: String, output_index: u32 },
    /// The input failed to unlock its UTXO.
    Script(ScriptError),
    /// The inputs do not cover the transferred amount.
    Overspend { input_total: u64, amount: u64 },
}

impl fmt::Display for TxRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxRejection::MissingUtxo { prev_tx_id, output_index } => {
                write!(f, "input references missing UTXO {}:{}", prev_tx_id, output_index)
            }
            TxRejection::DoubleSpend { prev_tx_id, output_index } => {
                write!(f, "input double-spends UTXO {}:{}", prev_tx_id, output_index)
            }
            TxRejection::Script(e) => write!(f, "{}", e),
            TxRejection::Overspend { input_total, amount } => {
                write!(f, "inputs total {} below amount {}", input_total, amount)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeError {
    /// Header validation failed; the block is dropped.
    InvalidBlock(BlockError),
    /// A transaction failed deep validation; the whole block is dropped.
    InvalidTransaction { tx_id: String, reason: TxRejection },
    /// Persistence failed after retries.
    Store(StoreError),
}

impl fmt::Display for FinalizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinalizeError::InvalidBlock(e) => write!(f, "invalid block: {}", e),
            FinalizeError::InvalidTransaction { tx_id, reason } => {
                write!(f, "invalid transaction {}: {}", tx_id, reason)
            }
            FinalizeError::Store(e) => write!(f, "{}", e),
        }
    }
}

impl Error for FinalizeError {}

/// The consensus-relevant state of one node. Nothing outside this aggregate
/// is mutated during finalization.
pub struct ChainState<S> {
    blockchain: Blockchain<S>,
    utxo_set: UtxoSet<S>,
    mempool: Mempool,
    events: Arc<EventBus>,
    finalize_lock: Mutex<()>,
}

impl<S: ChainStore> ChainState<S> {
    pub fn new(
        blockchain: Blockchain<S>,
        utxo_set: UtxoSet<S>,
        mempool: Mempool,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            blockchain,
            utxo_set,
            mempool,
            events,
            finalize_lock: Mutex::new(()),
        }
    }

    pub fn blockchain(&self) -> &Blockchain<S> {
        &self.blockchain
    }

    pub fn utxo_set(&self) -> &UtxoSet<S> {
        &self.utxo_set
    }

    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Validate and append `block`, update the UTXO set, prune the mempool,
    /// and announce the new height. Exactly one finalization runs at a time.
    pub fn finalize_block(&self, block: &Block) -> Result<(), FinalizeError> {
        let _guard = self.finalize_lock.lock().unwrap();

        self.blockchain
            .is_valid(block)
            .map_err(FinalizeError::InvalidBlock)?;
        self.deep_validate(block)?;

        self.blockchain
            .add_block(block)
            .map_err(FinalizeError::Store)?;
        self.utxo_set
            .update(&block.txs)
            .map_err(FinalizeError::Store)?;
        for tx in &block.txs {
            if !tx.is_coinbase {
                self.mempool.remove_tx(&tx.tx_id);
            }
        }

        info!(height = block.height, hash = %block.hash, "block finalized");
        self.events.block_feed().send(BlockReceived {
            height: block.height,
        });
        Ok(())
    }

    /// Check every non-coinbase transaction against the current UTXO set:
    /// each input must reference a live UTXO not consumed earlier in this
    /// block, unlock it, and the input total must cover the amount. Any
    /// failure rejects the whole block.
    fn deep_validate(&self, block: &Block) -> Result<(), FinalizeError> {
        let mut spent: HashSet<(String, u32)> = HashSet::new();

        for tx in &block.txs {
            if tx.is_coinbase {
                continue;
            }
            let reject = |reason| FinalizeError::InvalidTransaction {
                tx_id: tx.tx_id.clone(),
                reason,
            };

            let tx_hash = tx.hash();
            let mut input_total = 0u64;
            for input in &tx.inputs {
                let key = (input.prev_tx_id.clone(), input.output_index);
                if spent.contains(&key) {
                    return Err(reject(TxRejection::DoubleSpend {
                        prev_tx_id: input.prev_tx_id.clone(),
                        output_index: input.output_index,
                    }));
                }

                let utxo = self
                    .utxo_set
                    .get_utxo(&input.prev_tx_id, input.output_index)
                    .map_err(|_| {
                        reject(TxRejection::MissingUtxo {
                            prev_tx_id: input.prev_tx_id.clone(),
                            output_index: input.output_index,
                        })
                    })?;

                unlock_utxo(input, &utxo, &tx_hash)
                    .map_err(|e| reject(TxRejection::Script(e)))?;

                input_total += utxo.value;
                spent.insert(key);
            }

            if input_total < tx.amount {
                return Err(reject(TxRejection::Overspend {
                    input_total,
                    amount: tx.amount,
                }));
            }
        }
        Ok(())
    }
}
