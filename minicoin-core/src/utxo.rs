/*!
The unspent-output index: an in-memory two-level map (`tx_id` -> output
index -> UTXO) mirrored to the persistent store. Storage is written before
memory is touched, so a crash mid-batch leaves memory behind the store and a
reload reconciles the two.
*/

use crate::address::{address_to_pubkey_hash, AddressError};
use crate::store::{retry_persist, ChainStore, StoreError};
use crate::transaction::{Input, Output, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::{error::Error, fmt};
use tracing::warn;

/// How many times a UTXO batch write is attempted before giving up.
const WRITE_ATTEMPTS: usize = 3;

/// An unspent transaction output together with its location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub tx_id: String,
    pub output_index: u32,
    pub value: u64,
    pub script_pub_key: String,
}

/// `tx_id` -> output index -> UTXO. An outer key with no indices is absent.
pub type UtxoMap = HashMap<String, HashMap<u32, Utxo>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UtxoError {
    /// No UTXO at the referenced `(tx_id, output_index)`.
    NotFound { tx_id: String, output_index: u32 },
    /// The address owns no spendable outputs at all.
    NoSpendableOutputs,
    /// The address's outputs do not cover the requested amount.
    InsufficientFunds { available: u64, needed: u64 },
    /// A sender or recipient address failed to decode.
    Address(AddressError),
}

impl fmt::Display for UtxoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UtxoError::NotFound { tx_id, output_index } => {
                write!(f, "no UTXO at {}:{}", tx_id, output_index)
            }
            UtxoError::NoSpendableOutputs => write!(f, "no UTXOs available to spend"),
            UtxoError::InsufficientFunds { available, needed } => {
                write!(f, "insufficient funds: {} available, {} needed", available, needed)
            }
            UtxoError::Address(e) => write!(f, "invalid address: {}", e),
        }
    }
}

impl Error for UtxoError {}

/// The UTXO set with its persistence mirror.
pub struct UtxoSet<S> {
    utxos: Mutex<UtxoMap>,
    store: Arc<S>,
}

impl<S: ChainStore> UtxoSet<S> {
    /// Load the set from the store; the store is authoritative on startup.
    pub fn load(store: Arc<S>) -> Result<Self, StoreError> {
        let utxos = store.load_utxos()?;
        Ok(Self {
            utxos: Mutex::new(utxos),
            store,
        })
    }

    /// Idempotent in-memory insertion.
    pub fn add_utxo(&self, tx_id: &str, output_index: u32, value: u64, script_pub_key: &str) {
        let mut utxos = self.utxos.lock().unwrap();
        insert_utxo(&mut utxos, tx_id, output_index, value, script_pub_key);
    }

    /// Remove an output, collapsing the outer entry once it has no indices.
    pub fn remove_utxo(&self, tx_id: &str, output_index: u32) {
        let mut utxos = self.utxos.lock().unwrap();
        delete_utxo(&mut utxos, tx_id, output_index);
    }

    /// Apply a finalized block's transactions: persist each transaction's
    /// effect first (with retries), then mutate memory.
    pub fn update(&self, txs: &[Transaction]) -> Result<(), StoreError> {
        for tx in txs {
            retry_persist(WRITE_ATTEMPTS, "write utxo batch", || {
                self.store.write_utxos(tx)
            })?;
        }

        let mut utxos = self.utxos.lock().unwrap();
        for tx in txs {
            for input in &tx.inputs {
                delete_utxo(&mut utxos, &input.prev_tx_id, input.output_index);
            }
            for (index, output) in tx.outputs.iter().enumerate() {
                insert_utxo(
                    &mut utxos,
                    &tx.tx_id,
                    index as u32,
                    output.value,
                    &output.script_pub_key,
                );
            }
        }
        Ok(())
    }

    pub fn get_utxo(&self, tx_id: &str, output_index: u32) -> Result<Utxo, UtxoError> {
        let utxos = self.utxos.lock().unwrap();
        utxos
            .get(tx_id)
            .and_then(|outputs| outputs.get(&output_index))
            .cloned()
            .ok_or_else(|| UtxoError::NotFound {
                tx_id: tx_id.to_string(),
                output_index,
            })
    }

    pub fn contains(&self, tx_id: &str, output_index: u32) -> bool {
        let utxos = self.utxos.lock().unwrap();
        utxos
            .get(tx_id)
            .map_or(false, |outputs| outputs.contains_key(&output_index))
    }

    /// Sum of all output values locked to `address`.
    pub fn balance_of_address(&self, address: &str) -> u64 {
        let Ok(hash) = address_to_pubkey_hash(address) else {
            warn!(%address, "balance query for undecodable address");
            return 0;
        };
        let target = hex::encode(hash);
        let utxos = self.utxos.lock().unwrap();
        utxos
            .values()
            .flat_map(|outputs| outputs.values())
            .filter(|utxo| utxo.script_pub_key == target)
            .map(|utxo| utxo.value)
            .sum()
    }

    /// Outputs spendable by `address`, in unspecified order.
    pub fn utxos_for_address(&self, address: &str) -> Vec<Utxo> {
        let Ok(hash) = address_to_pubkey_hash(address) else {
            warn!(%address, "UTXO query for undecodable address");
            return Vec::new();
        };
        let target = hex::encode(hash);
        let utxos = self.utxos.lock().unwrap();
        utxos
            .values()
            .flat_map(|outputs| outputs.values())
            .filter(|utxo| utxo.script_pub_key == target)
            .cloned()
            .collect()
    }

    /// The address-filtered subset of the set in its two-level form, for the
    /// wallet request handler.
    pub fn subset_for_address(&self, address: &str) -> Result<UtxoMap, AddressError> {
        let target = hex::encode(address_to_pubkey_hash(address)?);
        let utxos = self.utxos.lock().unwrap();
        let mut subset = UtxoMap::new();
        for utxo in utxos.values().flat_map(|outputs| outputs.values()) {
            if utxo.script_pub_key == target {
                subset
                    .entry(utxo.tx_id.clone())
                    .or_default()
                    .insert(utxo.output_index, utxo.clone());
            }
        }
        Ok(subset)
    }

    /// Total number of unspent outputs.
    pub fn len(&self) -> usize {
        let utxos = self.utxos.lock().unwrap();
        utxos.values().map(|outputs| outputs.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A copy of the full map, for state comparisons.
    pub fn snapshot(&self) -> UtxoMap {
        self.utxos.lock().unwrap().clone()
    }

    /// Derive the outputs of a transfer: change back to the sender first when
    /// the inputs overshoot, then the payment to the recipient. The
    /// recipient's pubkey-hash comes from the recipient address.
    pub fn derive_outputs(
        &self,
        inputs: &[Input],
        amount: u64,
        recipient: &str,
        sender: &str,
    ) -> Result<Vec<Output>, UtxoError> {
        let mut total_in = 0u64;
        for input in inputs {
            let utxo = self.get_utxo(&input.prev_tx_id, input.output_index)?;
            total_in += utxo.value;
        }

        let sender_hash = address_to_pubkey_hash(sender).map_err(UtxoError::Address)?;
        let recipient_hash = address_to_pubkey_hash(recipient).map_err(UtxoError::Address)?;

        let payment = Output {
            value: amount,
            script_pub_key: hex::encode(recipient_hash),
        };
        if total_in > amount {
            let change = Output {
                value: total_in - amount,
                script_pub_key: hex::encode(sender_hash),
            };
            Ok(vec![change, payment])
        } else if total_in == amount {
            Ok(vec![payment])
        } else {
            // Unreachable when inputs came from resolve_inputs.
            Err(UtxoError::InsufficientFunds {
                available: total_in,
                needed: amount,
            })
        }
    }
}

/// Select inputs until their running total covers `amount`. The loop keeps
/// taking outputs while the running total is still <= the amount, so it
/// collects one output past the threshold; the surplus comes back as change.
pub fn resolve_inputs(utxos: &[Utxo], amount: u64) -> Result<Vec<Input>, UtxoError> {
    if utxos.is_empty() {
        return Err(UtxoError::NoSpendableOutputs);
    }

    let mut inputs = Vec::new();
    let mut total = 0u64;
    for utxo in utxos {
        if total <= amount {
            inputs.push(Input {
                prev_tx_id: utxo.tx_id.clone(),
                output_index: utxo.output_index,
                script_sig: String::new(),
            });
            total += utxo.value;
        } else {
            break;
        }
    }

    if total < amount {
        return Err(UtxoError::InsufficientFunds {
            available: total,
            needed: amount,
        });
    }
    Ok(inputs)
}

fn insert_utxo(
    utxos: &mut UtxoMap,
    tx_id: &str,
    output_index: u32,
    value: u64,
    script_pub_key: &str,
) {
    utxos.entry(tx_id.to_string()).or_default().insert(
        output_index,
        Utxo {
            tx_id: tx_id.to_string(),
            output_index,
            value,
            script_pub_key: script_pub_key.to_string(),
        },
    );
}

fn delete_utxo(utxos: &mut UtxoMap, tx_id: &str, output_index: u32) {
    if let Some(outputs) = utxos.get_mut(tx_id) {
        outputs.remove(&output_index);
        if outputs.is_empty() {
            utxos.remove(tx_id);
        }
    }
}
