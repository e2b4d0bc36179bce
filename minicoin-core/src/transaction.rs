use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

/// A reference to a previously created output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    pub prev_tx_id: String,
    pub output_index: u32,
    /// Hex of length-prefixed signature ‖ length-prefixed public key.
    pub script_sig: String,
}

/// A value locked to a pubkey-hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub value: u64,
    /// Hex of the 20-byte RIPEMD160(SHA256(pubkey)).
    pub script_pub_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub tx_id: String,
    /// Base58 address of the sender; empty for coinbase transactions.
    pub sender: String,
    pub recipient: String,
    pub amount: u64,
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
    pub timestamp: String,
    pub is_coinbase: bool,
}

impl Transaction {
    /// SHA-256 over the transaction fields. The preimage deliberately leaves
    /// out `tx_id` and every input's `script_sig`, so signatures commit to
    /// the transaction without self-reference.
    pub fn hash(&self) -> [u8; 32] {
        let mut preimage = Vec::new();
        self.write_hash_preimage(&mut preimage);
        Sha256::digest(&preimage).into()
    }

    /// Field-shape validation only. Deep validation against the UTXO set
    /// happens during block finalization.
    pub fn is_valid(&self) -> bool {
        if hex::decode(&self.tx_id).is_err() {
            debug!(tx_id = %self.tx_id, "rejecting transaction: tx_id is not hex");
            return false;
        }
        // An empty sender (coinbase) decodes to empty bytes and is accepted.
        if bs58::decode(&self.sender).into_vec().is_err() {
            debug!(tx_id = %self.tx_id, "rejecting transaction: sender is not base58");
            return false;
        }
        if bs58::decode(&self.recipient).into_vec().is_err() {
            debug!(tx_id = %self.tx_id, "rejecting transaction: recipient is not base58");
            return false;
        }
        if self.outputs.is_empty() {
            debug!(tx_id = %self.tx_id, "rejecting transaction: no outputs");
            return false;
        }
        true
    }

    /// Appends the hash preimage of this transaction to `buf`. Integer fields
    /// are written in their decimal string form.
    pub(crate) fn write_hash_preimage(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.sender.as_bytes());
        buf.extend_from_slice(self.recipient.as_bytes());
        buf.extend_from_slice(self.amount.to_string().as_bytes());
        buf.extend_from_slice(self.timestamp.as_bytes());
        buf.extend_from_slice(if self.is_coinbase { b"true" } else { b"false" });
        for input in &self.inputs {
            buf.extend_from_slice(input.prev_tx_id.as_bytes());
            buf.extend_from_slice(input.output_index.to_string().as_bytes());
        }
        for output in &self.outputs {
            buf.extend_from_slice(output.value.to_string().as_bytes());
            buf.extend_from_slice(output.script_pub_key.as_bytes());
        }
    }
}
