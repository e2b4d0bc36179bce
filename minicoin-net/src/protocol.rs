//! Wire types: gossip payloads for the two pubsub topics and the
//! request/response pairs for the three stream protocols. Gossip payloads
//! are bincode; request/response exchanges ride the CBOR codec.

use libp2p::gossipsub::{IdentTopic, TopicHash};
use minicoin_core::utxo::UtxoMap;
use minicoin_core::{Block, Transaction};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const BLOCK_TOPIC: &str = "block";
pub const TX_TOPIC: &str = "transaction";

pub const SYNC_PROTOCOL: &str = "/blockchain/sync/1.0.0";
pub const UTXO_PROTOCOL: &str = "/blockchain/utxoreq/1.0.0";
pub const TX_PROTOCOL: &str = "/blockchain/txhandler/1.0.0";

/// Ask a peer for the blocks above `from_height`; `-1` requests the whole
/// chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    pub from_height: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    pub blocks: Vec<Block>,
}

/// Ask a node for the UTXOs spendable by an address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtxoRequest {
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtxoResponse {
    pub utxos: UtxoMap,
    pub error: Option<String>,
}

/// A light wallet hands a fully built transaction to the node for
/// publication.
pub type TxRequest = Transaction;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxResponse {
    pub result: Option<String>,
    pub error: Option<String>,
}

impl TxResponse {
    pub fn ok() -> Self {
        Self {
            result: Some("OK".to_string()),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            result: None,
            error: Some(message.into()),
        }
    }
}

/// A gossip payload after topic dispatch.
#[derive(Debug, Clone)]
pub enum GossipMessage {
    Block(Block),
    Transaction(Transaction),
}

pub fn block_topic() -> IdentTopic {
    IdentTopic::new(BLOCK_TOPIC)
}

pub fn tx_topic() -> IdentTopic {
    IdentTopic::new(TX_TOPIC)
}

pub fn encode_block(block: &Block) -> Result<Vec<u8>, bincode::Error> {
    bincode::serialize(block)
}

pub fn encode_transaction(tx: &Transaction) -> Result<Vec<u8>, bincode::Error> {
    bincode::serialize(tx)
}

/// Topic validator: decode `data` according to the topic it arrived on and
/// apply the per-topic sanity checks. Transactions additionally have to pass
/// field-shape validation. Returns `None` for anything that should be
/// dropped.
pub fn validate_gossip(topic: &TopicHash, data: &[u8]) -> Option<GossipMessage> {
    if data.is_empty() {
        debug!("dropping empty gossip message");
        return None;
    }

    if *topic == block_topic().hash() {
        match bincode::deserialize::<Block>(data) {
            Ok(block) => Some(GossipMessage::Block(block)),
            Err(e) => {
                debug!(error = %e, "dropping undecodable block message");
                None
            }
        }
    } else if *topic == tx_topic().hash() {
        match bincode::deserialize::<Transaction>(data) {
            Ok(tx) if tx.is_valid() => Some(GossipMessage::Transaction(tx)),
            Ok(tx) => {
                debug!(tx_id = %tx.tx_id, "dropping invalid transaction message");
                None
            }
            Err(e) => {
                debug!(error = %e, "dropping undecodable transaction message");
                None
            }
        }
    } else {
        debug!(%topic, "dropping message on unknown topic");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minicoin_core::transaction::Output;

    fn sample_block() -> Block {
        let mut tx = Transaction {
            tx_id: String::new(),
            sender: String::new(),
            recipient: minicoin_core::address::pubkey_hash_to_address(&[1u8; 20]),
            amount: 6,
            inputs: vec![],
            outputs: vec![Output {
                value: 6,
                script_pub_key: hex::encode([1u8; 20]),
            }],
            timestamp: "t".into(),
            is_coinbase: true,
        };
        tx.tx_id = hex::encode(tx.hash());

        let mut block = Block {
            height: 0,
            txs: vec![tx],
            timestamp: "b".into(),
            nonce: 0,
            hash: String::new(),
            prev_hash: String::new(),
        };
        block.hash = block.digest();
        block
    }

    #[test]
    fn block_message_roundtrips() {
        let block = sample_block();
        let data = encode_block(&block).unwrap();
        match validate_gossip(&block_topic().hash(), &data) {
            Some(GossipMessage::Block(decoded)) => assert_eq!(decoded, block),
            other => panic!("expected block, got {:?}", other),
        }
    }

    #[test]
    fn valid_transaction_message_passes() {
        let tx = sample_block().txs[0].clone();
        let data = encode_transaction(&tx).unwrap();
        assert!(matches!(
            validate_gossip(&tx_topic().hash(), &data),
            Some(GossipMessage::Transaction(_))
        ));
    }

    #[test]
    fn shape_invalid_transaction_is_dropped() {
        let mut tx = sample_block().txs[0].clone();
        tx.outputs.clear();
        let data = encode_transaction(&tx).unwrap();
        assert!(validate_gossip(&tx_topic().hash(), &data).is_none());
    }

    #[test]
    fn garbage_and_empty_payloads_are_dropped() {
        assert!(validate_gossip(&block_topic().hash(), &[]).is_none());
        assert!(validate_gossip(&block_topic().hash(), b"garbage").is_none());
        assert!(validate_gossip(&tx_topic().hash(), b"garbage").is_none());
    }

    #[test]
    fn unknown_topic_is_dropped() {
        let block = sample_block();
        let data = encode_block(&block).unwrap();
        let other = IdentTopic::new("elsewhere");
        assert!(validate_gossip(&other.hash(), &data).is_none());
    }
}
