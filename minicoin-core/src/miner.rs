/*!
Proof-of-work mining. The miner assembles a candidate from a coinbase plus a
mempool snapshot and walks the nonce space until the block digest carries the
required number of leading zero hex digits. Each iteration polls the
preemption channel: when a competing block at the candidate's height has been
finalized, the candidate is abandoned.
*/

use crate::address::address_to_pubkey_hash;
use crate::block::Block;
use crate::event::BlockReceived;
use crate::mempool::Mempool;
use crate::transaction::{Output, Transaction};
use crate::wallet::Wallet;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Fixed block reward paid by every coinbase transaction.
pub const COINBASE_REWARD: u64 = 6;

/// Pacing sleep per proof-of-work iteration. Bounds CPU and keeps the
/// preemption poll responsive.
const POW_ITERATION_PAUSE: Duration = Duration::from_millis(200);

/// Outcome of a mining attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MineOutcome {
    /// The block's nonce and hash are filled in.
    Mined,
    /// A competing block at the same height arrived first.
    Preempted,
}

pub struct Miner {
    wallet: Wallet,
}

impl Miner {
    pub fn new(wallet: Wallet) -> Self {
        Self { wallet }
    }

    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    /// The block-reward transaction paying this miner: no inputs, one output
    /// of the fixed reward, empty sender.
    pub fn coinbase_tx(&self) -> Transaction {
        // The miner's own address always decodes.
        let pubkey_hash = address_to_pubkey_hash(self.wallet.address())
            .expect("miner wallet address is well-formed");

        let mut tx = Transaction {
            tx_id: String::new(),
            sender: String::new(),
            recipient: self.wallet.address().to_string(),
            amount: COINBASE_REWARD,
            inputs: vec![],
            outputs: vec![Output {
                value: COINBASE_REWARD,
                script_pub_key: hex::encode(pubkey_hash),
            }],
            timestamp: Utc::now().to_rfc3339(),
            is_coinbase: true,
        };
        tx.tx_id = hex::encode(tx.hash());
        tx
    }

    /// Snapshot up to `max` pending transactions. Order is arbitrary; the
    /// block hash commits to whatever sequence was chosen.
    pub fn collect_transactions(&self, mempool: &Mempool, max: usize) -> Vec<Transaction> {
        mempool.pending(max)
    }

    /// Perform proof-of-work on `block`. Runs synchronously; callers drive it
    /// from a blocking task. Returns [`MineOutcome::Preempted`] without
    /// touching `block.hash` when a `BlockReceived` for the candidate's
    /// height arrives on `preempt`.
    pub fn mine_block(
        &self,
        block: &mut Block,
        difficulty: usize,
        preempt: &mut mpsc::Receiver<BlockReceived>,
    ) -> MineOutcome {
        let prefix = "0".repeat(difficulty);

        for nonce in 0u64.. {
            if let Ok(event) = preempt.try_recv() {
                if event.height == block.height {
                    return MineOutcome::Preempted;
                }
                debug!(
                    event_height = event.height,
                    candidate_height = block.height,
                    "ignoring block event for a different height"
                );
            }

            block.nonce = nonce;
            let digest = block.digest();
            if digest.starts_with(&prefix) {
                block.hash = digest;
                return MineOutcome::Mined;
            }

            std::thread::sleep(POW_ITERATION_PAUSE);
        }
        unreachable!("nonce space exhausted")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::pubkey_hash;

    fn candidate(miner: &Miner, height: u64) -> Block {
        Block {
            height,
            txs: vec![miner.coinbase_tx()],
            timestamp: "t".into(),
            nonce: 0,
            hash: String::new(),
            prev_hash: String::new(),
        }
    }

    #[test]
    fn coinbase_pays_miner_the_fixed_reward() {
        let miner = Miner::new(Wallet::from_seed(1));
        let tx = miner.coinbase_tx();

        assert!(tx.is_coinbase);
        assert!(tx.inputs.is_empty());
        assert_eq!(tx.sender, "");
        assert_eq!(tx.recipient, miner.wallet().address());
        assert_eq!(tx.amount, COINBASE_REWARD);
        assert_eq!(tx.outputs.len(), 1);
        assert_eq!(tx.outputs[0].value, COINBASE_REWARD);
        assert_eq!(
            tx.outputs[0].script_pub_key,
            hex::encode(pubkey_hash(&miner.wallet().public_key_bytes()))
        );
        assert_eq!(tx.tx_id, hex::encode(tx.hash()));
    }

    #[test]
    fn difficulty_zero_mines_on_first_iteration() {
        let miner = Miner::new(Wallet::from_seed(1));
        let (_tx, mut rx) = mpsc::channel(1);
        let mut block = candidate(&miner, 0);

        let outcome = miner.mine_block(&mut block, 0, &mut rx);
        assert_eq!(outcome, MineOutcome::Mined);
        assert_eq!(block.nonce, 0);
        assert_eq!(block.hash, block.digest());
    }

    #[test]
    fn preempted_by_block_at_same_height() {
        let miner = Miner::new(Wallet::from_seed(1));
        let (tx, mut rx) = mpsc::channel(1);
        tx.try_send(BlockReceived { height: 4 }).unwrap();

        // High difficulty so the loop cannot win before polling the channel.
        let mut block = candidate(&miner, 4);
        let outcome = miner.mine_block(&mut block, 64, &mut rx);
        assert_eq!(outcome, MineOutcome::Preempted);
        assert!(block.hash.is_empty());
    }

    #[test]
    fn block_event_for_other_height_is_ignored() {
        let miner = Miner::new(Wallet::from_seed(1));
        let (tx, mut rx) = mpsc::channel(1);
        tx.try_send(BlockReceived { height: 3 }).unwrap();

        let mut block = candidate(&miner, 4);
        let outcome = miner.mine_block(&mut block, 0, &mut rx);
        assert_eq!(outcome, MineOutcome::Mined);
    }

    #[test]
    fn collect_transactions_caps_at_max() {
        let miner = Miner::new(Wallet::from_seed(1));
        let mempool = Mempool::new();
        for tag in 0..5u8 {
            let mut tx = miner.coinbase_tx();
            tx.tx_id = hex::encode([tag; 32]);
            tx.is_coinbase = false;
            mempool.add_tx(tx);
        }
        assert_eq!(miner.collect_transactions(&mempool, 3).len(), 3);
    }
}
