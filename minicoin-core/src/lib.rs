pub mod address;
pub mod block;
pub mod chainstate;
pub mod event;
pub mod mempool;
pub mod miner;
pub mod script;
pub mod store;
pub mod transaction;
pub mod utxo;
pub mod wallet;

pub use block::{Block, Blockchain};
pub use chainstate::ChainState;
pub use event::{BlockReceived, EventBus};
pub use mempool::Mempool;
pub use miner::Miner;
pub use store::ChainStore;
pub use transaction::{Input, Output, Transaction};
pub use utxo::{Utxo, UtxoMap, UtxoSet};
pub use wallet::Wallet;
