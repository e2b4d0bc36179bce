//! The RPC surface a light wallet consumes. The node serves it; this crate
//! only defines the contract so clients can link against it without pulling
//! in the node.

use jsonrpsee::{proc_macros::rpc, types::ErrorObjectOwned};
use minicoin_core::{Block, Transaction};
use serde::{Deserialize, Serialize};

/// A snapshot of the chain's tip.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainInfo {
    pub tip_hash: Option<String>,
    pub height: Option<u64>,
    pub difficulty: usize,
}

#[rpc(server, client, namespace = "minicoin")]
pub trait NodeRpc {
    /// Returns the block with the given hash, if finalized on this node.
    #[method(name = "getBlockByHash")]
    async fn get_block_by_hash(&self, hash: String) -> Result<Option<Block>, ErrorObjectOwned>;

    /// Returns the block at the given height, if finalized on this node.
    #[method(name = "getBlockByHeight")]
    async fn get_block_by_height(&self, height: u64)
        -> Result<Option<Block>, ErrorObjectOwned>;

    /// Returns the tip hash, chain height, and proof-of-work difficulty.
    #[method(name = "getChainInfo")]
    async fn get_chain_info(&self) -> Result<ChainInfo, ErrorObjectOwned>;

    /// Returns the total unspent value owned by an address.
    #[method(name = "getBalance")]
    async fn get_balance(&self, address: String) -> Result<u64, ErrorObjectOwned>;

    /// Returns the finalized transactions an address sent or received,
    /// oldest first.
    #[method(name = "getTxHistory")]
    async fn get_tx_history(
        &self,
        address: String,
    ) -> Result<Vec<Transaction>, ErrorObjectOwned>;
}
