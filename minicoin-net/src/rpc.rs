use std::sync::Arc;

use async_trait::async_trait;
use jsonrpsee::types::ErrorObjectOwned;
use minicoin_core::store::ChainStore;
use minicoin_core::{Block, ChainState, Transaction};
use minicoin_rpc::{ChainInfo, NodeRpcServer};

/// The server-side implementation of the wallet-facing RPC.
pub struct NodeRpcImpl<S> {
    chain_state: Arc<ChainState<S>>,
}

impl<S> NodeRpcImpl<S> {
    pub fn new(chain_state: Arc<ChainState<S>>) -> Self {
        Self { chain_state }
    }
}

#[async_trait]
impl<S> NodeRpcServer for NodeRpcImpl<S>
where
    S: ChainStore + 'static,
{
    async fn get_block_by_hash(&self, hash: String) -> Result<Option<Block>, ErrorObjectOwned> {
        Ok(self.chain_state.blockchain().block_by_hash(&hash))
    }

    async fn get_block_by_height(
        &self,
        height: u64,
    ) -> Result<Option<Block>, ErrorObjectOwned> {
        Ok(self.chain_state.blockchain().block_by_height(height))
    }

    async fn get_chain_info(&self) -> Result<ChainInfo, ErrorObjectOwned> {
        let blockchain = self.chain_state.blockchain();
        Ok(ChainInfo {
            tip_hash: blockchain.tip_hash(),
            height: blockchain.height(),
            difficulty: blockchain.difficulty(),
        })
    }

    async fn get_balance(&self, address: String) -> Result<u64, ErrorObjectOwned> {
        Ok(self.chain_state.utxo_set().balance_of_address(&address))
    }

    async fn get_tx_history(
        &self,
        address: String,
    ) -> Result<Vec<Transaction>, ErrorObjectOwned> {
        Ok(self
            .chain_state
            .blockchain()
            .tx_history_for_address(&address))
    }
}
