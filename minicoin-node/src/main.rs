use anyhow::{anyhow, Context, Result};
use clap::Parser;
use minicoin_core::{Blockchain, ChainState, EventBus, Mempool, Miner, UtxoSet, Wallet};
use minicoin_db::RedbStore;
use minicoin_net::config::Config;
use minicoin_net::rpc::NodeRpcImpl;
use minicoin_net::Node;
use minicoin_rpc::NodeRpcServer;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const STATE_DB_FILE: &str = "state.redb";

/// A minimal UTXO-model cryptocurrency node.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// TCP port to listen on (an ephemeral port when omitted).
    #[arg(long)]
    port: Option<u16>,

    /// Directory for the state store and the online-peers registry.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Mine blocks.
    #[arg(long)]
    mine: bool,

    /// Multiaddress of a peer to dial and sync from at startup.
    #[arg(long)]
    peer: Option<String>,

    /// Port for the wallet-facing JSON-RPC server.
    #[arg(long)]
    rpc_port: Option<u16>,

    /// Deterministic seed for the miner wallet (random when omitted).
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let mut config = Config::from_env().map_err(|e| anyhow!("{}", e))?;
    if args.port.is_some() {
        config.port = args.port;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    if args.mine {
        config.mining = true;
    }
    if args.peer.is_some() {
        config.peer = args.peer;
    }
    if args.rpc_port.is_some() {
        config.rpc_port = args.rpc_port;
    }
    if args.seed.is_some() {
        config.miner_seed = args.seed;
    }

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("could not create data dir {:?}", config.data_dir))?;
    let store = Arc::new(
        RedbStore::open(config.data_dir.join(STATE_DB_FILE)).context("could not open state db")?,
    );

    let blockchain = Blockchain::load(store.clone()).context("could not load blockchain")?;
    let utxo_set = UtxoSet::load(store).context("could not load UTXO set")?;
    info!(
        height = ?blockchain.height(),
        utxos = utxo_set.len(),
        "chain state loaded"
    );

    let events = Arc::new(EventBus::new());
    let chain_state = Arc::new(ChainState::new(
        blockchain,
        utxo_set,
        Mempool::new(),
        events.clone(),
    ));

    let miner = if config.mining {
        let wallet = match config.miner_seed {
            Some(seed) => Wallet::from_seed(seed),
            None => Wallet::generate(),
        };
        info!(address = wallet.address(), "miner wallet ready");

        // Capacity 1 is enough for the preemption signal.
        let (preempt_tx, preempt_rx) = mpsc::channel(1);
        events
            .block_feed()
            .subscribe("miner", preempt_tx)
            .map_err(|e| anyhow!("{}", e))?;
        Some((Miner::new(wallet), preempt_rx))
    } else {
        None
    };

    let _rpc_handle = match config.rpc_port {
        Some(rpc_port) => {
            let server = jsonrpsee::server::Server::builder()
                .build(format!("127.0.0.1:{}", rpc_port))
                .await
                .context("could not start RPC server")?;
            info!(rpc_port, "RPC server listening");
            let handle = server.start(NodeRpcImpl::new(chain_state.clone()).into_rpc());
            Some(handle)
        }
        None => None,
    };

    let node = Node::new(config, chain_state, miner);
    node.run().await?;

    info!("node stopped cleanly");
    Ok(())
}
