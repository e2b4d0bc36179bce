/*!
The libp2p node: gossip ingress for blocks and transactions, the sync
protocol (server and client), the wallet request handlers, and mining
supervision, all driven from one `tokio::select!` loop.

Data flow: gossip -> topic validation -> finalization -> event bus -> miner
preemption; mining -> gossip publish -> local finalization. On connect the
node asks one peer for every block above its own tip and finalizes the
response in order.
*/

pub mod behaviour;
pub mod config;
pub mod peers;
pub mod protocol;
pub mod rpc;

use crate::behaviour::{
    sync_behaviour, tx_relay_behaviour, utxo_query_behaviour, NodeBehaviour, NodeBehaviourEvent,
};
use crate::config::Config;
use crate::protocol::{
    GossipMessage, SyncRequest, SyncResponse, TxResponse, UtxoResponse,
};
use libp2p::futures::StreamExt;
use libp2p::multiaddr::Protocol;
use libp2p::swarm::SwarmEvent;
use libp2p::{gossipsub, mdns, request_response, Multiaddr, PeerId, SwarmBuilder};
use minicoin_core::event::BlockReceived;
use minicoin_core::miner::MineOutcome;
use minicoin_core::store::ChainStore;
use minicoin_core::{Block, ChainState, Miner};
use std::sync::Arc;
use std::{error::Error, fmt, io};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Upper bound on mempool transactions included per block candidate.
const MAX_BLOCK_TXS: usize = 3;

#[derive(Debug)]
pub enum NodeError {
    /// Transport, behaviour, or protocol setup failed.
    Network(String),
    Io(io::Error),
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeError::Network(e) => write!(f, "network error: {}", e),
            NodeError::Io(e) => write!(f, "io error: {}", e),
        }
    }
}

impl Error for NodeError {}

impl From<io::Error> for NodeError {
    fn from(e: io::Error) -> Self {
        NodeError::Io(e)
    }
}

fn network_err(e: impl fmt::Display) -> NodeError {
    NodeError::Network(e.to_string())
}

pub struct Node<S> {
    config: Config,
    chain_state: Arc<ChainState<S>>,
    miner: Option<(Miner, mpsc::Receiver<BlockReceived>)>,
}

impl<S: ChainStore + 'static> Node<S> {
    /// A mining node also carries the preemption receiver its miner polls;
    /// the caller subscribes it to the block feed.
    pub fn new(
        config: Config,
        chain_state: Arc<ChainState<S>>,
        miner: Option<(Miner, mpsc::Receiver<BlockReceived>)>,
    ) -> Self {
        Self {
            config,
            chain_state,
            miner,
        }
    }

    /// Run the node until SIGINT/SIGTERM.
    pub async fn run(self) -> Result<(), NodeError> {
        let Node {
            config,
            chain_state,
            miner,
        } = self;

        let mut swarm = SwarmBuilder::with_new_identity()
            .with_tokio()
            .with_tcp(
                Default::default(),
                libp2p::noise::Config::new,
                libp2p::yamux::Config::default,
            )
            .map_err(network_err)?
            .with_behaviour(|key| {
                let gossip_config = gossipsub::ConfigBuilder::default().build()?;
                Ok(NodeBehaviour {
                    gossipsub: gossipsub::Behaviour::new(
                        gossipsub::MessageAuthenticity::Signed(key.clone()),
                        gossip_config,
                    )?,
                    mdns: mdns::tokio::Behaviour::new(
                        mdns::Config::default(),
                        key.public().to_peer_id(),
                    )?,
                    sync: sync_behaviour(),
                    utxo_query: utxo_query_behaviour(),
                    tx_relay: tx_relay_behaviour(),
                })
            })
            .map_err(network_err)?
            .build();

        let local_peer_id = *swarm.local_peer_id();
        info!(%local_peer_id, "node identity ready");

        let block_topic = protocol::block_topic();
        let tx_topic = protocol::tx_topic();
        swarm
            .behaviour_mut()
            .gossipsub
            .subscribe(&block_topic)
            .map_err(network_err)?;
        swarm
            .behaviour_mut()
            .gossipsub
            .subscribe(&tx_topic)
            .map_err(network_err)?;

        let listen_port = config.port.unwrap_or(0);
        let listen_addr: Multiaddr = format!("/ip4/0.0.0.0/tcp/{}", listen_port)
            .parse()
            .map_err(network_err)?;
        swarm.listen_on(listen_addr).map_err(network_err)?;

        let registry = peers::peers_file(&config.data_dir);
        let mut registered = false;

        // Resolve the sync target: an explicit peer wins, otherwise a random
        // entry from the registry. Absence just means no sync.
        let mut pending_sync: Option<PeerId> = None;
        let mut sync_with_next_peer = false;
        let target = config.peer.clone().or_else(|| {
            peers::random_peer(&registry, &local_peer_id.to_string())
                .unwrap_or_default()
        });
        match target {
            Some(target) => match target.parse::<Multiaddr>() {
                Ok(addr) => {
                    let peer_id = peers::extract_peer_id(&addr);
                    match swarm.dial(addr.clone()) {
                        Ok(()) => {
                            info!(%addr, "dialing peer");
                            pending_sync = peer_id;
                            sync_with_next_peer = peer_id.is_none();
                        }
                        Err(e) => warn!(%addr, error = %e, "dial failed, continuing without sync"),
                    }
                }
                Err(e) => warn!(%target, error = %e, "unparseable peer address, continuing without sync"),
            },
            None => info!("no online peers found, continuing without sync"),
        }

        // Mining runs beside the swarm loop; candidates that win the
        // proof-of-work come back through this channel for publication and
        // local finalization.
        let (mined_tx, mut mined_rx) = mpsc::channel::<Block>(8);
        if let Some((miner, preempt_rx)) = miner {
            spawn_mining_task(chain_state.clone(), miner, preempt_rx, mined_tx.clone());
        }

        loop {
            tokio::select! {
                event = swarm.select_next_some() => match event {
                    SwarmEvent::NewListenAddr { address, .. } => {
                        let full_addr = address.clone().with(Protocol::P2p(local_peer_id));
                        info!(addr = %full_addr, "listening");
                        if !registered {
                            if let Err(e) = peers::save_peer(&registry, &local_peer_id.to_string(), &full_addr.to_string()) {
                                warn!(error = %e, "could not register in the online-peers file");
                            } else {
                                registered = true;
                            }
                        }
                    }
                    SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                        let matched = match pending_sync {
                            Some(expected) if expected == peer_id => {
                                pending_sync = None;
                                true
                            }
                            None if sync_with_next_peer => {
                                sync_with_next_peer = false;
                                true
                            }
                            _ => false,
                        };
                        if matched {
                            let from_height = chain_state
                                .blockchain()
                                .height()
                                .map(|h| h as i64)
                                .unwrap_or(-1);
                            swarm
                                .behaviour_mut()
                                .sync
                                .send_request(&peer_id, SyncRequest { from_height });
                            info!(%peer_id, from_height, "requesting chain sync");
                        }
                    }
                    SwarmEvent::Behaviour(NodeBehaviourEvent::Mdns(mdns::Event::Discovered(list))) => {
                        for (peer_id, _addr) in list {
                            debug!(%peer_id, "discovered peer via mdns");
                            swarm.behaviour_mut().gossipsub.add_explicit_peer(&peer_id);
                        }
                    }
                    SwarmEvent::Behaviour(NodeBehaviourEvent::Mdns(mdns::Event::Expired(list))) => {
                        for (peer_id, _addr) in list {
                            swarm.behaviour_mut().gossipsub.remove_explicit_peer(&peer_id);
                        }
                    }
                    SwarmEvent::Behaviour(NodeBehaviourEvent::Gossipsub(gossipsub::Event::Message { message, .. })) => {
                        // Self-published messages are not re-processed.
                        if message.source == Some(local_peer_id) {
                            continue;
                        }
                        match protocol::validate_gossip(&message.topic, &message.data) {
                            Some(GossipMessage::Block(block)) => {
                                info!(height = block.height, hash = %block.hash, "received block");
                                if let Err(e) = chain_state.finalize_block(&block) {
                                    error!(height = block.height, error = %e, "failed to finalize received block");
                                }
                            }
                            Some(GossipMessage::Transaction(tx)) => {
                                info!(tx_id = %tx.tx_id, "received transaction");
                                chain_state.mempool().add_tx(tx);
                            }
                            None => {}
                        }
                    }
                    SwarmEvent::Behaviour(NodeBehaviourEvent::Sync(request_response::Event::Message { message, .. })) => {
                        match message {
                            request_response::Message::Request { request, channel, .. } => {
                                let blocks = chain_state.blockchain().blocks_from(request.from_height);
                                info!(from_height = request.from_height, count = blocks.len(), "serving sync request");
                                if swarm
                                    .behaviour_mut()
                                    .sync
                                    .send_response(channel, SyncResponse { blocks })
                                    .is_err()
                                {
                                    warn!("sync peer hung up before the response was sent");
                                }
                            }
                            request_response::Message::Response { response, .. } => {
                                info!(count = response.blocks.len(), "received blocks during sync");
                                for block in &response.blocks {
                                    if let Err(e) = chain_state.finalize_block(block) {
                                        error!(height = block.height, error = %e, "failed to finalize synced block, aborting sync");
                                        break;
                                    }
                                }
                            }
                        }
                    }
                    SwarmEvent::Behaviour(NodeBehaviourEvent::UtxoQuery(request_response::Event::Message { message, .. })) => {
                        if let request_response::Message::Request { request, channel, .. } = message {
                            let response = match chain_state.utxo_set().subset_for_address(&request.address) {
                                Ok(utxos) => UtxoResponse { utxos, error: None },
                                Err(e) => UtxoResponse {
                                    utxos: Default::default(),
                                    error: Some(e.to_string()),
                                },
                            };
                            if swarm
                                .behaviour_mut()
                                .utxo_query
                                .send_response(channel, response)
                                .is_err()
                            {
                                warn!("wallet hung up before the UTXO response was sent");
                            }
                        }
                    }
                    SwarmEvent::Behaviour(NodeBehaviourEvent::TxRelay(request_response::Event::Message { message, .. })) => {
                        if let request_response::Message::Request { request, channel, .. } = message {
                            info!(tx_id = %request.tx_id, "relaying wallet transaction");
                            let response = match protocol::encode_transaction(&request) {
                                Ok(data) => match swarm
                                    .behaviour_mut()
                                    .gossipsub
                                    .publish(tx_topic.clone(), data)
                                {
                                    Ok(_) => TxResponse::ok(),
                                    Err(e) => TxResponse::error(format!("publish failed: {}", e)),
                                },
                                Err(e) => TxResponse::error(format!("encode failed: {}", e)),
                            };
                            if swarm
                                .behaviour_mut()
                                .tx_relay
                                .send_response(channel, response)
                                .is_err()
                            {
                                warn!("wallet hung up before the relay response was sent");
                            }
                        }
                    }
                    SwarmEvent::Behaviour(NodeBehaviourEvent::Sync(request_response::Event::OutboundFailure { peer, error, .. })) => {
                        warn!(%peer, %error, "sync request failed, continuing without sync");
                    }
                    _ => {}
                },
                Some(block) = mined_rx.recv() => {
                    info!(height = block.height, hash = %block.hash, "block mined");
                    match protocol::encode_block(&block) {
                        Ok(data) => {
                            if let Err(e) = swarm
                                .behaviour_mut()
                                .gossipsub
                                .publish(block_topic.clone(), data)
                            {
                                // Normal while alone on the network.
                                debug!(error = %e, "block not published");
                            }
                        }
                        Err(e) => error!(error = %e, "failed to encode mined block"),
                    }
                    if let Err(e) = chain_state.finalize_block(&block) {
                        error!(height = block.height, error = %e, "failed to finalize own block");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("received shutdown signal, cleaning up");
                    break;
                }
            }
        }

        if registered {
            if let Err(e) = peers::remove_peer(&registry, &local_peer_id.to_string()) {
                warn!(error = %e, "could not remove entry from the online-peers file");
            }
        }
        Ok(())
    }
}

/// Drive the miner forever: assemble a candidate, run the proof-of-work in a
/// blocking task, and hand mined blocks to the swarm loop. Preempted
/// candidates are discarded and a fresh one is started.
fn spawn_mining_task<S: ChainStore + 'static>(
    chain_state: Arc<ChainState<S>>,
    miner: Miner,
    preempt_rx: mpsc::Receiver<BlockReceived>,
    mined_tx: mpsc::Sender<Block>,
) {
    tokio::spawn(async move {
        let miner = Arc::new(miner);
        let mut preempt_rx = preempt_rx;
        loop {
            let mut txs = vec![miner.coinbase_tx()];
            txs.extend(miner.collect_transactions(chain_state.mempool(), MAX_BLOCK_TXS));
            let block = chain_state.blockchain().new_block(txs);
            let difficulty = chain_state.blockchain().difficulty();
            info!(height = block.height, "mining new block");

            let mining_miner = miner.clone();
            let result = tokio::task::spawn_blocking(move || {
                let mut block = block;
                let mut preempt = preempt_rx;
                let outcome = mining_miner.mine_block(&mut block, difficulty, &mut preempt);
                (outcome, block, preempt)
            })
            .await;

            let (outcome, block, returned_rx) = match result {
                Ok(parts) => parts,
                Err(e) => {
                    error!(error = %e, "mining task panicked, stopping miner");
                    return;
                }
            };
            preempt_rx = returned_rx;

            match outcome {
                MineOutcome::Mined => {
                    if mined_tx.send(block).await.is_err() {
                        // Node loop is gone; stop mining.
                        return;
                    }
                }
                MineOutcome::Preempted => {
                    info!(
                        height = block.height,
                        "mining aborted, block at the same height was finalized first"
                    );
                }
            }
        }
    });
}
