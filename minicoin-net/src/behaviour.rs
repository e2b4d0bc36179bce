use crate::protocol::{
    SyncRequest, SyncResponse, TxRequest, TxResponse, UtxoRequest, UtxoResponse, SYNC_PROTOCOL,
    TX_PROTOCOL, UTXO_PROTOCOL,
};
use libp2p::swarm::NetworkBehaviour;
use libp2p::{gossipsub, mdns, request_response, StreamProtocol};

#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "NodeBehaviourEvent")]
pub struct NodeBehaviour {
    pub gossipsub: gossipsub::Behaviour,
    pub mdns: mdns::tokio::Behaviour,
    pub sync: request_response::cbor::Behaviour<SyncRequest, SyncResponse>,
    pub utxo_query: request_response::cbor::Behaviour<UtxoRequest, UtxoResponse>,
    pub tx_relay: request_response::cbor::Behaviour<TxRequest, TxResponse>,
}

#[derive(Debug)]
pub enum NodeBehaviourEvent {
    Gossipsub(gossipsub::Event),
    Mdns(mdns::Event),
    Sync(request_response::Event<SyncRequest, SyncResponse>),
    UtxoQuery(request_response::Event<UtxoRequest, UtxoResponse>),
    TxRelay(request_response::Event<TxRequest, TxResponse>),
}

impl From<gossipsub::Event> for NodeBehaviourEvent {
    fn from(event: gossipsub::Event) -> Self {
        NodeBehaviourEvent::Gossipsub(event)
    }
}

impl From<mdns::Event> for NodeBehaviourEvent {
    fn from(event: mdns::Event) -> Self {
        NodeBehaviourEvent::Mdns(event)
    }
}

impl From<request_response::Event<SyncRequest, SyncResponse>> for NodeBehaviourEvent {
    fn from(event: request_response::Event<SyncRequest, SyncResponse>) -> Self {
        NodeBehaviourEvent::Sync(event)
    }
}

impl From<request_response::Event<UtxoRequest, UtxoResponse>> for NodeBehaviourEvent {
    fn from(event: request_response::Event<UtxoRequest, UtxoResponse>) -> Self {
        NodeBehaviourEvent::UtxoQuery(event)
    }
}

impl From<request_response::Event<TxRequest, TxResponse>> for NodeBehaviourEvent {
    fn from(event: request_response::Event<TxRequest, TxResponse>) -> Self {
        NodeBehaviourEvent::TxRelay(event)
    }
}

pub fn sync_behaviour() -> request_response::cbor::Behaviour<SyncRequest, SyncResponse> {
    request_response::cbor::Behaviour::new(
        [(
            StreamProtocol::new(SYNC_PROTOCOL),
            request_response::ProtocolSupport::Full,
        )],
        request_response::Config::default(),
    )
}

pub fn utxo_query_behaviour() -> request_response::cbor::Behaviour<UtxoRequest, UtxoResponse> {
    request_response::cbor::Behaviour::new(
        [(
            StreamProtocol::new(UTXO_PROTOCOL),
            request_response::ProtocolSupport::Full,
        )],
        request_response::Config::default(),
    )
}

pub fn tx_relay_behaviour() -> request_response::cbor::Behaviour<TxRequest, TxResponse> {
    request_response::cbor::Behaviour::new(
        [(
            StreamProtocol::new(TX_PROTOCOL),
            request_response::ProtocolSupport::Full,
        )],
        request_response::Config::default(),
    )
}
