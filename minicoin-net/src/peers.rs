//! The online-peers registry: a JSON file mapping peer-id to multiaddress.
//! A node writes its own entry at startup and removes it on shutdown.
//! Discovery through the file is best-effort; readers may see stale entries.

use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use rand::seq::IteratorRandom;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const PEERS_FILE: &str = "online_peers.json";

pub fn peers_file(data_dir: &Path) -> PathBuf {
    data_dir.join(PEERS_FILE)
}

/// Read the registry. A missing file is an empty registry.
pub fn read_online_peers(path: &Path) -> io::Result<HashMap<String, String>> {
    match fs::read(path) {
        Ok(bytes) if bytes.is_empty() => Ok(HashMap::new()),
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(e) => Err(e),
    }
}

/// Insert or replace this node's entry.
pub fn save_peer(path: &Path, peer_id: &str, addr: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut peers = read_online_peers(path)?;
    peers.insert(peer_id.to_string(), addr.to_string());
    write_peers(path, &peers)
}

/// Remove this node's entry; absence is not an error.
pub fn remove_peer(path: &Path, peer_id: &str) -> io::Result<()> {
    let mut peers = read_online_peers(path)?;
    if peers.remove(peer_id).is_some() {
        write_peers(path, &peers)?;
    }
    Ok(())
}

/// Pick a random peer other than ourselves, if any is registered.
pub fn random_peer(path: &Path, self_id: &str) -> io::Result<Option<String>> {
    let peers = read_online_peers(path)?;
    let mut rng = rand::thread_rng();
    Ok(peers
        .iter()
        .filter(|(id, _)| id.as_str() != self_id)
        .map(|(_, addr)| addr.clone())
        .choose(&mut rng))
}

/// The peer id carried in a multiaddress's trailing `/p2p/` component, if
/// present.
pub fn extract_peer_id(addr: &Multiaddr) -> Option<PeerId> {
    addr.iter().find_map(|protocol| match protocol {
        Protocol::P2p(peer_id) => Some(peer_id),
        _ => None,
    })
}

fn write_peers(path: &Path, peers: &HashMap<String, String>) -> io::Result<()> {
    let bytes = serde_json::to_vec_pretty(peers)?;
    fs::write(path, bytes)
}
