//! Peer registry — connection metadata for every connected peer.
//!
//! The [`PeerRegistry`] records who each remote node is, where it was reached,
//! which protocol was negotiated, and which contexts it currently publishes.
//! Live connection handles are owned elsewhere; this is the address book.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

/// Which side opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// An entry representing a single known peer.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    /// Unique node ID of the peer.
    pub node_id: String,
    /// Human-readable node name.
    pub node_name: String,
    /// Address the connection was made with (the dialed address for
    /// outbound connections, the remote socket address for inbound ones).
    pub address: Option<SocketAddr>,
    /// Protocol identifier negotiated on the stream.
    pub protocol: String,
    pub direction: Direction,
    /// When the handshake completed.
    pub connected_at: DateTime<Utc>,
    pub protocol_version: u32,
    /// Names of the contexts the peer publishes.
    pub contexts: Vec<String>,
}

/// Thread-safe registry of connected peers. Entries are dropped on teardown.
#[derive(Debug, Clone, Default)]
pub struct PeerRegistry {
    peers: Arc<RwLock<HashMap<String, PeerEntry>>>,
}

impl PeerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or update a peer after a successful handshake.
    pub fn add_peer(&self, entry: PeerEntry) {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        peers.insert(entry.node_id.clone(), entry);
    }

    /// Forget a peer once its connection is gone.
    pub fn remove_peer(&self, node_id: &str) -> Option<PeerEntry> {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        peers.remove(node_id)
    }

    /// Get a snapshot of a specific peer.
    pub fn get_peer(&self, node_id: &str) -> Option<PeerEntry> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers.get(node_id).cloned()
    }

    /// Resolve an address to the identity of the peer reached at it.
    pub fn find_by_address(&self, addr: SocketAddr) -> Option<PeerEntry> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers.values().find(|p| p.address == Some(addr)).cloned()
    }

    /// Number of peers with a live connection.
    pub fn peer_count(&self) -> usize {
        self.peers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Record a context newly published by a peer.
    pub fn add_context(&self, node_id: &str, name: &str) {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = peers.get_mut(node_id) {
            if !entry.contexts.iter().any(|c| c == name) {
                entry.contexts.push(name.to_string());
            }
        }
    }

    /// Forget a context a peer stopped publishing.
    pub fn remove_context(&self, node_id: &str, name: &str) {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = peers.get_mut(node_id) {
            entry.contexts.retain(|c| c != name);
        }
    }
}
