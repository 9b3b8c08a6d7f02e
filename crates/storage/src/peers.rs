//! Known peer addresses, kept across restarts.

use crate::db::{Result, Storage};
use serde::{Deserialize, Serialize};

const PEERS_KEY: &[u8] = b"peers:list";

/// A peer we have successfully talked to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    /// `host:port` the peer listens on.
    pub address: String,
    /// Unix seconds of the last message received.
    pub last_seen: u64,
    /// Chain height the peer last advertised.
    pub height: u64,
}

/// Persists the peer list as a single record.
#[derive(Clone)]
pub struct PeerStore {
    storage: Storage,
}

impl PeerStore {
    pub fn new(storage: &Storage) -> Self {
        Self {
            storage: storage.clone(),
        }
    }

    pub fn load(&self) -> Result<Vec<PeerRecord>> {
        Ok(self.storage.get(PEERS_KEY)?.unwrap_or_default())
    }

    /// Replace the stored list. Later entries win on duplicate addresses.
    pub fn save(&self, peers: &[PeerRecord]) -> Result<()> {
        let mut unique: Vec<PeerRecord> = Vec::with_capacity(peers.len());
        for peer in peers {
            match unique.iter_mut().find(|p| p.address == peer.address) {
                Some(existing) => *existing = peer.clone(),
                None => unique.push(peer.clone()),
            }
        }
        self.storage.put(PEERS_KEY, &unique)
    }
}
