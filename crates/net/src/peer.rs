//! Connected peers, known addresses and misbehaviour scores.

use crate::protocol::Message;
use qbit_storage::PeerRecord;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

/// Local handle for a connection.
pub type PeerId = u64;

/// Score added for a block that fails validation.
pub const INVALID_BLOCK_PENALTY: u32 = 10;

/// Score added for a transaction with a bad signature or key.
pub const INVALID_SIGNATURE_PENALTY: u32 = 5;

/// Points for claiming a taller chain and then serving none of it.
pub const UNFULFILLED_SYNC_PENALTY: u32 = 10;

/// Unix seconds, for persisted records.
pub fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// A live connection.
#[derive(Debug)]
pub struct PeerInfo {
    pub id: PeerId,
    /// Remote socket address of the connection.
    pub addr: SocketAddr,
    /// Where the peer accepts connections, once known.
    pub listen_addr: Option<String>,
    pub node_id: Option<u64>,
    /// Height the peer last advertised or proved.
    pub height: u64,
    pub outbound: bool,
    pub connected_at: Instant,
    pub last_seen: Instant,
    pub last_ping: Instant,
    pub score: u32,
    sender: mpsc::UnboundedSender<Message>,
    disconnect: Arc<Notify>,
}

impl PeerInfo {
    pub fn is_handshaked(&self) -> bool {
        self.node_id.is_some()
    }

    pub fn send(&self, message: Message) -> bool {
        self.sender.send(message).is_ok()
    }

    /// Ask the connection task to close.
    pub fn disconnect(&self) {
        self.disconnect.notify_one();
    }
}

/// Why a handshake was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRefusal {
    UnknownPeer,
    Duplicate,
}

/// The node's view of the network.
pub struct PeerTable {
    max_peers: usize,
    ban_threshold: u32,
    next_id: PeerId,
    peers: HashMap<PeerId, PeerInfo>,
    /// Addresses learned from config, gossip and previous runs.
    known: HashMap<String, PeerRecord>,
}

impl PeerTable {
    pub fn new(max_peers: usize, ban_threshold: u32, known: Vec<PeerRecord>) -> Self {
        Self {
            max_peers,
            ban_threshold,
            next_id: 1,
            peers: HashMap::new(),
            known: known.into_iter().map(|r| (r.address.clone(), r)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.peers.len() >= self.max_peers
    }

    pub fn get(&self, id: PeerId) -> Option<&PeerInfo> {
        self.peers.get(&id)
    }

    pub fn ids(&self) -> Vec<PeerId> {
        self.peers.keys().copied().collect()
    }

    // =========================================================================
    // Connection Lifecycle
    // =========================================================================

    /// Track a new connection. `None` when the table is full.
    pub fn register(
        &mut self,
        addr: SocketAddr,
        outbound: bool,
        dialed: Option<String>,
        sender: mpsc::UnboundedSender<Message>,
        disconnect: Arc<Notify>,
    ) -> Option<PeerId> {
        if self.is_full() {
            return None;
        }
        let id = self.next_id;
        self.next_id += 1;

        let now = Instant::now();
        self.peers.insert(
            id,
            PeerInfo {
                id,
                addr,
                listen_addr: dialed,
                node_id: None,
                height: 0,
                outbound,
                connected_at: now,
                last_seen: now,
                last_ping: now,
                score: 0,
                sender,
                disconnect,
            },
        );
        Some(id)
    }

    /// Record the peer's `Hello`.
    ///
    /// A second connection to a node we already talk to is refused.
    pub fn complete_handshake(
        &mut self,
        id: PeerId,
        node_id: u64,
        listen_addr: Option<String>,
        height: u64,
    ) -> Result<(), HandshakeRefusal> {
        let duplicate = self
            .peers
            .values()
            .any(|p| p.id != id && p.node_id == Some(node_id));
        if duplicate {
            return Err(HandshakeRefusal::Duplicate);
        }

        let peer = self.peers.get_mut(&id).ok_or(HandshakeRefusal::UnknownPeer)?;
        peer.node_id = Some(node_id);
        peer.height = height;
        if peer.listen_addr.is_none() {
            peer.listen_addr = listen_addr;
        }

        if let Some(address) = peer.listen_addr.clone() {
            self.known.insert(
                address.clone(),
                PeerRecord {
                    address,
                    last_seen: unix_now(),
                    height,
                },
            );
        }
        Ok(())
    }

    pub fn remove(&mut self, id: PeerId) -> Option<PeerInfo> {
        self.peers.remove(&id)
    }

    pub fn disconnect(&self, id: PeerId) {
        if let Some(peer) = self.peers.get(&id) {
            peer.disconnect();
        }
    }

    pub fn record_seen(&mut self, id: PeerId) {
        if let Some(peer) = self.peers.get_mut(&id) {
            peer.last_seen = Instant::now();
        }
    }

    /// Raise the advertised height; heights never go down here.
    pub fn update_height(&mut self, id: PeerId, height: u64) {
        if let Some(peer) = self.peers.get_mut(&id) {
            peer.height = peer.height.max(height);
        }
    }

    /// Replace the height with what the peer actually served.
    pub fn set_height(&mut self, id: PeerId, height: u64) {
        if let Some(peer) = self.peers.get_mut(&id) {
            peer.height = height;
        }
    }

    /// Add to the peer's misbehaviour score; disconnects at the threshold.
    /// Returns whether the peer was disconnected.
    pub fn penalize(&mut self, id: PeerId, points: u32) -> bool {
        let Some(peer) = self.peers.get_mut(&id) else {
            return false;
        };
        peer.score = peer.score.saturating_add(points);
        if peer.score >= self.ban_threshold {
            warn!(peer = %peer.addr, score = peer.score, "disconnecting misbehaving peer");
            peer.disconnect();
            true
        } else {
            debug!(peer = %peer.addr, score = peer.score, "peer penalized");
            false
        }
    }

    // =========================================================================
    // Messaging
    // =========================================================================

    pub fn send(&self, id: PeerId, message: Message) -> bool {
        self.peers.get(&id).is_some_and(|p| p.send(message))
    }

    /// Send to every handshaked peer except `except`. Returns the number of
    /// peers reached.
    pub fn broadcast(&self, message: &Message, except: Option<PeerId>) -> usize {
        self.peers
            .values()
            .filter(|p| p.is_handshaked() && Some(p.id) != except)
            .filter(|p| p.send(message.clone()))
            .count()
    }

    // =========================================================================
    // Selection
    // =========================================================================

    /// The handshaked peer with the greatest height above `above`.
    /// Ties go to the older connection.
    pub fn best_peer(&self, above: u64) -> Option<(PeerId, u64)> {
        self.peers
            .values()
            .filter(|p| p.is_handshaked() && p.height > above)
            .max_by(|a, b| a.height.cmp(&b.height).then(b.id.cmp(&a.id)))
            .map(|p| (p.id, p.height))
    }

    pub fn random_peer<R: Rng>(&self, rng: &mut R) -> Option<PeerId> {
        let ids: Vec<PeerId> = self
            .peers
            .values()
            .filter(|p| p.is_handshaked())
            .map(|p| p.id)
            .collect();
        ids.choose(rng).copied()
    }

    // =========================================================================
    // Address Book
    // =========================================================================

    /// Remember an address heard through gossip.
    pub fn learn(&mut self, address: String) {
        self.known.entry(address.clone()).or_insert(PeerRecord {
            address,
            last_seen: 0,
            height: 0,
        });
    }

    /// Drop an address that turned out to be unusable, such as our own.
    pub fn forget(&mut self, address: &str) {
        self.known.remove(address);
    }

    fn is_connected_to(&self, address: &str) -> bool {
        self.peers
            .values()
            .any(|p| p.listen_addr.as_deref() == Some(address) || p.addr.to_string() == address)
    }

    /// Known addresses we are not connected to, in random order.
    pub fn dial_candidates<R: Rng>(&self, rng: &mut R, exclude: &str) -> Vec<String> {
        let mut candidates: Vec<String> = self
            .known
            .keys()
            .filter(|a| a.as_str() != exclude && !self.is_connected_to(a))
            .cloned()
            .collect();
        candidates.shuffle(rng);
        candidates.truncate(self.max_peers.saturating_sub(self.peers.len()));
        candidates
    }

    /// Listening addresses of handshaked peers, for `Peers` replies.
    pub fn listen_addresses(&self, except: Option<PeerId>) -> Vec<String> {
        self.peers
            .values()
            .filter(|p| p.is_handshaked() && Some(p.id) != except)
            .filter_map(|p| p.listen_addr.clone())
            .collect()
    }

    /// Everything worth persisting, with live data for connected peers.
    pub fn records(&self) -> Vec<PeerRecord> {
        let mut records = self.known.clone();
        let now = unix_now();
        for peer in self.peers.values().filter(|p| p.is_handshaked()) {
            if let Some(address) = &peer.listen_addr {
                records.insert(
                    address.clone(),
                    PeerRecord {
                        address: address.clone(),
                        last_seen: now,
                        height: peer.height,
                    },
                );
            }
        }
        let mut records: Vec<PeerRecord> = records.into_values().collect();
        records.sort_by(|a, b| b.last_seen.cmp(&a.last_seen).then(a.address.cmp(&b.address)));
        records
    }

    /// Peers that need a keepalive, a timeout or a handshake deadline check.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PeerInfo> {
        self.peers.values_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn table(max: usize) -> PeerTable {
        PeerTable::new(max, 20, vec![])
    }

    fn connect(table: &mut PeerTable, port: u16) -> (PeerId, mpsc::UnboundedReceiver<Message>, Arc<Notify>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let notify = Arc::new(Notify::new());
        let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
        let id = table.register(addr, false, None, tx, notify.clone()).unwrap();
        (id, rx, notify)
    }

    #[test]
    fn test_register_respects_capacity() {
        let mut t = table(1);
        let _first = connect(&mut t, 1000);
        let (tx, _rx) = mpsc::unbounded_channel();
        let addr: SocketAddr = "127.0.0.1:1001".parse().unwrap();
        assert!(t.register(addr, true, None, tx, Arc::new(Notify::new())).is_none());
    }

    #[test]
    fn test_duplicate_node_refused() {
        let mut t = table(8);
        let (a, _, _) = connect(&mut t, 1000);
        let (b, _, _) = connect(&mut t, 1001);

        t.complete_handshake(a, 77, Some("10.0.0.1:9333".into()), 5).unwrap();
        assert_eq!(
            t.complete_handshake(b, 77, None, 5),
            Err(HandshakeRefusal::Duplicate)
        );
        assert_eq!(t.records().len(), 1);
    }

    #[test]
    fn test_broadcast_skips_origin_and_unhandshaked() {
        let mut t = table(8);
        let (a, mut rx_a, _) = connect(&mut t, 1000);
        let (b, mut rx_b, _) = connect(&mut t, 1001);
        let (_c, mut rx_c, _) = connect(&mut t, 1002);
        t.complete_handshake(a, 1, None, 0).unwrap();
        t.complete_handshake(b, 2, None, 0).unwrap();

        assert_eq!(t.broadcast(&Message::Ping, Some(a)), 1);
        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap(), Message::Ping);
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_penalty_threshold_disconnects() {
        let mut t = table(8);
        let (a, _rx, notify) = connect(&mut t, 1000);

        assert!(!t.penalize(a, INVALID_BLOCK_PENALTY));
        assert!(!t.penalize(a, INVALID_SIGNATURE_PENALTY));
        assert!(t.penalize(a, INVALID_SIGNATURE_PENALTY));
        // The stored permit wakes the connection task.
        tokio::time::timeout(std::time::Duration::from_secs(1), notify.notified())
            .await
            .unwrap();
    }

    #[test]
    fn test_best_peer_prefers_height_then_age() {
        let mut t = table(8);
        let (a, _, _) = connect(&mut t, 1000);
        let (b, _, _) = connect(&mut t, 1001);
        let (c, _, _) = connect(&mut t, 1002);
        t.complete_handshake(a, 1, None, 10).unwrap();
        t.complete_handshake(b, 2, None, 12).unwrap();
        t.complete_handshake(c, 3, None, 12).unwrap();

        assert_eq!(t.best_peer(5), Some((b, 12)));
        assert_eq!(t.best_peer(12), None);

        t.update_height(a, 20);
        assert_eq!(t.best_peer(5), Some((a, 20)));
    }

    #[test]
    fn test_served_height_replaces_claim() {
        let mut t = table(8);
        let (a, _, _) = connect(&mut t, 1000);
        let (b, _, _) = connect(&mut t, 1001);
        t.complete_handshake(a, 1, None, 1_000_000_000).unwrap();
        t.complete_handshake(b, 2, None, 7).unwrap();
        assert_eq!(t.best_peer(3), Some((a, 1_000_000_000)));

        // It served nothing above our height of 3.
        t.set_height(a, 2);
        t.update_height(a, 1);
        assert_eq!(t.get(a).unwrap().height, 2);
        assert_eq!(t.best_peer(3), Some((b, 7)));
    }

    #[test]
    fn test_dial_candidates_exclude_connected() {
        let mut t = PeerTable::new(
            8,
            20,
            vec![PeerRecord {
                address: "10.0.0.1:9333".into(),
                last_seen: 1,
                height: 0,
            }],
        );
        t.learn("10.0.0.2:9333".into());
        t.learn("127.0.0.1:9333".into());
        let (a, _, _) = connect(&mut t, 1000);
        t.complete_handshake(a, 1, Some("10.0.0.2:9333".into()), 0).unwrap();

        let mut rng = StdRng::seed_from_u64(7);
        let candidates = t.dial_candidates(&mut rng, "127.0.0.1:9333");
        assert_eq!(candidates, vec!["10.0.0.1:9333".to_string()]);
    }
}
