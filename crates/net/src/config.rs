//! Node networking configuration.

use crate::protocol::MAX_BATCH_BYTES;
use std::time::Duration;

/// Default TCP port for peer connections.
pub const DEFAULT_PORT: u16 = 9333;

/// Tunables for a running node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Interface to bind; `127.0.0.1` keeps the node private.
    pub host: String,
    /// Port to listen on; 0 picks a free one.
    pub port: u16,
    /// `host:port` addresses dialed at startup.
    pub seed_peers: Vec<String>,
    pub max_peers: usize,
    /// Blocks returned per `GetBlocks` request.
    pub sync_batch_size: usize,
    /// Encoded bytes returned per `GetBlocks` request; at least one block
    /// is always sent.
    pub max_batch_bytes: u64,
    /// A sync session without a response for this long is abandoned.
    pub sync_timeout: Duration,
    /// Time allowed for the first `Hello`.
    pub handshake_timeout: Duration,
    pub connect_timeout: Duration,
    pub ping_interval: Duration,
    pub maintenance_interval: Duration,
    pub peer_save_interval: Duration,
    pub max_orphans: usize,
    /// Sync rounds an orphan survives without being connected.
    pub max_orphan_attempts: u32,
    pub orphan_ttl: Duration,
    /// Misbehaviour score at which a peer is disconnected.
    pub ban_threshold: u32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            seed_peers: Vec::new(),
            max_peers: 8,
            sync_batch_size: 128,
            max_batch_bytes: MAX_BATCH_BYTES,
            sync_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            ping_interval: Duration::from_secs(30),
            maintenance_interval: Duration::from_secs(5),
            peer_save_interval: Duration::from_secs(60),
            max_orphans: 64,
            max_orphan_attempts: 3,
            orphan_ttl: Duration::from_secs(600),
            ban_threshold: 20,
        }
    }
}

impl NodeConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
