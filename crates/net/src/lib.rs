//! Peer-to-peer networking for qbit.
//!
//! Nodes speak a small length-prefixed bincode protocol over TCP:
//!
//! ```text
//!   A                                   B
//!   │── Hello{height, genesis} ────────▶│
//!   │◀──────── Hello{height, genesis} ──│   genesis must match
//!   │── GetBlocks{from_height} ────────▶│   B is ahead
//!   │◀────────────────── Blocks{..} ────│   until A reaches B's height
//!   │── NewTransaction / NewBlock ─────▶│   gossip, relayed once
//! ```
//!
//! A downloaded chain replaces ours only when it is strictly longer and
//! valid from the fork point. Blocks that arrive before their parent are
//! parked as orphans until a sync fills the gap. Peers that send invalid
//! blocks or forged transactions accumulate a score and are dropped at a
//! threshold.

pub mod config;
pub mod error;
pub mod node;
pub mod orphan;
pub mod peer;
pub mod protocol;

pub use config::{NodeConfig, DEFAULT_PORT};
pub use error::{NetError, Result};
pub use node::{submit_transaction, Node, NodeHandle};
pub use orphan::OrphanPool;
pub use peer::{PeerId, PeerInfo, PeerTable};
pub use protocol::{fit_batch, read_message, write_message, Message, MAX_BATCH_BYTES, MAX_FRAME_LEN};
