//! Network error taxonomy.

use qbit_chain::{ChainError, MempoolError};
use qbit_core::Hash;
use qbit_storage::StorageError;
use thiserror::Error;

/// Errors raised while talking to peers.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("peer {0} timed out")]
    PeerTimeout(String),

    #[error("orphan block {hash:?} at height {height} could not be connected")]
    OrphanGapUnresolved { hash: Hash, height: u64 },

    #[error("peer is on another network (genesis {got:?}, expected {expected:?})")]
    UnknownGenesis { expected: Hash, got: Hash },

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("transaction rejected: {0}")]
    Mempool(#[from] MempoolError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("background task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, NetError>;
