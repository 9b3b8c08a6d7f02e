//! Chain orchestration for qbit.
//!
//! This crate turns the consensus rules into a running chain:
//! - **Blockchain**: the canonical chain, longest-valid-chain replacement
//!   and persistence
//! - **Mempool**: transfers waiting to be mined, validated against the head
//!   plus pending state
//! - **Miner**: cancellable proof-of-work search on a dedicated thread
//!
//! # Example
//!
//! ```rust,no_run
//! use qbit_chain::{Blockchain, Mempool, Miner, MinerConfig};
//! use qbit_consensus::ConsensusParams;
//! use qbit_core::Keypair;
//! use qbit_storage::Storage;
//! use std::sync::Arc;
//! use tokio::sync::{mpsc, Mutex};
//!
//! let storage = Storage::open("./qbit_data/db").unwrap();
//! let chain = Blockchain::open(ConsensusParams::default(), &storage)
//!     .unwrap()
//!     .into_shared();
//! let mempool = Arc::new(Mutex::new(Mempool::new()));
//!
//! // Mined blocks come out of the channel for broadcasting.
//! let (announce, _mined) = mpsc::unbounded_channel();
//! let wallet = Keypair::generate();
//! let miner = Miner::new(MinerConfig::new(wallet.address()), chain, mempool, announce)
//!     .spawn()
//!     .unwrap();
//! miner.shutdown();
//! ```

pub mod blockchain;
pub mod mempool;
pub mod miner;

// Re-export commonly used types
pub use blockchain::{
    Blockchain, BlockchainStats, Candidate, ChainError, ChainSnapshot, ChainState, HeadInfo,
    ReorgOutcome, Result, SharedChain,
};
pub use mempool::{Mempool, MempoolConfig, MempoolError, MempoolStats, SharedMempool};
pub use miner::{build_template, Miner, MinerConfig, MinerHandle, MinerState};
