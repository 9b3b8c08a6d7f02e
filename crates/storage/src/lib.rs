//! Persistent storage layer for qbit.
//!
//! This crate provides the storage backend for a node:
//! - Block storage (by hash and height) and the chain head pointer
//! - Atomic append and suffix replacement for reorganizations
//! - The list of known peers
//!
//! Account balances are not stored; they are recomputed from blocks on
//! startup.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    Application Layer                     │
//! │              (Blockchain, Peer Sync, CLI)                │
//! └────────────────────────┬────────────────────────────────┘
//!                          │
//! ┌────────────────────────▼────────────────────────────────┐
//! │                   Storage Layer                          │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────┐  │
//! │  │ PeerStore   │  │ ChainStore  │  │ Storage (DB)    │  │
//! │  │  - Peers    │  │  - Blocks   │  │  - sled wrapper │  │
//! │  │             │  │  - Height   │  │  - serialization│  │
//! │  │             │  │  - Head     │  │  - batches      │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────┘  │
//! └────────────────────────┬────────────────────────────────┘
//!                          │
//! ┌────────────────────────▼────────────────────────────────┐
//! │                    sled Database                         │
//! │              (Embedded Key-Value Store)                  │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use qbit_storage::{ChainStore, Storage};
//! use qbit_core::{Address, Block};
//!
//! let storage = Storage::open("./qbit_data/db").unwrap();
//!
//! let chain = ChainStore::new(&storage);
//! let genesis = Block::genesis(1_700_000_000, &[(Address([0xAA; 20]), 100)], 12);
//! chain.init_genesis(&genesis).unwrap();
//! ```

pub mod chain;
pub mod db;
pub mod peers;

// Re-export commonly used types
pub use chain::ChainStore;
pub use db::{BatchOp, Result, Storage, StorageError};
pub use peers::{PeerRecord, PeerStore};
