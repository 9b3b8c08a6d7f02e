//! Core primitives for qbit.
//!
//! This crate provides the fundamental types used throughout the node:
//! - SPHINCS+ keys, signatures and address derivation
//! - BLAKE3 hashing and the Argon2id proof-of-work hash
//! - Transactions, blocks and the transaction merkle root
//! - The account ledger derived from a chain of blocks

pub mod account;
pub mod block;
pub mod crypto;
pub mod hash;
pub mod ledger;
pub mod merkle;
pub mod pow;
pub mod transaction;

// Re-export commonly used types at the crate root
pub use account::Account;
pub use block::{Block, BlockHeader};
pub use crypto::{Address, CryptoError, Keypair, PublicKey, Signature};
pub use hash::{hash, hash_concat, Hash, H256};
pub use ledger::AccountLedger;
pub use merkle::{merkle_root, transactions_root};
pub use pow::{difficulty_to_target, meets_target, pow_hash, PowError, PowParams};
pub use transaction::{Transaction, TransactionError};

/// Minor units per coin.
pub const COIN: u64 = 100_000_000;
