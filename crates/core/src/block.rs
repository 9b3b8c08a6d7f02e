//! Block and block header structures.

use crate::crypto::Address;
use crate::hash::{hash, Hash};
use crate::merkle::transactions_root;
use crate::pow::{meets_target, pow_hash, PowError, PowParams};
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// The header of a block containing metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block height (0 for genesis).
    pub height: u64,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    /// Hash of the previous block.
    pub prev_hash: Hash,
    /// Merkle root of transaction ids.
    pub merkle_root: Hash,
    /// Required leading zero bits of the proof-of-work hash.
    pub difficulty: u32,
    /// Proof-of-work nonce.
    pub nonce: u64,
}

impl BlockHeader {
    /// Block id: BLAKE3 of the encoded header.
    pub fn hash(&self) -> Hash {
        let encoded = bincode::serialize(self).expect("serialization should not fail");
        hash(&encoded)
    }

    /// Bytes fed to the proof-of-work hash:
    /// `prev_hash || merkle_root || timestamp (LE) || nonce (LE)`.
    pub fn pow_preimage(&self) -> [u8; 80] {
        let mut buf = [0u8; 80];
        buf[..32].copy_from_slice(self.prev_hash.as_bytes());
        buf[32..64].copy_from_slice(self.merkle_root.as_bytes());
        buf[64..72].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[72..].copy_from_slice(&self.nonce.to_le_bytes());
        buf
    }

    /// Get the current Unix timestamp.
    pub fn current_timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// A complete block: header, proof-of-work result and transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    /// Argon2id hash of the header's proof-of-work preimage.
    pub pow_hash: Hash,
    /// Coinbase first, then transfers in application order.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Create an unsealed block stamped with the current time.
    pub fn new(height: u64, prev_hash: Hash, transactions: Vec<Transaction>, difficulty: u32) -> Self {
        Self {
            header: BlockHeader {
                height,
                timestamp: BlockHeader::current_timestamp(),
                prev_hash,
                merkle_root: transactions_root(&transactions),
                difficulty,
                nonce: 0,
            },
            pow_hash: Hash::ZERO,
            transactions,
        }
    }

    /// Build the genesis block crediting each `(address, amount)` allocation.
    ///
    /// The result depends only on the arguments, so every node configured
    /// with the same allocations derives the same genesis hash.
    pub fn genesis(timestamp: u64, allocations: &[(Address, u64)], difficulty: u32) -> Self {
        let transactions: Vec<Transaction> = allocations
            .iter()
            .map(|(address, amount)| Transaction::coinbase(*address, *amount, 0))
            .collect();
        Self {
            header: BlockHeader {
                height: 0,
                timestamp,
                prev_hash: Hash::ZERO,
                merkle_root: transactions_root(&transactions),
                difficulty,
                nonce: 0,
            },
            pow_hash: Hash::ZERO,
            transactions,
        }
    }

    /// Get the block hash (hash of the header).
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn is_genesis(&self) -> bool {
        self.header.height == 0 && self.header.prev_hash == Hash::ZERO
    }

    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }

    /// The reward transaction, if the block starts with one.
    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first().filter(|tx| tx.is_coinbase())
    }

    /// Length of the block's bincode encoding, as stored and sent to peers.
    pub fn encoded_size(&self) -> u64 {
        bincode::serialized_size(self).expect("serialization should not fail")
    }

    /// Sum of fees paid by the non-coinbase transactions.
    pub fn total_fees(&self) -> u64 {
        self.transactions
            .iter()
            .filter(|tx| !tx.is_coinbase())
            .fold(0u64, |acc, tx| acc.saturating_add(tx.fee))
    }

    /// Verify the merkle root matches the transactions.
    pub fn verify_merkle_root(&self) -> bool {
        transactions_root(&self.transactions) == self.header.merkle_root
    }

    /// Recompute the proof-of-work hash from the header.
    pub fn compute_pow_hash(&self, params: &PowParams) -> Result<Hash, PowError> {
        pow_hash(&self.header.pow_preimage(), params)
    }

    /// Whether the stored proof-of-work hash is under this block's target.
    /// Does not recompute the hash.
    pub fn meets_difficulty(&self) -> bool {
        meets_target(&self.pow_hash, self.header.difficulty)
    }
}
