//! Transaction mempool for pending transactions.
//!
//! The mempool stores transfers that are valid on top of the current head
//! plus everything already pending from the same sender. Admission checks
//! against that projected state, so a sender can queue several transfers
//! with consecutive nonces before any of them is mined.

use qbit_consensus::{TransactionValidator, ValidationError};
use qbit_core::{AccountLedger, Address, Block, Hash, Transaction};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Errors that can occur during mempool operations.
#[derive(Debug, Error)]
pub enum MempoolError {
    #[error("transaction {0:?} already in mempool")]
    DuplicateTransaction(Hash),

    #[error("sender {sender} already has a pending transaction with nonce {nonce}")]
    NonceInUse { sender: Address, nonce: u64 },

    #[error("mempool is full (capacity: {0})")]
    MempoolFull(usize),

    #[error("sender has too many pending transactions (limit: {0})")]
    SenderLimit(usize),

    #[error("transaction not found in mempool")]
    TransactionNotFound,

    #[error("transaction rejected: {0}")]
    Rejected(#[from] ValidationError),
}

pub type Result<T> = std::result::Result<T, MempoolError>;

/// Mempool shared between the miner and the network tasks.
pub type SharedMempool = Arc<Mutex<Mempool>>;

/// Configuration for the mempool.
#[derive(Debug, Clone)]
pub struct MempoolConfig {
    /// Maximum number of transactions in the mempool.
    pub max_transactions: usize,
    /// Maximum transactions per account.
    pub max_per_account: usize,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_transactions: 10_000,
            max_per_account: 100,
        }
    }
}

/// Transaction mempool.
pub struct Mempool {
    /// Configuration.
    config: MempoolConfig,
    /// Transactions indexed by hash.
    transactions: HashMap<Hash, Transaction>,
    /// Pending nonces per sender.
    by_sender: HashMap<Address, BTreeMap<u64, Hash>>,
}

impl Mempool {
    /// Create a new mempool with default configuration.
    pub fn new() -> Self {
        Self::with_config(MempoolConfig::default())
    }

    /// Create a new mempool with the given configuration.
    pub fn with_config(config: MempoolConfig) -> Self {
        Self {
            config,
            transactions: HashMap::new(),
            by_sender: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn contains(&self, tx_hash: &Hash) -> bool {
        self.transactions.contains_key(tx_hash)
    }

    // =========================================================================
    // Projection
    // =========================================================================

    /// Last nonce of `sender` once every pending transfer is applied.
    pub fn pending_nonce(&self, sender: &Address, ledger: &AccountLedger) -> u64 {
        let confirmed = ledger.nonce_of(sender);
        self.by_sender
            .get(sender)
            .and_then(|nonces| nonces.keys().next_back().copied())
            .map_or(confirmed, |last| last.max(confirmed))
    }

    /// Total amount plus fees `sender` has pending.
    pub fn pending_spend(&self, sender: &Address) -> u64 {
        self.by_sender
            .get(sender)
            .map(|nonces| {
                nonces
                    .values()
                    .filter_map(|h| self.transactions.get(h))
                    .fold(0u64, |acc, tx| acc.saturating_add(tx.total_cost()))
            })
            .unwrap_or(0)
    }

    // =========================================================================
    // Admission
    // =========================================================================

    /// Validate `tx` against `ledger` plus pending state, then add it.
    ///
    /// The nonce must directly follow the sender's last pending (or
    /// confirmed) nonce and the balance must cover everything pending.
    pub fn admit(&mut self, tx: Transaction, ledger: &AccountLedger) -> Result<Hash> {
        let tx_hash = tx.hash();
        if self.contains(&tx_hash) {
            return Err(MempoolError::DuplicateTransaction(tx_hash));
        }
        self.check_nonce_free(&tx)?;

        if tx.amount == 0 {
            return Err(ValidationError::ZeroAmount.into());
        }
        TransactionValidator::validate_signature(&tx)?;

        let nonce = self.pending_nonce(&tx.from, ledger);
        let available = ledger
            .balance_of(&tx.from)
            .saturating_sub(self.pending_spend(&tx.from));
        TransactionValidator::validate_against_state(&tx, nonce, available)?;

        self.add(tx)?;
        Ok(tx_hash)
    }

    /// Add a transaction without validating it.
    ///
    /// Only duplicates and capacity are checked; use [`Mempool::admit`] for
    /// anything received from outside.
    pub fn add(&mut self, tx: Transaction) -> Result<()> {
        let tx_hash = tx.hash();

        if self.contains(&tx_hash) {
            return Err(MempoolError::DuplicateTransaction(tx_hash));
        }
        self.check_nonce_free(&tx)?;

        if self.transactions.len() >= self.config.max_transactions {
            return Err(MempoolError::MempoolFull(self.config.max_transactions));
        }

        let sender_txs = self.by_sender.entry(tx.from).or_default();
        if sender_txs.len() >= self.config.max_per_account {
            return Err(MempoolError::SenderLimit(self.config.max_per_account));
        }

        sender_txs.insert(tx.nonce, tx_hash);
        self.transactions.insert(tx_hash, tx);

        Ok(())
    }

    fn check_nonce_free(&self, tx: &Transaction) -> Result<()> {
        let taken = self
            .by_sender
            .get(&tx.from)
            .is_some_and(|nonces| nonces.contains_key(&tx.nonce));
        if taken {
            return Err(MempoolError::NonceInUse {
                sender: tx.from,
                nonce: tx.nonce,
            });
        }
        Ok(())
    }

    // =========================================================================
    // Removal
    // =========================================================================

    pub fn remove(&mut self, tx_hash: &Hash) -> Result<Transaction> {
        let tx = self
            .transactions
            .remove(tx_hash)
            .ok_or(MempoolError::TransactionNotFound)?;

        if let Some(sender_txs) = self.by_sender.get_mut(&tx.from) {
            sender_txs.remove(&tx.nonce);
            if sender_txs.is_empty() {
                self.by_sender.remove(&tx.from);
            }
        }

        Ok(tx)
    }

    /// Remove multiple transactions from the mempool.
    pub fn remove_batch(&mut self, tx_hashes: &[Hash]) {
        for hash in tx_hashes {
            let _ = self.remove(hash);
        }
    }

    /// Drop every transaction that `block` confirmed.
    pub fn remove_included(&mut self, block: &Block) {
        let hashes: Vec<Hash> = block
            .transactions
            .iter()
            .filter(|tx| !tx.is_coinbase())
            .map(Transaction::hash)
            .collect();
        self.remove_batch(&hashes);
    }

    /// Drop transactions that are no longer valid on top of `ledger`.
    ///
    /// Each sender's queue is replayed in nonce order; the first transfer
    /// that fails takes every later one from the same sender with it.
    /// Returns how many were dropped.
    pub fn prune(&mut self, ledger: &AccountLedger) -> usize {
        let mut stale = Vec::new();
        for (sender, nonces) in &self.by_sender {
            let mut nonce = ledger.nonce_of(sender);
            let mut balance = ledger.balance_of(sender);
            let mut broken = false;
            for hash in nonces.values() {
                let Some(tx) = self.transactions.get(hash) else {
                    continue;
                };
                if tx.nonce <= ledger.nonce_of(sender) {
                    // Already confirmed.
                    stale.push(*hash);
                } else if !broken
                    && TransactionValidator::validate_against_state(tx, nonce, balance).is_ok()
                {
                    nonce = tx.nonce;
                    balance -= tx.total_cost();
                } else {
                    broken = true;
                    stale.push(*hash);
                }
            }
        }
        self.remove_batch(&stale);
        stale.len()
    }

    // =========================================================================
    // Block Templates
    // =========================================================================

    /// All pending transactions in template priority order: fee descending,
    /// then sender, nonce and id ascending.
    pub fn ordered(&self) -> Vec<&Transaction> {
        let mut txs: Vec<(Hash, &Transaction)> =
            self.transactions.iter().map(|(h, tx)| (*h, tx)).collect();
        txs.sort_by_key(|(hash, tx)| (Reverse(tx.fee), tx.from, tx.nonce, *hash));
        txs.into_iter().map(|(_, tx)| tx).collect()
    }

    /// Pick up to `limit` transactions totalling at most `max_bytes` encoded
    /// that apply cleanly, in order, on top of `ledger`.
    ///
    /// A low-fee transfer that unlocks a higher nonce is picked up on a later
    /// pass, so nonce chains are included whole when they fit.
    pub fn select_for_block(
        &self,
        ledger: &AccountLedger,
        limit: usize,
        max_bytes: u64,
    ) -> Vec<Transaction> {
        let candidates = self.ordered();
        let mut scratch = ledger.clone();
        let mut included: HashSet<usize> = HashSet::new();
        let mut selected = Vec::new();
        let mut bytes = 0u64;

        loop {
            let before = selected.len();
            for (index, tx) in candidates.iter().enumerate() {
                if selected.len() >= limit {
                    return selected;
                }
                if included.contains(&index) {
                    continue;
                }
                let size = tx.encoded_size();
                if bytes.saturating_add(size) > max_bytes {
                    continue;
                }
                if TransactionValidator::validate_against_state(
                    tx,
                    scratch.nonce_of(&tx.from),
                    scratch.balance_of(&tx.from),
                )
                .is_ok()
                {
                    scratch.apply_transaction(tx);
                    included.insert(index);
                    bytes += size;
                    selected.push((*tx).clone());
                }
            }
            if selected.len() == before {
                return selected;
            }
        }
    }

    /// Get mempool statistics.
    pub fn stats(&self) -> MempoolStats {
        MempoolStats {
            total_transactions: self.len(),
            unique_senders: self.by_sender.len(),
            capacity: self.config.max_transactions,
        }
    }
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new()
    }
}

/// Mempool statistics.
#[derive(Debug, Clone)]
pub struct MempoolStats {
    /// Total number of transactions.
    pub total_transactions: usize,
    /// Number of unique senders.
    pub unique_senders: usize,
    /// Mempool capacity.
    pub capacity: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use qbit_core::Keypair;

    struct Fixture {
        alice: Keypair,
        bob: Address,
        ledger: AccountLedger,
    }

    fn fixture() -> Fixture {
        let alice = Keypair::generate();
        let genesis = Block::genesis(0, &[(alice.address(), 100)], 0);
        let mut ledger = AccountLedger::new();
        ledger.apply_block(&genesis);
        Fixture {
            alice,
            bob: Address::from_bytes([2u8; 20]),
            ledger,
        }
    }

    fn transfer(keypair: &Keypair, to: Address, amount: u64, fee: u64, nonce: u64) -> Transaction {
        Transaction::transfer(keypair, to, amount, fee, nonce).signed(keypair)
    }

    #[test]
    fn test_mempool_admit_and_get() {
        let f = fixture();
        let mut mempool = Mempool::new();
        let tx = transfer(&f.alice, f.bob, 30, 1, 1);

        let tx_hash = mempool.admit(tx.clone(), &f.ledger).unwrap();
        assert_eq!(mempool.len(), 1);
        assert!(mempool.contains(&tx_hash));
        assert_eq!(mempool.ordered(), vec![&tx]);
    }

    #[test]
    fn test_mempool_duplicate_rejected() {
        let f = fixture();
        let mut mempool = Mempool::new();
        let tx = transfer(&f.alice, f.bob, 30, 1, 1);

        mempool.admit(tx.clone(), &f.ledger).unwrap();
        assert!(matches!(
            mempool.admit(tx, &f.ledger),
            Err(MempoolError::DuplicateTransaction(_))
        ));
    }

    #[test]
    fn test_same_nonce_rejected() {
        let f = fixture();
        let mut mempool = Mempool::new();
        mempool.admit(transfer(&f.alice, f.bob, 30, 1, 1), &f.ledger).unwrap();

        let replacement = transfer(&f.alice, f.bob, 10, 5, 1);
        assert!(matches!(
            mempool.admit(replacement, &f.ledger),
            Err(MempoolError::NonceInUse { nonce: 1, .. })
        ));
    }

    #[test]
    fn test_projected_nonce_and_balance() {
        let f = fixture();
        let mut mempool = Mempool::new();
        let sender = f.alice.address();

        mempool.admit(transfer(&f.alice, f.bob, 30, 1, 1), &f.ledger).unwrap();
        mempool.admit(transfer(&f.alice, f.bob, 30, 1, 2), &f.ledger).unwrap();
        assert_eq!(mempool.pending_nonce(&sender, &f.ledger), 2);
        assert_eq!(mempool.pending_spend(&sender), 62);

        // Skipping a nonce is rejected.
        assert!(matches!(
            mempool.admit(transfer(&f.alice, f.bob, 1, 0, 4), &f.ledger),
            Err(MempoolError::Rejected(ValidationError::InvalidNonce { expected: 3, got: 4 }))
        ));

        // 38 left, so 38 + 1 does not fit.
        assert!(matches!(
            mempool.admit(transfer(&f.alice, f.bob, 38, 1, 3), &f.ledger),
            Err(MempoolError::Rejected(ValidationError::InsufficientBalance { .. }))
        ));
        assert!(mempool.admit(transfer(&f.alice, f.bob, 37, 1, 3), &f.ledger).is_ok());
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let f = fixture();
        let mut mempool = Mempool::new();
        let mut tx = transfer(&f.alice, f.bob, 30, 1, 1);
        tx.amount = 31;

        assert!(matches!(
            mempool.admit(tx, &f.ledger),
            Err(MempoolError::Rejected(ValidationError::InvalidSignature))
        ));
        assert!(mempool.is_empty());
    }

    #[test]
    fn test_mempool_remove() {
        let f = fixture();
        let mut mempool = Mempool::new();
        let tx = transfer(&f.alice, f.bob, 30, 1, 1);
        let tx_hash = mempool.admit(tx.clone(), &f.ledger).unwrap();

        let removed = mempool.remove(&tx_hash).unwrap();
        assert_eq!(removed, tx);
        assert!(mempool.is_empty());
        assert_eq!(mempool.stats().unique_senders, 0);
        assert!(matches!(
            mempool.remove(&tx_hash),
            Err(MempoolError::TransactionNotFound)
        ));
    }

    #[test]
    fn test_ordering_is_fee_then_sender_then_nonce() {
        let f = fixture();
        let carol = Keypair::generate();
        let mut mempool = Mempool::new();

        let low = transfer(&f.alice, f.bob, 1, 1, 1);
        let high = transfer(&f.alice, f.bob, 1, 9, 2);
        let mid = transfer(&carol, f.bob, 1, 5, 1);
        mempool.add(low.clone()).unwrap();
        mempool.add(high.clone()).unwrap();
        mempool.add(mid.clone()).unwrap();

        let ordered: Vec<_> = mempool.ordered().into_iter().cloned().collect();
        assert_eq!(ordered, vec![high, mid, low]);
    }

    #[test]
    fn test_select_follows_nonce_chain() {
        let f = fixture();
        let mut mempool = Mempool::new();

        // The higher fee sits on the later nonce; both must still be picked
        // in nonce order.
        let first = transfer(&f.alice, f.bob, 10, 1, 1);
        let second = transfer(&f.alice, f.bob, 10, 8, 2);
        mempool.admit(first.clone(), &f.ledger).unwrap();
        mempool.admit(second.clone(), &f.ledger).unwrap();

        let selected = mempool.select_for_block(&f.ledger, 10, u64::MAX);
        assert_eq!(selected, vec![first.clone(), second]);

        assert_eq!(mempool.select_for_block(&f.ledger, 1, u64::MAX), vec![first]);
    }

    #[test]
    fn test_select_skips_unaffordable() {
        let f = fixture();
        let mut mempool = Mempool::new();
        // Inserted without validation; Alice only has 100.
        mempool.add(transfer(&f.alice, f.bob, 500, 1, 1)).unwrap();
        assert!(mempool.select_for_block(&f.ledger, 10, u64::MAX).is_empty());
    }

    #[test]
    fn test_select_respects_byte_budget() {
        let f = fixture();
        let carol = Keypair::generate();
        let mut ledger = f.ledger.clone();
        ledger.apply_block(&Block::genesis(0, &[(carol.address(), 100)], 0));
        let mut mempool = Mempool::new();

        let high = transfer(&f.alice, f.bob, 10, 9, 1);
        let low = transfer(&carol, f.bob, 10, 1, 1);
        mempool.admit(high.clone(), &ledger).unwrap();
        mempool.admit(low.clone(), &ledger).unwrap();

        let one = high.encoded_size();
        assert_eq!(mempool.select_for_block(&ledger, 10, one), vec![high.clone()]);
        assert_eq!(
            mempool.select_for_block(&ledger, 10, one + low.encoded_size()),
            vec![high, low]
        );
        assert!(mempool.select_for_block(&ledger, 10, one - 1).is_empty());
    }

    #[test]
    fn test_prune_after_confirmation() {
        let f = fixture();
        let mut mempool = Mempool::new();
        let first = transfer(&f.alice, f.bob, 30, 1, 1);
        let second = transfer(&f.alice, f.bob, 30, 1, 2);
        mempool.admit(first.clone(), &f.ledger).unwrap();
        mempool.admit(second.clone(), &f.ledger).unwrap();

        // The first transfer got mined elsewhere.
        let mut ledger = f.ledger.clone();
        ledger.apply_transaction(&first);

        assert_eq!(mempool.prune(&ledger), 1);
        assert!(!mempool.contains(&first.hash()));
        assert!(mempool.contains(&second.hash()));
    }

    #[test]
    fn test_prune_drops_dependents() {
        let f = fixture();
        let mut mempool = Mempool::new();
        let first = transfer(&f.alice, f.bob, 30, 1, 1);
        let second = transfer(&f.alice, f.bob, 30, 1, 2);
        mempool.admit(first, &f.ledger).unwrap();
        mempool.admit(second, &f.ledger).unwrap();

        // Alice's funds vanished in a reorg.
        let empty = AccountLedger::new();
        assert_eq!(mempool.prune(&empty), 2);
        assert!(mempool.is_empty());
    }

    #[test]
    fn test_mempool_capacity_limit() {
        let f = fixture();
        let config = MempoolConfig {
            max_transactions: 2,
            max_per_account: 10,
        };
        let mut mempool = Mempool::with_config(config);

        mempool.add(transfer(&f.alice, f.bob, 1, 0, 1)).unwrap();
        mempool.add(transfer(&f.alice, f.bob, 1, 0, 2)).unwrap();
        assert!(matches!(
            mempool.add(transfer(&f.alice, f.bob, 1, 0, 3)),
            Err(MempoolError::MempoolFull(2))
        ));
    }

    #[test]
    fn test_mempool_per_sender_limit() {
        let f = fixture();
        let config = MempoolConfig {
            max_transactions: 100,
            max_per_account: 2,
        };
        let mut mempool = Mempool::with_config(config);

        mempool.add(transfer(&f.alice, f.bob, 1, 0, 1)).unwrap();
        mempool.add(transfer(&f.alice, f.bob, 1, 0, 2)).unwrap();
        assert!(matches!(
            mempool.add(transfer(&f.alice, f.bob, 1, 0, 3)),
            Err(MempoolError::SenderLimit(2))
        ));
    }
}
