//! The canonical chain and the chain selection rule.
//!
//! A [`Blockchain`] owns the validated chain, the ledger at its head and the
//! store it is persisted in. All mutation goes through `&mut self`, so the
//! node wraps it in a single lock ([`SharedChain`]) and every append or
//! replacement is one short critical section.
//!
//! Replacing the chain with a peer's is split in two phases so the
//! expensive part never holds that lock:
//!
//! 1. [`Blockchain::snapshot`] copies the block references and head ledger.
//! 2. [`ChainSnapshot::evaluate`] validates the candidate against the
//!    snapshot, with no lock held.
//! 3. [`Blockchain::adopt`] swaps the suffix in if the head has not moved.

use qbit_consensus::{BlockValidator, ConsensusParams, InvalidChain, TransactionValidator, ValidationError};
use qbit_core::{AccountLedger, Address, Block, Hash, Transaction};
use qbit_storage::{ChainStore, Storage, StorageError};
use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

/// Errors that can occur during blockchain operations.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    InvalidChain(#[from] InvalidChain),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("stored chain cannot be verified: {0}")]
    StorageCorruption(String),

    #[error("block {0:?} is already part of the chain")]
    KnownBlock(Hash),

    #[error("candidate does not link to our chain above height {0}; earlier blocks are needed")]
    ForkBelowCandidate(u64),

    #[error("candidate height {candidate} is not greater than current height {current}")]
    NotLonger { candidate: u64, current: u64 },

    #[error("head moved while the candidate was evaluated")]
    StaleCandidate,

    #[error("candidate chain is empty")]
    EmptyCandidate,

    #[error("candidate blocks are not contiguous at height {0}")]
    NonContiguous(u64),
}

pub type Result<T> = std::result::Result<T, ChainError>;

/// Shared handle to the chain; the lock is the single mutation point.
pub type SharedChain = Arc<RwLock<Blockchain>>;

/// Where the node stands relative to its peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    /// No known peer is ahead of us.
    Synced,
    /// Fetching blocks from a peer that advertised a longer chain.
    Syncing,
    /// Validating a downloaded candidate chain.
    ReorgEvaluating,
}

/// Height and hash of the head, published on every change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadInfo {
    pub height: u64,
    pub hash: Hash,
}

/// Result of a successful [`Blockchain::adopt`].
#[derive(Debug, Clone)]
pub struct ReorgOutcome {
    /// Last block shared by the old and new chain.
    pub fork_height: u64,
    pub old_height: u64,
    pub new_height: u64,
    /// The replaced suffix of the old chain, oldest first.
    pub discarded: Vec<Arc<Block>>,
    /// Transfers from `discarded` that are still valid on the new head, in
    /// their original order.
    pub resurrected: Vec<Transaction>,
}

/// The lock-free half of a chain replacement.
#[derive(Debug, Clone)]
pub struct ChainSnapshot {
    params: ConsensusParams,
    blocks: Vec<Arc<Block>>,
    ledger: AccountLedger,
}

/// A validated candidate, ready for [`Blockchain::adopt`].
#[derive(Debug, Clone)]
pub struct Candidate {
    fork_height: u64,
    blocks: Vec<Arc<Block>>,
    ledger: AccountLedger,
    base_head: Hash,
}

impl Candidate {
    pub fn fork_height(&self) -> u64 {
        self.fork_height
    }

    /// Height the chain will have once adopted.
    pub fn height(&self) -> u64 {
        self.fork_height + self.blocks.len() as u64
    }
}

impl ChainSnapshot {
    pub fn height(&self) -> u64 {
        (self.blocks.len() as u64).saturating_sub(1)
    }

    /// Validate `candidate` as a replacement for the snapshot's chain.
    ///
    /// `candidate` must be contiguous and ascending. Blocks we already have
    /// are skipped; the first new block must link to one of ours. The result
    /// is accepted only if it is strictly longer than the snapshot and every
    /// new block validates from the fork point.
    pub fn evaluate(&self, candidate: Vec<Block>) -> Result<Candidate> {
        let first_height = candidate
            .first()
            .map(Block::height)
            .ok_or(ChainError::EmptyCandidate)?;
        for (offset, block) in candidate.iter().enumerate() {
            let expected = first_height
                .checked_add(offset as u64)
                .ok_or(ChainError::NonContiguous(first_height))?;
            if block.height() != expected {
                return Err(ChainError::NonContiguous(expected));
            }
        }

        if let Some(first) = candidate.first() {
            if first.height() == 0 {
                BlockValidator::new(&self.params).validate_genesis(first)?;
            }
        }

        // Skip the prefix we already hold.
        let shared = candidate
            .iter()
            .take_while(|b| {
                self.blocks
                    .get(b.height() as usize)
                    .is_some_and(|ours| ours.hash() == b.hash())
            })
            .count();
        let new_blocks: Vec<Arc<Block>> = candidate.into_iter().skip(shared).map(Arc::new).collect();

        let current = self.height();
        let Some(first) = new_blocks.first() else {
            return Err(ChainError::NotLonger {
                candidate: (first_height + shared as u64).saturating_sub(1),
                current,
            });
        };

        let Some(fork_height) = first.height().checked_sub(1) else {
            return Err(ChainError::ForkBelowCandidate(0));
        };
        let links = self
            .blocks
            .get(fork_height as usize)
            .is_some_and(|parent| parent.hash() == first.header.prev_hash);
        if !links {
            return Err(ChainError::ForkBelowCandidate(first.height()));
        }

        let new_height = fork_height
            .checked_add(new_blocks.len() as u64)
            .ok_or(ChainError::NonContiguous(fork_height))?;
        if new_height <= current {
            return Err(ChainError::NotLonger {
                candidate: new_height,
                current,
            });
        }

        let mut ledger = if fork_height == current {
            self.ledger.clone()
        } else {
            AccountLedger::rebuild_from(&self.blocks, fork_height)
        };

        let validator = BlockValidator::new(&self.params);
        let mut previous: &Block = &self.blocks[fork_height as usize];
        for block in &new_blocks {
            ledger = validator
                .execute_block(block, previous, &ledger)
                .map_err(|source| InvalidChain {
                    height: block.height(),
                    source,
                })?;
            previous = block.as_ref();
        }

        debug!(fork_height, new_height, "candidate chain validated");
        Ok(Candidate {
            fork_height,
            blocks: new_blocks,
            ledger,
            base_head: self.blocks[current as usize].hash(),
        })
    }
}

/// The canonical chain, its ledger and its store.
pub struct Blockchain {
    params: ConsensusParams,
    blocks: Vec<Arc<Block>>,
    /// Canonical block hash → height.
    index: HashMap<Hash, u64>,
    ledger: AccountLedger,
    store: ChainStore,
    state: ChainState,
    head_tx: watch::Sender<HeadInfo>,
}

impl Blockchain {
    /// Load the chain from `storage`, or initialize it with the genesis block
    /// derived from `params`.
    ///
    /// A stored chain is replayed through the validator from genesis. Any
    /// failure, including a foreign genesis, is [`ChainError::StorageCorruption`]
    /// and the node must not start until [`Blockchain::resync`] is used.
    pub fn open(params: ConsensusParams, storage: &Storage) -> Result<Self> {
        let store = ChainStore::new(storage);

        let blocks = if store.is_initialized()? {
            store
                .load_chain()
                .map_err(|e| ChainError::StorageCorruption(e.to_string()))?
        } else {
            let genesis = params.genesis_block();
            store.init_genesis(&genesis)?;
            info!(hash = %genesis.hash().short(), "initialized chain with genesis block");
            vec![genesis]
        };

        let ledger = BlockValidator::new(&params)
            .verify_chain(&blocks)
            .map_err(|e| ChainError::StorageCorruption(e.to_string()))?;

        let blocks: Vec<Arc<Block>> = blocks.into_iter().map(Arc::new).collect();
        let index = blocks
            .iter()
            .map(|b| (b.hash(), b.height()))
            .collect::<HashMap<_, _>>();
        let head = blocks
            .last()
            .map(|b| HeadInfo {
                height: b.height(),
                hash: b.hash(),
            })
            .ok_or_else(|| ChainError::StorageCorruption("empty chain".into()))?;
        let (head_tx, _) = watch::channel(head);

        info!(height = head.height, hash = %head.hash.short(), "chain loaded");
        Ok(Self {
            params,
            blocks,
            index,
            ledger,
            store,
            state: ChainState::Synced,
            head_tx,
        })
    }

    /// Discard the stored chain and start again from genesis.
    ///
    /// Peers are kept, so the node can download the chain again.
    pub fn resync(params: ConsensusParams, storage: &Storage) -> Result<Self> {
        warn!("discarding stored chain, resynchronizing from genesis");
        ChainStore::new(storage).clear()?;
        Self::open(params, storage)
    }

    /// A fresh chain on a temporary store.
    pub fn in_memory(params: ConsensusParams) -> Result<Self> {
        let storage = Storage::open_temporary()?;
        Self::open(params, &storage)
    }

    pub fn into_shared(self) -> SharedChain {
        Arc::new(RwLock::new(self))
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn params(&self) -> &ConsensusParams {
        &self.params
    }

    pub fn height(&self) -> u64 {
        self.head().height()
    }

    pub fn head(&self) -> &Arc<Block> {
        // `open` guarantees at least the genesis block.
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn head_info(&self) -> HeadInfo {
        *self.head_tx.borrow()
    }

    pub fn genesis_hash(&self) -> Hash {
        self.blocks[0].hash()
    }

    /// Watch the head; the value changes on every append and reorg.
    pub fn subscribe(&self) -> watch::Receiver<HeadInfo> {
        self.head_tx.subscribe()
    }

    pub fn block_at(&self, height: u64) -> Option<Arc<Block>> {
        self.blocks.get(height as usize).cloned()
    }

    /// Whether `hash` is on the canonical chain.
    pub fn contains(&self, hash: &Hash) -> bool {
        self.index.contains_key(hash)
    }

    /// Up to `limit` canonical blocks starting at `from_height`.
    pub fn blocks_from(&self, from_height: u64, limit: usize) -> Vec<Block> {
        self.blocks
            .iter()
            .skip(from_height as usize)
            .take(limit)
            .map(|b| Block::clone(b))
            .collect()
    }

    pub fn blocks(&self) -> &[Arc<Block>] {
        &self.blocks
    }

    /// Ledger at the head.
    pub fn ledger(&self) -> &AccountLedger {
        &self.ledger
    }

    pub fn balance_of(&self, address: &Address) -> u64 {
        self.ledger.balance_of(address)
    }

    pub fn nonce_of(&self, address: &Address) -> u64 {
        self.ledger.nonce_of(address)
    }

    pub fn state(&self) -> ChainState {
        self.state
    }

    pub fn set_state(&mut self, state: ChainState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "chain state changed");
            self.state = state;
        }
    }

    /// Validate `tx` against the head ledger.
    pub fn validate_transaction(&self, tx: &Transaction) -> Result<()> {
        Ok(TransactionValidator::validate_transaction(tx, &self.ledger)?)
    }

    /// Replay the whole chain from genesis and compare with the head ledger.
    pub fn verify(&self) -> Result<AccountLedger> {
        let replayed = BlockValidator::new(&self.params).verify_chain(&self.blocks)?;
        if replayed != self.ledger {
            return Err(ChainError::StorageCorruption(
                "replayed ledger differs from the live one".into(),
            ));
        }
        Ok(replayed)
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Extend the chain with a block whose parent is the current head.
    pub fn append(&mut self, block: Block) -> Result<HeadInfo> {
        let hash = block.hash();
        if self.contains(&hash) {
            return Err(ChainError::KnownBlock(hash));
        }

        let ledger = BlockValidator::new(&self.params).execute_block(&block, self.head(), &self.ledger)?;
        self.store.append_block(&block)?;

        let block = Arc::new(block);
        self.index.insert(hash, block.height());
        self.blocks.push(block);
        self.ledger = ledger;

        let head = self.publish_head();
        info!(height = head.height, hash = %head.hash.short(), "appended block");
        Ok(head)
    }

    /// Copy what [`ChainSnapshot::evaluate`] needs.
    pub fn snapshot(&self) -> ChainSnapshot {
        ChainSnapshot {
            params: self.params.clone(),
            blocks: self.blocks.clone(),
            ledger: self.ledger.clone(),
        }
    }

    /// Switch to a candidate evaluated against an earlier snapshot.
    ///
    /// Fails with [`ChainError::StaleCandidate`] if the head changed since
    /// the snapshot was taken; the caller may evaluate again.
    pub fn adopt(&mut self, candidate: Candidate) -> Result<ReorgOutcome> {
        let old_head = self.head().hash();
        if old_head != candidate.base_head {
            return Err(ChainError::StaleCandidate);
        }
        let old_height = self.height();
        let new_height = candidate.height();
        if new_height <= old_height {
            return Err(ChainError::NotLonger {
                candidate: new_height,
                current: old_height,
            });
        }

        let fork_height = candidate.fork_height;
        self.store.replace_suffix(fork_height, &candidate.blocks)?;

        let discarded = self.blocks.split_off(fork_height as usize + 1);
        for block in &discarded {
            self.index.remove(&block.hash());
        }
        for block in &candidate.blocks {
            self.index.insert(block.hash(), block.height());
        }
        self.blocks.extend(candidate.blocks);
        self.ledger = candidate.ledger;

        let resurrected = self.resurrect(fork_height, &discarded);
        self.publish_head();

        if discarded.is_empty() {
            info!(old_height, new_height, "extended chain from peer");
        } else {
            info!(
                fork_height,
                old_height,
                new_height,
                discarded = discarded.len(),
                resurrected = resurrected.len(),
                "chain reorganized"
            );
        }

        Ok(ReorgOutcome {
            fork_height,
            old_height,
            new_height,
            discarded,
            resurrected,
        })
    }

    /// Evaluate and adopt `candidate` in one call.
    ///
    /// Holds `&mut self` throughout; the network path uses the two phases
    /// separately instead.
    pub fn consider_alternative_chain(&mut self, candidate: Vec<Block>) -> Result<ReorgOutcome> {
        self.set_state(ChainState::ReorgEvaluating);
        let result = self
            .snapshot()
            .evaluate(candidate)
            .and_then(|c| self.adopt(c));
        self.set_state(ChainState::Synced);
        result
    }

    /// Transfers of the discarded blocks that the new chain did not include
    /// and that still apply, in order, on top of the new head.
    fn resurrect(&self, fork_height: u64, discarded: &[Arc<Block>]) -> Vec<Transaction> {
        let included: HashSet<Hash> = self
            .blocks
            .iter()
            .skip(fork_height as usize + 1)
            .flat_map(|b| b.transactions.iter().map(Transaction::hash))
            .collect();

        let mut scratch = self.ledger.clone();
        let mut resurrected = Vec::new();
        for tx in discarded
            .iter()
            .flat_map(|b| b.transactions.iter())
            .filter(|tx| !tx.is_coinbase())
        {
            if included.contains(&tx.hash()) {
                continue;
            }
            if TransactionValidator::validate_transaction(tx, &scratch).is_ok() {
                scratch.apply_transaction(tx);
                resurrected.push(tx.clone());
            }
        }
        resurrected
    }

    fn publish_head(&self) -> HeadInfo {
        let head = HeadInfo {
            height: self.height(),
            hash: self.head().hash(),
        };
        self.head_tx.send_replace(head);
        head
    }

    /// Get blockchain statistics.
    pub fn stats(&self) -> BlockchainStats {
        BlockchainStats::collect(&self.params, &self.blocks, &self.ledger, self.state)
    }
}

/// Blockchain statistics.
#[derive(Debug, Clone)]
pub struct BlockchainStats {
    /// Current chain height.
    pub height: u64,
    /// Hash of the latest block.
    pub head_hash: Hash,
    /// Timestamp of the latest block.
    pub head_timestamp: u64,
    pub genesis_hash: Hash,
    pub difficulty: u32,
    /// Transactions in all blocks, coinbases included.
    pub total_transactions: usize,
    /// Addresses with a ledger entry.
    pub accounts: usize,
    pub total_supply: u64,
    pub state: ChainState,
}

impl BlockchainStats {
    /// Summarize `blocks` and the `ledger` at their head.
    ///
    /// `blocks` must be non-empty and start at genesis.
    pub fn collect<B: Borrow<Block>>(
        params: &ConsensusParams,
        blocks: &[B],
        ledger: &AccountLedger,
        state: ChainState,
    ) -> Self {
        let head = blocks.last().map(|b| b.borrow());
        BlockchainStats {
            height: head.map_or(0, Block::height),
            head_hash: head.map_or(Hash::ZERO, Block::hash),
            head_timestamp: head.map_or(0, |b| b.header.timestamp),
            genesis_hash: params.genesis_hash(),
            difficulty: params.difficulty,
            total_transactions: blocks.iter().map(|b| b.borrow().tx_count()).sum(),
            accounts: ledger.accounts().count(),
            total_supply: ledger.total_supply(),
            state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qbit_consensus::{block_reward, ProofOfWork};
    use qbit_core::Keypair;

    fn params(alice: &Keypair) -> ConsensusParams {
        ConsensusParams::testing(vec![(alice.address(), 100)])
    }

    fn mine(params: &ConsensusParams, parent: &Block, miner: Address, txs: Vec<Transaction>) -> Block {
        let height = parent.height() + 1;
        let fees: u64 = txs.iter().map(|tx| tx.fee).sum();
        let mut all = vec![Transaction::coinbase(miner, block_reward(height) + fees, height)];
        all.extend(txs);
        let mut block = Block::new(height, parent.hash(), all, params.difficulty);
        block.header.timestamp = parent.header.timestamp + 1;
        assert!(ProofOfWork::new(params).solve(&mut block, 100_000).unwrap());
        block
    }

    fn branch(params: &ConsensusParams, from: &Block, miner: Address, len: usize) -> Vec<Block> {
        let mut blocks: Vec<Block> = Vec::with_capacity(len);
        for _ in 0..len {
            let parent = blocks.last().unwrap_or(from);
            let next = mine(params, parent, miner, vec![]);
            blocks.push(next);
        }
        blocks
    }

    #[test]
    fn test_open_initializes_genesis() {
        let alice = Keypair::generate();
        let chain = Blockchain::in_memory(params(&alice)).unwrap();

        assert_eq!(chain.height(), 0);
        assert_eq!(chain.genesis_hash(), params(&alice).genesis_hash());
        assert_eq!(chain.balance_of(&alice.address()), 100);
        assert_eq!(chain.state(), ChainState::Synced);
    }

    #[test]
    fn test_append_publishes_head() {
        let alice = Keypair::generate();
        let params = params(&alice);
        let mut chain = Blockchain::in_memory(params.clone()).unwrap();
        let mut head_rx = chain.subscribe();

        let block = mine(&params, chain.head(), Address([9; 20]), vec![]);
        let head = chain.append(block.clone()).unwrap();

        assert!(head_rx.has_changed().unwrap());
        assert_eq!(*head_rx.borrow_and_update(), head);
        assert_eq!(chain.head_info(), head);
        assert_eq!(head.height, 1);
        assert!(chain.contains(&block.hash()));
        assert!(matches!(chain.append(block), Err(ChainError::KnownBlock(_))));
    }

    #[test]
    fn test_append_rejects_invalid_without_side_effects() {
        let alice = Keypair::generate();
        let params = params(&alice);
        let mut chain = Blockchain::in_memory(params.clone()).unwrap();

        let mut block = mine(&params, chain.head(), Address([9; 20]), vec![]);
        block.header.prev_hash = Hash([7; 32]);
        assert!(chain.append(block).is_err());
        assert_eq!(chain.height(), 0);
        assert_eq!(chain.balance_of(&Address([9; 20])), 0);
    }

    #[test]
    fn test_longer_fork_replaces_and_resurrects() {
        let alice = Keypair::generate();
        let bob = Address([0xB0; 20]);
        let params = params(&alice);
        let mut chain = Blockchain::in_memory(params.clone()).unwrap();
        let genesis = Block::clone(chain.head());

        let transfer = Transaction::transfer(&alice, bob, 30, 1, 1).signed(&alice);
        let ours = mine(&params, &genesis, Address([1; 20]), vec![transfer.clone()]);
        chain.append(ours.clone()).unwrap();
        assert_eq!(chain.balance_of(&bob), 30);

        let theirs = branch(&params, &genesis, Address([2; 20]), 2);
        let outcome = chain.consider_alternative_chain(theirs.clone()).unwrap();

        assert_eq!(outcome.fork_height, 0);
        assert_eq!(outcome.old_height, 1);
        assert_eq!(outcome.new_height, 2);
        assert_eq!(outcome.discarded.len(), 1);
        assert_eq!(*outcome.discarded[0], ours);
        assert_eq!(outcome.resurrected, vec![transfer]);

        assert_eq!(chain.head().hash(), theirs[1].hash());
        assert!(!chain.contains(&ours.hash()));
        assert_eq!(chain.balance_of(&bob), 0);
        assert_eq!(chain.balance_of(&alice.address()), 100);
        assert_eq!(chain.state(), ChainState::Synced);
    }

    #[test]
    fn test_equal_length_fork_ignored() {
        let alice = Keypair::generate();
        let params = params(&alice);
        let mut chain = Blockchain::in_memory(params.clone()).unwrap();
        let genesis = Block::clone(chain.head());

        let ours = branch(&params, &genesis, Address([1; 20]), 2);
        for block in ours.clone() {
            chain.append(block).unwrap();
        }
        let theirs = branch(&params, &genesis, Address([2; 20]), 2);

        assert!(matches!(
            chain.consider_alternative_chain(theirs),
            Err(ChainError::NotLonger { candidate: 2, current: 2 })
        ));
        assert_eq!(chain.head().hash(), ours[1].hash());
    }

    #[test]
    fn test_candidate_must_link() {
        let alice = Keypair::generate();
        let params = params(&alice);
        let mut chain = Blockchain::in_memory(params.clone()).unwrap();
        let genesis = Block::clone(chain.head());

        let theirs = branch(&params, &genesis, Address([2; 20]), 3);
        // Only the tail was sent; its parent is unknown to us.
        assert!(matches!(
            chain.consider_alternative_chain(theirs[1..].to_vec()),
            Err(ChainError::ForkBelowCandidate(2))
        ));
        assert!(matches!(
            chain.consider_alternative_chain(vec![]),
            Err(ChainError::EmptyCandidate)
        ));
        assert!(matches!(
            chain.consider_alternative_chain(vec![theirs[0].clone(), theirs[2].clone()]),
            Err(ChainError::NonContiguous(2))
        ));
    }

    #[test]
    fn test_heights_near_max_are_not_contiguous() {
        let alice = Keypair::generate();
        let chain = Blockchain::in_memory(params(&alice)).unwrap();
        let snapshot = chain.snapshot();

        let top = Block::new(u64::MAX, Hash([1; 32]), vec![], 2);
        let wrapped = Block::new(0, top.hash(), vec![], 2);
        assert!(matches!(
            snapshot.evaluate(vec![top.clone(), wrapped]),
            Err(ChainError::NonContiguous(u64::MAX))
        ));
        assert!(matches!(
            snapshot.evaluate(vec![top]),
            Err(ChainError::ForkBelowCandidate(u64::MAX))
        ));
    }

    #[test]
    fn test_stats_track_head() {
        let alice = Keypair::generate();
        let params = params(&alice);
        let mut chain = Blockchain::in_memory(params.clone()).unwrap();
        let transfer = Transaction::transfer(&alice, Address([0xB0; 20]), 30, 1, 1).signed(&alice);
        let block = mine(&params, chain.head(), Address([9; 20]), vec![transfer]);
        chain.append(block.clone()).unwrap();

        let stats = chain.stats();
        assert_eq!(stats.height, 1);
        assert_eq!(stats.head_hash, block.hash());
        assert_eq!(stats.genesis_hash, params.genesis_hash());
        assert_eq!(stats.total_transactions, 3);
        assert_eq!(stats.accounts, 3);
        assert_eq!(stats.total_supply, 100 + block_reward(1));
        assert_eq!(stats.state, ChainState::Synced);

        let stored: Vec<Block> = chain.blocks().iter().map(|b| Block::clone(b)).collect();
        let replayed = AccountLedger::rebuild_from(&stored, 1);
        let offline = BlockchainStats::collect(&params, &stored, &replayed, ChainState::Synced);
        assert_eq!(offline.head_hash, stats.head_hash);
        assert_eq!(offline.total_supply, stats.total_supply);
    }

    #[test]
    fn test_foreign_genesis_rejected() {
        let alice = Keypair::generate();
        let params = params(&alice);
        let mut chain = Blockchain::in_memory(params.clone()).unwrap();

        let foreign = ConsensusParams::testing(vec![(Address([5; 20]), 1_000)]);
        let foreign_genesis = foreign.genesis_block();
        let mut candidate = vec![foreign_genesis.clone()];
        candidate.extend(branch(&foreign, &foreign_genesis, Address([5; 20]), 3));

        assert!(matches!(
            chain.consider_alternative_chain(candidate),
            Err(ChainError::Validation(ValidationError::UnknownGenesis { .. }))
        ));
    }

    #[test]
    fn test_invalid_candidate_reports_height() {
        let alice = Keypair::generate();
        let params = params(&alice);
        let mut chain = Blockchain::in_memory(params.clone()).unwrap();
        let genesis = Block::clone(chain.head());

        let mut theirs = branch(&params, &genesis, Address([2; 20]), 3);
        theirs[2].pow_hash = Hash::ZERO;

        match chain.consider_alternative_chain(theirs) {
            Err(ChainError::InvalidChain(err)) => assert_eq!(err.height, 3),
            other => panic!("unexpected result: {:?}", other.map(|o| o.new_height)),
        }
        assert_eq!(chain.height(), 0);
    }

    #[test]
    fn test_stale_candidate_rejected() {
        let alice = Keypair::generate();
        let params = params(&alice);
        let mut chain = Blockchain::in_memory(params.clone()).unwrap();
        let genesis = Block::clone(chain.head());

        let snapshot = chain.snapshot();
        let theirs = branch(&params, &genesis, Address([2; 20]), 3);
        let candidate = snapshot.evaluate(theirs).unwrap();
        assert_eq!(candidate.fork_height(), 0);
        assert_eq!(candidate.height(), 3);

        chain
            .append(mine(&params, &genesis, Address([1; 20]), vec![]))
            .unwrap();
        assert!(matches!(chain.adopt(candidate), Err(ChainError::StaleCandidate)));
    }

    #[test]
    fn test_reopen_replays_stored_chain() {
        let alice = Keypair::generate();
        let params = params(&alice);
        let storage = Storage::open_temporary().unwrap();
        let tip = {
            let mut chain = Blockchain::open(params.clone(), &storage).unwrap();
            let genesis = Block::clone(chain.head());
            for block in branch(&params, &genesis, Address([1; 20]), 2) {
                chain.append(block).unwrap();
            }
            chain.head().hash()
        };

        let chain = Blockchain::open(params.clone(), &storage).unwrap();
        assert_eq!(chain.height(), 2);
        assert_eq!(chain.head().hash(), tip);
        assert!(chain.verify().is_ok());
    }

    #[test]
    fn test_reopen_with_other_genesis_is_corruption() {
        let alice = Keypair::generate();
        let storage = Storage::open_temporary().unwrap();
        Blockchain::open(params(&alice), &storage).unwrap();

        let other = ConsensusParams::testing(vec![(Address([5; 20]), 1)]);
        assert!(matches!(
            Blockchain::open(other.clone(), &storage),
            Err(ChainError::StorageCorruption(_))
        ));

        let chain = Blockchain::resync(other.clone(), &storage).unwrap();
        assert_eq!(chain.genesis_hash(), other.genesis_hash());
    }
}
