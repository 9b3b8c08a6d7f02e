//! Transaction and block validation rules.
//!
//! Validation is pure: it reads a ledger and returns a verdict. Block
//! validation works on a private copy of the ledger that is advanced one
//! transaction at a time, so a transfer may spend funds received earlier in
//! the same block but never funds received later.

use crate::params::{block_reward, ConsensusParams};
use crate::pow::ProofOfWork;
use qbit_core::{AccountLedger, Address, Block, Hash, Transaction, TransactionError};
use std::borrow::Borrow;
use std::collections::HashSet;
use thiserror::Error;

/// Why a transaction or block was rejected.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("transaction signature verification failed")]
    InvalidSignature,

    #[error("public key does not derive sender address {0}")]
    AddressMismatch(Address),

    #[error("transaction nonce mismatch (expected {expected}, got {got})")]
    InvalidNonce { expected: u64, got: u64 },

    #[error("insufficient balance (required {required}, available {available})")]
    InsufficientBalance { required: u64, available: u64 },

    #[error("transaction amount must be positive")]
    ZeroAmount,

    #[error("duplicate transaction {0:?}")]
    DuplicateTransaction(Hash),

    #[error("invalid proof of work: {0}")]
    InvalidProofOfWork(String),

    #[error("block difficulty mismatch (expected {expected}, got {got})")]
    WrongDifficulty { expected: u32, got: u32 },

    #[error("invalid linkage: {0}")]
    InvalidLinkage(String),

    #[error("unknown genesis (expected {expected:?}, got {got:?})")]
    UnknownGenesis { expected: Hash, got: Hash },

    #[error("block merkle root verification failed")]
    InvalidMerkleRoot,

    #[error("invalid coinbase: {0}")]
    InvalidCoinbase(String),

    #[error("too many transactions in block (max {max}, got {got})")]
    TooManyTransactions { max: usize, got: usize },

    #[error("block of {got} bytes exceeds the {max} byte limit")]
    BlockTooLarge { max: u64, got: u64 },

    #[error("block timestamp {got} is earlier than parent timestamp {parent}")]
    TimestampTooEarly { parent: u64, got: u64 },
}

pub type Result<T> = std::result::Result<T, ValidationError>;

/// A stored or received chain failed verification at `height`.
#[derive(Debug, Error)]
#[error("block {height} is invalid: {source}")]
pub struct InvalidChain {
    pub height: u64,
    #[source]
    pub source: ValidationError,
}

/// Transaction validator.
pub struct TransactionValidator;

impl TransactionValidator {
    /// Signature and address derivation. Coinbases are not accepted here.
    pub fn validate_signature(tx: &Transaction) -> Result<()> {
        if tx.is_coinbase() {
            return Err(ValidationError::InvalidCoinbase(
                "coinbase outside of a block".into(),
            ));
        }
        tx.verify().map_err(|e| match e {
            TransactionError::AddressMismatch => ValidationError::AddressMismatch(tx.from),
            TransactionError::MissingSignature | TransactionError::VerificationFailed => {
                ValidationError::InvalidSignature
            }
        })
    }

    /// Check `tx` against the sender's last nonce and balance.
    ///
    /// Callers that track pending transactions pass projected values here
    /// instead of the confirmed ones.
    pub fn validate_against_state(
        tx: &Transaction,
        sender_nonce: u64,
        sender_balance: u64,
    ) -> Result<()> {
        let expected = sender_nonce.saturating_add(1);
        if tx.nonce != expected {
            return Err(ValidationError::InvalidNonce {
                expected,
                got: tx.nonce,
            });
        }

        let required = tx.total_cost();
        if sender_balance < required {
            return Err(ValidationError::InsufficientBalance {
                required,
                available: sender_balance,
            });
        }

        Ok(())
    }

    /// Full check of a transfer against confirmed state.
    pub fn validate_transaction(tx: &Transaction, ledger: &AccountLedger) -> Result<()> {
        if tx.amount == 0 {
            return Err(ValidationError::ZeroAmount);
        }
        Self::validate_signature(tx)?;
        Self::validate_against_state(tx, ledger.nonce_of(&tx.from), ledger.balance_of(&tx.from))
    }
}

/// Block validator bound to a set of consensus parameters.
pub struct BlockValidator<'a> {
    params: &'a ConsensusParams,
}

impl<'a> BlockValidator<'a> {
    pub fn new(params: &'a ConsensusParams) -> Self {
        Self { params }
    }

    /// The genesis block is accepted only if it is exactly ours.
    pub fn validate_genesis(&self, block: &Block) -> Result<()> {
        let expected = self.params.genesis_hash();
        let got = block.hash();
        if got != expected {
            return Err(ValidationError::UnknownGenesis { expected, got });
        }
        Ok(())
    }

    /// Height, parent hash and timestamp relative to `previous`.
    pub fn validate_linkage(block: &Block, previous: &Block) -> Result<()> {
        let expected_height = previous.height() + 1;
        if block.height() != expected_height {
            return Err(ValidationError::InvalidLinkage(format!(
                "expected height {}, got {}",
                expected_height,
                block.height()
            )));
        }

        let parent_hash = previous.hash();
        if block.header.prev_hash != parent_hash {
            return Err(ValidationError::InvalidLinkage(format!(
                "block {} points to {}, parent is {}",
                block.height(),
                block.header.prev_hash.short(),
                parent_hash.short()
            )));
        }

        if block.header.timestamp < previous.header.timestamp {
            return Err(ValidationError::TimestampTooEarly {
                parent: previous.header.timestamp,
                got: block.header.timestamp,
            });
        }

        Ok(())
    }

    /// Checks that need no ledger: size, merkle root, coinbase placement and
    /// duplicates by id or by `(sender, nonce)`.
    pub fn validate_structure(&self, block: &Block) -> Result<()> {
        let max = self.params.max_block_transactions;
        if block.tx_count() > max {
            return Err(ValidationError::TooManyTransactions {
                max,
                got: block.tx_count(),
            });
        }

        let size = block.encoded_size();
        if size > self.params.max_block_bytes {
            return Err(ValidationError::BlockTooLarge {
                max: self.params.max_block_bytes,
                got: size,
            });
        }

        if !block.verify_merkle_root() {
            return Err(ValidationError::InvalidMerkleRoot);
        }

        let coinbase = block
            .coinbase()
            .ok_or_else(|| ValidationError::InvalidCoinbase("first transaction must be a coinbase".into()))?;
        if coinbase.nonce != block.height() {
            return Err(ValidationError::InvalidCoinbase(format!(
                "coinbase nonce {} does not match height {}",
                coinbase.nonce,
                block.height()
            )));
        }
        if coinbase.fee != 0 || coinbase.to.is_zero() {
            return Err(ValidationError::InvalidCoinbase(
                "coinbase must pay a real address without fee".into(),
            ));
        }

        let mut ids = HashSet::with_capacity(block.tx_count());
        let mut sender_nonces = HashSet::with_capacity(block.tx_count());
        for (index, tx) in block.transactions.iter().enumerate() {
            if index > 0 && tx.is_coinbase() {
                return Err(ValidationError::InvalidCoinbase(format!(
                    "extra coinbase at index {}",
                    index
                )));
            }
            let id = tx.hash();
            if !ids.insert(id) {
                return Err(ValidationError::DuplicateTransaction(id));
            }
            if !tx.is_coinbase() && !sender_nonces.insert((tx.from, tx.nonce)) {
                return Err(ValidationError::DuplicateTransaction(id));
            }
        }

        Ok(())
    }

    /// Validate `block` as the successor of `previous`, where `ledger` is the
    /// state after `previous`.
    pub fn validate_block(&self, block: &Block, previous: &Block, ledger: &AccountLedger) -> Result<()> {
        self.execute_block(block, previous, ledger).map(|_| ())
    }

    /// Like [`BlockValidator::validate_block`], but also returns the ledger
    /// after the block so callers do not apply it twice.
    pub fn execute_block(
        &self,
        block: &Block,
        previous: &Block,
        ledger: &AccountLedger,
    ) -> Result<AccountLedger> {
        Self::validate_linkage(block, previous)?;
        self.validate_structure(block)?;
        ProofOfWork::new(self.params).verify(block)?;

        let mut snapshot = ledger.clone();
        let mut transactions = block.transactions.iter();
        if let Some(coinbase) = transactions.next() {
            let cap = block_reward(block.height()).saturating_add(block.total_fees());
            if coinbase.amount > cap {
                return Err(ValidationError::InvalidCoinbase(format!(
                    "reward {} exceeds cap {}",
                    coinbase.amount, cap
                )));
            }
            snapshot.apply_transaction(coinbase);
        }
        for tx in transactions {
            TransactionValidator::validate_transaction(tx, &snapshot)?;
            snapshot.apply_transaction(tx);
        }
        snapshot.mark_applied(block.height());

        Ok(snapshot)
    }

    /// Replay a whole chain from genesis and return the resulting ledger.
    pub fn verify_chain<B: Borrow<Block>>(
        &self,
        chain: &[B],
    ) -> std::result::Result<AccountLedger, InvalidChain> {
        let mut ledger = AccountLedger::new();
        let mut previous: Option<&Block> = None;

        for (index, entry) in chain.iter().enumerate() {
            let block: &Block = entry.borrow();
            let height = index as u64;
            let at = |source| InvalidChain { height, source };

            match previous {
                None => {
                    self.validate_genesis(block).map_err(at)?;
                    ledger.apply_block(block);
                }
                Some(parent) => {
                    ledger = self.execute_block(block, parent, &ledger).map_err(at)?;
                }
            }
            previous = Some(block);
        }

        Ok(ledger)
    }
}
