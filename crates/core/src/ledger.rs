//! Account state derived from the chain.
//!
//! The ledger is a cache: it can always be rebuilt by replaying blocks from
//! genesis. It trusts its input, so blocks must be validated before they are
//! applied here.

use crate::account::Account;
use crate::block::Block;
use crate::crypto::Address;
use crate::transaction::Transaction;
use std::borrow::Borrow;
use std::collections::HashMap;

/// Address → (balance, last nonce) after applying a prefix of the chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountLedger {
    accounts: HashMap<Address, Account>,
    applied_height: Option<u64>,
}

impl AccountLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay `chain[0..=up_to_height]` from scratch.
    ///
    /// Blocks are expected at their height as index; anything past the end of
    /// `chain` is ignored.
    pub fn rebuild_from<B: Borrow<Block>>(chain: &[B], up_to_height: u64) -> Self {
        let mut ledger = Self::new();
        for entry in chain {
            let block: &Block = entry.borrow();
            if block.height() > up_to_height {
                break;
            }
            ledger.apply_block(block);
        }
        ledger
    }

    pub fn balance_of(&self, address: &Address) -> u64 {
        self.accounts.get(address).map(|a| a.balance).unwrap_or(0)
    }

    pub fn nonce_of(&self, address: &Address) -> u64 {
        self.accounts.get(address).map(|a| a.nonce).unwrap_or(0)
    }

    pub fn account(&self, address: &Address) -> Account {
        self.accounts.get(address).copied().unwrap_or_default()
    }

    /// Height of the last block applied, `None` for an empty ledger.
    pub fn applied_height(&self) -> Option<u64> {
        self.applied_height
    }

    pub fn accounts(&self) -> impl Iterator<Item = (&Address, &Account)> {
        self.accounts.iter()
    }

    /// Sum of all balances.
    pub fn total_supply(&self) -> u64 {
        self.accounts
            .values()
            .fold(0u64, |acc, a| acc.saturating_add(a.balance))
    }

    /// Apply one transaction. Coinbases only credit.
    pub fn apply_transaction(&mut self, tx: &Transaction) {
        if !tx.is_coinbase() {
            let sender = self.accounts.entry(tx.from).or_default();
            let debited = sender.debit(tx.total_cost());
            debug_assert!(debited, "applied an unvalidated transaction");
            sender.nonce = tx.nonce;
        }
        self.accounts.entry(tx.to).or_default().credit(tx.amount);
    }

    /// Record that every transaction of the block at `height` has been
    /// applied through [`AccountLedger::apply_transaction`].
    pub fn mark_applied(&mut self, height: u64) {
        self.applied_height = Some(height);
    }

    /// Apply every transaction of `block` in order.
    pub fn apply_block(&mut self, block: &Block) {
        for tx in &block.transactions {
            self.apply_transaction(tx);
        }
        self.applied_height = Some(block.height());
    }
}
