//! Per-address balance and nonce.

use serde::{Deserialize, Serialize};

/// Balance and last used nonce of one address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Spendable balance in minor units.
    pub balance: u64,
    /// Nonce of the last confirmed transfer sent from this address (0 = none).
    pub nonce: u64,
}

impl Account {
    pub fn with_balance(balance: u64) -> Self {
        Self { balance, nonce: 0 }
    }

    pub fn credit(&mut self, amount: u64) {
        self.balance = self.balance.saturating_add(amount);
    }

    /// Subtract balance from the account.
    /// Returns false and leaves the balance untouched if it is insufficient.
    pub fn debit(&mut self, amount: u64) -> bool {
        match self.balance.checked_sub(amount) {
            Some(rest) => {
                self.balance = rest;
                true
            }
            None => false,
        }
    }

    /// The nonce the next transfer from this account must carry.
    pub fn next_nonce(&self) -> u64 {
        self.nonce.saturating_add(1)
    }
}
