//! Transfers and coinbase rewards.

use crate::crypto::{Address, Keypair, PublicKey, Signature};
use crate::hash::{hash, Hash};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during transaction operations.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("public key does not derive the sender address")]
    AddressMismatch,
    #[error("signature verification failed")]
    VerificationFailed,
    #[error("missing signature")]
    MissingSignature,
}

/// A value transfer between two accounts.
///
/// A coinbase is the special case with `from == Address::ZERO`, no key and no
/// signature; its nonce is the height of the block that mints it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub from: Address,
    pub to: Address,
    /// Amount credited to `to`, in minor units.
    pub amount: u64,
    /// Fee paid by `from` on top of `amount`.
    pub fee: u64,
    /// Sender's sequence number; the first transfer of an account uses 1.
    pub nonce: u64,
    pub public_key: PublicKey,
    pub signature: Signature,
}

/// Everything the signature covers.
#[derive(Serialize)]
struct SigningPayload<'a> {
    from: &'a Address,
    to: &'a Address,
    amount: u64,
    fee: u64,
    nonce: u64,
    public_key: &'a PublicKey,
}

impl Transaction {
    /// Create an unsigned transfer from the keypair's address.
    pub fn transfer(keypair: &Keypair, to: Address, amount: u64, fee: u64, nonce: u64) -> Self {
        Self {
            from: keypair.address(),
            to,
            amount,
            fee,
            nonce,
            public_key: keypair.public_key.clone(),
            signature: Signature::default(),
        }
    }

    /// Create the reward transaction for the block at `height`.
    pub fn coinbase(to: Address, amount: u64, height: u64) -> Self {
        Self {
            from: Address::ZERO,
            to,
            amount,
            fee: 0,
            nonce: height,
            public_key: PublicKey::default(),
            signature: Signature::default(),
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.from.is_zero()
    }

    /// Hash of every field except the signature. This is what gets signed.
    pub fn signing_hash(&self) -> Hash {
        let payload = SigningPayload {
            from: &self.from,
            to: &self.to,
            amount: self.amount,
            fee: self.fee,
            nonce: self.nonce,
            public_key: &self.public_key,
        };
        let encoded = bincode::serialize(&payload).expect("serialization should not fail");
        hash(&encoded)
    }

    /// Transaction id: hash of the full encoding including the signature.
    pub fn hash(&self) -> Hash {
        let encoded = bincode::serialize(self).expect("serialization should not fail");
        hash(&encoded)
    }

    pub fn sign(&mut self, keypair: &Keypair) {
        let digest = self.signing_hash();
        self.signature = keypair.sign(digest.as_bytes());
    }

    /// Builder-style [`Transaction::sign`].
    pub fn signed(mut self, keypair: &Keypair) -> Self {
        self.sign(keypair);
        self
    }

    /// Check that the embedded key owns `from` and signed this payload.
    pub fn verify(&self) -> Result<(), TransactionError> {
        if self.signature.is_empty() {
            return Err(TransactionError::MissingSignature);
        }
        if self.public_key.to_address() != self.from {
            return Err(TransactionError::AddressMismatch);
        }
        if !self
            .public_key
            .verify(self.signing_hash().as_bytes(), &self.signature)
        {
            return Err(TransactionError::VerificationFailed);
        }
        Ok(())
    }

    /// Bytes this transaction adds to an encoded block.
    pub fn encoded_size(&self) -> u64 {
        bincode::serialized_size(self).expect("serialization should not fail")
    }

    /// What the sender's balance must cover.
    pub fn total_cost(&self) -> u64 {
        self.amount.saturating_add(self.fee)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let keypair = Keypair::generate();
        let to = Address::from_bytes([2u8; 20]);
        let tx = Transaction::transfer(&keypair, to, 30, 1, 1).signed(&keypair);

        assert!(!tx.is_coinbase());
        assert!(tx.verify().is_ok());
        assert_eq!(tx.total_cost(), 31);
    }

    #[test]
    fn test_unsigned_transaction_fails() {
        let keypair = Keypair::generate();
        let tx = Transaction::transfer(&keypair, Address::ZERO, 1, 0, 1);
        assert!(matches!(tx.verify(), Err(TransactionError::MissingSignature)));
    }

    #[test]
    fn test_tampered_amount_fails() {
        let keypair = Keypair::generate();
        let to = Address::from_bytes([2u8; 20]);
        let mut tx = Transaction::transfer(&keypair, to, 30, 1, 1).signed(&keypair);

        tx.amount = 3000;
        assert!(matches!(
            tx.verify(),
            Err(TransactionError::VerificationFailed)
        ));
    }

    #[test]
    fn test_foreign_key_fails_address_check() {
        let owner = Keypair::generate();
        let thief = Keypair::generate();
        let to = Address::from_bytes([2u8; 20]);

        // Signed correctly by the thief, but claims the owner's address.
        let mut tx = Transaction::transfer(&thief, to, 30, 1, 1);
        tx.from = owner.address();
        tx.sign(&thief);

        assert!(matches!(tx.verify(), Err(TransactionError::AddressMismatch)));
    }

    #[test]
    fn test_coinbase() {
        let miner = Address::from_bytes([7u8; 20]);
        let cb = Transaction::coinbase(miner, 50, 12);
        assert!(cb.is_coinbase());
        assert_eq!(cb.nonce, 12);
        assert_ne!(cb.hash(), Transaction::coinbase(miner, 50, 13).hash());
    }

    #[test]
    fn test_signing_hash_excludes_signature() {
        let keypair = Keypair::generate();
        let to = Address::from_bytes([2u8; 20]);
        let unsigned = Transaction::transfer(&keypair, to, 5, 1, 1);
        let signed = unsigned.clone().signed(&keypair);

        assert_eq!(unsigned.signing_hash(), signed.signing_hash());
        assert_ne!(unsigned.hash(), signed.hash());
    }

    #[test]
    fn test_bincode_roundtrip_keeps_verdict() {
        let keypair = Keypair::generate();
        let to = Address::from_bytes([2u8; 20]);
        let tx = Transaction::transfer(&keypair, to, 5, 1, 1).signed(&keypair);

        let bytes = bincode::serialize(&tx).unwrap();
        let decoded: Transaction = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.hash(), tx.hash());
        assert!(decoded.verify().is_ok());
    }
}
