//! SPHINCS+ hash-based signatures and address derivation.
//!
//! Keys and signatures travel as opaque byte strings so that a peer can
//! send us anything; parsing happens at verification time and any failure
//! simply makes the signature invalid.

use crate::hash::hash;
use pqcrypto_sphincsplus::sphincsshake128fsimple as sphincs;
use pqcrypto_traits::sign::{DetachedSignature as _, PublicKey as _, SecretKey as _};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A 20-byte address derived from the public key hash.
pub type AddressBytes = [u8; 20];

/// An account address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Address(pub AddressBytes);

impl Address {
    /// The zero address. Coinbase transactions use it as their sender.
    pub const ZERO: Self = Self([0u8; 20]);

    pub fn from_bytes(bytes: AddressBytes) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &AddressBytes {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Convert to a hex string (with 0x prefix).
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Parse from a hex string (with or without 0x prefix).
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let mut arr = [0u8; 20];
        hex::decode_to_slice(s, &mut arr).map_err(|_| CryptoError::InvalidAddress)?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Errors that can occur during cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid public key length: expected {expected}, got {got}")]
    InvalidPublicKey { expected: usize, got: usize },
    #[error("invalid secret key length: expected {expected}, got {got}")]
    InvalidSecretKey { expected: usize, got: usize },
    #[error("secret key does not belong to public key")]
    KeyMismatch,
    #[error("invalid address format")]
    InvalidAddress,
}

/// A SPHINCS+ public key.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey(pub Vec<u8>);

impl PublicKey {
    /// Expected encoded length.
    pub fn length() -> usize {
        sphincs::public_key_bytes()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Coinbase transactions carry an empty key.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Address is the first 20 bytes of the BLAKE3 hash of the key.
    pub fn to_address(&self) -> Address {
        let digest = hash(&self.0);
        let mut addr = [0u8; 20];
        addr.copy_from_slice(&digest.0[..20]);
        Address(addr)
    }

    /// Check a detached signature over `message`.
    ///
    /// Malformed keys or signatures are reported as `false`, never as an error.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        let Ok(pk) = sphincs::PublicKey::from_bytes(&self.0) else {
            return false;
        };
        let Ok(sig) = sphincs::DetachedSignature::from_bytes(&signature.0) else {
            return false;
        };
        sphincs::verify_detached_signature(&sig, message, &pk).is_ok()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = &self.0[..self.0.len().min(8)];
        write!(f, "PublicKey({})", hex::encode(prefix))
    }
}

/// A detached SPHINCS+ signature (17 088 bytes for SHAKE-128f).
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(pub Vec<u8>);

impl Signature {
    pub fn length() -> usize {
        sphincs::signature_bytes()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = &self.0[..self.0.len().min(8)];
        write!(f, "Signature({}.., {} bytes)", hex::encode(prefix), self.0.len())
    }
}

/// A SPHINCS+ keypair.
#[derive(Clone)]
pub struct Keypair {
    secret: sphincs::SecretKey,
    pub public_key: PublicKey,
}

impl Keypair {
    /// Generate a new keypair from OS entropy.
    pub fn generate() -> Self {
        let (pk, sk) = sphincs::keypair();
        Self {
            secret: sk,
            public_key: PublicKey(pk.as_bytes().to_vec()),
        }
    }

    /// Rebuild a keypair from stored key material.
    ///
    /// A SPHINCS+ secret key ends with the public seed and root, which is
    /// exactly the public key, so the pair is checked for consistency.
    pub fn from_bytes(public: &[u8], secret: &[u8]) -> Result<Self, CryptoError> {
        if public.len() != sphincs::public_key_bytes() {
            return Err(CryptoError::InvalidPublicKey {
                expected: sphincs::public_key_bytes(),
                got: public.len(),
            });
        }
        let sk = sphincs::SecretKey::from_bytes(secret).map_err(|_| {
            CryptoError::InvalidSecretKey {
                expected: sphincs::secret_key_bytes(),
                got: secret.len(),
            }
        })?;
        if !secret.ends_with(public) {
            return Err(CryptoError::KeyMismatch);
        }
        Ok(Self {
            secret: sk,
            public_key: PublicKey(public.to_vec()),
        })
    }

    pub fn secret_key_bytes(&self) -> Vec<u8> {
        self.secret.as_bytes().to_vec()
    }

    pub fn address(&self) -> Address {
        self.public_key.to_address()
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        let sig = sphincs::detached_sign(message, &self.secret);
        Signature(sig.as_bytes().to_vec())
    }

    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        self.public_key.verify(message, signature)
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("address", &self.address())
            .finish()
    }
}
