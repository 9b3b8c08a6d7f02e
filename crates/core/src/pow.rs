//! Memory-hard proof-of-work hash (Argon2id) and difficulty targets.

use crate::hash::Hash;
use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fixed salt. Argon2 needs at least 8 bytes and every node must use the same.
const POW_SALT: &[u8] = b"qbit-proof-of-work-v1";

/// Errors from the proof-of-work hash.
#[derive(Debug, Error)]
pub enum PowError {
    #[error("invalid argon2 parameters: {0}")]
    InvalidParams(String),
    #[error("argon2 hashing failed: {0}")]
    Hashing(String),
}

/// Argon2id cost parameters. Part of consensus: all nodes must agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Number of passes over memory.
    pub iterations: u32,
    /// Degree of parallelism.
    pub lanes: u32,
}

impl PowParams {
    /// Smallest parameters argon2 accepts. Only for tests and local devnets.
    pub fn testing() -> Self {
        Self {
            memory_kib: 8,
            iterations: 1,
            lanes: 1,
        }
    }

    fn argon2(&self) -> Result<Argon2<'static>, PowError> {
        let params = Params::new(self.memory_kib, self.iterations, self.lanes, Some(32))
            .map_err(|e| PowError::InvalidParams(e.to_string()))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }

    /// Reject parameter sets argon2 would refuse, before they reach consensus code.
    pub fn validate(&self) -> Result<(), PowError> {
        self.argon2().map(|_| ())
    }
}

impl Default for PowParams {
    fn default() -> Self {
        Self {
            memory_kib: 102_400,
            iterations: 2,
            lanes: 8,
        }
    }
}

/// Argon2id digest of `data`. Deterministic for identical input and params.
pub fn pow_hash(data: &[u8], params: &PowParams) -> Result<Hash, PowError> {
    let mut out = [0u8; 32];
    params
        .argon2()?
        .hash_password_into(data, POW_SALT, &mut out)
        .map_err(|e| PowError::Hashing(e.to_string()))?;
    Ok(Hash(out))
}

/// The 256-bit target for `difficulty` leading zero bits, big-endian.
///
/// Difficulty 0 accepts every hash; 256 or more only the zero hash.
pub fn difficulty_to_target(difficulty: u32) -> Hash {
    if difficulty >= 256 {
        return Hash::ZERO;
    }
    let mut target = [0xFFu8; 32];
    let full_bytes = (difficulty / 8) as usize;
    for byte in target.iter_mut().take(full_bytes) {
        *byte = 0;
    }
    let rem = difficulty % 8;
    if rem > 0 {
        target[full_bytes] = 0xFF >> rem;
    }
    Hash(target)
}

/// Whether `hash`, read as a big-endian integer, is at or below the target.
pub fn meets_target(hash: &Hash, difficulty: u32) -> bool {
    *hash <= difficulty_to_target(difficulty)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pow_hash_deterministic() {
        let params = PowParams::testing();
        let a = pow_hash(b"header bytes", &params).unwrap();
        let b = pow_hash(b"header bytes", &params).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, pow_hash(b"header bytez", &params).unwrap());
    }

    #[test]
    fn test_pow_hash_depends_on_params() {
        let cheap = PowParams::testing();
        let other = PowParams {
            iterations: 2,
            ..cheap
        };
        assert_ne!(
            pow_hash(b"data", &cheap).unwrap(),
            pow_hash(b"data", &other).unwrap()
        );
    }

    #[test]
    fn test_invalid_params_rejected() {
        let params = PowParams {
            memory_kib: 1,
            iterations: 1,
            lanes: 1,
        };
        assert!(params.validate().is_err());
        assert!(matches!(
            pow_hash(b"data", &params),
            Err(PowError::InvalidParams(_))
        ));
        assert!(PowParams::default().validate().is_ok());
    }

    #[test]
    fn test_difficulty_to_target() {
        assert_eq!(difficulty_to_target(0), Hash([0xFF; 32]));
        assert_eq!(difficulty_to_target(256), Hash::ZERO);

        let t = difficulty_to_target(12);
        assert_eq!(t.0[0], 0x00);
        assert_eq!(t.0[1], 0x0F);
        assert_eq!(t.0[2], 0xFF);
        assert_eq!(t.leading_zero_bits(), 12);
    }

    #[test]
    fn test_meets_target_is_numeric() {
        let mut bytes = [0xFFu8; 32];
        bytes[0] = 0x00;
        bytes[1] = 0x0F;
        let at_target = Hash(bytes);
        assert!(meets_target(&at_target, 12));

        bytes[1] = 0x10;
        bytes[2] = 0x00;
        assert!(!meets_target(&Hash(bytes), 12));

        assert!(meets_target(&Hash([0xFF; 32]), 0));
        assert!(meets_target(&Hash::ZERO, 255));
    }
}
