//! Proof-of-work checking and single-nonce attempts.

use crate::params::ConsensusParams;
use crate::validator::{Result, ValidationError};
use qbit_core::{meets_target, Block, PowError};

/// Proof-of-work rules bound to one set of consensus parameters.
pub struct ProofOfWork<'a> {
    params: &'a ConsensusParams,
}

impl<'a> ProofOfWork<'a> {
    pub fn new(params: &'a ConsensusParams) -> Self {
        Self { params }
    }

    /// Check the block's difficulty field, recompute its hash and compare
    /// against the target.
    ///
    /// The stored `pow_hash` must equal the recomputed one; a block that lies
    /// about its hash is rejected even if the real hash would have passed.
    pub fn verify(&self, block: &Block) -> Result<()> {
        if block.header.difficulty != self.params.difficulty {
            return Err(ValidationError::WrongDifficulty {
                expected: self.params.difficulty,
                got: block.header.difficulty,
            });
        }

        let computed = block
            .compute_pow_hash(&self.params.pow)
            .map_err(|e| ValidationError::InvalidProofOfWork(e.to_string()))?;
        if computed != block.pow_hash {
            return Err(ValidationError::InvalidProofOfWork(format!(
                "stored hash {} does not match computed {}",
                block.pow_hash.short(),
                computed.short()
            )));
        }
        if !meets_target(&computed, self.params.difficulty) {
            return Err(ValidationError::InvalidProofOfWork(format!(
                "hash {} above target for difficulty {}",
                computed.short(),
                self.params.difficulty
            )));
        }
        Ok(())
    }

    /// Hash the block at its current nonce and store the result.
    /// Returns whether the target is met.
    pub fn attempt(&self, block: &mut Block) -> std::result::Result<bool, PowError> {
        block.header.difficulty = self.params.difficulty;
        block.pow_hash = block.compute_pow_hash(&self.params.pow)?;
        Ok(meets_target(&block.pow_hash, self.params.difficulty))
    }

    /// Try nonces from the current one upward until the target is met.
    ///
    /// Gives up with `false` after `max_attempts` misses. The miner runs its
    /// own cancellable loop; this one is for tooling and tests.
    pub fn solve(&self, block: &mut Block, max_attempts: u64) -> std::result::Result<bool, PowError> {
        for _ in 0..max_attempts {
            if self.attempt(block)? {
                return Ok(true);
            }
            block.header.nonce = block.header.nonce.wrapping_add(1);
        }
        Ok(false)
    }
}
