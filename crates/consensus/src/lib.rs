//! Proof-of-work consensus rules for qbit.
//!
//! This crate decides what is admissible on the chain:
//! - Consensus parameters, the genesis block and the reward schedule
//! - Proof-of-work verification against a static difficulty
//! - Transaction validation (signature, address, nonce, balance)
//! - Block validation (linkage, structure, coinbase cap, in-order execution)
//!
//! # Example
//!
//! ```rust,no_run
//! use qbit_consensus::{BlockValidator, ConsensusParams};
//! use qbit_core::Keypair;
//!
//! let alice = Keypair::generate();
//! let params = ConsensusParams::testing(vec![(alice.address(), 100)]);
//! let genesis = params.genesis_block();
//!
//! // Replaying a chain from genesis yields its ledger.
//! let ledger = BlockValidator::new(&params).verify_chain(&[genesis]).unwrap();
//! assert_eq!(ledger.balance_of(&alice.address()), 100);
//! ```

pub mod params;
pub mod pow;
pub mod validator;

// Re-export commonly used types
pub use params::{
    block_reward, ConsensusParams, GenesisAllocation, GenesisConfig, DEFAULT_DIFFICULTY,
    HALVING_INTERVAL, INITIAL_BLOCK_REWARD, MAX_BLOCK_BYTES, MAX_BLOCK_TRANSACTIONS,
};
pub use pow::ProofOfWork;
pub use validator::{BlockValidator, InvalidChain, TransactionValidator, ValidationError};
