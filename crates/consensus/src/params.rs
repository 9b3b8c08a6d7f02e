//! Consensus parameters: difficulty, proof-of-work cost, genesis and rewards.
//!
//! Every node on a network must run with identical parameters; the genesis
//! hash derived from them doubles as the network identifier in the handshake.

use qbit_core::{Address, Block, Hash, PowParams, COIN};
use serde::{Deserialize, Serialize};

/// Reward of the first block, before any halving.
pub const INITIAL_BLOCK_REWARD: u64 = 50 * COIN;

/// Blocks between reward halvings.
pub const HALVING_INTERVAL: u64 = 210_000;

/// Default cap on entries per block, coinbase included.
pub const MAX_BLOCK_TRANSACTIONS: usize = 1000;

/// Default cap on a block's encoded size. Kept well under the network frame
/// limit so a single block always fits in one `Blocks` message.
pub const MAX_BLOCK_BYTES: u64 = 24 * 1024 * 1024;

/// Default number of leading zero bits required of a proof-of-work hash.
pub const DEFAULT_DIFFICULTY: u32 = 12;

/// Subsidy minted by the coinbase at `height`, before fees.
pub fn block_reward(height: u64) -> u64 {
    let halvings = height / HALVING_INTERVAL;
    if halvings >= 64 {
        return 0;
    }
    INITIAL_BLOCK_REWARD >> halvings
}

/// One genesis credit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAllocation {
    #[serde(with = "address_hex")]
    pub address: Address,
    pub amount: u64,
}

/// Inputs the genesis block is built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisConfig {
    pub timestamp: u64,
    pub allocations: Vec<GenesisAllocation>,
}

impl Default for GenesisConfig {
    /// A single allocation to an address nobody holds the key for.
    fn default() -> Self {
        let digest = qbit_core::hash(b"qbit genesis");
        let mut burn = [0u8; 20];
        burn.copy_from_slice(&digest.0[..20]);
        Self {
            timestamp: 1_735_689_600,
            allocations: vec![GenesisAllocation {
                address: Address(burn),
                amount: INITIAL_BLOCK_REWARD,
            }],
        }
    }
}

/// Network-wide rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusParams {
    /// Static difficulty in leading zero bits. There is no retargeting.
    pub difficulty: u32,
    pub pow: PowParams,
    pub genesis: GenesisConfig,
    pub max_block_transactions: usize,
    #[serde(default = "default_max_block_bytes")]
    pub max_block_bytes: u64,
}

fn default_max_block_bytes() -> u64 {
    MAX_BLOCK_BYTES
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self {
            difficulty: DEFAULT_DIFFICULTY,
            pow: PowParams::default(),
            genesis: GenesisConfig::default(),
            max_block_transactions: MAX_BLOCK_TRANSACTIONS,
            max_block_bytes: MAX_BLOCK_BYTES,
        }
    }
}

impl ConsensusParams {
    /// Cheap proof-of-work and a low difficulty for tests and local devnets.
    pub fn testing(allocations: Vec<(Address, u64)>) -> Self {
        Self {
            difficulty: 2,
            pow: PowParams::testing(),
            genesis: GenesisConfig {
                timestamp: 1_700_000_000,
                allocations: allocations
                    .into_iter()
                    .map(|(address, amount)| GenesisAllocation { address, amount })
                    .collect(),
            },
            max_block_transactions: MAX_BLOCK_TRANSACTIONS,
            max_block_bytes: MAX_BLOCK_BYTES,
        }
    }

    pub fn genesis_block(&self) -> Block {
        let allocations: Vec<(Address, u64)> = self
            .genesis
            .allocations
            .iter()
            .map(|a| (a.address, a.amount))
            .collect();
        Block::genesis(self.genesis.timestamp, &allocations, self.difficulty)
    }

    pub fn genesis_hash(&self) -> Hash {
        self.genesis_block().hash()
    }
}

mod address_hex {
    use qbit_core::Address;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(address: &Address, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&address.to_hex())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Address, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Address::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_reward_halving() {
        assert_eq!(block_reward(0), 50 * COIN);
        assert_eq!(block_reward(HALVING_INTERVAL - 1), 50 * COIN);
        assert_eq!(block_reward(HALVING_INTERVAL), 25 * COIN);
        assert_eq!(block_reward(HALVING_INTERVAL * 2), 25 * COIN / 2);
        assert_eq!(block_reward(HALVING_INTERVAL * 64), 0);
    }

    #[test]
    fn test_genesis_is_deterministic() {
        let a = ConsensusParams::default();
        let b = ConsensusParams::default();
        assert_eq!(a.genesis_hash(), b.genesis_hash());

        let other = ConsensusParams::testing(vec![(Address([1; 20]), 100)]);
        assert_ne!(a.genesis_hash(), other.genesis_hash());
    }

    #[test]
    fn test_params_json_roundtrip() {
        let params = ConsensusParams::testing(vec![(Address([0xAB; 20]), 100)]);
        let json = serde_json::to_string_pretty(&params).unwrap();
        assert!(json.contains("0xabababab"));

        let parsed: ConsensusParams = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, params);
        assert_eq!(parsed.genesis_hash(), params.genesis_hash());
    }

    #[test]
    fn test_config_without_block_bytes_gets_default() {
        let mut json: serde_json::Value =
            serde_json::to_value(ConsensusParams::testing(vec![])).unwrap();
        json.as_object_mut().unwrap().remove("max_block_bytes");

        let parsed: ConsensusParams = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.max_block_bytes, MAX_BLOCK_BYTES);
    }
}
