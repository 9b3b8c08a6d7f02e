//! CLI commands module.

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use qbit_consensus::ConsensusParams;
use qbit_core::{AccountLedger, Address, Block, COIN};
use qbit_storage::{ChainStore, Storage};
use std::fs;
use std::path::{Path, PathBuf};

mod block;
mod info;
mod init;
mod node;
mod send;
mod validate;
mod wallet;

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new chain
    Init(init::InitArgs),
    /// Wallet management
    Wallet(wallet::WalletArgs),
    /// Show the balance of a wallet or address
    Balance(wallet::BalanceArgs),
    /// Sign a transfer and hand it to a running node
    Send(send::SendArgs),
    /// Run a node, optionally mining
    Node(node::NodeArgs),
    /// Show the state of the stored chain
    Info(info::InfoArgs),
    /// Re-validate the stored chain from genesis
    Validate(validate::ValidateArgs),
    /// Block explorer
    Block(block::BlockArgs),
}

pub fn run(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Init(args) => init::run(args),
        Commands::Wallet(args) => wallet::run(args),
        Commands::Balance(args) => wallet::balance(args),
        Commands::Send(args) => send::run(args),
        Commands::Node(args) => node::run(args),
        Commands::Info(args) => info::run(args),
        Commands::Validate(args) => validate::run(args),
        Commands::Block(args) => block::run(args),
    }
}

// =============================================================================
// Shared Helpers
// =============================================================================

fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("config.json")
}

fn db_path(data_dir: &Path) -> PathBuf {
    data_dir.join("db")
}

/// Consensus parameters written by `qbit init`.
pub(crate) fn load_params(data_dir: &Path) -> Result<ConsensusParams> {
    let path = config_path(data_dir);
    let contents = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}. Did you run 'qbit init'?", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("Invalid config file {}", path.display()))
}

pub(crate) fn open_storage(data_dir: &Path) -> Result<Storage> {
    Storage::open(db_path(data_dir)).with_context(|| {
        "Failed to open storage. Is a node already running on this data directory?"
    })
}

/// The stored chain without proof-of-work re-verification.
///
/// Blocks in the store were validated when they were written, so read-only
/// commands only replay balances. `qbit validate` does the full check.
pub(crate) fn load_blocks(storage: &Storage) -> Result<Vec<Block>> {
    let store = ChainStore::new(storage);
    if !store.is_initialized()? {
        bail!("Chain is not initialized. Run 'qbit init' first.");
    }
    Ok(store.load_chain()?)
}

pub(crate) fn ledger_of(blocks: &[Block]) -> AccountLedger {
    let height = blocks.last().map_or(0, Block::height);
    AccountLedger::rebuild_from(blocks, height)
}

/// Accept either a wallet name or a hex address.
pub(crate) fn resolve_address(data_dir: &Path, input: &str) -> Result<Address> {
    if let Ok(address) = Address::from_hex(input) {
        return Ok(address);
    }
    let wallet = wallet::load(data_dir, input)
        .with_context(|| format!("'{}' is neither an address nor a wallet name", input))?;
    Ok(wallet.address())
}

/// Parse a decimal coin amount such as `1.5` into minor units.
pub(crate) fn parse_amount(input: &str) -> Result<u64> {
    let (whole, fraction) = match input.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (input, ""),
    };
    if fraction.len() > 8 {
        bail!("Amount {} has more than 8 decimal places", input);
    }
    let whole: u64 = if whole.is_empty() {
        0
    } else {
        whole
            .parse()
            .with_context(|| format!("Invalid amount: {}", input))?
    };
    let fraction: u64 = if fraction.is_empty() {
        0
    } else {
        format!("{:0<8}", fraction)
            .parse()
            .with_context(|| format!("Invalid amount: {}", input))?
    };

    whole
        .checked_mul(COIN)
        .and_then(|units| units.checked_add(fraction))
        .with_context(|| format!("Amount {} is too large", input))
}

/// Minor units as a decimal coin amount.
pub(crate) fn format_amount(units: u64) -> String {
    let whole = units / COIN;
    let fraction = units % COIN;
    if fraction == 0 {
        return whole.to_string();
    }
    let fraction = format!("{:08}", fraction);
    format!("{}.{}", whole, fraction.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("30").unwrap(), 30 * COIN);
        assert_eq!(parse_amount("1.5").unwrap(), COIN + COIN / 2);
        assert_eq!(parse_amount("0.00000001").unwrap(), 1);
        assert_eq!(parse_amount(".25").unwrap(), COIN / 4);
        assert!(parse_amount("0.000000001").is_err());
        assert!(parse_amount("abc").is_err());
        assert!(parse_amount("1.-5").is_err());
        assert!(parse_amount("184467440738").is_err());
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(30 * COIN), "30");
        assert_eq!(format_amount(COIN + COIN / 2), "1.5");
        assert_eq!(format_amount(1), "0.00000001");
        assert_eq!(format_amount(0), "0");
    }

    #[test]
    fn test_resolve_address_accepts_hex_or_wallet() {
        let dir = tempfile::tempdir().unwrap();
        let hex = "0x0101010101010101010101010101010101010101";
        assert_eq!(resolve_address(dir.path(), hex).unwrap(), Address([1; 20]));

        let created = wallet::create(dir.path(), "alice").unwrap();
        assert_eq!(
            resolve_address(dir.path(), "alice").unwrap(),
            created.address()
        );
        assert!(resolve_address(dir.path(), "bob").is_err());
    }
}
