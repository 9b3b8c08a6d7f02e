//! Chain summary command.

use super::{format_amount, ledger_of, load_blocks, load_params, open_storage, resolve_address};
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use qbit_chain::{BlockchainStats, ChainState};
use qbit_consensus::block_reward;
use qbit_storage::PeerStore;
use std::path::PathBuf;

#[derive(Args)]
pub struct InfoArgs {
    /// Directory to store blockchain data
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Also show balances of these wallets or addresses
    accounts: Vec<String>,
}

pub fn run(args: InfoArgs) -> Result<()> {
    let params = load_params(&args.data_dir)?;
    let storage = open_storage(&args.data_dir)?;
    let blocks = load_blocks(&storage)?;
    let ledger = ledger_of(&blocks);
    let peers = PeerStore::new(&storage).load()?;

    if blocks.is_empty() {
        anyhow::bail!("Stored chain is empty");
    }
    // Offline, nothing is being downloaded.
    let stats = BlockchainStats::collect(&params, &blocks, &ledger, ChainState::Synced);
    let timestamp = chrono::DateTime::from_timestamp(stats.head_timestamp as i64, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| stats.head_timestamp.to_string());

    println!();
    println!("{}", "Chain Information:".bold().cyan());
    println!();
    println!("  Height:        {}", stats.height.to_string().bright_cyan());
    println!("  Head:          {}", stats.head_hash.to_hex().bright_yellow());
    println!("  Head Time:     {}", timestamp.bright_black());
    println!("  Genesis:       {}", stats.genesis_hash.to_hex().bright_black());
    println!("  Difficulty:    {} bits", stats.difficulty.to_string().bright_cyan());
    println!(
        "  Next Reward:   {}",
        format_amount(block_reward(stats.height.saturating_add(1))).bright_cyan()
    );
    println!(
        "  Transactions:  {}",
        stats.total_transactions.to_string().bright_cyan()
    );
    println!("  Accounts:      {}", stats.accounts.to_string().bright_cyan());
    println!(
        "  Total Supply:  {}",
        format_amount(stats.total_supply).bright_cyan()
    );
    println!("  Known Peers:   {}", peers.len().to_string().bright_cyan());

    if !args.accounts.is_empty() {
        println!();
        println!("{}", "Balances:".bold());
        println!();
        for input in &args.accounts {
            let address = resolve_address(&args.data_dir, input)?;
            let account = ledger.account(&address);
            println!(
                "  {} {} (nonce {})",
                address.to_hex().bright_yellow(),
                format_amount(account.balance).bright_cyan(),
                account.nonce
            );
        }
    }

    println!();
    Ok(())
}
