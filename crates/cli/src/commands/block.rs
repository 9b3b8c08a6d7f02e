//! Block explorer command.

use super::{format_amount, open_storage};
use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use qbit_core::{Block, Hash};
use qbit_storage::ChainStore;
use std::path::PathBuf;

#[derive(Args)]
pub struct BlockArgs {
    #[command(subcommand)]
    command: BlockCommand,
}

#[derive(Subcommand)]
enum BlockCommand {
    /// List recent blocks
    List {
        /// Directory to store blockchain data
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,

        /// Number of blocks to show
        #[arg(short, long, default_value = "10")]
        count: u64,
    },
    /// Show detailed block information
    Show {
        /// Directory to store blockchain data
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,

        /// Block height or hash (hex format)
        block_id: String,
    },
}

pub fn run(args: BlockArgs) -> Result<()> {
    match args.command {
        BlockCommand::List { data_dir, count } => list_blocks(data_dir, count),
        BlockCommand::Show { data_dir, block_id } => show_block(data_dir, block_id),
    }
}

fn list_blocks(data_dir: PathBuf, count: u64) -> Result<()> {
    let storage = open_storage(&data_dir)?;
    let chain = ChainStore::new(&storage);
    if !chain.is_initialized()? {
        bail!("Chain is not initialized. Run 'qbit init' first.");
    }

    println!();
    println!("{}", "Recent Blocks:".bold().cyan());
    println!();

    for block in chain.get_recent_blocks(count)? {
        let coinbase = block
            .coinbase()
            .map(|tx| tx.to.to_hex()[..12].to_string())
            .unwrap_or_default();
        println!(
            "  {} {} {} {}",
            format!("#{}", block.height()).bright_black(),
            block.hash().to_hex()[..16].bright_yellow(),
            format!("({} txs)", block.tx_count()).bright_black(),
            coinbase.bright_black()
        );
    }

    println!();
    Ok(())
}

fn find_block(chain: &ChainStore, block_id: &str) -> Result<Block> {
    // Try parsing as height first, then as hash
    if let Ok(height) = block_id.parse::<u64>() {
        return chain
            .get_block_by_height(height)?
            .with_context(|| format!("No block at height {}", height));
    }

    let hash =
        Hash::from_hex(block_id).with_context(|| format!("Invalid block hash: {}", block_id))?;
    chain
        .get_block_by_hash(&hash)?
        .with_context(|| format!("Block not found: {}", block_id))
}

fn show_block(data_dir: PathBuf, block_id: String) -> Result<()> {
    let storage = open_storage(&data_dir)?;
    let chain = ChainStore::new(&storage);
    let block = find_block(&chain, &block_id)?;
    let header = &block.header;

    println!();
    println!("{}", "Block Information:".bold().cyan());
    println!();
    println!("  Height:       {}", header.height.to_string().bright_cyan());
    println!("  Hash:         {}", block.hash().to_hex().bright_yellow());
    println!("  Parent Hash:  {}", header.prev_hash.to_hex().bright_black());
    println!("  Merkle Root:  {}", header.merkle_root.to_hex().bright_black());
    println!("  PoW Hash:     {}", block.pow_hash.to_hex().bright_black());
    println!(
        "  Timestamp:    {}",
        header.timestamp.to_string().bright_black()
    );
    println!(
        "  Difficulty:   {} bits",
        header.difficulty.to_string().bright_cyan()
    );
    println!("  Nonce:        {}", header.nonce.to_string().bright_black());
    println!(
        "  Fees:         {}",
        format_amount(block.total_fees()).bright_cyan()
    );
    println!(
        "  Transactions: {}",
        block.tx_count().to_string().bright_cyan()
    );
    println!();

    if !block.transactions.is_empty() {
        println!("{}", "Transactions:".bold());
        println!();
        for (i, tx) in block.transactions.iter().enumerate() {
            let from = if tx.is_coinbase() {
                "coinbase".to_string()
            } else {
                tx.from.to_hex()[..12].to_string()
            };
            println!(
                "  {} {} {} → {} {}",
                format!("{}.", i + 1).bright_black(),
                tx.hash().to_hex()[..16].bright_yellow(),
                from.bright_black(),
                tx.to.to_hex()[..12].bright_black(),
                format_amount(tx.amount).bright_cyan()
            );
        }
        println!();
    }

    Ok(())
}
