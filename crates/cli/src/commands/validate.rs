//! Full chain re-validation.

use super::{load_blocks, load_params, open_storage};
use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;
use qbit_consensus::BlockValidator;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Args)]
pub struct ValidateArgs {
    /// Directory to store blockchain data
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,
}

/// Replay every stored block from genesis, proof-of-work included.
pub fn run(args: ValidateArgs) -> Result<()> {
    let params = load_params(&args.data_dir)?;
    let storage = open_storage(&args.data_dir)?;
    let blocks = load_blocks(&storage)?;

    println!(
        "{} {} blocks...",
        "Validating".bold().cyan(),
        blocks.len().to_string().bright_cyan()
    );
    let started = Instant::now();

    let ledger = match BlockValidator::new(&params).verify_chain(&blocks) {
        Ok(ledger) => ledger,
        Err(e) => {
            println!("{}  {}", "✗".red().bold(), e);
            bail!("Stored chain is invalid; run 'qbit node --resync' to download it again");
        }
    };

    println!(
        "{}  Chain valid ({:.1?})",
        "✓".green().bold(),
        started.elapsed()
    );
    if let Some(head) = blocks.last() {
        println!("    Height:       {}", head.height().to_string().bright_cyan());
        println!("    Head:         {}", head.hash().to_hex().bright_yellow());
    }
    println!(
        "    Accounts:     {}",
        ledger.accounts().count().to_string().bright_cyan()
    );
    println!(
        "    Total Supply: {}",
        super::format_amount(ledger.total_supply()).bright_cyan()
    );
    Ok(())
}
