//! Initialize chain command.

use super::{config_path, format_amount, open_storage, parse_amount, resolve_address};
use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use qbit_chain::Blockchain;
use qbit_consensus::{ConsensusParams, GenesisAllocation, GenesisConfig, DEFAULT_DIFFICULTY};
use qbit_core::{BlockHeader, PowParams};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Args)]
pub struct InitArgs {
    /// Directory to store blockchain data
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Required leading zero bits of the proof-of-work hash
    #[arg(long, default_value_t = DEFAULT_DIFFICULTY)]
    difficulty: u32,

    /// Genesis credit as <wallet|address>=<amount>, repeatable
    #[arg(short, long = "allocate", value_name = "ACCOUNT=AMOUNT")]
    allocations: Vec<String>,

    /// Use cheap proof-of-work parameters (local test networks only)
    #[arg(long)]
    devnet: bool,
}

pub fn run(args: InitArgs) -> Result<()> {
    println!("{}", "Initializing qbit...".bold().cyan());
    println!();

    let config_file = config_path(&args.data_dir);
    if config_file.exists() {
        bail!(
            "{} already exists; remove the data directory to start over",
            config_file.display()
        );
    }

    fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("Failed to create data directory: {:?}", args.data_dir))?;
    println!("{}  Created data directory", "✓".green().bold());

    let params = build_params(&args.data_dir, &args)?;

    let storage = open_storage(&args.data_dir)?;
    let chain = Blockchain::open(params.clone(), &storage)
        .with_context(|| "Failed to initialize genesis block")?;
    storage.flush()?;

    fs::write(&config_file, serde_json::to_string_pretty(&params)?)?;

    println!("{}  Created genesis block", "✓".green().bold());
    println!("    Hash:       {}", chain.genesis_hash().to_hex().bright_yellow());
    println!("    Difficulty: {}", params.difficulty.to_string().bright_cyan());
    println!(
        "    PoW:        argon2id m={} KiB t={} p={}",
        params.pow.memory_kib, params.pow.iterations, params.pow.lanes
    );
    for allocation in &params.genesis.allocations {
        println!(
            "    Allocation: {} {}",
            allocation.address.to_hex().bright_yellow(),
            format_amount(allocation.amount).bright_cyan()
        );
    }
    println!(
        "{}  Saved config to: {}",
        "✓".green().bold(),
        config_file.display().to_string().bright_black()
    );

    println!();
    println!("{}", "Chain initialized successfully!".green().bold());
    println!();
    println!("Next steps:");
    println!(
        "  • Use {} to create a wallet",
        "qbit wallet new <name>".bright_cyan()
    );
    println!(
        "  • Use {} to start mining",
        "qbit node --mine <wallet>".bright_cyan()
    );
    println!(
        "  • Use {} to explore blocks",
        "qbit block list".bright_cyan()
    );

    Ok(())
}

fn build_params(data_dir: &Path, args: &InitArgs) -> Result<ConsensusParams> {
    let mut allocations = Vec::with_capacity(args.allocations.len());
    for entry in &args.allocations {
        let (account, amount) = entry
            .split_once('=')
            .with_context(|| format!("Allocation must look like ACCOUNT=AMOUNT: {}", entry))?;
        allocations.push(GenesisAllocation {
            address: resolve_address(data_dir, account)?,
            amount: parse_amount(amount)?,
        });
    }

    let mut genesis = GenesisConfig::default();
    genesis.timestamp = BlockHeader::current_timestamp();
    if !allocations.is_empty() {
        genesis.allocations = allocations;
    }

    Ok(ConsensusParams {
        difficulty: args.difficulty,
        pow: if args.devnet {
            PowParams::testing()
        } else {
            PowParams::default()
        },
        genesis,
        ..ConsensusParams::default()
    })
}
