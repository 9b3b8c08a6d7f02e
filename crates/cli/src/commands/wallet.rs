//! Wallet management and balance lookup.

use super::{format_amount, ledger_of, load_blocks, open_storage, resolve_address};
use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use qbit_core::{Address, Keypair};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Args)]
pub struct WalletArgs {
    #[command(subcommand)]
    command: WalletCommand,
}

#[derive(Subcommand)]
enum WalletCommand {
    /// Generate a new keypair
    New {
        /// Directory to store blockchain data
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,

        /// Wallet name
        name: String,
    },
    /// List all wallets
    List {
        /// Directory to store blockchain data
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,
    },
    /// Show a wallet's address and public key
    Show {
        /// Directory to store blockchain data
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,

        /// Wallet name
        name: String,
    },
}

#[derive(Args)]
pub struct BalanceArgs {
    /// Directory to store blockchain data
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Wallet name or address (hex format)
    account: String,
}

/// On-disk wallet file.
#[derive(Serialize, Deserialize)]
struct WalletFile {
    address: String,
    public_key: String,
    secret_key: String,
}

pub fn run(args: WalletArgs) -> Result<()> {
    match args.command {
        WalletCommand::New { data_dir, name } => new_wallet(data_dir, name),
        WalletCommand::List { data_dir } => list_wallets(data_dir),
        WalletCommand::Show { data_dir, name } => show_wallet(data_dir, name),
    }
}

fn wallets_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("wallets")
}

fn wallet_path(data_dir: &Path, name: &str) -> PathBuf {
    wallets_dir(data_dir).join(format!("{}.json", name))
}

/// Generate a keypair and write it to `wallets/<name>.json`.
pub(crate) fn create(data_dir: &Path, name: &str) -> Result<Keypair> {
    if name.is_empty() || name.contains(|c: char| matches!(c, '/' | '\\' | '.')) {
        bail!("Invalid wallet name: {}", name);
    }
    let path = wallet_path(data_dir, name);
    if path.exists() {
        bail!("Wallet {} already exists at {}", name, path.display());
    }

    let keypair = Keypair::generate();
    let file = WalletFile {
        address: keypair.address().to_hex(),
        public_key: hex::encode(keypair.public_key.as_bytes()),
        secret_key: hex::encode(keypair.secret_key_bytes()),
    };

    fs::create_dir_all(wallets_dir(data_dir))?;
    fs::write(&path, serde_json::to_string_pretty(&file)?)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(keypair)
}

/// Read `wallets/<name>.json` back into a keypair.
pub(crate) fn load(data_dir: &Path, name: &str) -> Result<Keypair> {
    let path = wallet_path(data_dir, name);
    if !path.exists() {
        bail!(
            "Wallet file not found: {}. Use 'qbit wallet new' to create one.",
            path.display()
        );
    }

    let contents = fs::read_to_string(&path)?;
    let file: WalletFile = serde_json::from_str(&contents)
        .with_context(|| format!("Invalid wallet file {}", path.display()))?;

    let public = hex::decode(&file.public_key).context("Invalid public key hex")?;
    let secret = hex::decode(&file.secret_key).context("Invalid secret key hex")?;
    let keypair = Keypair::from_bytes(&public, &secret)
        .with_context(|| format!("Failed to load keypair from {}", path.display()))?;

    let recorded = Address::from_hex(&file.address).context("Invalid address in wallet file")?;
    if recorded != keypair.address() {
        bail!("Wallet {} address does not match its public key", name);
    }
    Ok(keypair)
}

fn new_wallet(data_dir: PathBuf, name: String) -> Result<()> {
    let keypair = create(&data_dir, &name)?;

    println!("{}", "Generated new wallet:".bold().cyan());
    println!();
    println!("  Name:        {}", name.bright_white());
    println!("  Address:     {}", keypair.address().to_hex().bright_yellow());
    println!(
        "  Public Key:  {}…",
        hex::encode(&keypair.public_key.as_bytes()[..16]).bright_black()
    );
    println!();
    println!(
        "{}  Saved to: {}",
        "✓".green().bold(),
        wallet_path(&data_dir, &name).display().to_string().bright_black()
    );
    println!();
    println!("{}", "Keep your secret key safe!".yellow().bold());

    Ok(())
}

fn list_wallets(data_dir: PathBuf) -> Result<()> {
    let dir = wallets_dir(&data_dir);

    if !dir.exists() {
        println!("{}", "No wallets found.".yellow());
        println!(
            "Use {} to create a new wallet.",
            "qbit wallet new <name>".bright_cyan()
        );
        return Ok(());
    }

    println!("{}", "Saved Wallets:".bold().cyan());
    println!();

    let mut entries: Vec<PathBuf> = fs::read_dir(&dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().and_then(|s| s.to_str()) == Some("json"))
        .collect();
    entries.sort();

    let mut count = 0;
    for path in entries {
        let contents = fs::read_to_string(&path)?;
        let Ok(file) = serde_json::from_str::<WalletFile>(&contents) else {
            continue;
        };
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        count += 1;
        println!(
            "  {} {}",
            format!("{}:", name).bright_black(),
            file.address.bright_yellow()
        );
    }

    if count == 0 {
        println!("  {}", "No wallets found.".yellow());
    }

    println!();
    Ok(())
}

fn show_wallet(data_dir: PathBuf, name: String) -> Result<()> {
    let keypair = load(&data_dir, &name)?;

    println!();
    println!("{}", "Wallet:".bold().cyan());
    println!();
    println!("  Name:        {}", name.bright_white());
    println!("  Address:     {}", keypair.address().to_hex().bright_yellow());
    println!(
        "  Public Key:  {} bytes, {}…",
        keypair.public_key.as_bytes().len(),
        hex::encode(&keypair.public_key.as_bytes()[..16]).bright_black()
    );
    println!();

    Ok(())
}

pub fn balance(args: BalanceArgs) -> Result<()> {
    let address = resolve_address(&args.data_dir, &args.account)?;
    let storage = open_storage(&args.data_dir)?;
    let blocks = load_blocks(&storage)?;
    let ledger = ledger_of(&blocks);
    let account = ledger.account(&address);

    println!();
    println!("  Address: {}", address.to_hex().bright_yellow());
    println!("  Balance: {}", format_amount(account.balance).bright_cyan());
    println!("  Nonce:   {}", account.nonce.to_string().bright_cyan());
    println!(
        "  Height:  {}",
        blocks.len().saturating_sub(1).to_string().bright_black()
    );
    println!();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let created = create(dir.path(), "alice").unwrap();
        let loaded = load(dir.path(), "alice").unwrap();

        assert_eq!(created.address(), loaded.address());
        assert_eq!(created.secret_key_bytes(), loaded.secret_key_bytes());
        assert!(create(dir.path(), "alice").is_err());
    }

    #[test]
    fn test_wallet_names_stay_inside_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(create(dir.path(), "../escape").is_err());
        assert!(create(dir.path(), "").is_err());
    }

    #[test]
    fn test_tampered_wallet_rejected() {
        let dir = tempfile::tempdir().unwrap();
        create(dir.path(), "alice").unwrap();

        let path = wallet_path(dir.path(), "alice");
        let mut file: WalletFile =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        file.address = Address([9; 20]).to_hex();
        fs::write(&path, serde_json::to_string(&file).unwrap()).unwrap();

        assert!(load(dir.path(), "alice").is_err());
    }
}
