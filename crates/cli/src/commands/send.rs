//! Transfer command.

use super::{
    format_amount, ledger_of, load_blocks, load_params, open_storage, parse_amount,
    resolve_address, wallet,
};
use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use qbit_consensus::TransactionValidator;
use qbit_core::Transaction;
use qbit_net::DEFAULT_PORT;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Args)]
pub struct SendArgs {
    /// Directory to store blockchain data
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Sending wallet name
    from: String,

    /// Recipient wallet name or address (hex format)
    to: String,

    /// Amount in coins, up to 8 decimal places
    amount: String,

    /// Fee in coins
    #[arg(long, default_value = "0.0001")]
    fee: String,

    /// Nonce to use; read from the stored chain when omitted
    #[arg(long)]
    nonce: Option<u64>,

    /// Node to hand the transaction to
    #[arg(long, default_value_t = format!("127.0.0.1:{}", DEFAULT_PORT))]
    node: String,
}

pub fn run(args: SendArgs) -> Result<()> {
    let keypair = wallet::load(&args.data_dir, &args.from)?;
    let from = keypair.address();
    let to = resolve_address(&args.data_dir, &args.to)?;
    let amount = parse_amount(&args.amount)?;
    let fee = parse_amount(&args.fee)?;
    if amount == 0 {
        bail!("Amount must be positive");
    }
    let params = load_params(&args.data_dir)?;

    let nonce = match args.nonce {
        Some(nonce) => nonce,
        None => {
            // The running node holds the database lock.
            let storage = open_storage(&args.data_dir).with_context(|| {
                "Cannot read the sender's nonce; pass --nonce while the node is running"
            })?;
            let ledger = ledger_of(&load_blocks(&storage)?);
            let account = ledger.account(&from);
            let required = amount.saturating_add(fee);
            if account.balance < required {
                bail!(
                    "Insufficient balance: {} available, {} required",
                    format_amount(account.balance),
                    format_amount(required)
                );
            }
            account.next_nonce()
        }
    };

    let tx = Transaction::transfer(&keypair, to, amount, fee, nonce).signed(&keypair);
    TransactionValidator::validate_signature(&tx).context("Signed transaction does not verify")?;

    println!("{}", "Sending transaction...".bold().cyan());
    println!();
    println!("  From:   {}", from.to_hex().bright_yellow());
    println!("  To:     {}", to.to_hex().bright_yellow());
    println!("  Amount: {}", format_amount(amount).bright_cyan());
    println!("  Fee:    {}", format_amount(fee).bright_cyan());
    println!("  Nonce:  {}", nonce.to_string().bright_cyan());

    let runtime = tokio::runtime::Runtime::new()?;
    runtime
        .block_on(qbit_net::submit_transaction(
            &args.node,
            params.genesis_hash(),
            tx.clone(),
            Duration::from_secs(10),
        ))
        .with_context(|| format!("Failed to submit transaction to {}", args.node))?;

    println!();
    println!(
        "{}  Submitted {} to {}",
        "✓".green().bold(),
        tx.hash().to_hex().bright_yellow(),
        args.node.bright_black()
    );
    println!();

    Ok(())
}
