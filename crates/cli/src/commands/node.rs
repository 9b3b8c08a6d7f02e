//! Run a node, optionally with a miner.

use super::{load_params, open_storage, wallet};
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use qbit_chain::{Blockchain, Mempool, Miner, MinerConfig, MinerHandle, MinerState};
use qbit_net::{Node, NodeConfig, DEFAULT_PORT};
use qbit_storage::PeerStore;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

#[derive(Args)]
pub struct NodeArgs {
    /// Directory to store blockchain data
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Interface to listen on
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Peer to connect to at startup (host:port), repeatable
    #[arg(short, long = "seed-peer")]
    seed_peers: Vec<String>,

    /// Maximum number of connected peers
    #[arg(long, default_value_t = 8)]
    max_peers: usize,

    /// Mine blocks paying the reward to this wallet
    #[arg(short, long, value_name = "WALLET")]
    mine: Option<String>,

    /// Discard the stored chain and download it again from peers
    #[arg(long)]
    resync: bool,
}

pub fn run(args: NodeArgs) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run_node(args))
}

async fn run_node(args: NodeArgs) -> Result<()> {
    let params = load_params(&args.data_dir)?;
    let reward_address = match &args.mine {
        Some(name) => Some(wallet::load(&args.data_dir, name)?.address()),
        None => None,
    };

    let storage = open_storage(&args.data_dir)?;
    let chain = if args.resync {
        Blockchain::resync(params, &storage)?
    } else {
        Blockchain::open(params, &storage).with_context(|| {
            "Stored chain failed verification; restart with --resync to download it again"
        })?
    };
    let height = chain.height();
    let genesis = chain.genesis_hash();
    let chain = chain.into_shared();
    let mempool = Arc::new(Mutex::new(Mempool::new()));

    let config = NodeConfig {
        host: args.host,
        port: args.port,
        seed_peers: args.seed_peers,
        max_peers: args.max_peers,
        ..NodeConfig::default()
    };
    let node = Node::bind(
        config,
        chain.clone(),
        mempool.clone(),
        Some(PeerStore::new(&storage)),
    )
    .await?;

    println!("{}", "qbit node running".bold().cyan());
    println!();
    println!("  Listening:  {}", node.local_addr().to_string().bright_yellow());
    println!("  Genesis:    {}", genesis.to_hex().bright_black());
    println!("  Height:     {}", height.to_string().bright_cyan());

    let (miner, handle) = match reward_address {
        Some(address) => {
            let (announce, mined) = mpsc::unbounded_channel();
            let miner = Miner::new(
                MinerConfig::new(address),
                chain.clone(),
                mempool.clone(),
                announce,
            )
            .spawn()
            .context("Failed to start miner thread")?;
            println!("  Mining to:  {}", address.to_hex().bright_yellow());
            (Some(miner), node.spawn(Some(mined)))
        }
        None => (None, node.spawn(None)),
    };
    println!();
    println!("Press {} to stop.", "Ctrl-C".bright_cyan());

    if let Some(miner) = &miner {
        tokio::spawn(report_mining(miner.subscribe()));
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("stop requested");

    if let Some(miner) = miner {
        stop_miner(miner).await;
    }
    handle.shutdown().await;
    storage.flush()?;

    let chain_stats = chain.read().await.stats();
    let mempool_stats = mempool.lock().await.stats();
    info!(
        height = chain_stats.height,
        state = ?chain_stats.state,
        pending = mempool_stats.total_transactions,
        "node stopped"
    );
    println!();
    println!(
        "{}  Stopped at height {}",
        "✓".green().bold(),
        chain_stats.height.to_string().bright_cyan()
    );
    println!("  Head:          {}", chain_stats.head_hash.to_hex().bright_yellow());
    println!(
        "  Accounts:      {}",
        chain_stats.accounts.to_string().bright_cyan()
    );
    println!(
        "  Pending:       {} of {} ({} senders)",
        mempool_stats.total_transactions.to_string().bright_cyan(),
        mempool_stats.capacity,
        mempool_stats.unique_senders
    );
    Ok(())
}

async fn stop_miner(miner: MinerHandle) {
    miner.stop();
    if let Err(e) = tokio::task::spawn_blocking(move || miner.shutdown()).await {
        warn!(error = %e, "miner thread did not shut down cleanly");
    }
}

async fn report_mining(mut state: tokio::sync::watch::Receiver<MinerState>) {
    while state.changed().await.is_ok() {
        let current = *state.borrow_and_update();
        if let MinerState::Found { height } = current {
            println!(
                "{}  Mined block {}",
                "⛏".bright_yellow(),
                height.to_string().bright_cyan()
            );
        }
    }
}
