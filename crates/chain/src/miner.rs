//! Proof-of-work block production.
//!
//! The miner runs on its own OS thread so Argon2 evaluations never stall the
//! async runtime. It only holds the chain lock while building a template and
//! while appending a found block; the search itself works on a private copy.
//!
//! A search is abandoned as soon as either the stop flag is set or the head
//! watch channel reports a change, both checked before every hash.

use crate::blockchain::{Blockchain, HeadInfo, SharedChain};
use crate::mempool::{Mempool, SharedMempool};
use qbit_consensus::{block_reward, ProofOfWork};
use qbit_core::{Address, Block, BlockHeader, Transaction};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Miner configuration.
#[derive(Debug, Clone)]
pub struct MinerConfig {
    /// Receives the block reward and fees.
    pub reward_address: Address,
    /// Nonces tried before the template is rebuilt to pick up new
    /// transactions and a fresh timestamp.
    pub template_refresh: u64,
}

impl MinerConfig {
    pub fn new(reward_address: Address) -> Self {
        Self {
            reward_address,
            template_refresh: 32,
        }
    }
}

/// What the miner is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinerState {
    Idle,
    /// Searching for a block at `height`.
    Mining { height: u64 },
    /// Appended a block at `height`.
    Found { height: u64 },
    /// The last search was abandoned.
    Cancelled,
}

/// Why a search ended without a block.
#[derive(Debug)]
enum Interrupt {
    Stopped,
    HeadChanged,
    Refresh(u64),
}

/// Build a block template on top of the current head.
///
/// Pending transactions are re-validated against the head ledger in
/// mempool priority order. The coinbase claims the subsidy plus fees.
pub fn build_template(chain: &Blockchain, mempool: &Mempool, reward_address: Address) -> Block {
    let params = chain.params();
    let head = chain.head();
    let height = head.height() + 1;

    // Header, coinbase and framing; the coinbase amount has a fixed width.
    let base = Block::new(
        height,
        head.hash(),
        vec![Transaction::coinbase(reward_address, 0, height)],
        params.difficulty,
    )
    .encoded_size();
    let transactions = mempool.select_for_block(
        chain.ledger(),
        params.max_block_transactions.saturating_sub(1),
        params.max_block_bytes.saturating_sub(base),
    );
    let fees = transactions
        .iter()
        .fold(0u64, |acc, tx| acc.saturating_add(tx.fee));

    let mut all = Vec::with_capacity(transactions.len() + 1);
    all.push(Transaction::coinbase(
        reward_address,
        block_reward(height).saturating_add(fees),
        height,
    ));
    all.extend(transactions);

    let mut block = Block::new(height, head.hash(), all, params.difficulty);
    block.header.timestamp = BlockHeader::current_timestamp().max(head.header.timestamp);
    block
}

/// Background miner.
pub struct Miner {
    config: MinerConfig,
    chain: SharedChain,
    mempool: SharedMempool,
    announce: mpsc::UnboundedSender<Block>,
    stop: Arc<AtomicBool>,
    state: watch::Sender<MinerState>,
}

impl Miner {
    pub fn new(
        config: MinerConfig,
        chain: SharedChain,
        mempool: SharedMempool,
        announce: mpsc::UnboundedSender<Block>,
    ) -> Self {
        let (state, _) = watch::channel(MinerState::Idle);
        Self {
            config,
            chain,
            mempool,
            announce,
            stop: Arc::new(AtomicBool::new(false)),
            state,
        }
    }

    /// Start mining on a dedicated thread.
    pub fn spawn(self) -> std::io::Result<MinerHandle> {
        let stop = self.stop.clone();
        let state = self.state.subscribe();
        let thread = std::thread::Builder::new()
            .name("qbit-miner".into())
            .spawn(move || self.run())?;
        Ok(MinerHandle {
            stop,
            state,
            thread: Some(thread),
        })
    }

    fn run(self) {
        info!(reward_address = %self.config.reward_address, "miner started");
        let mut nonce = 0u64;

        while !self.stop.load(Ordering::Relaxed) {
            match self.mine_once(nonce) {
                Ok(Some(block)) => self.submit(block),
                Ok(None) => {}
                Err(Interrupt::Stopped) => break,
                Err(Interrupt::HeadChanged) => {
                    debug!("head changed, abandoning search");
                    self.state.send_replace(MinerState::Cancelled);
                }
                Err(Interrupt::Refresh(next)) => {
                    nonce = next;
                    continue;
                }
            }
            nonce = 0;
        }

        self.state.send_replace(MinerState::Idle);
        info!("miner stopped");
    }

    /// Search one template starting at `start_nonce`.
    fn mine_once(&self, start_nonce: u64) -> Result<Option<Block>, Interrupt> {
        let (mut block, mut head_rx, params) = {
            let chain = self.chain.blocking_read();
            let mempool = self.mempool.blocking_lock();
            let mut head_rx = chain.subscribe();
            head_rx.borrow_and_update();
            let block = build_template(&chain, &mempool, self.config.reward_address);
            (block, head_rx, chain.params().clone())
        };
        block.header.nonce = start_nonce;
        self.state.send_replace(MinerState::Mining {
            height: block.height(),
        });

        self.search(&mut block, &mut head_rx, &ProofOfWork::new(&params))
            .map(|found| found.then_some(block))
    }

    /// Try up to `template_refresh` nonces on `block`.
    ///
    /// `Ok(false)` means the proof-of-work hash itself failed; the error is
    /// logged and a fresh template is tried.
    fn search(
        &self,
        block: &mut Block,
        head_rx: &mut watch::Receiver<HeadInfo>,
        pow: &ProofOfWork<'_>,
    ) -> Result<bool, Interrupt> {
        for _ in 0..self.config.template_refresh {
            if self.stop.load(Ordering::Relaxed) {
                self.state.send_replace(MinerState::Cancelled);
                return Err(Interrupt::Stopped);
            }
            if head_rx.has_changed().unwrap_or(true) {
                return Err(Interrupt::HeadChanged);
            }

            match pow.attempt(block) {
                Ok(true) => return Ok(true),
                Ok(false) => block.header.nonce = block.header.nonce.wrapping_add(1),
                Err(e) => {
                    error!(error = %e, "proof-of-work hash failed");
                    return Ok(false);
                }
            }
        }
        Err(Interrupt::Refresh(block.header.nonce))
    }

    fn submit(&self, block: Block) {
        let height = block.height();
        let hash = block.hash();

        let appended = self.chain.blocking_write().append(block.clone());
        match appended {
            Ok(_) => {
                self.mempool.blocking_lock().remove_included(&block);
                info!(height, hash = %hash.short(), nonce = block.header.nonce, txs = block.tx_count(), "mined block");
                self.state.send_replace(MinerState::Found { height });
                if self.announce.send(block).is_err() {
                    debug!("no listener for mined blocks");
                }
            }
            Err(e) => {
                warn!(height, error = %e, "mined block rejected");
                self.state.send_replace(MinerState::Cancelled);
            }
        }
    }
}

/// Control handle for a running [`Miner`].
pub struct MinerHandle {
    stop: Arc<AtomicBool>,
    state: watch::Receiver<MinerState>,
    thread: Option<JoinHandle<()>>,
}

impl MinerHandle {
    pub fn state(&self) -> MinerState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<MinerState> {
        self.state.clone()
    }

    /// Ask the miner to stop. Takes effect before the next hash.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Stop and wait for the thread to exit.
    ///
    /// Blocks; from async code run it through `spawn_blocking`.
    pub fn shutdown(mut self) {
        self.stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("miner thread panicked");
            }
        }
    }
}

impl Drop for MinerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
