//! The peer-to-peer node.
//!
//! Every connection runs in its own task: a reader loop that dispatches
//! messages and a writer task fed through an unbounded channel, so a slow
//! peer never blocks the node. Shared state lives in [`Shared`] behind
//! separate locks. They are taken one at a time, except `chain` before
//! `mempool` where a ledger is needed for admission.
//!
//! Chain replacement never validates under the chain lock. Candidates are
//! evaluated against a snapshot on the blocking pool and only the final swap
//! takes the write lock.

use crate::config::NodeConfig;
use crate::error::{NetError, Result};
use crate::orphan::OrphanPool;
use crate::peer::{
    PeerId, PeerInfo, PeerTable, INVALID_BLOCK_PENALTY, INVALID_SIGNATURE_PENALTY,
    UNFULFILLED_SYNC_PENALTY,
};
use crate::protocol::{fit_batch, read_message, write_message, Message};
use qbit_chain::{ChainError, ChainState, MempoolError, ReorgOutcome, SharedChain, SharedMempool};
use qbit_consensus::ValidationError;
use qbit_core::{meets_target, Block, Hash, Transaction};
use qbit_storage::PeerStore;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Times a candidate is re-evaluated after the head moved underneath it.
const MAX_ADOPT_ATTEMPTS: usize = 3;

/// Addresses accepted from a single `Peers` message.
const MAX_GOSSIPED_ADDRESSES: usize = 64;

/// A peer that has not been heard from for this many ping intervals is
/// dropped.
const IDLE_PING_INTERVALS: u32 = 3;

/// An in-flight download from one peer.
#[derive(Debug)]
struct SyncSession {
    peer: PeerId,
    target_height: u64,
    from_height: u64,
    blocks: Vec<Block>,
    last_activity: Instant,
}

/// State shared by all node tasks.
struct Shared {
    config: NodeConfig,
    node_id: u64,
    genesis: Hash,
    /// Port advertised in `Hello`.
    listen_port: u16,
    /// Our own `host:port`, never dialed.
    advertised: String,
    chain: SharedChain,
    mempool: SharedMempool,
    peers: Mutex<PeerTable>,
    orphans: Mutex<OrphanPool>,
    sync: Mutex<Option<SyncSession>>,
    peer_store: Option<PeerStore>,
    shutdown: watch::Sender<bool>,
}

/// A bound, not yet running node.
pub struct Node {
    shared: Arc<Shared>,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Node {
    /// Bind the listening socket and load known peers.
    pub async fn bind(
        config: NodeConfig,
        chain: SharedChain,
        mempool: SharedMempool,
        peer_store: Option<PeerStore>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(config.listen_addr()).await?;
        let local_addr = listener.local_addr()?;

        let known = match &peer_store {
            Some(store) => store.load()?,
            None => Vec::new(),
        };
        let mut peers = PeerTable::new(config.max_peers, config.ban_threshold, known);
        for seed in &config.seed_peers {
            peers.learn(seed.clone());
        }

        let genesis = chain.read().await.genesis_hash();
        let (shutdown, _) = watch::channel(false);
        let orphans = OrphanPool::new(config.max_orphans);

        info!(addr = %local_addr, genesis = %genesis.short(), "listening for peers");
        Ok(Self {
            shared: Arc::new(Shared {
                node_id: rand::random(),
                genesis,
                listen_port: local_addr.port(),
                advertised: format!("{}:{}", config.host, local_addr.port()),
                config,
                chain,
                mempool,
                peers: Mutex::new(peers),
                orphans: Mutex::new(orphans),
                sync: Mutex::new(None),
                peer_store,
                shutdown,
            }),
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Start accepting peers, dial the seeds and run maintenance.
    ///
    /// Blocks found by a local miner arrive on `mined` and are announced.
    pub fn spawn(self, mined: Option<mpsc::UnboundedReceiver<Block>>) -> NodeHandle {
        let shared = self.shared;
        let mut tasks = vec![
            tokio::spawn(accept_loop(shared.clone(), self.listener)),
            tokio::spawn(maintenance_loop(shared.clone())),
        ];
        if let Some(mined) = mined {
            tasks.push(tokio::spawn(announce_mined(shared.clone(), mined)));
        }

        for seed in shared.config.seed_peers.clone() {
            shared.dial(seed);
        }

        NodeHandle {
            shared,
            local_addr: self.local_addr,
            tasks,
        }
    }
}

/// Control surface of a running node.
pub struct NodeHandle {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl NodeHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn chain(&self) -> SharedChain {
        self.shared.chain.clone()
    }

    pub fn mempool(&self) -> SharedMempool {
        self.shared.mempool.clone()
    }

    /// Dial `address` and wait until the TCP connection is up.
    pub async fn connect(&self, address: &str) -> Result<()> {
        let stream = tokio::time::timeout(
            self.shared.config.connect_timeout,
            TcpStream::connect(address),
        )
        .await
        .map_err(|_| NetError::PeerTimeout(address.to_string()))??;
        tokio::spawn(run_connection(
            self.shared.clone(),
            stream,
            true,
            Some(address.to_string()),
        ));
        Ok(())
    }

    /// Admit a local transaction and gossip it.
    pub async fn submit_transaction(&self, tx: Transaction) -> Result<Hash> {
        let hash = self.shared.admit(tx.clone()).await?;
        let reached = self
            .shared
            .peers
            .lock()
            .await
            .broadcast(&Message::NewTransaction { tx }, None);
        info!(tx = %hash.short(), peers = reached, "transaction submitted");
        Ok(hash)
    }

    /// Peers that completed the handshake.
    pub async fn peer_count(&self) -> usize {
        let peers = self.shared.peers.lock().await;
        peers
            .ids()
            .into_iter()
            .filter(|id| peers.get(*id).is_some_and(PeerInfo::is_handshaked))
            .count()
    }

    pub async fn chain_state(&self) -> ChainState {
        self.shared.chain.read().await.state()
    }

    pub async fn save_peers(&self) -> Result<()> {
        self.shared.save_peers().await
    }

    /// Disconnect everyone, persist the address book and stop all tasks.
    pub async fn shutdown(self) {
        info!("shutting down node");
        self.shared.shutdown.send_replace(true);
        if let Err(e) = self.shared.save_peers().await {
            warn!(error = %e, "failed to save peers");
        }
        for task in self.tasks {
            task.abort();
        }
    }
}

/// Send one transaction to a running node and hang up.
///
/// Used by the CLI while the node holds the database lock. The node must
/// answer our `Hello` with the same genesis.
pub async fn submit_transaction(
    address: &str,
    genesis: Hash,
    tx: Transaction,
    timeout: Duration,
) -> Result<()> {
    let exchange = async {
        let mut stream = TcpStream::connect(address).await?;
        let hello = Message::Hello {
            height: 0,
            genesis,
            listen_port: 0,
            node_id: rand::random(),
        };
        write_message(&mut stream, &hello).await?;

        match read_message(&mut stream).await? {
            Message::Hello { genesis: theirs, .. } if theirs == genesis => {}
            Message::Hello { genesis: theirs, .. } => {
                return Err(NetError::UnknownGenesis {
                    expected: genesis,
                    got: theirs,
                })
            }
            other => {
                return Err(NetError::Handshake(format!(
                    "expected hello, got {}",
                    other.kind()
                )))
            }
        }

        write_message(&mut stream, &Message::NewTransaction { tx }).await?;
        stream.shutdown().await?;
        Ok(())
    };

    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| NetError::PeerTimeout(address.to_string()))?
}

// =============================================================================
// Background Tasks
// =============================================================================

async fn accept_loop(shared: Arc<Shared>, listener: TcpListener) {
    let mut shutdown = shared.shutdown.subscribe();
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    debug!(peer = %addr, "inbound connection");
                    tokio::spawn(run_connection(shared.clone(), stream, false, None));
                }
                Err(e) => warn!(error = %e, "accept failed"),
            },
        }
    }
}

async fn maintenance_loop(shared: Arc<Shared>) {
    let mut shutdown = shared.shutdown.subscribe();
    let mut ticker = tokio::time::interval(shared.config.maintenance_interval);
    let mut last_save = Instant::now();
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => shared.maintain(&mut last_save).await,
        }
    }
}

async fn announce_mined(shared: Arc<Shared>, mut mined: mpsc::UnboundedReceiver<Block>) {
    while let Some(block) = mined.recv().await {
        // The miner appended it already; a reorg may have removed it since.
        if !shared.chain.read().await.contains(&block.hash()) {
            continue;
        }
        let height = block.height();
        let reached = shared
            .peers
            .lock()
            .await
            .broadcast(&Message::NewBlock { block }, None);
        debug!(height, peers = reached, "announced mined block");
        shared.resolve_orphans().await;
    }
}

async fn run_connection(
    shared: Arc<Shared>,
    stream: TcpStream,
    outbound: bool,
    dialed: Option<String>,
) {
    let addr = match stream.peer_addr() {
        Ok(addr) => addr,
        Err(e) => {
            debug!(error = %e, "connection closed before setup");
            return;
        }
    };
    let (mut reader, mut writer) = stream.into_split();
    let (sender, mut outgoing) = mpsc::unbounded_channel::<Message>();
    let disconnect = Arc::new(Notify::new());

    let registered = shared.peers.lock().await.register(
        addr,
        outbound,
        dialed,
        sender.clone(),
        disconnect.clone(),
    );
    let Some(id) = registered else {
        debug!(peer = %addr, "peer table full, dropping connection");
        return;
    };

    let writer_disconnect = disconnect.clone();
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outgoing.recv().await {
            if let Err(e) = write_message(&mut writer, &message).await {
                warn!(peer = %addr, kind = message.kind(), error = %e, "write failed");
                writer_disconnect.notify_one();
                break;
            }
        }
    });

    let _ = sender.send(shared.hello().await);
    drop(sender);

    let mut shutdown = shared.shutdown.subscribe();
    if !*shutdown.borrow() {
        loop {
            tokio::select! {
                _ = disconnect.notified() => break,
                _ = shutdown.changed() => break,
                read = read_message(&mut reader) => match read {
                    Ok(message) => {
                        if let Err(e) = shared.handle_message(id, message).await {
                            warn!(peer = %addr, error = %e, "dropping peer");
                            break;
                        }
                    }
                    Err(NetError::Io(e)) => {
                        debug!(peer = %addr, error = %e, "connection closed");
                        break;
                    }
                    Err(e) => {
                        warn!(peer = %addr, error = %e, "dropping peer");
                        break;
                    }
                },
            }
        }
    }

    shared.peers.lock().await.remove(id);
    writer_task.abort();
    shared.on_peer_gone(id).await;
    debug!(peer = %addr, "peer disconnected");
}

// =============================================================================
// Message Handling
// =============================================================================

impl Shared {
    async fn hello(&self) -> Message {
        Message::Hello {
            height: self.chain.read().await.height(),
            genesis: self.genesis,
            listen_port: self.listen_port,
            node_id: self.node_id,
        }
    }

    fn dial(self: &Arc<Self>, address: String) {
        let shared = self.clone();
        tokio::spawn(async move {
            let connect = TcpStream::connect(address.as_str());
            match tokio::time::timeout(shared.config.connect_timeout, connect).await {
                Ok(Ok(stream)) => run_connection(shared, stream, true, Some(address)).await,
                Ok(Err(e)) => debug!(peer = %address, error = %e, "dial failed"),
                Err(_) => debug!(peer = %address, "dial timed out"),
            }
        });
    }

    /// Dispatch one message. An error disconnects the peer.
    async fn handle_message(self: &Arc<Self>, id: PeerId, message: Message) -> Result<()> {
        let handshaked = {
            let mut peers = self.peers.lock().await;
            peers.record_seen(id);
            peers.get(id).is_some_and(PeerInfo::is_handshaked)
        };

        match message {
            Message::Hello { .. } if handshaked => {
                Err(NetError::Handshake("repeated hello".into()))
            }
            Message::Hello {
                height,
                genesis,
                listen_port,
                node_id,
            } => self.on_hello(id, height, genesis, listen_port, node_id).await,
            other if !handshaked => Err(NetError::Handshake(format!(
                "{} before hello",
                other.kind()
            ))),
            Message::GetBlocks { from_height } => {
                let blocks = self
                    .chain
                    .read()
                    .await
                    .blocks_from(from_height, self.config.sync_batch_size);
                let blocks = fit_batch(blocks, self.config.max_batch_bytes);
                self.peers.lock().await.send(id, Message::Blocks { blocks });
                Ok(())
            }
            Message::Blocks { blocks } => self.on_blocks(id, blocks).await,
            Message::NewTransaction { tx } => {
                self.on_new_transaction(id, tx).await;
                Ok(())
            }
            Message::NewBlock { block } => {
                self.on_new_block(id, block).await;
                Ok(())
            }
            Message::GetPeers => {
                let peers = self.peers.lock().await;
                let addresses = peers.listen_addresses(Some(id));
                peers.send(id, Message::Peers { peers: addresses });
                Ok(())
            }
            Message::Peers { peers: addresses } => {
                let mut peers = self.peers.lock().await;
                for address in addresses.into_iter().take(MAX_GOSSIPED_ADDRESSES) {
                    if address != self.advertised && address.parse::<SocketAddr>().is_ok() {
                        peers.learn(address);
                    }
                }
                Ok(())
            }
            Message::Ping => {
                self.peers.lock().await.send(id, Message::Pong);
                Ok(())
            }
            Message::Pong => Ok(()),
        }
    }

    async fn on_hello(
        self: &Arc<Self>,
        id: PeerId,
        height: u64,
        genesis: Hash,
        listen_port: u16,
        node_id: u64,
    ) -> Result<()> {
        if genesis != self.genesis {
            return Err(NetError::UnknownGenesis {
                expected: self.genesis,
                got: genesis,
            });
        }

        {
            let mut peers = self.peers.lock().await;
            let Some(peer) = peers.get(id) else {
                return Ok(());
            };
            if node_id == self.node_id {
                if let Some(address) = peer.listen_addr.clone() {
                    peers.forget(&address);
                }
                return Err(NetError::Handshake("connected to ourselves".into()));
            }
            let listen_addr = (listen_port != 0).then(|| format!("{}:{}", peer.addr.ip(), listen_port));
            peers
                .complete_handshake(id, node_id, listen_addr, height)
                .map_err(|refusal| NetError::Handshake(format!("{:?}", refusal)))?;
        }

        let ours = self.chain.read().await.height();
        info!(peer = id, height, ours, "handshake complete");
        if height > ours {
            self.start_sync(id, height, ours).await;
        }
        Ok(())
    }

    async fn on_new_transaction(&self, id: PeerId, tx: Transaction) {
        match self.admit(tx.clone()).await {
            Ok(hash) => {
                debug!(tx = %hash.short(), peer = id, "relaying transaction");
                self.peers
                    .lock()
                    .await
                    .broadcast(&Message::NewTransaction { tx }, Some(id));
            }
            Err(NetError::Mempool(MempoolError::DuplicateTransaction(_))) => {}
            Err(NetError::Mempool(MempoolError::Rejected(
                e @ (ValidationError::InvalidSignature | ValidationError::AddressMismatch(_)),
            ))) => {
                warn!(peer = id, error = %e, "peer sent a forged transaction");
                self.peers.lock().await.penalize(id, INVALID_SIGNATURE_PENALTY);
            }
            Err(e) => debug!(peer = id, error = %e, "transaction not admitted"),
        }
    }

    async fn on_new_block(self: &Arc<Self>, id: PeerId, block: Block) {
        let hash = block.hash();
        let (height, head, difficulty) = {
            let chain = self.chain.read().await;
            if chain.contains(&hash) {
                return;
            }
            (chain.height(), chain.head().hash(), chain.params().difficulty)
        };

        // The claimed hash only; full verification happens on adoption.
        if block.header.difficulty != difficulty || !meets_target(&block.pow_hash, difficulty) {
            warn!(peer = id, hash = %hash.short(), "announced block misses the target");
            self.peers.lock().await.penalize(id, INVALID_BLOCK_PENALTY);
            return;
        }
        self.peers.lock().await.update_height(id, block.height());

        if self.orphans.lock().await.contains(&hash) {
            return;
        }

        if block.header.prev_hash == head {
            match self.evaluate_and_adopt(vec![block], Some(id)).await {
                Ok(_) => self.resolve_orphans().await,
                Err(e) => self.punish_invalid(Some(id), &e).await,
            }
        } else if block.height() > height {
            let block_height = block.height();
            self.orphans.lock().await.insert(block, Some(id));
            debug!(height = block_height, hash = %hash.short(), "parked orphan block");
            self.start_sync(id, block_height, height).await;
        } else {
            debug!(height = block.height(), hash = %hash.short(), "ignoring block below our head");
        }
    }

    // =========================================================================
    // Synchronization
    // =========================================================================

    /// Begin downloading from `peer`. Only one session runs at a time.
    async fn start_sync(&self, peer: PeerId, target_height: u64, from_height: u64) -> bool {
        {
            let mut sync = self.sync.lock().await;
            if sync.is_some() {
                return false;
            }
            *sync = Some(SyncSession {
                peer,
                target_height,
                from_height,
                blocks: Vec::new(),
                last_activity: Instant::now(),
            });
        }
        self.chain.write().await.set_state(ChainState::Syncing);
        self.peers
            .lock()
            .await
            .send(peer, Message::GetBlocks { from_height });
        info!(peer, from_height, target_height, "syncing");
        true
    }

    async fn on_blocks(self: &Arc<Self>, id: PeerId, blocks: Vec<Block>) -> Result<()> {
        let finished = {
            let mut sync = self.sync.lock().await;
            let Some(session) = sync.as_mut().filter(|s| s.peer == id) else {
                debug!(peer = id, count = blocks.len(), "ignoring unsolicited blocks");
                return Ok(());
            };

            let expected = session
                .blocks
                .last()
                .map_or(session.from_height, |b| b.height() + 1);
            if blocks.first().is_some_and(|b| b.height() != expected) {
                *sync = None;
                drop(sync);
                self.settle_state().await;
                return Err(NetError::MalformedMessage(format!(
                    "blocks batch does not start at height {}",
                    expected
                )));
            }

            let batch = blocks.len();
            session.last_activity = Instant::now();
            session.blocks.extend(blocks);
            let reached = session.blocks.last().map_or(0, Block::height);

            if batch > 0 && reached < session.target_height {
                self.peers.lock().await.send(
                    id,
                    Message::GetBlocks {
                        from_height: reached + 1,
                    },
                );
                None
            } else {
                sync.take()
            }
        };

        if let Some(session) = finished {
            self.finish_sync(session).await;
        }
        Ok(())
    }

    async fn finish_sync(self: &Arc<Self>, session: SyncSession) {
        let SyncSession {
            peer,
            target_height,
            from_height,
            blocks,
            ..
        } = session;

        {
            let mut peers = self.peers.lock().await;
            match blocks.last() {
                Some(top) => peers.set_height(peer, top.height()),
                None => {
                    warn!(peer, claimed = target_height, from_height, "peer served no blocks");
                    peers.set_height(peer, from_height.saturating_sub(1));
                    if target_height >= from_height {
                        peers.penalize(peer, UNFULFILLED_SYNC_PENALTY);
                    }
                }
            }
        }

        if !blocks.is_empty() {
            match self.evaluate_and_adopt(blocks, Some(peer)).await {
                Ok(outcome) => {
                    info!(peer, height = outcome.new_height, "sync complete");
                }
                Err(NetError::Chain(ChainError::ForkBelowCandidate(_))) if from_height > 0 => {
                    let from = from_height / 2;
                    debug!(peer, from, "fork is deeper, requesting earlier blocks");
                    self.start_sync(peer, target_height, from).await;
                    return;
                }
                Err(e) => self.punish_invalid(Some(peer), &e).await,
            }
        }

        self.resolve_orphans().await;
        let height = self.chain.read().await.height();
        let dropped = self
            .orphans
            .lock()
            .await
            .record_failed_attempt(self.config.max_orphan_attempts, height);
        for (hash, height) in dropped {
            let err = NetError::OrphanGapUnresolved { hash, height };
            debug!(error = %err, "dropped orphan");
        }
        self.settle_state().await;
    }

    /// Validate `blocks` off the lock and switch to them if they win.
    async fn evaluate_and_adopt(
        self: &Arc<Self>,
        blocks: Vec<Block>,
        origin: Option<PeerId>,
    ) -> Result<ReorgOutcome> {
        let mut result = Err(NetError::Chain(ChainError::StaleCandidate));

        for _ in 0..MAX_ADOPT_ATTEMPTS {
            let snapshot = {
                let mut chain = self.chain.write().await;
                chain.set_state(ChainState::ReorgEvaluating);
                chain.snapshot()
            };

            let candidate_blocks = blocks.clone();
            let evaluated = tokio::task::spawn_blocking(move || snapshot.evaluate(candidate_blocks))
                .await
                .map_err(|e| NetError::Task(e.to_string()))?;
            let candidate = match evaluated {
                Ok(candidate) => candidate,
                Err(e) => {
                    result = Err(e.into());
                    break;
                }
            };

            let adopted = self.chain.write().await.adopt(candidate);
            match adopted {
                Ok(outcome) => {
                    result = Ok(outcome);
                    break;
                }
                Err(ChainError::StaleCandidate) => {
                    debug!("head moved during evaluation, retrying");
                }
                Err(e) => {
                    result = Err(e.into());
                    break;
                }
            }
        }

        self.settle_state().await;
        if let Ok(outcome) = &result {
            self.after_chain_change(outcome, origin).await;
        }
        result
    }

    /// Reconcile the mempool with a new head and announce it.
    async fn after_chain_change(&self, outcome: &ReorgOutcome, origin: Option<PeerId>) {
        let head = {
            let chain = self.chain.read().await;
            let mut mempool = self.mempool.lock().await;
            for block in chain.blocks().iter().skip(outcome.fork_height as usize + 1) {
                mempool.remove_included(block);
            }
            for tx in &outcome.resurrected {
                if let Err(e) = mempool.admit(tx.clone(), chain.ledger()) {
                    debug!(tx = %tx.hash().short(), error = %e, "discarded transaction not restored");
                }
            }
            let pruned = mempool.prune(chain.ledger());
            if pruned > 0 {
                debug!(pruned, "pruned mempool after head change");
            }
            Block::clone(chain.head())
        };

        self.peers
            .lock()
            .await
            .broadcast(&Message::NewBlock { block: head }, origin);
    }

    /// Connect parked blocks whose parent is now our head.
    async fn resolve_orphans(self: &Arc<Self>) {
        loop {
            let head = self.chain.read().await.head().hash();
            let children = self.orphans.lock().await.take_children(&head);
            if children.is_empty() {
                return;
            }

            let mut connected = false;
            for (block, from) in children {
                match self.evaluate_and_adopt(vec![block], from).await {
                    Ok(outcome) => {
                        debug!(height = outcome.new_height, "connected orphan block");
                        connected = true;
                        break;
                    }
                    Err(e) => self.punish_invalid(from, &e).await,
                }
            }
            if !connected {
                return;
            }
        }
    }

    /// Penalize the sender of a block that failed validation.
    async fn punish_invalid(&self, peer: Option<PeerId>, error: &NetError) {
        let invalid = matches!(
            error,
            NetError::Chain(ChainError::Validation(_) | ChainError::InvalidChain(_))
        );
        if !invalid {
            debug!(error = %error, "block not adopted");
            return;
        }

        warn!(peer = ?peer, error = %error, "rejected invalid block");
        if let Some(id) = peer {
            self.peers.lock().await.penalize(id, INVALID_BLOCK_PENALTY);
        }
    }

    async fn settle_state(&self) {
        let syncing = self.sync.lock().await.is_some();
        let state = if syncing {
            ChainState::Syncing
        } else {
            ChainState::Synced
        };
        self.chain.write().await.set_state(state);
    }

    async fn on_peer_gone(&self, id: PeerId) {
        let abandoned = {
            let mut sync = self.sync.lock().await;
            if sync.as_ref().is_some_and(|s| s.peer == id) {
                sync.take()
            } else {
                None
            }
        };
        if abandoned.is_some() {
            debug!(peer = id, "sync peer left, abandoning session");
            self.settle_state().await;
        }
    }

    async fn admit(&self, tx: Transaction) -> Result<Hash> {
        let chain = self.chain.read().await;
        let mut mempool = self.mempool.lock().await;
        Ok(mempool.admit(tx, chain.ledger())?)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    async fn maintain(self: &Arc<Self>, last_save: &mut Instant) {
        let stalled = {
            let mut sync = self.sync.lock().await;
            if sync
                .as_ref()
                .is_some_and(|s| s.last_activity.elapsed() > self.config.sync_timeout)
            {
                sync.take()
            } else {
                None
            }
        };
        if let Some(session) = stalled {
            let err = NetError::PeerTimeout(format!("sync peer {}", session.peer));
            warn!(error = %err, "sync stalled");
            self.peers.lock().await.disconnect(session.peer);
            self.settle_state().await;
        }

        {
            let mut peers = self.peers.lock().await;
            let idle_limit = self.config.ping_interval * IDLE_PING_INTERVALS;
            for peer in peers.iter_mut() {
                if !peer.is_handshaked() {
                    if peer.connected_at.elapsed() > self.config.handshake_timeout {
                        debug!(peer = %peer.addr, "handshake timed out");
                        peer.disconnect();
                    }
                } else if peer.last_seen.elapsed() > idle_limit {
                    let err = NetError::PeerTimeout(peer.addr.to_string());
                    debug!(error = %err, "peer idle");
                    peer.disconnect();
                } else if peer.last_ping.elapsed() >= self.config.ping_interval {
                    peer.send(Message::Ping);
                    peer.last_ping = Instant::now();
                }
            }
        }

        let expired = self.orphans.lock().await.expire(self.config.orphan_ttl);
        if expired > 0 {
            debug!(expired, "expired orphan blocks");
        }

        let idle = self.sync.lock().await.is_none();
        if idle {
            let ours = self.chain.read().await.height();
            let best = self.peers.lock().await.best_peer(ours);
            if let Some((peer, height)) = best {
                self.start_sync(peer, height, ours).await;
            }
        }

        let candidates = {
            let peers = self.peers.lock().await;
            if peers.is_full() {
                Vec::new()
            } else {
                let mut rng = rand::thread_rng();
                if let Some(id) = peers.random_peer(&mut rng) {
                    peers.send(id, Message::GetPeers);
                }
                peers.dial_candidates(&mut rng, &self.advertised)
            }
        };
        for address in candidates {
            self.dial(address);
        }

        if last_save.elapsed() >= self.config.peer_save_interval {
            if let Err(e) = self.save_peers().await {
                warn!(error = %e, "failed to save peers");
            }
            *last_save = Instant::now();
        }
    }

    async fn save_peers(&self) -> Result<()> {
        let Some(store) = &self.peer_store else {
            return Ok(());
        };
        let records = self.peers.lock().await.records();
        store.save(&records)?;
        debug!(count = records.len(), "saved peers");
        Ok(())
    }
}
