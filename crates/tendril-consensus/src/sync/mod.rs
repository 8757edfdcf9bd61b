//! Chain synchronizer.
//!
//! Blocks from local commits, gossip and targeted fetches enter a pending
//! queue and are admitted strictly in height order by one admission loop.
//! A lagging node catches up in bulk from the best peer when the chain has
//! been idle for a while or a peer connects.

mod catch_up;
mod fetch;
mod pending;
mod serve;

use crate::chain::Blockchain;
use crate::config::SyncConfig;
use crate::error::{ConsensusError, Result};
use crate::events::SyncEvent;
use crate::mempool::TransactionPool;
use parking_lot::Mutex;
use pending::{PendingBlock, PendingQueue};
use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tendril_p2p::{sample_for_gossip, Message, PeerId, PeerRegistry};
use tendril_types::{Block, QuorumCertificate};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Outcome of one admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    /// Nothing pending.
    Idle,
    /// The lowest pending block is still ahead of `tip + 1`.
    Waiting,
    /// A block was appended or its certificate attached.
    Appended,
    /// A stale or invalid block was dropped.
    Discarded,
}

struct Inner {
    config: SyncConfig,
    chain: Arc<Blockchain>,
    peers: Arc<dyn PeerRegistry>,
    pool: Arc<dyn TransactionPool>,
    pending: Mutex<PendingQueue>,
    scheduled: Mutex<HashSet<u64>>,
    catching_up: AtomicBool,
    pending_ready: Notify,
    activity: Notify,
    cancel: CancellationToken,
    events: broadcast::Sender<SyncEvent>,
}

/// The chain synchronizer.
#[derive(Clone)]
pub struct Synchronizer {
    inner: Arc<Inner>,
}

impl Synchronizer {
    /// Creates a synchronizer over `chain`.
    pub fn new(
        config: SyncConfig,
        chain: Arc<Blockchain>,
        peers: Arc<dyn PeerRegistry>,
        pool: Arc<dyn TransactionPool>,
    ) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(Inner {
                config,
                chain,
                peers,
                pool,
                pending: Mutex::new(PendingQueue::default()),
                scheduled: Mutex::new(HashSet::new()),
                catching_up: AtomicBool::new(false),
                pending_ready: Notify::new(),
                activity: Notify::new(),
                cancel: CancellationToken::new(),
                events,
            }),
        }
    }

    /// Subscribes to sync events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Returns the chain this synchronizer extends.
    pub fn chain(&self) -> &Arc<Blockchain> {
        &self.inner.chain
    }

    /// Number of queued blocks.
    pub fn pending_len(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Spawns the admission loop and the catch-up idle timer.
    pub fn start(&self) -> JoinHandle<()> {
        let admission = self.clone();
        let idle = self.clone();
        tokio::spawn(async move {
            tokio::join!(admission.admission_loop(), idle.idle_loop());
        })
    }

    /// Stops the background tasks.
    pub fn stop(&self) {
        self.inner.cancel.cancel();
    }

    /// Queues a block this node committed.
    pub fn new_block_from_local(&self, block: Block, consensus: QuorumCertificate) {
        debug!(height = block.height(), block_hash = %block.hash(), "queued local block");
        self.push(PendingBlock {
            block,
            consensus,
            from: None,
        });
    }

    /// Queues a block gossiped by `from`.
    pub async fn new_block(
        &self,
        block: Block,
        consensus: QuorumCertificate,
        from: PeerId,
    ) -> Result<()> {
        let height = block.height();
        if let Some(peer) = self.inner.peers.get(&from) {
            peer.advance_height(height);
        }

        let tip = self.inner.chain.height().await?;
        if height < tip {
            trace!(height, tip, peer = %from, "ignoring stale block");
            return Ok(());
        }
        if height > tip + self.inner.config.max_pending_height_gap {
            debug!(height, tip, peer = %from, "pending gap exceeded; dropping block");
            return Ok(());
        }

        if !self.push(PendingBlock {
            block,
            consensus,
            from: Some(from),
        }) {
            trace!(height, peer = %from, "block already pending");
        }
        Ok(())
    }

    /// Handles a height announcement from `from`.
    pub async fn new_block_height(&self, height: u64, from: PeerId) -> Result<()> {
        if let Some(peer) = self.inner.peers.get(&from) {
            peer.advance_height(height);
        }

        let tip = self.inner.chain.height().await?;
        if height == tip + 1 {
            self.schedule_fetch(height);
        } else if height > tip + 1 {
            self.spawn_catch_up();
        }
        Ok(())
    }

    /// Reacts to a change in the peer set.
    pub fn new_node(&self) {
        self.spawn_catch_up();
    }

    fn push(&self, block: PendingBlock) -> bool {
        let queued = self.inner.pending.lock().push(block);
        if queued {
            self.inner.pending_ready.notify_one();
        }
        queued
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.inner.events.send(event);
    }

    fn report(&self, e: &ConsensusError) {
        let fatal = e.is_fatal();
        if fatal {
            error!(error = %e, "synchronizer failed");
        } else {
            warn!(error = %e, "synchronizer error");
        }
        self.emit(SyncEvent::Error {
            message: e.to_string(),
            fatal,
        });
        if fatal {
            self.inner.cancel.cancel();
        }
    }

    pub(crate) async fn drop_peer(&self, peer: PeerId, reason: &str) {
        self.inner.peers.drop_peer(&peer, reason).await;
        self.emit(SyncEvent::PeerDropped {
            peer,
            reason: reason.to_string(),
        });
    }

    pub(crate) fn spawn_catch_up(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.catch_up().await {
                this.report(&e);
            }
        });
    }

    async fn admission_loop(&self) {
        loop {
            if let Err(e) = self.process_pending().await {
                self.report(&e);
                if e.is_fatal() {
                    break;
                }
            }
            tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                _ = self.inner.pending_ready.notified() => {}
            }
        }
        debug!("admission loop stopped");
    }

    async fn idle_loop(&self) {
        let interval = self.inner.config.catch_up_interval();
        loop {
            tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                _ = self.inner.activity.notified() => {}
                _ = tokio::time::sleep(interval) => self.spawn_catch_up(),
            }
        }
    }

    /// Admits pending blocks until the queue is empty or waiting on a gap.
    pub async fn process_pending(&self) -> Result<()> {
        loop {
            match self.chain_pending_block().await? {
                Admission::Idle | Admission::Waiting => return Ok(()),
                Admission::Appended | Admission::Discarded => {}
            }
        }
    }

    async fn chain_pending_block(&self) -> Result<Admission> {
        let Some(entry) = self.inner.pending.lock().pop() else {
            return Ok(Admission::Idle);
        };

        let chain = &self.inner.chain;
        let tip = chain.height().await?;
        let height = entry.height();

        if height > tip + 1 {
            self.inner.pending.lock().push(entry);
            return Ok(Admission::Waiting);
        }
        let attaches = height == tip
            && chain.consented_height().await? < tip
            && chain.hash_of(tip).await? == entry.block.hash();
        if height < tip || (height == tip && !attaches) {
            trace!(height, tip, "discarding stale block");
            return Ok(Admission::Discarded);
        }

        match self.verify_pending(&entry, tip).await {
            Ok(()) => {}
            Err(e @ ConsensusError::Storage(_)) => return Err(e),
            Err(e) => {
                self.reject(&entry, e).await?;
                return Ok(Admission::Discarded);
            }
        }

        let applied = if attaches {
            chain
                .attach_tip_consensus(height, entry.consensus.clone())
                .await?
        } else {
            chain.append(&entry.block, entry.consensus.clone()).await?
        };
        if !applied {
            debug!(height, "tip moved during admission");
            return Ok(Admission::Discarded);
        }

        self.on_appended(&entry).await;
        Ok(Admission::Appended)
    }

    /// Checks a block at `tip` or `tip + 1` and its certificate.
    async fn verify_pending(&self, entry: &PendingBlock, tip: u64) -> Result<()> {
        let chain = &self.inner.chain;
        let block = &entry.block;
        let height = block.height();
        block.validate()?;

        if height == tip + 1 {
            let parent_hash = chain.hash_of(tip).await?;
            if block.header.last_block_hash != parent_hash {
                return Err(ConsensusError::InvalidBlock(format!(
                    "block {} does not extend tip {}",
                    height, parent_hash
                )));
            }
        }

        let validators = chain.validator_set_at(height - 1).await?;
        entry
            .consensus
            .validate(&block.hash(), &chain.genesis_hash(), &validators)?;

        let next_root = block.header.next_validator_set_root;
        match chain.store().validator_set(&next_root).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Err(ConsensusError::InvalidBlock(format!(
                "block {} names unknown validator set {}",
                height, next_root
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn reject(&self, entry: &PendingBlock, e: ConsensusError) -> Result<()> {
        let height = entry.height();
        match entry.from {
            Some(peer) => {
                warn!(height, peer = %peer, error = %e, "invalid block from peer");
                self.drop_peer(peer, &format!("invalid block at height {}: {}", height, e))
                    .await;
                Ok(())
            }
            None => {
                error!(height, error = %e, "locally committed block is invalid");
                Err(ConsensusError::Fatal(format!(
                    "locally committed block {} failed validation: {}",
                    height, e
                )))
            }
        }
    }

    async fn on_appended(&self, entry: &PendingBlock) {
        let block = &entry.block;
        let height = block.height();
        let block_hash = block.hash();

        self.inner.pool.remove_committed(&block.body.transactions);
        info!(
            height,
            %block_hash,
            tx_count = block.tx_count(),
            peer = ?entry.from,
            "appended block"
        );
        self.emit(SyncEvent::BlockAppended {
            height,
            block_hash,
            from: entry.from,
        });
        self.inner.activity.notify_one();
        self.gossip_block(entry).await;
    }

    /// Sends the full block to a sample of lagging peers and a height notice
    /// to the rest.
    async fn gossip_block(&self, entry: &PendingBlock) {
        let height = entry.height();
        let candidates: Vec<_> = self
            .inner
            .peers
            .peers()
            .into_iter()
            .filter(|p| Some(p.id()) != entry.from && p.height() < height)
            .collect();
        let (full, rest) = sample_for_gossip(candidates, self.inner.config.gossip_exponent);

        for peer in full {
            let message = Message::NewBlock {
                block: entry.block.clone(),
                consensus: entry.consensus.clone(),
            };
            if let Err(e) = peer.send(message).await {
                debug!(peer = %peer.id(), error = %e, "block gossip failed");
            }
        }
        for peer in rest {
            if let Err(e) = peer.send(Message::NewBlockHeight(height)).await {
                debug!(peer = %peer.id(), error = %e, "height gossip failed");
            }
        }
    }
}
