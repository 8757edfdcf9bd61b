//! Tendermint-style consensus engine.
//!
//! One engine runs per node and decides one height at a time. A tick loop
//! advances the state machine and inbound messages mutate the same state;
//! both hold the state's write lock for their whole critical section.
//! Outgoing messages are collected under the lock and sent after it is
//! released.

mod state;
mod timeout;

pub use state::{ConsensusSnapshot, Step};

use crate::chain::Blockchain;
use crate::config::ConsensusConfig;
use crate::error::{ConsensusError, Result};
use crate::events::ConsensusEvent;
use crate::executor::{AppState, Executor};
use crate::mempool::TransactionPool;
use crate::sync::Synchronizer;
use state::ConsensusState;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tendril_p2p::{Message, PeerId, PeerRegistry};
use tendril_types::{
    Address, Block, ConsensusMessage, Hash, Proposal, QuorumCertificate, Signer, Vote, VoteKind,
};
use timeout::TimeoutTicket;
use tokio::sync::{broadcast, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

enum Outgoing {
    /// Signed by this node; goes to every peer.
    Own(ConsensusMessage),
    /// Received from `from`; goes to other peers at the same height.
    Relay {
        message: ConsensusMessage,
        from: Option<PeerId>,
    },
}

struct Inner {
    config: ConsensusConfig,
    chain: Arc<Blockchain>,
    signer: Arc<dyn Signer>,
    executor: Arc<dyn Executor>,
    pool: Arc<dyn TransactionPool>,
    peers: Arc<dyn PeerRegistry>,
    sync: Synchronizer,
    state: RwLock<ConsensusState>,
    wake: Notify,
    cancel: CancellationToken,
    events: broadcast::Sender<ConsensusEvent>,
}

/// The consensus engine.
#[derive(Clone)]
pub struct ConsensusEngine {
    inner: Arc<Inner>,
}

impl ConsensusEngine {
    /// Creates an engine. It idles until the executor reports a state.
    pub fn new(
        config: ConsensusConfig,
        chain: Arc<Blockchain>,
        signer: Arc<dyn Signer>,
        executor: Arc<dyn Executor>,
        pool: Arc<dyn TransactionPool>,
        peers: Arc<dyn PeerRegistry>,
        sync: Synchronizer,
    ) -> Self {
        let (events, _) = broadcast::channel(1024);
        let state = ConsensusState::uninitialized(chain.genesis_validators().clone());

        Self {
            inner: Arc::new(Inner {
                config,
                chain,
                signer,
                executor,
                pool,
                peers,
                sync,
                state: RwLock::new(state),
                wake: Notify::new(),
                cancel: CancellationToken::new(),
                events,
            }),
        }
    }

    /// Subscribes to consensus events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConsensusEvent> {
        self.inner.events.subscribe()
    }

    /// Returns the address this engine signs with.
    pub fn address(&self) -> Address {
        self.inner.signer.address()
    }

    /// Returns the current position under the read lock.
    pub async fn snapshot(&self) -> ConsensusSnapshot {
        self.inner.state.read().await.snapshot()
    }

    /// Spawns the tick loop.
    pub fn start(&self) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move { engine.run().await })
    }

    /// Stops the tick loop and pending timers.
    pub fn stop(&self) {
        self.inner.cancel.cancel();
    }

    /// Schedules an immediate tick.
    pub fn wake(&self) {
        self.inner.wake.notify_one();
    }

    async fn run(self) {
        info!(address = %self.address(), "consensus engine started");
        let mut app_events = self.inner.executor.subscribe();
        let idle = self.inner.config.idle_poll();

        loop {
            if let Err(e) = self.tick().await {
                let fatal = e.is_fatal();
                self.report(&e, fatal);
                if fatal {
                    self.inner.cancel.cancel();
                    break;
                }
            }

            tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                _ = self.inner.wake.notified() => {}
                _ = next_app_state(&mut app_events) => {}
                _ = tokio::time::sleep(idle) => {}
            }
        }
        info!("consensus engine stopped");
    }

    fn report(&self, e: &ConsensusError, fatal: bool) {
        if fatal {
            error!(error = %e, "consensus failed");
        } else {
            warn!(error = %e, "consensus tick failed");
        }
        self.emit(ConsensusEvent::Error {
            message: e.to_string(),
            fatal,
        });
    }

    fn emit(&self, event: ConsensusEvent) {
        let _ = self.inner.events.send(event);
    }

    /// Advances the state machine until it makes no more progress.
    pub async fn tick(&self) -> Result<()> {
        loop {
            let mut outbox = Vec::new();
            let result = {
                let mut state = self.inner.state.write().await;
                self.proceed(&mut state, &mut outbox).await
            };
            self.flush(outbox).await;
            if !result? {
                return Ok(());
            }
        }
    }

    async fn proceed(&self, state: &mut ConsensusState, outbox: &mut Vec<Outgoing>) -> Result<bool> {
        if self.refresh_height(state).await? {
            return Ok(true);
        }
        if state.height == 0 {
            return Ok(false);
        }
        if let Some(round) = state.skip_target() {
            self.enter_round(state, round);
            return Ok(true);
        }

        match state.step {
            Step::NewRound => self.on_new_round(state, outbox).await,
            Step::Propose => self.on_propose(state, outbox).await,
            Step::Prevote | Step::PrevoteWait => Ok(self.on_prevote(state, outbox)),
            Step::Precommit | Step::PrecommitWait => self.on_precommit(state),
            Step::Committed => Ok(false),
        }
    }

    /// Re-enters at round 1 when the executor reports a new height.
    async fn refresh_height(&self, state: &mut ConsensusState) -> Result<bool> {
        let app = match self.inner.executor.app_state().await {
            Ok(app) => app,
            Err(ConsensusError::NotInitialized(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        let height = app.height + 1;
        if height <= state.height {
            return Ok(false);
        }

        let validators = self.inner.chain.validator_set_at(app.height).await?;
        let prev_app_state_hash = if app.height == 0 {
            app.state_hash
        } else {
            self.inner.chain.header_of(app.height).await?.app_state_hash
        };
        *state = ConsensusState::new(height, validators, app.state_hash, prev_app_state_hash);

        debug!(height, validators = state.validators.len(), "new height");
        self.emit(ConsensusEvent::NewHeight { height });
        self.emit(ConsensusEvent::NewRound { height, round: 1 });
        Ok(true)
    }

    fn enter_round(&self, state: &mut ConsensusState, round: u32) {
        debug!(height = state.height, from = state.round, round, "new round");
        state.new_round(round);
        self.emit(ConsensusEvent::NewRound {
            height: state.height,
            round,
        });
    }

    async fn on_new_round(
        &self,
        state: &mut ConsensusState,
        outbox: &mut Vec<Outgoing>,
    ) -> Result<bool> {
        if state.current().proposal.is_none() {
            let should_propose = state.valid_block.is_some()
                || state.height == 1
                || state.prev_app_state_hash != state.app_state_hash
                || self.inner.pool.has_transactions();
            if !should_propose {
                return Ok(false);
            }
        }
        self.enter_propose(state, outbox).await?;
        Ok(true)
    }

    async fn enter_propose(
        &self,
        state: &mut ConsensusState,
        outbox: &mut Vec<Outgoing>,
    ) -> Result<()> {
        state.step = Step::Propose;
        let (height, round) = (state.height, state.round);
        let proposer = state.validators.proposer(height, round).address;

        if proposer != self.inner.signer.address() {
            trace!(height, round, %proposer, "waiting for proposal");
            self.arm(state);
            return Ok(());
        }
        if state.current().proposal.is_some() {
            return Ok(());
        }

        let (block, locked_round) = match &state.valid_block {
            Some(block) => (block.clone(), state.valid_round),
            None => (self.build_block(state).await?, 0),
        };
        let proposal = Proposal {
            height,
            round,
            locked_round,
            block,
        };
        let block_hash = proposal.block.hash();
        let tx_count = proposal.block.tx_count();
        let message = ConsensusMessage::proposal(
            proposal.clone(),
            &self.inner.chain.genesis_hash(),
            self.inner.signer.as_ref(),
        );
        state.current().proposal = Some(proposal);
        outbox.push(Outgoing::Own(message));

        info!(height, round, %block_hash, tx_count, locked_round, "proposed block");
        self.emit(ConsensusEvent::Proposed {
            height,
            round,
            block_hash,
        });
        Ok(())
    }

    async fn build_block(&self, state: &ConsensusState) -> Result<Block> {
        let chain = &self.inner.chain;
        if state.height == 1 {
            return Ok(chain.genesis().clone());
        }

        let parent = state.height - 1;
        Ok(Block::new(
            state.height,
            now_millis(),
            chain.hash_of(parent).await?,
            state.validators.hash(),
            state.app_state_hash,
            self.inner.pool.select_transactions(),
            chain.consensus_of(parent).await?,
        ))
    }

    async fn on_propose(
        &self,
        state: &mut ConsensusState,
        outbox: &mut Vec<Outgoing>,
    ) -> Result<bool> {
        let Some(proposal) = state.current().proposal.clone() else {
            return Ok(false);
        };
        let block_hash = proposal.block.hash();

        let vote_hash = match self.validate_block(state, &proposal.block).await {
            Ok(()) => prevote_choice(state, &proposal, block_hash),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(
                    height = state.height,
                    round = state.round,
                    %block_hash,
                    error = %e,
                    "rejecting proposal"
                );
                Hash::ZERO
            }
        };

        self.send_vote(state, VoteKind::Prevote, vote_hash, outbox);
        state.step = Step::Prevote;
        Ok(true)
    }

    /// Checks a proposed block against the chain and the local app state.
    async fn validate_block(&self, state: &ConsensusState, block: &Block) -> Result<()> {
        let chain = &self.inner.chain;
        if block.height() != state.height {
            return Err(ConsensusError::InvalidBlock(format!(
                "height {} while deciding {}",
                block.height(),
                state.height
            )));
        }
        block.validate()?;

        if state.height == 1 {
            if block.hash() != chain.genesis_hash() {
                return Err(ConsensusError::InvalidBlock(
                    "height 1 block is not the configured genesis".into(),
                ));
            }
            return Ok(());
        }

        let parent = state.height - 1;
        let parent_hash = chain.hash_of(parent).await?;
        let header = &block.header;
        if header.last_block_hash != parent_hash {
            return Err(ConsensusError::InvalidBlock(format!(
                "parent {} does not match {}",
                header.last_block_hash, parent_hash
            )));
        }
        if header.app_state_hash != state.app_state_hash {
            return Err(ConsensusError::InvalidBlock(format!(
                "app state {} does not match local {}",
                header.app_state_hash, state.app_state_hash
            )));
        }
        if header.next_validator_set_root != state.validators.hash() {
            return Err(ConsensusError::InvalidBlock(
                "validator set changed mid-chain".into(),
            ));
        }

        let parent_validators = chain.validator_set_at(parent - 1).await?;
        block.body.last_block_consensus.validate(
            &parent_hash,
            &chain.genesis_hash(),
            &parent_validators,
        )?;
        Ok(())
    }

    fn on_prevote(&self, state: &mut ConsensusState, outbox: &mut Vec<Outgoing>) -> bool {
        let round = state.round;
        if let Some(vote) = state.current().prevotes.two_thirds_majority().copied() {
            if vote.is_nil() {
                self.send_vote(state, VoteKind::Precommit, Hash::ZERO, outbox);
                state.step = Step::Precommit;
                return true;
            }
            if let Some(block) = state.current().proposed_block(&vote.block_hash).cloned() {
                debug!(height = state.height, round, block_hash = %vote.block_hash, "locked block");
                state.locked_round = round;
                state.locked_block = Some(block);
                self.send_vote(state, VoteKind::Precommit, vote.block_hash, outbox);
                state.step = Step::Precommit;
                return true;
            }
        }

        if state.step == Step::Prevote && state.current().prevotes.two_thirds_any() {
            state.step = Step::PrevoteWait;
            self.arm(state);
            return true;
        }
        false
    }

    fn on_precommit(&self, state: &mut ConsensusState) -> Result<bool> {
        if let Some(vote) = state.current().precommits.two_thirds_majority().copied() {
            if vote.is_nil() {
                self.enter_round(state, state.round.saturating_add(1));
                return Ok(true);
            }
            if state.current().proposed_block(&vote.block_hash).is_some() {
                self.commit(state)?;
                return Ok(true);
            }
        }

        if state.step == Step::Precommit && state.current().precommits.two_thirds_any() {
            state.step = Step::PrecommitWait;
            self.arm(state);
            return Ok(true);
        }
        Ok(false)
    }

    /// Assembles the certificate and hands the block to the synchronizer.
    fn commit(&self, state: &mut ConsensusState) -> Result<()> {
        let (height, round) = (state.height, state.round);
        let rs = state.current();
        let vote = *rs
            .precommits
            .two_thirds_majority()
            .ok_or(ConsensusError::MissingMajority { height, round })?;
        let block = rs
            .proposed_block(&vote.block_hash)
            .cloned()
            .ok_or_else(|| ConsensusError::Fatal(format!("committing unproposed block {}", vote.block_hash)))?;
        let signatures = rs.precommits.signatures_for(&vote.block_hash);
        let consensus = QuorumCertificate::new(vote, signatures);

        state.step = Step::Committed;
        info!(
            height,
            round,
            block_hash = %vote.block_hash,
            signatures = consensus.signatures.len(),
            "committed block"
        );
        self.emit(ConsensusEvent::Committed {
            height,
            round,
            block_hash: vote.block_hash,
        });
        self.inner.sync.new_block_from_local(block, consensus);
        Ok(())
    }

    /// Signs a vote for the current round and counts it locally.
    ///
    /// Nodes outside the validator set do not vote.
    fn send_vote(
        &self,
        state: &mut ConsensusState,
        kind: VoteKind,
        block_hash: Hash,
        outbox: &mut Vec<Outgoing>,
    ) {
        let address = self.inner.signer.address();
        let Ok(power) = state.validators.power_of(&address) else {
            return;
        };

        let vote = Vote::new(state.height, state.round, block_hash);
        let message = ConsensusMessage::vote(
            kind,
            vote,
            &self.inner.chain.genesis_hash(),
            self.inner.signer.as_ref(),
        );
        let signature = message.signature().clone();
        if let Err(e) = state
            .current()
            .votes_mut(kind)
            .add(address, power, vote, signature)
        {
            warn!(error = %e, kind = message.name(), "own vote rejected");
            return;
        }
        if kind == VoteKind::Prevote {
            state.update_valid_block(state.round);
        }

        debug!(
            height = state.height,
            round = state.round,
            kind = message.name(),
            %block_hash,
            "voted"
        );
        outbox.push(Outgoing::Own(message));
    }

    fn arm(&self, state: &ConsensusState) {
        let ticket = TimeoutTicket::capture(state);
        let Some(delay) = ticket.delay(&self.inner.config) else {
            return;
        };

        trace!(height = ticket.height, round = ticket.round, step = %ticket.step, ?delay, "armed timeout");
        let engine = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = engine.inner.cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => engine.on_timeout(ticket).await,
            }
        });
    }

    async fn on_timeout(&self, ticket: TimeoutTicket) {
        let mut outbox = Vec::new();
        {
            let mut state = self.inner.state.write().await;
            if !ticket.is_current(&state) {
                trace!(height = ticket.height, round = ticket.round, step = %ticket.step, "stale timeout");
                return;
            }

            debug!(height = ticket.height, round = ticket.round, step = %ticket.step, "timeout fired");
            match ticket.step {
                Step::Propose => {
                    self.send_vote(&mut state, VoteKind::Prevote, Hash::ZERO, &mut outbox);
                    state.step = Step::Prevote;
                }
                Step::PrevoteWait => {
                    self.send_vote(&mut state, VoteKind::Precommit, Hash::ZERO, &mut outbox);
                    state.step = Step::Precommit;
                }
                Step::PrecommitWait => {
                    let round = state.round.saturating_add(1);
                    self.enter_round(&mut state, round);
                }
                _ => {}
            }
        }
        self.flush(outbox).await;
        self.wake();
    }

    /// Handles a consensus message from a peer, or from this process when
    /// `from` is `None`.
    ///
    /// Messages with bad signatures get the sender dropped; stale,
    /// duplicate or misaddressed ones are ignored.
    pub async fn new_consensus_message(
        &self,
        message: ConsensusMessage,
        from: Option<PeerId>,
    ) -> Result<()> {
        let signer = match message.recover(&self.inner.chain.genesis_hash()) {
            Ok(address) => address,
            Err(e) => {
                warn!(peer = ?from, kind = message.name(), error = %e, "bad consensus signature");
                if let Some(peer) = from {
                    self.inner
                        .peers
                        .drop_peer(&peer, "invalid consensus signature")
                        .await;
                }
                return Ok(());
            }
        };

        if let Some(peer) = from.and_then(|id| self.inner.peers.get(&id)) {
            peer.advance_consensus_height(message.height());
            peer.advance_height(message.height().saturating_sub(1));
        }

        let mut outbox = Vec::new();
        let result = {
            let mut state = self.inner.state.write().await;
            match self.refresh_height(&mut state).await {
                Ok(_) => {
                    self.apply_message(&mut state, message, signer, from, &mut outbox);
                    Ok(())
                }
                Err(e) => Err(e),
            }
        };
        self.flush(outbox).await;
        self.wake();
        result
    }

    fn apply_message(
        &self,
        state: &mut ConsensusState,
        message: ConsensusMessage,
        signer: Address,
        from: Option<PeerId>,
        outbox: &mut Vec<Outgoing>,
    ) {
        if state.height == 0 || message.height() != state.height || message.round() == 0 {
            trace!(height = message.height(), local = state.height, "ignoring message for other height");
            return;
        }

        match &message {
            ConsensusMessage::Proposal { proposal, .. } => {
                let round = proposal.round;
                if round < state.round
                    || state.get_round(round).is_some_and(|rs| rs.proposal.is_some())
                {
                    return;
                }
                if proposal.locked_round != 0 && proposal.locked_round >= round {
                    warn!(round, locked_round = proposal.locked_round, peer = ?from, "inconsistent proposal locked round");
                    return;
                }
                let expected = state.validators.proposer(state.height, round).address;
                if signer != expected {
                    warn!(round, %signer, %expected, peer = ?from, "proposal from wrong proposer");
                    return;
                }

                debug!(height = state.height, round, block_hash = %proposal.block.hash(), "received proposal");
                state.round_state(round).proposal = Some(proposal.clone());
                state.update_valid_block(round);
            }
            ConsensusMessage::Prevote { vote, signature }
            | ConsensusMessage::Precommit { vote, signature } => {
                let kind = match &message {
                    ConsensusMessage::Prevote { .. } => VoteKind::Prevote,
                    _ => VoteKind::Precommit,
                };
                let Ok(power) = state.validators.power_of(&signer) else {
                    warn!(%signer, peer = ?from, "vote from non-validator");
                    return;
                };
                let votes = state.round_state(vote.round).votes_mut(kind);
                if votes.has_vote(&signer) {
                    return;
                }
                if let Err(e) = votes.add(signer, power, *vote, signature.clone()) {
                    warn!(error = %e, "vote rejected");
                    return;
                }
                if kind == VoteKind::Prevote {
                    state.update_valid_block(vote.round);
                }
            }
        }

        outbox.push(Outgoing::Relay { message, from });
        if let Some(round) = state.skip_target() {
            self.enter_round(state, round);
        }
    }

    async fn flush(&self, outbox: Vec<Outgoing>) {
        for outgoing in outbox {
            match outgoing {
                Outgoing::Own(message) => {
                    self.inner
                        .peers
                        .broadcast(Message::NewConsensusMessage(message))
                        .await;
                }
                Outgoing::Relay { message, from } => {
                    let height = message.height();
                    for peer in self.inner.peers.peers() {
                        if Some(peer.id()) == from || peer.consensus_height() != height {
                            continue;
                        }
                        if let Err(e) = peer
                            .send(Message::NewConsensusMessage(message.clone()))
                            .await
                        {
                            debug!(peer = %peer.id(), error = %e, "relay failed");
                        }
                    }
                }
            }
        }
    }
}

/// Prevote for a valid proposal, honoring this node's lock.
fn prevote_choice(state: &ConsensusState, proposal: &Proposal, block_hash: Hash) -> Hash {
    let locked = state.locked_hash();
    if locked.is_none() || locked == Some(block_hash) {
        return block_hash;
    }
    if proposal.locked_round < state.locked_round {
        return Hash::ZERO;
    }
    let supported = proposal.locked_round != 0
        && state
            .get_round(proposal.locked_round)
            .and_then(|rs| rs.prevotes.two_thirds_majority())
            .is_some_and(|vote| vote.block_hash == block_hash);
    if supported {
        block_hash
    } else {
        Hash::ZERO
    }
}

async fn next_app_state(events: &mut broadcast::Receiver<AppState>) {
    match events.recv().await {
        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
        Err(broadcast::error::RecvError::Closed) => futures::future::pending().await,
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::executor::DigestExecutor;
    use crate::genesis::{devnet_keypair, generate_devnet_genesis};
    use crate::mempool::Mempool;
    use std::time::Duration;
    use tendril_p2p::PeerSet;
    use tendril_storage::MemoryStore;
    use tendril_types::Keypair;

    struct Harness {
        engine: ConsensusEngine,
        chain: Arc<Blockchain>,
        keys: Vec<Keypair>,
    }

    async fn harness(validators: usize, me: u64, config: ConsensusConfig) -> Harness {
        let genesis = generate_devnet_genesis(validators);
        let chain = Arc::new(Blockchain::new(
            Arc::new(MemoryStore::new()),
            genesis.block().unwrap(),
            genesis.validator_set().unwrap(),
        ));
        chain.ready().await.unwrap();

        let executor = Arc::new(DigestExecutor::new(chain.clone()));
        executor.initialize().await.unwrap();
        let pool = Arc::new(Mempool::with_defaults());
        let peers = Arc::new(PeerSet::new());
        let sync = Synchronizer::new(SyncConfig::default(), chain.clone(), peers.clone(), pool.clone());
        let engine = ConsensusEngine::new(
            config,
            chain.clone(),
            Arc::new(devnet_keypair(me)),
            executor,
            pool,
            peers,
            sync,
        );
        Harness {
            engine,
            chain,
            keys: (0..validators as u64).map(devnet_keypair).collect(),
        }
    }

    fn vote(h: &Harness, key: usize, kind: VoteKind, round: u32, hash: Hash) -> ConsensusMessage {
        ConsensusMessage::vote(
            kind,
            Vote::new(1, round, hash),
            &h.chain.genesis_hash(),
            &h.keys[key],
        )
    }

    #[tokio::test]
    async fn test_enters_height_one() {
        let h = harness(4, 0, ConsensusConfig::default()).await;
        assert_eq!(h.engine.snapshot().await.height, 0);

        h.engine.tick().await.unwrap();
        let snapshot = h.engine.snapshot().await;
        assert_eq!(snapshot.height, 1);
        assert_eq!(snapshot.round, 1);
    }

    #[tokio::test]
    async fn test_proposer_prevotes_genesis() {
        // (1 + 1) % 4: validator 2 proposes at height 1, round 1.
        let h = harness(4, 2, ConsensusConfig::default()).await;
        let mut events = h.engine.subscribe();
        h.engine.tick().await.unwrap();

        let snapshot = h.engine.snapshot().await;
        assert_eq!(snapshot.step, Step::Prevote);

        let mut proposed = None;
        while let Ok(event) = events.try_recv() {
            if let ConsensusEvent::Proposed { block_hash, .. } = event {
                proposed = Some(block_hash);
            }
        }
        assert_eq!(proposed, Some(h.chain.genesis_hash()));
    }

    #[tokio::test]
    async fn test_round_skip_on_one_third() {
        let h = harness(4, 0, ConsensusConfig::default()).await;
        h.engine.tick().await.unwrap();

        let msg = vote(&h, 1, VoteKind::Prevote, 3, Hash::ZERO);
        h.engine.new_consensus_message(msg, None).await.unwrap();
        assert_eq!(h.engine.snapshot().await.round, 1);

        let msg = vote(&h, 2, VoteKind::Precommit, 3, Hash::ZERO);
        h.engine.new_consensus_message(msg, None).await.unwrap();
        assert_eq!(h.engine.snapshot().await.round, 1);

        let msg = vote(&h, 3, VoteKind::Prevote, 3, Hash::digest(b"other"));
        h.engine.new_consensus_message(msg, None).await.unwrap();
        let snapshot = h.engine.snapshot().await;
        assert_eq!(snapshot.round, 3);
        assert_eq!(snapshot.step, Step::NewRound);
    }

    #[tokio::test]
    async fn test_proposal_from_wrong_proposer_ignored() {
        let h = harness(4, 0, ConsensusConfig::default()).await;
        h.engine.tick().await.unwrap();

        let proposal = Proposal {
            height: 1,
            round: 1,
            locked_round: 0,
            block: h.chain.genesis().clone(),
        };
        // Validator 2 is the proposer at (1, 1); sign with validator 3.
        let msg = ConsensusMessage::proposal(proposal.clone(), &h.chain.genesis_hash(), &h.keys[3]);
        h.engine.new_consensus_message(msg, None).await.unwrap();
        assert!(h.engine.inner.state.read().await.get_round(1).and_then(|rs| rs.proposal.as_ref()).is_none());

        let msg = ConsensusMessage::proposal(proposal, &h.chain.genesis_hash(), &h.keys[2]);
        h.engine.new_consensus_message(msg, None).await.unwrap();
        assert!(h.engine.inner.state.read().await.get_round(1).and_then(|rs| rs.proposal.as_ref()).is_some());
    }

    #[tokio::test]
    async fn test_inconsistent_locked_round_ignored() {
        let h = harness(4, 0, ConsensusConfig::default()).await;
        h.engine.tick().await.unwrap();

        let proposal = Proposal {
            height: 1,
            round: 1,
            locked_round: 1,
            block: h.chain.genesis().clone(),
        };
        let msg = ConsensusMessage::proposal(proposal, &h.chain.genesis_hash(), &h.keys[2]);
        h.engine.new_consensus_message(msg, None).await.unwrap();
        assert!(h.engine.inner.state.read().await.get_round(1).and_then(|rs| rs.proposal.as_ref()).is_none());
    }

    #[tokio::test]
    async fn test_full_round_with_four_validators() {
        let h = harness(4, 0, ConsensusConfig::default()).await;
        h.engine.tick().await.unwrap();
        let genesis = h.chain.genesis_hash();

        let proposal = Proposal {
            height: 1,
            round: 1,
            locked_round: 0,
            block: h.chain.genesis().clone(),
        };
        let msg = ConsensusMessage::proposal(proposal, &genesis, &h.keys[2]);
        h.engine.new_consensus_message(msg, None).await.unwrap();
        h.engine.tick().await.unwrap();
        assert_eq!(h.engine.snapshot().await.step, Step::Prevote);

        for key in [1, 2] {
            let msg = vote(&h, key, VoteKind::Prevote, 1, genesis);
            h.engine.new_consensus_message(msg, None).await.unwrap();
        }
        h.engine.tick().await.unwrap();
        let snapshot = h.engine.snapshot().await;
        assert_eq!(snapshot.step, Step::Precommit);
        assert_eq!(snapshot.locked_round, 1);
        assert_eq!(snapshot.valid_round, 1);

        let mut events = h.engine.subscribe();
        for key in [1, 3] {
            let msg = vote(&h, key, VoteKind::Precommit, 1, genesis);
            h.engine.new_consensus_message(msg, None).await.unwrap();
        }
        h.engine.tick().await.unwrap();
        assert_eq!(h.engine.snapshot().await.step, Step::Committed);
        assert!(matches!(
            events.try_recv(),
            Ok(ConsensusEvent::Committed { height: 1, round: 1, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_propose_timeout_sends_nil_prevote() {
        let h = harness(4, 0, ConsensusConfig::default()).await;
        h.engine.tick().await.unwrap();
        assert_eq!(h.engine.snapshot().await.step, Step::Propose);

        tokio::time::sleep(Duration::from_secs(10)).await;
        let state = h.engine.inner.state.read().await;
        assert_eq!(state.step, Step::Prevote);
        let own = state
            .get_round(1)
            .and_then(|rs| rs.prevotes.get(&h.keys[0].address()).copied())
            .unwrap();
        assert!(own.is_nil());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_timeout_ignored() {
        let h = harness(4, 0, ConsensusConfig::default()).await;
        h.engine.tick().await.unwrap();

        // Skip to round 2 before the round 1 propose timer fires.
        for key in [1, 2] {
            let msg = vote(&h, key, VoteKind::Prevote, 2, Hash::ZERO);
            h.engine.new_consensus_message(msg, None).await.unwrap();
        }
        assert_eq!(h.engine.snapshot().await.round, 2);

        tokio::time::sleep(Duration::from_millis(3700)).await;
        let state = h.engine.inner.state.read().await;
        assert_eq!(state.round, 2);
        assert!(state
            .get_round(1)
            .is_some_and(|rs| !rs.prevotes.has_vote(&h.keys[0].address())));
    }

    fn other_block() -> Block {
        Block::genesis(1, Hash::digest(b"other validators"), Hash::ZERO)
    }

    fn record_prevote(
        state: &mut ConsensusState,
        key: &Keypair,
        round: u32,
        hash: Hash,
        genesis: &Hash,
    ) {
        let vote = Vote::new(state.height, round, hash);
        let message = ConsensusMessage::vote(VoteKind::Prevote, vote, genesis, key);
        let power = state.validators.power_of(&key.address()).unwrap();
        state
            .round_state(round)
            .prevotes
            .add(key.address(), power, vote, message.signature().clone())
            .unwrap();
    }

    fn locked_state(h: &Harness, locked_round: u32) -> ConsensusState {
        let mut state = ConsensusState::new(
            1,
            h.chain.genesis_validators().clone(),
            Hash::ZERO,
            Hash::ZERO,
        );
        state.round = locked_round + 1;
        state.locked_round = locked_round;
        state.locked_block = Some(h.chain.genesis().clone());
        state
    }

    /// Receives the round 1 genesis proposal and prevotes it.
    async fn prevoted_genesis(h: &Harness) {
        h.engine.tick().await.unwrap();
        let proposal = Proposal {
            height: 1,
            round: 1,
            locked_round: 0,
            block: h.chain.genesis().clone(),
        };
        let msg = ConsensusMessage::proposal(proposal, &h.chain.genesis_hash(), &h.keys[2]);
        h.engine.new_consensus_message(msg, None).await.unwrap();
        h.engine.tick().await.unwrap();
        assert_eq!(h.engine.snapshot().await.step, Step::Prevote);
    }

    async fn own_vote(h: &Harness, kind: VoteKind, round: u32) -> Option<Vote> {
        let me = h.engine.address();
        let state = h.engine.inner.state.read().await;
        state.get_round(round).and_then(|rs| match kind {
            VoteKind::Prevote => rs.prevotes.get(&me).copied(),
            VoteKind::Precommit => rs.precommits.get(&me).copied(),
        })
    }

    #[tokio::test]
    async fn test_lock_rejects_older_locked_round() {
        let h = harness(4, 0, ConsensusConfig::default()).await;
        let state = locked_state(&h, 2);
        let other = other_block();

        for locked_round in [0, 1] {
            let proposal = Proposal {
                height: 1,
                round: 3,
                locked_round,
                block: other.clone(),
            };
            assert_eq!(prevote_choice(&state, &proposal, other.hash()), Hash::ZERO);
        }

        let same = Proposal {
            height: 1,
            round: 3,
            locked_round: 0,
            block: h.chain.genesis().clone(),
        };
        let genesis = h.chain.genesis_hash();
        assert_eq!(prevote_choice(&state, &same, genesis), genesis);
    }

    #[tokio::test]
    async fn test_lock_released_by_newer_majority() {
        let h = harness(4, 0, ConsensusConfig::default()).await;
        let genesis = h.chain.genesis_hash();
        let other = other_block();
        let proposal = Proposal {
            height: 1,
            round: 3,
            locked_round: 2,
            block: other.clone(),
        };

        let mut state = locked_state(&h, 1);
        for key in &h.keys[1..3] {
            record_prevote(&mut state, key, 2, other.hash(), &genesis);
        }
        assert_eq!(prevote_choice(&state, &proposal, other.hash()), Hash::ZERO);

        record_prevote(&mut state, &h.keys[3], 2, other.hash(), &genesis);
        assert_eq!(prevote_choice(&state, &proposal, other.hash()), other.hash());
    }

    #[tokio::test]
    async fn test_nil_majorities_advance_round() {
        let h = harness(4, 0, ConsensusConfig::default()).await;
        prevoted_genesis(&h).await;

        for key in 1..4 {
            let msg = vote(&h, key, VoteKind::Prevote, 1, Hash::ZERO);
            h.engine.new_consensus_message(msg, None).await.unwrap();
        }
        h.engine.tick().await.unwrap();
        let snapshot = h.engine.snapshot().await;
        assert_eq!(snapshot.step, Step::Precommit);
        assert_eq!(snapshot.locked_round, 0);
        assert!(own_vote(&h, VoteKind::Precommit, 1).await.unwrap().is_nil());

        for key in [1, 2] {
            let msg = vote(&h, key, VoteKind::Precommit, 1, Hash::ZERO);
            h.engine.new_consensus_message(msg, None).await.unwrap();
        }
        h.engine.tick().await.unwrap();
        let snapshot = h.engine.snapshot().await;
        assert_eq!(snapshot.round, 2);
        // (1 + 2) % 4: validator 3 proposes round 2.
        assert_eq!(snapshot.step, Step::Propose);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prevote_wait_timeout_sends_nil_precommit() {
        let h = harness(4, 0, ConsensusConfig::default()).await;
        prevoted_genesis(&h).await;

        let msg = vote(&h, 1, VoteKind::Prevote, 1, Hash::ZERO);
        h.engine.new_consensus_message(msg, None).await.unwrap();
        let msg = vote(&h, 2, VoteKind::Prevote, 1, other_block().hash());
        h.engine.new_consensus_message(msg, None).await.unwrap();
        h.engine.tick().await.unwrap();
        assert_eq!(h.engine.snapshot().await.step, Step::PrevoteWait);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.engine.snapshot().await.step, Step::Precommit);
        assert!(own_vote(&h, VoteKind::Precommit, 1).await.unwrap().is_nil());
    }

    #[tokio::test(start_paused = true)]
    async fn test_precommit_wait_timeout_advances_round() {
        let h = harness(4, 0, ConsensusConfig::default()).await;
        let genesis = h.chain.genesis_hash();
        prevoted_genesis(&h).await;

        for key in [1, 2] {
            let msg = vote(&h, key, VoteKind::Prevote, 1, genesis);
            h.engine.new_consensus_message(msg, None).await.unwrap();
        }
        h.engine.tick().await.unwrap();
        assert_eq!(h.engine.snapshot().await.step, Step::Precommit);

        let msg = vote(&h, 1, VoteKind::Precommit, 1, Hash::ZERO);
        h.engine.new_consensus_message(msg, None).await.unwrap();
        let msg = vote(&h, 2, VoteKind::Precommit, 1, other_block().hash());
        h.engine.new_consensus_message(msg, None).await.unwrap();
        h.engine.tick().await.unwrap();
        assert_eq!(h.engine.snapshot().await.step, Step::PrecommitWait);

        tokio::time::sleep(Duration::from_secs(10)).await;
        let snapshot = h.engine.snapshot().await;
        assert_eq!(snapshot.round, 2);
        assert_eq!(snapshot.step, Step::NewRound);
        assert_eq!(snapshot.locked_round, 1);
    }

    #[tokio::test]
    async fn test_proposer_reproposes_valid_block() {
        // Validator 3 proposes round 2 at height 1.
        let h = harness(4, 3, ConsensusConfig::default()).await;
        let genesis = h.chain.genesis_hash();
        prevoted_genesis(&h).await;

        for key in [1, 2] {
            let msg = vote(&h, key, VoteKind::Prevote, 1, genesis);
            h.engine.new_consensus_message(msg, None).await.unwrap();
        }
        h.engine.tick().await.unwrap();
        assert_eq!(h.engine.snapshot().await.valid_round, 1);

        let mut events = h.engine.subscribe();
        for key in 0..3 {
            let msg = vote(&h, key, VoteKind::Precommit, 1, Hash::ZERO);
            h.engine.new_consensus_message(msg, None).await.unwrap();
        }
        h.engine.tick().await.unwrap();

        let state = h.engine.inner.state.read().await;
        assert_eq!(state.round, 2);
        let proposal = state.get_round(2).and_then(|rs| rs.proposal.as_ref()).unwrap();
        assert_eq!(proposal.locked_round, 1);
        assert_eq!(proposal.block.hash(), genesis);
        drop(state);

        let mut proposed = None;
        while let Ok(event) = events.try_recv() {
            if let ConsensusEvent::Proposed { round, block_hash, .. } = event {
                proposed = Some((round, block_hash));
            }
        }
        assert_eq!(proposed, Some((2, genesis)));
        let prevote = own_vote(&h, VoteKind::Prevote, 2).await;
        assert_eq!(prevote.map(|v| v.block_hash), Some(genesis));
    }

    #[tokio::test]
    async fn test_nil_precommit_majority_at_last_round() {
        let h = harness(4, 0, ConsensusConfig::default()).await;
        h.engine.tick().await.unwrap();
        {
            let mut state = h.engine.inner.state.write().await;
            state.round = u32::MAX;
            state.step = Step::Precommit;
        }

        for key in 1..4 {
            let msg = vote(&h, key, VoteKind::Precommit, u32::MAX, Hash::ZERO);
            h.engine.new_consensus_message(msg, None).await.unwrap();
        }
        h.engine.tick().await.unwrap();
        assert_eq!(h.engine.snapshot().await.round, u32::MAX);
    }
}
