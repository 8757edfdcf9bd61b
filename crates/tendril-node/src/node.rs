//! Single-process wiring of the consensus components.

use crate::config::NodeConfig;
use anyhow::{anyhow, Context};
use std::future::Future;
use std::sync::Arc;
use tendril_consensus::{
    Blockchain, ConsensusEngine, ConsensusEvent, DigestExecutor, Mempool, MessageRouter,
    SyncEvent, Synchronizer,
};
use tendril_p2p::PeerSet;
use tendril_storage::MemoryStore;
use tendril_types::Signer;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A running node's components.
pub struct Node {
    chain: Arc<Blockchain>,
    executor: Arc<DigestExecutor>,
    mempool: Arc<Mempool>,
    peers: Arc<PeerSet>,
    sync: Synchronizer,
    engine: ConsensusEngine,
    router: MessageRouter,
    cancel: CancellationToken,
}

impl Node {
    /// Builds the node and writes genesis.
    pub async fn build(config: NodeConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let genesis = config.load_genesis()?;
        let signer = config.signer()?;

        let chain = Arc::new(Blockchain::new(
            Arc::new(MemoryStore::new()),
            genesis.block()?,
            genesis.validator_set()?,
        ));
        chain.ready().await.context("failed to initialize chain")?;

        let mempool = Arc::new(Mempool::new((&config.mempool).into()));
        let peers = Arc::new(PeerSet::new());
        let sync = Synchronizer::new(
            config.sync.clone(),
            chain.clone(),
            peers.clone(),
            mempool.clone(),
        );

        let executor = Arc::new(DigestExecutor::new(chain.clone()));
        executor.initialize().await?;

        let address = signer.address();
        let is_validator = chain.genesis_validators().exists(&address);
        let engine = ConsensusEngine::new(
            config.consensus.clone(),
            chain.clone(),
            Arc::new(signer),
            executor.clone(),
            mempool.clone(),
            peers.clone(),
            sync.clone(),
        );
        let router = MessageRouter::new(engine.clone(), sync.clone(), mempool.clone(), peers.clone());

        info!(
            chain_id = %genesis.chain_id,
            genesis_hash = %chain.genesis_hash(),
            validators = genesis.validators.len(),
            %address,
            is_validator,
            "node built"
        );
        if !is_validator {
            warn!(%address, "signer is not in the validator set; running as observer");
        }

        Ok(Self {
            chain,
            executor,
            mempool,
            peers,
            sync,
            engine,
            router,
            cancel: CancellationToken::new(),
        })
    }

    /// The local chain.
    pub fn chain(&self) -> &Arc<Blockchain> {
        &self.chain
    }

    /// The transaction pool.
    pub fn mempool(&self) -> &Arc<Mempool> {
        &self.mempool
    }

    /// The peer set transports register connections in.
    pub fn peers(&self) -> &Arc<PeerSet> {
        &self.peers
    }

    /// Entry point for peer traffic.
    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    /// Runs until `shutdown` resolves or a component reports a fatal error.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        let mut consensus_events = self.engine.subscribe();
        let mut sync_events = self.sync.subscribe();

        let executor_task = tokio::spawn(
            self.executor
                .clone()
                .run(self.sync.subscribe(), self.cancel.clone()),
        );
        let sync_task = self.sync.start();
        let engine_task = self.engine.start();
        info!("node running");

        tokio::pin!(shutdown);
        let result = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break Ok(());
                }
                event = consensus_events.recv() => match event {
                    Ok(ConsensusEvent::Error { message, fatal: true }) => {
                        break Err(anyhow!("consensus failed: {}", message));
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break Err(anyhow!("consensus events closed")),
                },
                event = sync_events.recv() => match event {
                    Ok(SyncEvent::Error { message, fatal: true }) => {
                        break Err(anyhow!("synchronizer failed: {}", message));
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break Err(anyhow!("sync events closed")),
                },
            }
        };

        self.engine.stop();
        self.sync.stop();
        self.cancel.cancel();
        let _ = tokio::join!(engine_task, sync_task, executor_task);

        let height = self.chain.height().await?;
        info!(height, "node stopped");
        result
    }
}
