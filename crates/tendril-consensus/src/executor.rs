//! Application executor seam.
//!
//! The engine runs consensus for `app_state().height + 1` and proposes
//! blocks that commit to `app_state().state_hash`.

use crate::chain::Blockchain;
use crate::error::{ConsensusError, Result};
use crate::events::SyncEvent;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use tendril_types::Hash;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Last executed application state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppState {
    /// Last executed height, 0 before genesis executes.
    pub height: u64,

    /// State hash after executing `height`.
    pub state_hash: Hash,
}

/// Executes committed blocks against the application.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Returns the last executed state.
    ///
    /// # Errors
    ///
    /// Returns [`ConsensusError::NotInitialized`] before initialization.
    async fn app_state(&self) -> Result<AppState>;

    /// Subscribes to newly executed states.
    fn subscribe(&self) -> broadcast::Receiver<AppState>;
}

/// Executor that folds each block's transaction root into the state hash.
///
/// Blocks without transactions leave the state hash unchanged.
pub struct DigestExecutor {
    chain: Arc<Blockchain>,
    state: RwLock<Option<AppState>>,
    events: broadcast::Sender<AppState>,
}

impl DigestExecutor {
    /// Creates an executor over `chain`.
    pub fn new(chain: Arc<Blockchain>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            chain,
            state: RwLock::new(None),
            events,
        }
    }

    /// Sets the pre-genesis state from the genesis block and executes every
    /// consented block already in the store.
    pub async fn initialize(&self) -> Result<AppState> {
        let genesis = AppState {
            height: 0,
            state_hash: self.chain.genesis().header.app_state_hash,
        };
        {
            let mut state = self.state.write();
            if state.is_none() {
                *state = Some(genesis);
            }
        }
        self.execute_available().await
    }

    /// Next state after applying a block with `transactions_root`.
    pub fn next_state_hash(prev: &Hash, tx_count: usize, transactions_root: &Hash) -> Hash {
        if tx_count == 0 {
            *prev
        } else {
            Hash::digest_parts(&[prev.as_bytes(), transactions_root.as_bytes()])
        }
    }

    /// Executes blocks up to the consented height.
    pub async fn execute_available(&self) -> Result<AppState> {
        let mut current = self.app_state().await?;
        let target = self.chain.consented_height().await?;

        while current.height < target {
            let height = current.height + 1;
            let block = self.chain.block_of(height).await?;
            let next = AppState {
                height,
                state_hash: Self::next_state_hash(
                    &current.state_hash,
                    block.tx_count(),
                    &block.header.transactions_root,
                ),
            };

            *self.state.write() = Some(next);
            let _ = self.events.send(next);
            info!(
                height,
                tx_count = block.tx_count(),
                state_hash = %next.state_hash,
                "executed block"
            );
            current = next;
        }
        Ok(current)
    }

    /// Executes blocks as the synchronizer appends them.
    pub async fn run(
        self: Arc<Self>,
        mut sync_events: broadcast::Receiver<SyncEvent>,
        cancel: CancellationToken,
    ) {
        if let Err(e) = self.execute_available().await {
            warn!(error = %e, "initial execution failed");
        }

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = sync_events.recv() => event,
            };
            match event {
                Ok(SyncEvent::BlockAppended { .. }) | Ok(SyncEvent::CaughtUp { .. }) => {}
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "executor lagged behind sync events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
            if let Err(e) = self.execute_available().await {
                warn!(error = %e, "block execution failed");
            }
        }
    }
}

#[async_trait]
impl Executor for DigestExecutor {
    async fn app_state(&self) -> Result<AppState> {
        (*self.state.read()).ok_or(ConsensusError::NotInitialized("executor"))
    }

    fn subscribe(&self) -> broadcast::Receiver<AppState> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genesis::generate_devnet_genesis;
    use tendril_storage::MemoryStore;
    use tendril_types::{Block, QuorumCertificate, Transaction, Vote};

    async fn ready_chain() -> Arc<Blockchain> {
        let genesis = generate_devnet_genesis(1);
        let chain = Arc::new(Blockchain::new(
            Arc::new(MemoryStore::new()),
            genesis.block().unwrap(),
            genesis.validator_set().unwrap(),
        ));
        chain.ready().await.unwrap();
        chain
    }

    fn qc(height: u64, hash: Hash) -> QuorumCertificate {
        QuorumCertificate::new(Vote::new(height, 1, hash), vec![])
    }

    #[tokio::test]
    async fn test_not_initialized() {
        let executor = DigestExecutor::new(ready_chain().await);
        assert!(matches!(
            executor.app_state().await,
            Err(ConsensusError::NotInitialized("executor"))
        ));
    }

    #[tokio::test]
    async fn test_executes_consented_blocks_only() {
        let chain = ready_chain().await;
        let executor = DigestExecutor::new(chain.clone());
        let mut events = executor.subscribe();

        let state = executor.initialize().await.unwrap();
        assert_eq!(state.height, 0);

        chain
            .attach_tip_consensus(1, qc(1, chain.genesis_hash()))
            .await
            .unwrap();
        let state = executor.execute_available().await.unwrap();
        assert_eq!(state.height, 1);
        assert_eq!(state.state_hash, Hash::ZERO);
        assert_eq!(events.recv().await.unwrap(), state);

        let block = Block::new(
            2,
            1,
            chain.genesis_hash(),
            chain.genesis_validators().hash(),
            state.state_hash,
            vec![Transaction::new(b"a".to_vec())],
            chain.consensus_of(1).await.unwrap(),
        );
        chain.append(&block, qc(2, block.hash())).await.unwrap();

        let state = executor.execute_available().await.unwrap();
        assert_eq!(state.height, 2);
        assert_eq!(
            state.state_hash,
            DigestExecutor::next_state_hash(&Hash::ZERO, 1, &block.header.transactions_root)
        );
        assert_ne!(state.state_hash, Hash::ZERO);
    }
}
