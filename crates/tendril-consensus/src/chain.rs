//! Blockchain accessor over a block store.
//!
//! Heights start at 1 (genesis). Every write that moves the tip takes the
//! chain's write lock and re-reads the tip before acting.

use crate::error::{ConsensusError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tendril_storage::{BlockStore, StorageError};
use tendril_types::{
    Block, BlockBody, BlockHeader, Hash, Hashable, QuorumCertificate, ValidatorSet,
};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

/// Append-only chain of blocks addressed by height.
pub struct Blockchain {
    store: Arc<dyn BlockStore>,
    genesis: Block,
    genesis_hash: Hash,
    genesis_validators: ValidatorSet,
    lock: RwLock<()>,
    ready: AtomicBool,
}

impl Blockchain {
    /// Creates an accessor; call [`ready`](Self::ready) before use.
    pub fn new(store: Arc<dyn BlockStore>, genesis: Block, validators: ValidatorSet) -> Self {
        let genesis_hash = genesis.hash();
        Self {
            store,
            genesis,
            genesis_hash,
            genesis_validators: validators,
            lock: RwLock::new(()),
            ready: AtomicBool::new(false),
        }
    }

    /// Writes genesis into an empty store and checks a non-empty one.
    ///
    /// # Errors
    ///
    /// Returns [`ConsensusError::GenesisMismatch`] when the stored genesis is
    /// not the configured one; the store must be reset.
    pub async fn ready(&self) -> Result<()> {
        let _guard = self.lock.write().await;

        match self.store.height().await {
            Ok(_) => {}
            Err(StorageError::NotFound(_)) => {
                self.store
                    .set_header(1, self.genesis.header.clone())
                    .await?;
                self.store.set_body(1, self.genesis.body.clone()).await?;
                self.store.set_height(1).await?;
                info!(block_hash = %self.genesis_hash, "wrote genesis block");
            }
            Err(e) => return Err(e.into()),
        }
        self.store
            .set_validator_set(self.genesis_validators.clone())
            .await?;

        let found = self.store.header(1).await?.hash();
        if found != self.genesis_hash {
            return Err(ConsensusError::GenesisMismatch {
                expected: self.genesis_hash,
                found,
            });
        }

        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.ready.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(ConsensusError::NotInitialized("blockchain"))
        }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<dyn BlockStore> {
        &self.store
    }

    /// Returns the configured genesis block.
    pub fn genesis(&self) -> &Block {
        &self.genesis
    }

    /// Returns the configured genesis hash.
    pub fn genesis_hash(&self) -> Hash {
        self.genesis_hash
    }

    /// Returns the initial validator set.
    pub fn genesis_validators(&self) -> &ValidatorSet {
        &self.genesis_validators
    }

    /// Shared access excluding tip writers.
    pub async fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read().await
    }

    async fn write(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write().await
    }

    /// Returns the tip height.
    pub async fn height(&self) -> Result<u64> {
        self.ensure_ready()?;
        Ok(self.store.height().await?)
    }

    /// Highest height whose certificate is known.
    ///
    /// This is the tip once its certificate is stored, the height below
    /// otherwise (only the genesis tip lacks one).
    pub async fn consented_height(&self) -> Result<u64> {
        let tip = self.height().await?;
        match self.store.last_consensus().await {
            Ok(_) => Ok(tip),
            Err(StorageError::NotFound(_)) => Ok(tip - 1),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns the header at `height`.
    pub async fn header_of(&self, height: u64) -> Result<BlockHeader> {
        self.ensure_ready()?;
        Ok(self.store.header(height).await?)
    }

    /// Returns the body at `height`.
    pub async fn body_of(&self, height: u64) -> Result<BlockBody> {
        self.ensure_ready()?;
        Ok(self.store.body(height).await?)
    }

    /// Returns the block hash at `height`.
    pub async fn hash_of(&self, height: u64) -> Result<Hash> {
        Ok(self.header_of(height).await?.hash())
    }

    /// Returns the block at `height`.
    pub async fn block_of(&self, height: u64) -> Result<Block> {
        let header = self.header_of(height).await?;
        let body = self.body_of(height).await?;
        Ok(Block { header, body })
    }

    /// Returns the certificate that finalized `height`.
    ///
    /// The tip's certificate is stored on its own; every other certificate
    /// lives in the body of the following block.
    pub async fn consensus_of(&self, height: u64) -> Result<QuorumCertificate> {
        let tip = self.height().await?;
        if height == tip {
            Ok(self.store.last_consensus().await?)
        } else if height < tip {
            Ok(self.body_of(height + 1).await?.last_block_consensus)
        } else {
            Err(StorageError::NotFound(format!("consensus at height {}", height)).into())
        }
    }

    /// Validator set declared by the header at `height` for the next height.
    pub async fn validator_set_at(&self, height: u64) -> Result<ValidatorSet> {
        if height == 0 {
            return Ok(self.genesis_validators.clone());
        }
        let root = self.header_of(height).await?.next_validator_set_root;
        Ok(self.store.validator_set(&root).await?)
    }

    /// Appends `block` at `tip + 1` with its certificate.
    ///
    /// Returns `false` without writing when the tip moved and `block` no
    /// longer extends it. Validation is the caller's job.
    pub async fn append(&self, block: &Block, consensus: QuorumCertificate) -> Result<bool> {
        self.ensure_ready()?;
        let _guard = self.write().await;

        let tip = self.store.height().await?;
        let height = block.height();
        if height != tip + 1 {
            debug!(height, tip, "append raced; tip moved");
            return Ok(false);
        }

        self.store.set_header(height, block.header.clone()).await?;
        self.store.set_body(height, block.body.clone()).await?;
        self.store.set_height(height).await?;
        self.store.set_last_consensus(consensus).await?;
        Ok(true)
    }

    /// Stores the certificate of a tip that was written without one.
    pub async fn attach_tip_consensus(
        &self,
        height: u64,
        consensus: QuorumCertificate,
    ) -> Result<bool> {
        self.ensure_ready()?;
        let _guard = self.write().await;

        if self.store.height().await? != height {
            return Ok(false);
        }
        match self.store.last_consensus().await {
            Ok(_) => Ok(false),
            Err(StorageError::NotFound(_)) => {
                self.store.set_last_consensus(consensus).await?;
                Ok(true)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Moves the tip to `target` after its headers and bodies were stored.
    ///
    /// Returns `false` when the tip already reached `target`.
    pub async fn advance_to(&self, target: u64, consensus: QuorumCertificate) -> Result<bool> {
        self.ensure_ready()?;
        let _guard = self.write().await;

        let tip = self.store.height().await?;
        if target <= tip {
            return Ok(false);
        }
        self.store.set_height(target).await?;
        self.store.set_last_consensus(consensus).await?;
        Ok(true)
    }
}
