//! Storage backend traits.
//!
//! Defines the interface every block store must implement. Missing items
//! surface as [`StorageError::NotFound`](crate::StorageError::NotFound), kept
//! distinct from backend failures.

use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tendril_types::{BlockBody, BlockHeader, Hash, QuorumCertificate, ValidatorSet};

/// Trait for block storage backends.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Retrieves the header at `height`.
    async fn header(&self, height: u64) -> Result<BlockHeader>;

    /// Stores the header at `height`.
    async fn set_header(&self, height: u64, header: BlockHeader) -> Result<()>;

    /// Retrieves the body at `height`.
    async fn body(&self, height: u64) -> Result<BlockBody>;

    /// Stores the body at `height`.
    async fn set_body(&self, height: u64, body: BlockBody) -> Result<()>;

    /// Retrieves the current tip height.
    async fn height(&self) -> Result<u64>;

    /// Stores the current tip height.
    async fn set_height(&self, height: u64) -> Result<()>;

    /// Retrieves the certificate that finalized the tip.
    async fn last_consensus(&self) -> Result<QuorumCertificate>;

    /// Stores the certificate that finalized the tip.
    async fn set_last_consensus(&self, consensus: QuorumCertificate) -> Result<()>;

    /// Retrieves a validator set by its hash.
    async fn validator_set(&self, hash: &Hash) -> Result<ValidatorSet>;

    /// Stores a validator set under its hash.
    async fn set_validator_set(&self, validators: ValidatorSet) -> Result<()>;
}

#[async_trait]
impl<T: BlockStore + ?Sized> BlockStore for Arc<T> {
    async fn header(&self, height: u64) -> Result<BlockHeader> {
        (**self).header(height).await
    }

    async fn set_header(&self, height: u64, header: BlockHeader) -> Result<()> {
        (**self).set_header(height, header).await
    }

    async fn body(&self, height: u64) -> Result<BlockBody> {
        (**self).body(height).await
    }

    async fn set_body(&self, height: u64, body: BlockBody) -> Result<()> {
        (**self).set_body(height, body).await
    }

    async fn height(&self) -> Result<u64> {
        (**self).height().await
    }

    async fn set_height(&self, height: u64) -> Result<()> {
        (**self).set_height(height).await
    }

    async fn last_consensus(&self) -> Result<QuorumCertificate> {
        (**self).last_consensus().await
    }

    async fn set_last_consensus(&self, consensus: QuorumCertificate) -> Result<()> {
        (**self).set_last_consensus(consensus).await
    }

    async fn validator_set(&self, hash: &Hash) -> Result<ValidatorSet> {
        (**self).validator_set(hash).await
    }

    async fn set_validator_set(&self, validators: ValidatorSet) -> Result<()> {
        (**self).set_validator_set(validators).await
    }
}
