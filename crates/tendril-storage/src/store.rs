//! In-memory block store.

use crate::{BlockStore, Result, StorageError};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use tendril_types::{BlockBody, BlockHeader, Hash, QuorumCertificate, ValidatorSet};

#[derive(Debug, Default)]
struct Tables {
    headers: HashMap<u64, BlockHeader>,
    bodies: HashMap<u64, BlockBody>,
    height: Option<u64>,
    last_consensus: Option<QuorumCertificate>,
    validator_sets: HashMap<Hash, ValidatorSet>,
}

/// Block store kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored headers.
    pub fn header_count(&self) -> usize {
        self.tables.read().headers.len()
    }

    /// Returns the number of stored bodies.
    pub fn body_count(&self) -> usize {
        self.tables.read().bodies.len()
    }
}

#[async_trait]
impl BlockStore for MemoryStore {
    async fn header(&self, height: u64) -> Result<BlockHeader> {
        self.tables
            .read()
            .headers
            .get(&height)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("header at height {}", height)))
    }

    async fn set_header(&self, height: u64, header: BlockHeader) -> Result<()> {
        if header.height != height {
            return Err(StorageError::Corruption(format!(
                "header for height {} stored at {}",
                header.height, height
            )));
        }
        self.tables.write().headers.insert(height, header);
        tracing::trace!(height, "stored header");
        Ok(())
    }

    async fn body(&self, height: u64) -> Result<BlockBody> {
        self.tables
            .read()
            .bodies
            .get(&height)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("body at height {}", height)))
    }

    async fn set_body(&self, height: u64, body: BlockBody) -> Result<()> {
        self.tables.write().bodies.insert(height, body);
        tracing::trace!(height, "stored body");
        Ok(())
    }

    async fn height(&self) -> Result<u64> {
        self.tables
            .read()
            .height
            .ok_or_else(|| StorageError::NotFound("height".into()))
    }

    async fn set_height(&self, height: u64) -> Result<()> {
        self.tables.write().height = Some(height);
        Ok(())
    }

    async fn last_consensus(&self) -> Result<QuorumCertificate> {
        self.tables
            .read()
            .last_consensus
            .clone()
            .ok_or_else(|| StorageError::NotFound("last consensus".into()))
    }

    async fn set_last_consensus(&self, consensus: QuorumCertificate) -> Result<()> {
        self.tables.write().last_consensus = Some(consensus);
        Ok(())
    }

    async fn validator_set(&self, hash: &Hash) -> Result<ValidatorSet> {
        self.tables
            .read()
            .validator_sets
            .get(hash)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("validator set {}", hash)))
    }

    async fn set_validator_set(&self, validators: ValidatorSet) -> Result<()> {
        let hash = validators.hash();
        self.tables.write().validator_sets.insert(hash, validators);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tendril_types::{Block, Keypair, Signer, Validator};

    fn genesis() -> Block {
        Block::genesis(0, Hash::digest(b"validators"), Hash::ZERO)
    }

    #[tokio::test]
    async fn test_missing_items_are_not_found() {
        let store = MemoryStore::new();

        assert!(store.height().await.unwrap_err().is_not_found());
        assert!(store.header(1).await.unwrap_err().is_not_found());
        assert!(store.body(1).await.unwrap_err().is_not_found());
        assert!(store.last_consensus().await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_header_body_roundtrip() {
        let store = MemoryStore::new();
        let block = genesis();

        store.set_header(1, block.header.clone()).await.unwrap();
        store.set_body(1, block.body.clone()).await.unwrap();
        store.set_height(1).await.unwrap();

        assert_eq!(store.header(1).await.unwrap(), block.header);
        assert_eq!(store.body(1).await.unwrap(), block.body);
        assert_eq!(store.height().await.unwrap(), 1);
        assert_eq!(store.header_count(), 1);
    }

    #[tokio::test]
    async fn test_header_height_mismatch_rejected() {
        let store = MemoryStore::new();
        let result = store.set_header(2, genesis().header).await;
        assert!(matches!(result, Err(StorageError::Corruption(_))));
    }

    #[tokio::test]
    async fn test_validator_set_by_hash() {
        let store = MemoryStore::new();
        let set = ValidatorSet::new(vec![Validator::new(Keypair::from_seed(0).address(), 1)])
            .unwrap();
        let hash = set.hash();

        store.set_validator_set(set.clone()).await.unwrap();
        assert_eq!(store.validator_set(&hash).await.unwrap(), set);
        assert!(store
            .validator_set(&Hash::ZERO)
            .await
            .unwrap_err()
            .is_not_found());
    }
}
