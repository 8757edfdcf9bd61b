//! Block structure.
//!
//! Blocks carry opaque application transactions plus the quorum certificate
//! that finalized their parent. The header commits to both through Merkle
//! roots, so a header alone is enough to check a body fetched later.

use crate::certificate::QuorumCertificate;
use crate::error::{Result, TypesError};
use crate::hash::{Hash, Hashable};
use crate::merkle;
use serde::{Deserialize, Serialize};

/// An opaque application transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Transaction(pub Vec<u8>);

impl Transaction {
    /// Creates a transaction from raw bytes.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self(data.into())
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Hashable for Transaction {
    fn hash(&self) -> Hash {
        Hash::digest(&self.0)
    }
}

/// A block header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block height (1 = genesis).
    pub height: u64,

    /// Timestamp (unix milliseconds).
    pub timestamp: u64,

    /// Hash of the parent block; zero for genesis.
    pub last_block_hash: Hash,

    /// Merkle root of the transactions.
    pub transactions_root: Hash,

    /// Merkle root of the parent's certificate signatures.
    pub last_block_consensus_root: Hash,

    /// Hash of the validator set that finalizes the next height.
    pub next_validator_set_root: Hash,

    /// Application state hash after executing the parent block.
    pub app_state_hash: Hash,
}

impl Hashable for BlockHeader {
    fn hash(&self) -> Hash {
        Hash::digest_parts(&[
            &self.height.to_be_bytes(),
            &self.timestamp.to_be_bytes(),
            self.last_block_hash.as_bytes(),
            self.transactions_root.as_bytes(),
            self.last_block_consensus_root.as_bytes(),
            self.next_validator_set_root.as_bytes(),
            self.app_state_hash.as_bytes(),
        ])
    }
}

/// A block body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockBody {
    /// Ordered transactions.
    pub transactions: Vec<Transaction>,

    /// Certificate that finalized the parent block.
    pub last_block_consensus: QuorumCertificate,
}

impl BlockBody {
    /// Checks that this body is the one committed to by `header`.
    ///
    /// # Errors
    ///
    /// Returns [`TypesError::InvalidBlock`] if either root differs.
    pub fn validate_against(&self, header: &BlockHeader) -> Result<()> {
        if merkle::root(&self.transactions) != header.transactions_root {
            return Err(TypesError::InvalidBlock(format!(
                "transactions root mismatch at height {}",
                header.height
            )));
        }
        if self.last_block_consensus.root() != header.last_block_consensus_root {
            return Err(TypesError::InvalidBlock(format!(
                "last block consensus root mismatch at height {}",
                header.height
            )));
        }
        Ok(())
    }
}

/// A full block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block header.
    pub header: BlockHeader,

    /// Block body.
    pub body: BlockBody,
}

impl Block {
    /// Assembles a block, computing the header's Merkle roots from the body.
    pub fn new(
        height: u64,
        timestamp: u64,
        last_block_hash: Hash,
        next_validator_set_root: Hash,
        app_state_hash: Hash,
        transactions: Vec<Transaction>,
        last_block_consensus: QuorumCertificate,
    ) -> Self {
        let header = BlockHeader {
            height,
            timestamp,
            last_block_hash,
            transactions_root: merkle::root(&transactions),
            last_block_consensus_root: last_block_consensus.root(),
            next_validator_set_root,
            app_state_hash,
        };
        Self {
            header,
            body: BlockBody {
                transactions,
                last_block_consensus,
            },
        }
    }

    /// Creates the genesis block at height 1.
    pub fn genesis(timestamp: u64, validator_set_root: Hash, app_state_hash: Hash) -> Self {
        Self::new(
            1,
            timestamp,
            Hash::ZERO,
            validator_set_root,
            app_state_hash,
            Vec::new(),
            QuorumCertificate::empty(),
        )
    }

    /// Returns the block hash (the header hash).
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// Returns the block height.
    pub fn height(&self) -> u64 {
        self.header.height
    }

    /// Returns the number of transactions.
    pub fn tx_count(&self) -> usize {
        self.body.transactions.len()
    }

    /// Checks the header roots against the body.
    ///
    /// # Errors
    ///
    /// Returns [`TypesError::InvalidBlock`] if either root differs.
    pub fn validate(&self) -> Result<()> {
        self.body.validate_against(&self.header)
    }
}
