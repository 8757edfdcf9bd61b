//! Consensus error types.

use tendril_p2p::P2pError;
use tendril_storage::StorageError;
use tendril_types::{Hash, TypesError};
use thiserror::Error;

/// Errors that can occur during consensus and synchronization.
#[derive(Debug, Error)]
pub enum ConsensusError {
    /// Data model error.
    #[error(transparent)]
    Types(#[from] TypesError),

    /// Block store error.
    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    /// Peer communication error.
    #[error("p2p: {0}")]
    P2p(#[from] P2pError),

    /// A component was queried before it was ready.
    #[error("{0} is not initialized")]
    NotInitialized(&'static str),

    /// The stored genesis differs from the configured one.
    #[error("genesis mismatch: configured {expected}, stored {found}")]
    GenesisMismatch {
        /// Configured genesis hash.
        expected: Hash,
        /// Genesis hash found in the store.
        found: Hash,
    },

    /// A block failed validation.
    #[error("invalid block: {0}")]
    InvalidBlock(String),

    /// A consensus message failed validation.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Genesis configuration is invalid.
    #[error("invalid genesis: {0}")]
    InvalidGenesis(String),

    /// Configuration is invalid.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// A peer answered a request it should not have.
    #[error("bad response: {0}")]
    BadResponse(String),

    /// Commit attempted without a two-thirds precommit majority.
    #[error("no precommit majority at height {height} round {round}")]
    MissingMajority {
        /// Height of the attempted commit.
        height: u64,
        /// Round of the attempted commit.
        round: u32,
    },

    /// Transaction already pooled.
    #[error("duplicate transaction: {0}")]
    DuplicateTransaction(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A local invariant was violated.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl ConsensusError {
    /// Returns true for local invariant violations that must stop the node.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Fatal(_) | Self::MissingMajority { .. } | Self::GenesisMismatch { .. }
        )
    }

    /// Returns true if the error is a missing store entry.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_not_found())
    }
}

/// A specialized Result type for consensus operations.
pub type Result<T> = std::result::Result<T, ConsensusError>;
