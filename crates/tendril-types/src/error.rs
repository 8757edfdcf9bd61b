//! Data model error types.

use crate::{Address, Hash};
use thiserror::Error;

/// Errors raised by the core data model.
#[derive(Debug, Error)]
pub enum TypesError {
    /// A Merkle proof was requested for an item that is not in the sequence.
    #[error("target does not exist: {0}")]
    TargetNotFound(Hash),

    /// The address is not a member of the validator set.
    #[error("unknown validator: {0}")]
    UnknownValidator(Address),

    /// The validator set lists the same address twice.
    #[error("duplicate validator: {0}")]
    DuplicateValidator(Address),

    /// The validator set has no members.
    #[error("validator set is empty")]
    EmptyValidatorSet,

    /// A validator already voted in this vote set.
    #[error("duplicate vote from {0}")]
    DuplicateVote(Address),

    /// The signature does not verify against its public key.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// A block's committed roots do not match its contents.
    #[error("invalid block: {0}")]
    InvalidBlock(String),

    /// A quorum certificate does not prove a supermajority.
    #[error("invalid quorum certificate: {0}")]
    InvalidCertificate(String),

    /// Hex decoding failed.
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
}

/// A specialized Result type for data model operations.
pub type Result<T> = std::result::Result<T, TypesError>;
