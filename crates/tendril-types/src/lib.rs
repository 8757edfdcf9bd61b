//! Core data model for Tendril.
//!
//! This crate holds everything the consensus engine and the synchronizer
//! agree on byte for byte:
//!
//! - [`Hash`] and the [`Hashable`] trait
//! - the [`merkle`] commitment scheme used for transaction lists,
//!   certificate signature sets and validator sets
//! - [`Keypair`], [`Signer`] and [`Signature`] (Ed25519)
//! - [`ValidatorSet`], [`Vote`] and weighted [`VoteSet`] aggregation
//! - [`QuorumCertificate`]
//! - [`Block`], [`BlockHeader`], [`BlockBody`]
//! - signed [`ConsensusMessage`]s

mod block;
mod certificate;
mod crypto;
mod error;
mod hash;
pub mod merkle;
mod message;
mod validator;
mod vote;

pub use block::{Block, BlockBody, BlockHeader, Transaction};
pub use certificate::QuorumCertificate;
pub use crypto::{Address, Keypair, Signature, Signer};
pub use error::{Result, TypesError};
pub use hash::{Hash, Hashable};
pub use message::{signing_digest, ConsensusMessage, MessageKind, Proposal};
pub use validator::{Validator, ValidatorSet};
pub use vote::{exceeds_one_third, exceeds_two_thirds, Vote, VoteKind, VoteSet};
