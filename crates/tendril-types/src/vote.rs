//! Votes and weighted vote aggregation.
//!
//! A [`VoteSet`] collects already-authenticated votes of one kind for a
//! single height and round. Thresholds are compared with integer arithmetic
//! (`power * 3 > total * 2`), so power of exactly two thirds is not a
//! supermajority.

use crate::crypto::{Address, Signature};
use crate::error::{Result, TypesError};
use crate::hash::{Hash, Hashable};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A vote for a block (or for nil) at a height and round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    /// Block height.
    pub height: u64,

    /// Round within the height, starting at 1.
    pub round: u32,

    /// Voted block hash; [`Hash::ZERO`] votes for nil.
    pub block_hash: Hash,
}

impl Vote {
    /// Creates a vote for a block.
    pub fn new(height: u64, round: u32, block_hash: Hash) -> Self {
        Self {
            height,
            round,
            block_hash,
        }
    }

    /// Creates a vote for nil.
    pub fn nil(height: u64, round: u32) -> Self {
        Self::new(height, round, Hash::ZERO)
    }

    /// Returns true for a nil vote.
    pub fn is_nil(&self) -> bool {
        self.block_hash.is_zero()
    }
}

impl Hashable for Vote {
    fn hash(&self) -> Hash {
        Hash::digest_parts(&[
            &self.height.to_be_bytes(),
            &self.round.to_be_bytes(),
            self.block_hash.as_bytes(),
        ])
    }
}

/// The two voting steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteKind {
    /// First-stage vote.
    Prevote,
    /// Second-stage vote; a supermajority commits.
    Precommit,
}

/// Returns true once `power` is strictly more than two thirds of `total`.
pub fn exceeds_two_thirds(power: u64, total: u64) -> bool {
    u128::from(power) * 3 > u128::from(total) * 2
}

/// Returns true once `power` is strictly more than one third of `total`.
pub fn exceeds_one_third(power: u64, total: u64) -> bool {
    u128::from(power) * 3 > u128::from(total)
}

/// Aggregated votes of one kind for one height and round.
#[derive(Debug, Clone)]
pub struct VoteSet {
    kind: VoteKind,
    height: u64,
    round: u32,
    total_power: u64,
    votes: HashMap<Address, (Vote, Signature)>,
    power_seen: u64,
    power_by_block: HashMap<Hash, u64>,
    two_thirds_majority: Option<Vote>,
}

impl VoteSet {
    /// Creates an empty vote set weighted against `total_power`.
    pub fn new(kind: VoteKind, height: u64, round: u32, total_power: u64) -> Self {
        Self {
            kind,
            height,
            round,
            total_power,
            votes: HashMap::new(),
            power_seen: 0,
            power_by_block: HashMap::new(),
            two_thirds_majority: None,
        }
    }

    /// Returns the vote kind.
    pub fn kind(&self) -> VoteKind {
        self.kind
    }

    /// Returns the height.
    pub fn height(&self) -> u64 {
        self.height
    }

    /// Returns the round.
    pub fn round(&self) -> u32 {
        self.round
    }

    /// Adds a vote from an authenticated validator with the given power.
    ///
    /// # Errors
    ///
    /// Returns [`TypesError::DuplicateVote`] if `address` already voted here.
    pub fn add(
        &mut self,
        address: Address,
        power: u64,
        vote: Vote,
        signature: Signature,
    ) -> Result<()> {
        if self.votes.contains_key(&address) {
            return Err(TypesError::DuplicateVote(address));
        }
        self.votes.insert(address, (vote, signature));

        self.power_seen = self.power_seen.saturating_add(power);
        let block_power = self.power_by_block.entry(vote.block_hash).or_insert(0);
        *block_power = block_power.saturating_add(power);

        if self.two_thirds_majority.is_none() && exceeds_two_thirds(*block_power, self.total_power)
        {
            self.two_thirds_majority = Some(vote);
        }
        Ok(())
    }

    /// Checks whether `address` already voted.
    pub fn has_vote(&self, address: &Address) -> bool {
        self.votes.contains_key(address)
    }

    /// Returns the vote cast by `address`.
    pub fn get(&self, address: &Address) -> Option<&Vote> {
        self.votes.get(address).map(|(vote, _)| vote)
    }

    /// Returns the number of votes.
    pub fn len(&self) -> usize {
        self.votes.len()
    }

    /// Returns true if no votes were added.
    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }

    /// The first vote whose block gathered more than two thirds of the power.
    pub fn two_thirds_majority(&self) -> Option<&Vote> {
        self.two_thirds_majority.as_ref()
    }

    /// True once all votes together carry more than two thirds of the power.
    pub fn two_thirds_any(&self) -> bool {
        exceeds_two_thirds(self.power_seen, self.total_power)
    }

    /// True once all votes together carry more than one third of the power.
    pub fn one_third_any(&self) -> bool {
        exceeds_one_third(self.power_seen, self.total_power)
    }

    /// Returns the power accumulated for `block_hash`.
    pub fn power_for(&self, block_hash: &Hash) -> u64 {
        self.power_by_block.get(block_hash).copied().unwrap_or(0)
    }

    /// Signatures of every vote for `block_hash`, ordered by signer address.
    pub fn signatures_for(&self, block_hash: &Hash) -> Vec<Signature> {
        let mut entries: Vec<_> = self
            .votes
            .iter()
            .filter(|(_, (vote, _))| vote.block_hash == *block_hash)
            .collect();
        entries.sort_by_key(|(address, _)| **address);
        entries
            .into_iter()
            .map(|(_, (_, signature))| signature.clone())
            .collect()
    }
}
