//! Validator set management.
//!
//! Validators are the weighted participants of consensus. A set is fixed for
//! the duration of a height and is identified by the Merkle root of its
//! ordered members.

use crate::crypto::Address;
use crate::error::{Result, TypesError};
use crate::hash::{Hash, Hashable};
use crate::merkle;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A validator in the consensus network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    /// Signer address.
    pub address: Address,

    /// Voting power.
    pub vote_power: u64,
}

impl Validator {
    /// Creates a new validator.
    pub fn new(address: Address, vote_power: u64) -> Self {
        Self {
            address,
            vote_power,
        }
    }
}

impl Hashable for Validator {
    fn hash(&self) -> Hash {
        Hash::digest_parts(&[self.address.as_bytes(), &self.vote_power.to_be_bytes()])
    }
}

/// An ordered set of validators, unique by address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Validator>", into = "Vec<Validator>")]
pub struct ValidatorSet {
    validators: Vec<Validator>,
    index: HashMap<Address, usize>,
    total_power: u64,
}

impl ValidatorSet {
    /// Creates a validator set preserving the given order.
    ///
    /// # Errors
    ///
    /// Fails if the list is empty or repeats an address.
    pub fn new(validators: Vec<Validator>) -> Result<Self> {
        if validators.is_empty() {
            return Err(TypesError::EmptyValidatorSet);
        }

        let mut index = HashMap::with_capacity(validators.len());
        for (i, v) in validators.iter().enumerate() {
            if index.insert(v.address, i).is_some() {
                return Err(TypesError::DuplicateValidator(v.address));
            }
        }

        let total_power = validators.iter().map(|v| v.vote_power).sum();

        Ok(Self {
            validators,
            index,
            total_power,
        })
    }

    /// Returns all validators in order.
    pub fn validators(&self) -> &[Validator] {
        &self.validators
    }

    /// Returns the number of validators.
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Always false; a set has at least one member.
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Returns the sum of all voting power.
    pub fn total_power(&self) -> u64 {
        self.total_power
    }

    /// Returns the voting power of `address`.
    ///
    /// # Errors
    ///
    /// Returns [`TypesError::UnknownValidator`] if the address is not a member.
    pub fn power_of(&self, address: &Address) -> Result<u64> {
        self.get(address)
            .map(|v| v.vote_power)
            .ok_or(TypesError::UnknownValidator(*address))
    }

    /// Gets a validator by address.
    pub fn get(&self, address: &Address) -> Option<&Validator> {
        self.index.get(address).and_then(|&i| self.validators.get(i))
    }

    /// Checks whether an address is a member.
    pub fn exists(&self, address: &Address) -> bool {
        self.index.contains_key(address)
    }

    /// Merkle root over the ordered validators.
    pub fn hash(&self) -> Hash {
        merkle::root(&self.validators)
    }

    /// Selects the proposer for `(height, round)`.
    ///
    /// Naive round robin over the member index, not weighted by power.
    // TODO: weighted round robin so proposer frequency tracks vote_power.
    pub fn proposer(&self, height: u64, round: u32) -> &Validator {
        let n = self.validators.len() as u64;
        let idx = (height.wrapping_add(u64::from(round)) % n) as usize;
        &self.validators[idx]
    }
}

impl TryFrom<Vec<Validator>> for ValidatorSet {
    type Error = TypesError;

    fn try_from(validators: Vec<Validator>) -> Result<Self> {
        Self::new(validators)
    }
}

impl From<ValidatorSet> for Vec<Validator> {
    fn from(set: ValidatorSet) -> Self {
        set.validators
    }
}
