//! Genesis configuration for the network.
//!
//! The genesis file defines the initial validator set and the application
//! state hash the first block commits to.

use crate::error::{ConsensusError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tendril_types::{Address, Block, Hash, Keypair, Validator, ValidatorSet};

/// Genesis configuration for a validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisValidator {
    /// Human-readable name.
    pub name: String,

    /// Ed25519 public key (hex-encoded).
    pub public_key: String,

    /// Voting power.
    pub power: u64,
}

impl GenesisValidator {
    /// Converts to a [`Validator`].
    pub fn to_validator(&self) -> Result<Validator> {
        let bytes = hex::decode(&self.public_key)
            .map_err(|e| ConsensusError::InvalidGenesis(e.to_string()))?;

        let key: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            ConsensusError::InvalidGenesis(format!(
                "invalid public key length: expected 32 bytes, got {}",
                bytes.len()
            ))
        })?;

        Ok(Validator::new(Address::from_public_key(&key), self.power))
    }
}

/// Complete genesis configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genesis {
    /// Network identifier.
    pub chain_id: String,

    /// Genesis timestamp (unix milliseconds).
    pub timestamp: u64,

    /// Application state hash before any block executes.
    #[serde(default)]
    pub app_state_hash: Hash,

    /// Initial validators.
    pub validators: Vec<GenesisValidator>,
}

impl Genesis {
    /// Creates an empty genesis configuration.
    pub fn new(chain_id: impl Into<String>, timestamp: u64) -> Self {
        Self {
            chain_id: chain_id.into(),
            timestamp,
            app_state_hash: Hash::ZERO,
            validators: Vec::new(),
        }
    }

    /// Adds a validator.
    pub fn with_validator(mut self, validator: GenesisValidator) -> Self {
        self.validators.push(validator);
        self
    }

    /// Loads genesis from a JSON file.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConsensusError::InvalidGenesis(format!("failed to read file: {}", e)))?;

        let genesis: Genesis = serde_json::from_str(&content)?;
        genesis.validate()?;
        Ok(genesis)
    }

    /// Loads genesis from a YAML file.
    pub fn load_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConsensusError::InvalidGenesis(format!("failed to read file: {}", e)))?;

        let genesis: Genesis = serde_yaml::from_str(&content)
            .map_err(|e| ConsensusError::InvalidGenesis(e.to_string()))?;
        genesis.validate()?;
        Ok(genesis)
    }

    /// Loads genesis, picking the format from the file extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::load_yaml(path),
            _ => Self::load_json(path),
        }
    }

    /// Validates the genesis configuration.
    pub fn validate(&self) -> Result<()> {
        if self.chain_id.is_empty() {
            return Err(ConsensusError::InvalidGenesis("chain_id is empty".into()));
        }

        if self.validators.is_empty() {
            return Err(ConsensusError::InvalidGenesis("no validators".into()));
        }

        let mut seen_names = HashSet::new();
        let mut seen_keys = HashSet::new();
        let mut total_power = 0u64;

        for v in &self.validators {
            v.to_validator()?;

            if !seen_names.insert(&v.name) {
                return Err(ConsensusError::InvalidGenesis(format!(
                    "duplicate validator name: {}",
                    v.name
                )));
            }
            if !seen_keys.insert(v.public_key.to_lowercase()) {
                return Err(ConsensusError::InvalidGenesis(format!(
                    "duplicate validator public key: {}",
                    v.public_key
                )));
            }
            total_power = total_power.checked_add(v.power).ok_or_else(|| {
                ConsensusError::InvalidGenesis("total voting power overflows".into())
            })?;
        }

        if total_power == 0 {
            return Err(ConsensusError::InvalidGenesis(
                "total voting power is zero".into(),
            ));
        }

        Ok(())
    }

    /// Builds the initial validator set.
    pub fn validator_set(&self) -> Result<ValidatorSet> {
        let validators = self
            .validators
            .iter()
            .map(GenesisValidator::to_validator)
            .collect::<Result<Vec<_>>>()?;

        Ok(ValidatorSet::new(validators)?)
    }

    /// Builds the deterministic genesis block.
    pub fn block(&self) -> Result<Block> {
        let validators = self.validator_set()?;
        Ok(Block::genesis(
            self.timestamp,
            validators.hash(),
            self.app_state_hash,
        ))
    }

    /// Saves genesis to a JSON file.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| ConsensusError::InvalidGenesis(format!("failed to write file: {}", e)))?;

        Ok(())
    }

    /// Saves genesis to a YAML file.
    pub fn save_yaml(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConsensusError::InvalidGenesis(e.to_string()))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| ConsensusError::InvalidGenesis(format!("failed to write file: {}", e)))?;

        Ok(())
    }
}

/// Deterministic devnet key for validator `index`.
pub fn devnet_keypair(index: u64) -> Keypair {
    Keypair::from_seed(index)
}

/// Generates a devnet genesis with `validator_count` equally weighted
/// validators keyed by [`devnet_keypair`].
pub fn generate_devnet_genesis(validator_count: usize) -> Genesis {
    let validators = (0..validator_count as u64)
        .map(|i| GenesisValidator {
            name: format!("validator-{}", i + 1),
            public_key: hex::encode(devnet_keypair(i).public_key()),
            power: 100,
        })
        .collect();

    Genesis {
        chain_id: "tendril-devnet".into(),
        timestamp: 0,
        app_state_hash: Hash::ZERO,
        validators,
    }
}
