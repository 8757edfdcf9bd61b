//! Node configuration.
//!
//! Values come from an optional YAML, JSON or TOML file overlaid with
//! `TENDRIL_*` environment variables. Nested keys use a double underscore,
//! e.g. `TENDRIL_CONSENSUS__IDLE_POLL_MS=50`.

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tendril_consensus::{
    devnet_keypair, generate_devnet_genesis, ConsensusConfig, Genesis, MempoolConfig, SyncConfig,
};
use tendril_types::Keypair;

/// Transaction pool limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MempoolSettings {
    /// Maximum pooled transactions.
    pub max_transactions: usize,
    /// Seconds before a pooled transaction expires.
    pub max_transaction_age_secs: u64,
    /// Maximum transactions per proposed block.
    pub max_transactions_per_block: usize,
}

impl Default for MempoolSettings {
    fn default() -> Self {
        let defaults = MempoolConfig::default();
        Self {
            max_transactions: defaults.max_transactions,
            max_transaction_age_secs: defaults.max_transaction_age.as_secs(),
            max_transactions_per_block: defaults.max_transactions_per_block,
        }
    }
}

impl From<&MempoolSettings> for MempoolConfig {
    fn from(settings: &MempoolSettings) -> Self {
        Self {
            max_transactions: settings.max_transactions,
            max_transaction_age: Duration::from_secs(settings.max_transaction_age_secs),
            max_transactions_per_block: settings.max_transactions_per_block,
        }
    }
}

/// Configuration for a Tendril node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Genesis file (JSON or YAML). A devnet genesis is generated when unset.
    pub genesis: Option<PathBuf>,

    /// Validator count of the generated devnet genesis.
    pub devnet_validators: usize,

    /// Hex-encoded Ed25519 secret key.
    pub validator_key: Option<String>,

    /// Devnet key index, used when no secret key is configured.
    pub validator_seed: Option<u64>,

    /// Follow the chain without voting, signing with a throwaway key.
    pub observer: bool,

    /// Transaction pool limits.
    pub mempool: MempoolSettings,

    /// Consensus timeouts.
    pub consensus: ConsensusConfig,

    /// Synchronizer tuning.
    pub sync: SyncConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            genesis: None,
            devnet_validators: 1,
            validator_key: None,
            validator_seed: None,
            observer: false,
            mempool: MempoolSettings::default(),
            consensus: ConsensusConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Loads the configuration from `path` (if it exists) and the environment.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("TENDRIL")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("failed to read configuration")?;

        let config: Self = settings
            .try_deserialize()
            .context("invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints and the nested sections.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.genesis.is_none() && self.devnet_validators == 0 {
            bail!("devnet_validators must be positive when no genesis file is set");
        }
        if self.validator_key.is_some() && self.validator_seed.is_some() {
            bail!("validator_key and validator_seed are mutually exclusive");
        }
        if self.observer && (self.validator_key.is_some() || self.validator_seed.is_some()) {
            bail!("an observer takes no validator_key or validator_seed");
        }
        if self.mempool.max_transactions == 0 || self.mempool.max_transactions_per_block == 0 {
            bail!("mempool limits must be positive");
        }
        self.consensus.validate()?;
        self.sync.validate()?;
        Ok(())
    }

    /// Loads or generates the genesis configuration.
    pub fn load_genesis(&self) -> anyhow::Result<Genesis> {
        let genesis = match &self.genesis {
            Some(path) => Genesis::load(path)
                .with_context(|| format!("failed to load genesis from {}", path.display()))?,
            None => generate_devnet_genesis(self.devnet_validators),
        };
        genesis.validate()?;
        Ok(genesis)
    }

    /// The key this node signs consensus messages with.
    pub fn signer(&self) -> anyhow::Result<Keypair> {
        if self.observer {
            return Ok(Keypair::generate());
        }
        match &self.validator_key {
            Some(secret) => Keypair::from_hex(secret).context("invalid validator_key"),
            None => Ok(devnet_keypair(self.validator_seed.unwrap_or(0))),
        }
    }
}
