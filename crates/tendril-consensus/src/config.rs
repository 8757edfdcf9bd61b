//! Engine and synchronizer configuration.

use crate::error::{ConsensusError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential per-round timeout for one consensus phase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Base duration in milliseconds.
    pub base_ms: u64,

    /// Growth factor applied once per round.
    pub rate: f64,
}

impl TimeoutConfig {
    /// Creates a timeout configuration.
    pub const fn new(base_ms: u64, rate: f64) -> Self {
        Self { base_ms, rate }
    }

    /// Timeout for `round`: `base_ms * rate^round`.
    pub fn duration(&self, round: u32) -> Duration {
        let exponent = i32::try_from(round).unwrap_or(i32::MAX);
        let ms = self.base_ms as f64 * self.rate.powi(exponent);
        if ms.is_finite() {
            Duration::from_millis(ms.min(u64::MAX as f64) as u64)
        } else {
            Duration::from_millis(u64::MAX)
        }
    }

    fn validate(&self, phase: &str) -> Result<()> {
        if self.base_ms == 0 {
            return Err(ConsensusError::InvalidConfig(format!(
                "{} timeout base must be positive",
                phase
            )));
        }
        if !self.rate.is_finite() || self.rate < 1.0 {
            return Err(ConsensusError::InvalidConfig(format!(
                "{} timeout rate must be at least 1.0, got {}",
                phase, self.rate
            )));
        }
        Ok(())
    }
}

/// Configuration for the consensus engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Timeout waiting for a proposal.
    pub propose: TimeoutConfig,

    /// Timeout after seeing two thirds of prevotes without a majority.
    pub prevote: TimeoutConfig,

    /// Timeout after seeing two thirds of precommits without a majority.
    pub precommit: TimeoutConfig,

    /// Interval between ticks when no input arrives.
    pub idle_poll_ms: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            propose: TimeoutConfig::new(3000, 1.2),
            prevote: TimeoutConfig::new(1000, 1.2),
            precommit: TimeoutConfig::new(1000, 1.2),
            idle_poll_ms: 100,
        }
    }
}

impl ConsensusConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        self.propose.validate("propose")?;
        self.prevote.validate("prevote")?;
        self.precommit.validate("precommit")?;
        if self.idle_poll_ms == 0 {
            return Err(ConsensusError::InvalidConfig(
                "idle_poll_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Returns the idle poll interval.
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }
}

/// Configuration for the chain synchronizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Debounce before fetching an announced block, to let gossip arrive first.
    pub fetch_delay_ms: u64,

    /// Idle time after which a catch-up round is attempted.
    pub catch_up_interval_ms: u64,

    /// Maximum headers requested per batch.
    pub max_headers_per_fetch: u64,

    /// Maximum bodies requested per batch.
    pub max_bodies_per_fetch: u64,

    /// Pending blocks further than this ahead of the tip are dropped.
    pub max_pending_height_gap: u64,

    /// Full blocks go to `ceil(peers ^ gossip_exponent)` peers.
    pub gossip_exponent: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fetch_delay_ms: 500,
            catch_up_interval_ms: 5000,
            max_headers_per_fetch: 64,
            max_bodies_per_fetch: 32,
            max_pending_height_gap: 128,
            gossip_exponent: 0.5,
        }
    }
}

impl SyncConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.catch_up_interval_ms == 0 {
            return Err(ConsensusError::InvalidConfig(
                "catch_up_interval_ms must be positive".into(),
            ));
        }
        if self.max_headers_per_fetch == 0 || self.max_bodies_per_fetch == 0 {
            return Err(ConsensusError::InvalidConfig(
                "fetch batch sizes must be positive".into(),
            ));
        }
        if self.max_pending_height_gap == 0 {
            return Err(ConsensusError::InvalidConfig(
                "max_pending_height_gap must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.gossip_exponent) {
            return Err(ConsensusError::InvalidConfig(format!(
                "gossip_exponent must be within [0, 1], got {}",
                self.gossip_exponent
            )));
        }
        Ok(())
    }

    /// Returns the fetch debounce window.
    pub fn fetch_delay(&self) -> Duration {
        Duration::from_millis(self.fetch_delay_ms)
    }

    /// Returns the catch-up idle interval.
    pub fn catch_up_interval(&self) -> Duration {
        Duration::from_millis(self.catch_up_interval_ms)
    }
}
