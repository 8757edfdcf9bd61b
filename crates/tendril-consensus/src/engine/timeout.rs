//! Step timeouts.
//!
//! A timer captures `(height, round, step)` when armed and is acted upon
//! only if the engine is still at that position when it fires.

use super::state::{ConsensusState, Step};
use crate::config::ConsensusConfig;
use std::time::Duration;

/// Position a timer was armed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TimeoutTicket {
    pub height: u64,
    pub round: u32,
    pub step: Step,
}

impl TimeoutTicket {
    /// Captures the current position.
    pub fn capture(state: &ConsensusState) -> Self {
        Self {
            height: state.height,
            round: state.round,
            step: state.step,
        }
    }

    /// True if the engine has not moved since the ticket was captured.
    pub fn is_current(&self, state: &ConsensusState) -> bool {
        *self == Self::capture(state)
    }

    /// Delay before the ticket fires, or `None` for steps without a timer.
    pub fn delay(&self, config: &ConsensusConfig) -> Option<Duration> {
        let timeout = match self.step {
            Step::Propose => config.propose,
            Step::PrevoteWait => config.prevote,
            Step::PrecommitWait => config.precommit,
            _ => return None,
        };
        Some(timeout.duration(self.round))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimeoutConfig;
    use tendril_types::{Keypair, Signer, Validator, ValidatorSet};

    fn state() -> ConsensusState {
        let set =
            ValidatorSet::new(vec![Validator::new(Keypair::from_seed(0).address(), 1)]).unwrap();
        ConsensusState::new(4, set, Default::default(), Default::default())
    }

    #[test]
    fn test_ticket_goes_stale() {
        let mut state = state();
        state.step = Step::Propose;
        let ticket = TimeoutTicket::capture(&state);
        assert!(ticket.is_current(&state));

        state.step = Step::Prevote;
        assert!(!ticket.is_current(&state));

        state.step = Step::Propose;
        state.new_round(2);
        state.step = Step::Propose;
        assert!(!ticket.is_current(&state));
    }

    #[test]
    fn test_delay_per_step() {
        let config = ConsensusConfig {
            propose: TimeoutConfig::new(100, 2.0),
            prevote: TimeoutConfig::new(10, 1.0),
            precommit: TimeoutConfig::new(20, 1.0),
            idle_poll_ms: 1,
        };
        let ticket = |step, round| TimeoutTicket {
            height: 1,
            round,
            step,
        };

        assert_eq!(
            ticket(Step::Propose, 2).delay(&config),
            Some(Duration::from_millis(400))
        );
        assert_eq!(
            ticket(Step::PrevoteWait, 5).delay(&config),
            Some(Duration::from_millis(10))
        );
        assert_eq!(
            ticket(Step::PrecommitWait, 1).delay(&config),
            Some(Duration::from_millis(20))
        );
        assert_eq!(ticket(Step::Prevote, 1).delay(&config), None);
    }
}
