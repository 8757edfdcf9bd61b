//! Per-height consensus state.

use std::collections::BTreeMap;
use std::fmt;
use tendril_types::{Block, Hash, Proposal, ValidatorSet, VoteKind, VoteSet};

/// Sub-phase of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    /// Waiting for a reason to propose or a proposal.
    NewRound,
    /// Waiting for the round's proposal.
    Propose,
    /// Prevote sent, waiting for two thirds of prevotes.
    Prevote,
    /// Two thirds of prevotes seen without a majority; timer armed.
    PrevoteWait,
    /// Precommit sent, waiting for two thirds of precommits.
    Precommit,
    /// Two thirds of precommits seen without a majority; timer armed.
    PrecommitWait,
    /// Block handed to the synchronizer.
    Committed,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::NewRound => "new_round",
            Step::Propose => "propose",
            Step::Prevote => "prevote",
            Step::PrevoteWait => "prevote_wait",
            Step::Precommit => "precommit",
            Step::PrecommitWait => "precommit_wait",
            Step::Committed => "committed",
        };
        f.write_str(name)
    }
}

/// Messages received for one round.
#[derive(Debug, Clone)]
pub(crate) struct RoundState {
    pub proposal: Option<Proposal>,
    pub prevotes: VoteSet,
    pub precommits: VoteSet,
}

impl RoundState {
    fn new(height: u64, round: u32, total_power: u64) -> Self {
        Self {
            proposal: None,
            prevotes: VoteSet::new(VoteKind::Prevote, height, round, total_power),
            precommits: VoteSet::new(VoteKind::Precommit, height, round, total_power),
        }
    }

    pub fn votes_mut(&mut self, kind: VoteKind) -> &mut VoteSet {
        match kind {
            VoteKind::Prevote => &mut self.prevotes,
            VoteKind::Precommit => &mut self.precommits,
        }
    }

    /// The proposed block if its hash is `hash`.
    pub fn proposed_block(&self, hash: &Hash) -> Option<&Block> {
        self.proposal
            .as_ref()
            .map(|p| &p.block)
            .filter(|block| block.hash() == *hash)
    }
}

/// Consensus state for the height being decided.
#[derive(Debug, Clone)]
pub(crate) struct ConsensusState {
    pub height: u64,
    pub round: u32,
    pub step: Step,
    pub locked_round: u32,
    pub locked_block: Option<Block>,
    pub valid_round: u32,
    pub valid_block: Option<Block>,
    pub validators: ValidatorSet,
    /// Application state after executing `height - 1`.
    pub app_state_hash: Hash,
    /// State hash declared by the header at `height - 1`.
    pub prev_app_state_hash: Hash,
    rounds: BTreeMap<u32, RoundState>,
}

impl ConsensusState {
    /// Placeholder until the executor reports a state.
    pub fn uninitialized(validators: ValidatorSet) -> Self {
        Self::new(0, validators, Hash::ZERO, Hash::ZERO)
    }

    pub fn new(
        height: u64,
        validators: ValidatorSet,
        app_state_hash: Hash,
        prev_app_state_hash: Hash,
    ) -> Self {
        Self {
            height,
            round: 1,
            step: Step::NewRound,
            locked_round: 0,
            locked_block: None,
            valid_round: 0,
            valid_block: None,
            validators,
            app_state_hash,
            prev_app_state_hash,
            rounds: BTreeMap::new(),
        }
    }

    /// Moves to `round`, keeping locked and valid blocks.
    pub fn new_round(&mut self, round: u32) {
        self.round = round;
        self.step = Step::NewRound;
    }

    pub fn round_state(&mut self, round: u32) -> &mut RoundState {
        let (height, total) = (self.height, self.validators.total_power());
        self.rounds
            .entry(round)
            .or_insert_with(|| RoundState::new(height, round, total))
    }

    pub fn current(&mut self) -> &mut RoundState {
        self.round_state(self.round)
    }

    pub fn get_round(&self, round: u32) -> Option<&RoundState> {
        self.rounds.get(&round)
    }

    pub fn locked_hash(&self) -> Option<Hash> {
        self.locked_block.as_ref().map(Block::hash)
    }

    /// Records `round` as the valid round if its prevotes hold a majority for
    /// its proposal and it beats the recorded one.
    pub fn update_valid_block(&mut self, round: u32) -> bool {
        if round <= self.valid_round {
            return false;
        }
        let Some(rs) = self.rounds.get(&round) else {
            return false;
        };
        let Some(majority) = rs.prevotes.two_thirds_majority() else {
            return false;
        };
        if majority.is_nil() {
            return false;
        }
        let Some(block) = rs.proposed_block(&majority.block_hash).cloned() else {
            return false;
        };
        self.valid_round = round;
        self.valid_block = Some(block);
        true
    }

    /// Lowest round above the current one whose votes reached one third.
    pub fn skip_target(&self) -> Option<u32> {
        let next = self.round.checked_add(1)?;
        self.rounds
            .range(next..)
            .find(|(_, rs)| rs.prevotes.one_third_any() || rs.precommits.one_third_any())
            .map(|(round, _)| *round)
    }

    pub fn snapshot(&self) -> ConsensusSnapshot {
        ConsensusSnapshot {
            height: self.height,
            round: self.round,
            step: self.step,
            locked_round: self.locked_round,
            valid_round: self.valid_round,
        }
    }
}

/// Point-in-time view of the engine's position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsensusSnapshot {
    /// Height being decided; 0 before the executor is initialized.
    pub height: u64,
    /// Current round.
    pub round: u32,
    /// Current step.
    pub step: Step,
    /// Round of the locked block, 0 if unlocked.
    pub locked_round: u32,
    /// Round of the valid block, 0 if none.
    pub valid_round: u32,
}
