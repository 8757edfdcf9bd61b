//! Events published by the engine and the synchronizer.

use tendril_p2p::PeerId;
use tendril_types::Hash;

/// Events emitted by the consensus engine.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsensusEvent {
    /// The engine moved to a new height.
    NewHeight {
        /// New height.
        height: u64,
    },
    /// The engine moved to a new round.
    NewRound {
        /// Current height.
        height: u64,
        /// New round.
        round: u32,
    },
    /// This node broadcast a proposal.
    Proposed {
        /// Proposal height.
        height: u64,
        /// Proposal round.
        round: u32,
        /// Proposed block.
        block_hash: Hash,
    },
    /// A block gathered a precommit majority.
    Committed {
        /// Committed height.
        height: u64,
        /// Round of the commit.
        round: u32,
        /// Committed block.
        block_hash: Hash,
    },
    /// A tick, timer or message handler failed.
    Error {
        /// Error description.
        message: String,
        /// Whether the engine stopped.
        fatal: bool,
    },
}

/// Events emitted by the synchronizer.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A block was appended, or its certificate attached, at the tip.
    BlockAppended {
        /// Block height.
        height: u64,
        /// Block hash.
        block_hash: Hash,
        /// Peer the block came from, `None` for local commits.
        from: Option<PeerId>,
    },
    /// A catch-up round advanced the tip.
    CaughtUp {
        /// New tip height.
        height: u64,
    },
    /// A peer was disconnected for misbehavior.
    PeerDropped {
        /// Dropped peer.
        peer: PeerId,
        /// Why it was dropped.
        reason: String,
    },
    /// Admission or catch-up failed.
    Error {
        /// Error description.
        message: String,
        /// Whether the synchronizer stopped.
        fatal: bool,
    },
}
