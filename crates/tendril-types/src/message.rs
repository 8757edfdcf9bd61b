//! Signed consensus messages.
//!
//! Every message is signed over `hash(genesis ‖ kind ‖ payload)`. Binding
//! the genesis hash into the digest keeps signatures from one chain from
//! being replayed on another.

use crate::block::Block;
use crate::crypto::{Address, Signature, Signer};
use crate::error::Result;
use crate::hash::{Hash, Hashable};
use crate::vote::{Vote, VoteKind};
use serde::{Deserialize, Serialize};

/// Domain tag of a signed consensus message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    /// Block proposal.
    Proposal = 0,
    /// Prevote.
    Prevote = 1,
    /// Precommit.
    Precommit = 2,
}

impl From<VoteKind> for MessageKind {
    fn from(kind: VoteKind) -> Self {
        match kind {
            VoteKind::Prevote => Self::Prevote,
            VoteKind::Precommit => Self::Precommit,
        }
    }
}

/// Computes the digest a consensus message is signed over.
pub fn signing_digest(genesis: &Hash, kind: MessageKind, payload: &Hash) -> Hash {
    Hash::digest_parts(&[genesis.as_bytes(), &[kind as u8], payload.as_bytes()])
}

/// A block proposal for a height and round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    /// Block height.
    pub height: u64,

    /// Round of the proposal.
    pub round: u32,

    /// Round in which the proposer saw the block gather a prevote
    /// supermajority; 0 for none.
    pub locked_round: u32,

    /// The proposed block.
    pub block: Block,
}

impl Hashable for Proposal {
    fn hash(&self) -> Hash {
        Hash::digest_parts(&[
            &self.height.to_be_bytes(),
            &self.round.to_be_bytes(),
            &self.locked_round.to_be_bytes(),
            self.block.hash().as_bytes(),
        ])
    }
}

/// A consensus message with its signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConsensusMessage {
    /// Proposal from the round's proposer.
    Proposal {
        /// The proposal.
        proposal: Proposal,
        /// Proposer signature.
        signature: Signature,
    },

    /// First-stage vote.
    Prevote {
        /// The vote.
        vote: Vote,
        /// Voter signature.
        signature: Signature,
    },

    /// Second-stage vote.
    Precommit {
        /// The vote.
        vote: Vote,
        /// Voter signature.
        signature: Signature,
    },
}

impl ConsensusMessage {
    /// Signs a proposal.
    pub fn proposal(proposal: Proposal, genesis: &Hash, signer: &dyn Signer) -> Self {
        let digest = signing_digest(genesis, MessageKind::Proposal, &proposal.hash());
        Self::Proposal {
            signature: signer.sign(&digest),
            proposal,
        }
    }

    /// Signs a vote of the given kind.
    pub fn vote(kind: VoteKind, vote: Vote, genesis: &Hash, signer: &dyn Signer) -> Self {
        let signature = signer.sign(&signing_digest(genesis, kind.into(), &vote.hash()));
        match kind {
            VoteKind::Prevote => Self::Prevote { vote, signature },
            VoteKind::Precommit => Self::Precommit { vote, signature },
        }
    }

    /// Returns the tag this message is signed under.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Proposal { .. } => MessageKind::Proposal,
            Self::Prevote { .. } => MessageKind::Prevote,
            Self::Precommit { .. } => MessageKind::Precommit,
        }
    }

    /// Returns the message type as a string for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Proposal { .. } => "proposal",
            Self::Prevote { .. } => "prevote",
            Self::Precommit { .. } => "precommit",
        }
    }

    /// Returns the height the message refers to.
    pub fn height(&self) -> u64 {
        match self {
            Self::Proposal { proposal, .. } => proposal.height,
            Self::Prevote { vote, .. } | Self::Precommit { vote, .. } => vote.height,
        }
    }

    /// Returns the round the message refers to.
    pub fn round(&self) -> u32 {
        match self {
            Self::Proposal { proposal, .. } => proposal.round,
            Self::Prevote { vote, .. } | Self::Precommit { vote, .. } => vote.round,
        }
    }

    /// Returns the signature.
    pub fn signature(&self) -> &Signature {
        match self {
            Self::Proposal { signature, .. }
            | Self::Prevote { signature, .. }
            | Self::Precommit { signature, .. } => signature,
        }
    }

    /// Returns the digest the signature must cover.
    pub fn digest(&self, genesis: &Hash) -> Hash {
        let payload = match self {
            Self::Proposal { proposal, .. } => proposal.hash(),
            Self::Prevote { vote, .. } | Self::Precommit { vote, .. } => vote.hash(),
        };
        signing_digest(genesis, self.kind(), &payload)
    }

    /// Verifies the signature and returns the signer address.
    ///
    /// # Errors
    ///
    /// Fails if the signature does not cover this message under `genesis`.
    pub fn recover(&self, genesis: &Hash) -> Result<Address> {
        self.signature().recover(&self.digest(genesis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;

    #[test]
    fn test_vote_message_recovers_signer() {
        let key = Keypair::from_seed(1);
        let genesis = Hash::digest(b"genesis");
        let msg = ConsensusMessage::vote(
            VoteKind::Prevote,
            Vote::new(5, 2, Hash::digest(b"block")),
            &genesis,
            &key,
        );

        assert_eq!(msg.name(), "prevote");
        assert_eq!(msg.height(), 5);
        assert_eq!(msg.round(), 2);
        assert_eq!(msg.recover(&genesis).unwrap(), key.address());
    }

    #[test]
    fn test_signature_bound_to_genesis() {
        let key = Keypair::from_seed(1);
        let msg = ConsensusMessage::vote(
            VoteKind::Precommit,
            Vote::nil(1, 1),
            &Hash::digest(b"chain-a"),
            &key,
        );

        assert!(msg.recover(&Hash::digest(b"chain-b")).is_err());
    }

    #[test]
    fn test_signature_bound_to_kind() {
        let key = Keypair::from_seed(1);
        let genesis = Hash::digest(b"genesis");
        let vote = Vote::new(1, 1, Hash::digest(b"block"));
        let ConsensusMessage::Prevote { signature, .. } =
            ConsensusMessage::vote(VoteKind::Prevote, vote, &genesis, &key)
        else {
            panic!("expected prevote");
        };

        let forged = ConsensusMessage::Precommit { vote, signature };
        assert!(forged.recover(&genesis).is_err());
    }
}
