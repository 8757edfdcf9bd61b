//! Peer protocol messages.
//!
//! [`Message`]s are fire-and-forget. [`Request`]s must resolve to the
//! matching [`Response`] or fail.

use crate::{P2pError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tendril_types::{
    Block, BlockBody, BlockHeader, ConsensusMessage, Hash, QuorumCertificate, Transaction,
};

/// Fire-and-forget messages exchanged between peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// Handshake status.
    Hello {
        /// Genesis hash of the sender's chain.
        genesis_hash: Hash,
        /// Sender's chain height.
        height: u64,
        /// Height the sender is running consensus on.
        consensus_height: u64,
    },

    /// A transaction for the pool.
    NewTransaction(Transaction),

    /// A freshly appended block with the certificate that finalized it.
    NewBlock {
        /// The block.
        block: Block,
        /// Certificate for `block`.
        consensus: QuorumCertificate,
    },

    /// Lightweight notice that the sender reached a height.
    NewBlockHeight(u64),

    /// A consensus message to gossip.
    NewConsensusMessage(ConsensusMessage),
}

impl Message {
    /// Encodes the message to bytes.
    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Decodes a message from bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Returns the message type as a string for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Hello { .. } => "hello",
            Message::NewTransaction(_) => "new_transaction",
            Message::NewBlock { .. } => "new_block",
            Message::NewBlockHeight(_) => "new_block_height",
            Message::NewConsensusMessage(_) => "new_consensus_message",
        }
    }
}

/// Requests a peer must answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Header and certificate at `height`, or at the peer's consented tip
    /// when `None`.
    GetConsentedHeader {
        /// Requested height.
        height: Option<u64>,
    },

    /// Up to `count` headers immediately preceding `before`, ascending.
    GetHeaders {
        /// Exclusive upper bound.
        before: u64,
        /// Maximum number of headers.
        count: u64,
    },

    /// Bodies for heights `from..=to`, ascending.
    GetBodies {
        /// First height.
        from: u64,
        /// Last height.
        to: u64,
    },
}

/// Answers to [`Request`]s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    /// A header with the certificate that finalized it.
    ConsentedHeader {
        /// The header.
        header: BlockHeader,
        /// Its certificate.
        consensus: QuorumCertificate,
    },

    /// Headers, ascending by height.
    Headers(Vec<BlockHeader>),

    /// Bodies, ascending by height.
    Bodies(Vec<BlockBody>),
}

impl Response {
    /// Returns the response type as a string for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Response::ConsentedHeader { .. } => "consented_header",
            Response::Headers(_) => "headers",
            Response::Bodies(_) => "bodies",
        }
    }

    /// Unwraps a consented header response.
    pub fn into_consented_header(self) -> Result<(BlockHeader, QuorumCertificate)> {
        match self {
            Response::ConsentedHeader { header, consensus } => Ok((header, consensus)),
            other => Err(P2pError::UnexpectedResponse {
                expected: "consented_header",
                got: other.kind(),
            }),
        }
    }

    /// Unwraps a headers response.
    pub fn into_headers(self) -> Result<Vec<BlockHeader>> {
        match self {
            Response::Headers(headers) => Ok(headers),
            other => Err(P2pError::UnexpectedResponse {
                expected: "headers",
                got: other.kind(),
            }),
        }
    }

    /// Unwraps a bodies response.
    pub fn into_bodies(self) -> Result<Vec<BlockBody>> {
        match self {
            Response::Bodies(bodies) => Ok(bodies),
            other => Err(P2pError::UnexpectedResponse {
                expected: "bodies",
                got: other.kind(),
            }),
        }
    }
}
