//! P2P error types.

use crate::PeerId;
use thiserror::Error;

/// Errors that can occur during P2P operations.
#[derive(Debug, Error)]
pub enum P2pError {
    /// Connection failed or was closed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Peer not found.
    #[error("peer not found: {0}")]
    PeerNotFound(PeerId),

    /// The peer answered with the wrong kind of response.
    #[error("unexpected response: expected {expected}, got {got}")]
    UnexpectedResponse {
        /// Expected response kind.
        expected: &'static str,
        /// Received response kind.
        got: &'static str,
    },

    /// The peer did not answer in time.
    #[error("request timed out")]
    Timeout,

    /// The peer refused to serve the request.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// Message encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// A specialized Result type for P2P operations.
pub type Result<T> = std::result::Result<T, P2pError>;
