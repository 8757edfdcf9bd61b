//! # Tendril P2P
//!
//! Peer-facing surface of a Tendril node.
//!
//! Transport and handshake live outside this crate; they plug in through
//! [`PeerConnection`]. What this crate owns is the message vocabulary, the
//! per-peer request exclusivity ([`PeerHandle`]) and the registry the
//! consensus engine and synchronizer gossip through ([`PeerRegistry`]).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod message;
mod peer;
mod registry;

pub use error::{P2pError, Result};
pub use message::{Message, Request, Response};
pub use peer::{ClaimedPeer, PeerConnection, PeerHandle, PeerId, DEFAULT_REQUEST_TIMEOUT};
pub use registry::{gossip_fanout, sample_for_gossip, PeerRegistry, PeerSet};
