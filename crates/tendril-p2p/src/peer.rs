//! Peer handles.

use crate::{Message, P2pError, Request, Response, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Default deadline for a single request to a peer.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A peer identifier derived from the peer's public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId([u8; 32]);

impl PeerId {
    /// Creates a peer ID from a public key.
    #[must_use]
    pub const fn from_public_key(key: &[u8; 32]) -> Self {
        Self(*key)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns a short hex representation.
    #[must_use]
    pub fn short_id(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.short_id())
    }
}

/// Transport seam: one established, handshaken connection to a peer.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Sends a fire-and-forget message.
    async fn send(&self, message: Message) -> Result<()>;

    /// Issues a request and waits for its response.
    async fn request(&self, request: Request) -> Result<Response>;

    /// Closes the connection.
    async fn close(&self);
}

/// A connected peer with its reported heights.
///
/// Each handle owns a mutex so at most one request is in flight to the peer
/// at a time; a peer is idle while that mutex is free.
pub struct PeerHandle {
    id: PeerId,
    connection: Arc<dyn PeerConnection>,
    height: AtomicU64,
    consensus_height: AtomicU64,
    busy: Arc<Mutex<()>>,
    request_timeout: Duration,
}

impl PeerHandle {
    /// Wraps a connection.
    pub fn new(id: PeerId, connection: Arc<dyn PeerConnection>, height: u64) -> Self {
        Self {
            id,
            connection,
            height: AtomicU64::new(height),
            consensus_height: AtomicU64::new(0),
            busy: Arc::new(Mutex::new(())),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Overrides the per-request deadline.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Returns the peer ID.
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Returns the peer's reported chain height.
    pub fn height(&self) -> u64 {
        self.height.load(Ordering::Acquire)
    }

    /// Returns the height the peer runs consensus on.
    pub fn consensus_height(&self) -> u64 {
        self.consensus_height.load(Ordering::Acquire)
    }

    /// Raises the reported chain height; lower values are ignored.
    pub fn advance_height(&self, height: u64) {
        self.height.fetch_max(height, Ordering::AcqRel);
    }

    /// Raises the reported consensus height; lower values are ignored.
    pub fn advance_consensus_height(&self, height: u64) {
        self.consensus_height.fetch_max(height, Ordering::AcqRel);
    }

    /// Returns true when no request is in flight.
    pub fn is_idle(&self) -> bool {
        self.busy.try_lock().is_ok()
    }

    /// Claims the peer for a request without waiting.
    pub fn try_claim(self: &Arc<Self>) -> Option<ClaimedPeer> {
        let guard = Arc::clone(&self.busy).try_lock_owned().ok()?;
        Some(ClaimedPeer {
            peer: Arc::clone(self),
            _guard: guard,
        })
    }

    /// Sends a fire-and-forget message.
    pub async fn send(&self, message: Message) -> Result<()> {
        self.connection.send(message).await
    }

    /// Issues a request, waiting for the peer to become idle first.
    pub async fn request(&self, request: Request) -> Result<Response> {
        let _guard = self.busy.lock().await;
        self.request_unlocked(request).await
    }

    async fn request_unlocked(&self, request: Request) -> Result<Response> {
        tokio::time::timeout(self.request_timeout, self.connection.request(request))
            .await
            .map_err(|_| P2pError::Timeout)?
    }

    /// Closes the underlying connection.
    pub async fn close(&self) {
        self.connection.close().await;
    }
}

impl std::fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerHandle")
            .field("id", &self.id)
            .field("height", &self.height())
            .field("consensus_height", &self.consensus_height())
            .finish_non_exhaustive()
    }
}

/// A peer held exclusively until dropped.
pub struct ClaimedPeer {
    peer: Arc<PeerHandle>,
    _guard: OwnedMutexGuard<()>,
}

impl ClaimedPeer {
    /// Returns the claimed peer.
    pub fn peer(&self) -> &Arc<PeerHandle> {
        &self.peer
    }

    /// Issues a request on the claimed peer.
    pub async fn request(&self, request: Request) -> Result<Response> {
        self.peer.request_unlocked(request).await
    }
}
