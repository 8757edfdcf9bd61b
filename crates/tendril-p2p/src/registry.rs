//! Peer registry.

use crate::{Message, PeerHandle, PeerId};
use async_trait::async_trait;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// The set of connected peers as seen by consensus and sync.
#[async_trait]
pub trait PeerRegistry: Send + Sync {
    /// Returns every connected peer.
    fn peers(&self) -> Vec<Arc<PeerHandle>>;

    /// Looks up a peer by ID.
    fn get(&self, id: &PeerId) -> Option<Arc<PeerHandle>>;

    /// Disconnects a peer that misbehaved.
    async fn drop_peer(&self, id: &PeerId, reason: &str);

    /// Sends `message` to every peer, logging failures.
    async fn broadcast(&self, message: Message) {
        for peer in self.peers() {
            if let Err(e) = peer.send(message.clone()).await {
                debug!(peer = %peer.id(), error = %e, kind = message.kind(), "broadcast failed");
            }
        }
    }
}

/// Number of peers that receive a full payload out of `total`.
///
/// Returns `ceil(total ^ exponent)`, at most `total`.
pub fn gossip_fanout(total: usize, exponent: f64) -> usize {
    if total == 0 {
        return 0;
    }
    let fanout = (total as f64).powf(exponent).ceil() as usize;
    fanout.clamp(1, total)
}

/// Randomly splits `peers` into a gossip sample of [`gossip_fanout`] peers
/// and the remainder.
pub fn sample_for_gossip(
    mut peers: Vec<Arc<PeerHandle>>,
    exponent: f64,
) -> (Vec<Arc<PeerHandle>>, Vec<Arc<PeerHandle>>) {
    let fanout = gossip_fanout(peers.len(), exponent);
    peers.shuffle(&mut rand::thread_rng());
    let rest = peers.split_off(fanout);
    (peers, rest)
}

/// In-memory [`PeerRegistry`].
#[derive(Default)]
pub struct PeerSet {
    peers: RwLock<HashMap<PeerId, Arc<PeerHandle>>>,
}

impl PeerSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a peer, replacing any previous handle with the same ID.
    pub fn add(&self, peer: Arc<PeerHandle>) {
        debug!(peer = %peer.id(), height = peer.height(), "peer added");
        self.peers.write().insert(peer.id(), peer);
    }

    /// Removes a peer without closing it.
    pub fn remove(&self, id: &PeerId) -> Option<Arc<PeerHandle>> {
        self.peers.write().remove(id)
    }

    /// Returns the number of connected peers.
    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    /// Returns true if no peer is connected.
    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }
}

#[async_trait]
impl PeerRegistry for PeerSet {
    fn peers(&self) -> Vec<Arc<PeerHandle>> {
        self.peers.read().values().cloned().collect()
    }

    fn get(&self, id: &PeerId) -> Option<Arc<PeerHandle>> {
        self.peers.read().get(id).cloned()
    }

    async fn drop_peer(&self, id: &PeerId, reason: &str) {
        let removed = self.remove(id);
        if let Some(peer) = removed {
            warn!(peer = %id, reason, "dropping peer");
            peer.close().await;
        }
    }
}
