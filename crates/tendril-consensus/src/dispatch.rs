//! Routes peer traffic to the engine, the synchronizer and the pool.

use crate::engine::ConsensusEngine;
use crate::error::{ConsensusError, Result};
use crate::mempool::Mempool;
use crate::sync::Synchronizer;
use std::sync::Arc;
use tendril_p2p::{Message, PeerId, PeerRegistry, Request, Response};
use tracing::{debug, trace, warn};

/// Entry point for everything a transport receives from a peer.
#[derive(Clone)]
pub struct MessageRouter {
    engine: ConsensusEngine,
    sync: Synchronizer,
    mempool: Arc<Mempool>,
    peers: Arc<dyn PeerRegistry>,
}

impl MessageRouter {
    /// Creates a router.
    pub fn new(
        engine: ConsensusEngine,
        sync: Synchronizer,
        mempool: Arc<Mempool>,
        peers: Arc<dyn PeerRegistry>,
    ) -> Self {
        Self {
            engine,
            sync,
            mempool,
            peers,
        }
    }

    /// Status sent to a peer right after connecting.
    pub async fn hello(&self) -> Result<Message> {
        let chain = self.sync.chain();
        Ok(Message::Hello {
            genesis_hash: chain.genesis_hash(),
            height: chain.height().await?,
            consensus_height: self.engine.snapshot().await.height,
        })
    }

    /// Handles a fire-and-forget message from `from`.
    pub async fn handle_message(&self, from: PeerId, message: Message) -> Result<()> {
        trace!(peer = %from, kind = message.kind(), "message received");
        match message {
            Message::Hello {
                genesis_hash,
                height,
                consensus_height,
            } => {
                let ours = self.sync.chain().genesis_hash();
                if genesis_hash != ours {
                    warn!(peer = %from, theirs = %genesis_hash, %ours, "genesis mismatch");
                    self.peers.drop_peer(&from, "genesis mismatch").await;
                    return Ok(());
                }
                if let Some(peer) = self.peers.get(&from) {
                    peer.advance_height(height);
                    peer.advance_consensus_height(consensus_height);
                }
                self.sync.new_node();
                Ok(())
            }
            Message::NewTransaction(transaction) => {
                match self.mempool.add(transaction) {
                    Ok(id) => {
                        trace!(peer = %from, tx = %id, "pooled transaction");
                        self.engine.wake();
                    }
                    Err(ConsensusError::DuplicateTransaction(id)) => {
                        trace!(peer = %from, tx = %id, "duplicate transaction");
                    }
                    Err(e) => debug!(peer = %from, error = %e, "transaction rejected"),
                }
                Ok(())
            }
            Message::NewBlock { block, consensus } => {
                self.sync.new_block(block, consensus, from).await
            }
            Message::NewBlockHeight(height) => self.sync.new_block_height(height, from).await,
            Message::NewConsensusMessage(message) => {
                self.engine.new_consensus_message(message, Some(from)).await
            }
        }
    }

    /// Answers a request from `from`.
    pub async fn handle_request(&self, from: PeerId, request: Request) -> Result<Response> {
        trace!(peer = %from, ?request, "request received");
        self.sync.serve(request).await
    }
}
