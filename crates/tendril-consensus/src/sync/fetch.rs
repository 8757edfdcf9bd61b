//! Targeted fetch of the block just above the tip.

use super::pending::PendingBlock;
use super::Synchronizer;
use crate::error::{ConsensusError, Result};
use rand::seq::SliceRandom;
use tendril_p2p::{ClaimedPeer, Request};
use tendril_types::{Block, QuorumCertificate};
use tracing::{debug, trace};

impl Synchronizer {
    /// Fetches `height` after the configured delay unless a fetch for it is
    /// already scheduled or the block is already queued.
    pub(crate) fn schedule_fetch(&self, height: u64) {
        if self.inner.pending.lock().contains(height) {
            return;
        }
        if !self.inner.scheduled.lock().insert(height) {
            trace!(height, "fetch already scheduled");
            return;
        }

        let this = self.clone();
        let delay = self.inner.config.fetch_delay();
        tokio::spawn(async move {
            tokio::select! {
                _ = this.inner.cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Err(e) = this.fetch(height).await {
                        this.report(&e);
                    }
                }
            }
            this.inner.scheduled.lock().remove(&height);
        });
    }

    /// Requests the consented block at `height` from idle peers that claim to
    /// have it, in random order, queueing the first valid answer.
    ///
    /// Peers that fail or answer with garbage are dropped. Returns whether a
    /// block was queued.
    pub async fn fetch(&self, height: u64) -> Result<bool> {
        if self.inner.chain.height().await? >= height || self.inner.pending.lock().contains(height)
        {
            return Ok(false);
        }

        let mut candidates: Vec<_> = self
            .inner
            .peers
            .peers()
            .into_iter()
            .filter(|p| p.height() >= height)
            .collect();
        candidates.shuffle(&mut rand::thread_rng());

        for peer in candidates {
            let Some(claim) = peer.try_claim() else {
                continue;
            };
            match fetch_block(&claim, height).await {
                Ok((block, consensus)) => {
                    debug!(height, peer = %peer.id(), "fetched block");
                    self.push(PendingBlock {
                        block,
                        consensus,
                        from: Some(peer.id()),
                    });
                    return Ok(true);
                }
                Err(e) => {
                    drop(claim);
                    self.drop_peer(peer.id(), &format!("fetch of height {} failed: {}", height, e))
                        .await;
                }
            }
        }

        debug!(height, "no idle peer served the block");
        Ok(false)
    }
}

async fn fetch_block(claim: &ClaimedPeer, height: u64) -> Result<(Block, QuorumCertificate)> {
    let (header, consensus) = claim
        .request(Request::GetConsentedHeader {
            height: Some(height),
        })
        .await?
        .into_consented_header()?;
    if header.height != height {
        return Err(ConsensusError::BadResponse(format!(
            "asked for header {}, got {}",
            height, header.height
        )));
    }

    let mut bodies = claim
        .request(Request::GetBodies {
            from: height,
            to: height,
        })
        .await?
        .into_bodies()?;
    let body = match (bodies.pop(), bodies.is_empty()) {
        (Some(body), true) => body,
        _ => {
            return Err(ConsensusError::BadResponse(format!(
                "expected exactly one body for height {}",
                height
            )))
        }
    };

    let block = Block { header, body };
    block.validate()?;
    if consensus.vote.block_hash != block.hash() {
        return Err(ConsensusError::BadResponse(format!(
            "certificate does not cover block {}",
            height
        )));
    }
    Ok((block, consensus))
}
