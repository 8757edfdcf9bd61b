//! Bulk catch-up from the best peer.
//!
//! Headers are fetched backwards from the peer's consented tip and checked
//! for linkage down to the local tip. Bodies are then backfilled in parallel
//! from every idle peer that has them.

use super::Synchronizer;
use crate::error::{ConsensusError, Result};
use rand::seq::SliceRandom;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tendril_p2p::{ClaimedPeer, PeerHandle, Request};
use tendril_storage::BlockStore;
use tendril_types::{BlockHeader, Hashable};
use tokio::task::JoinSet;
use tracing::{debug, info, trace, warn};

/// Clears the in-progress flag when catch-up ends.
struct CatchUpGuard<'a>(&'a AtomicBool);

impl Drop for CatchUpGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Synchronizer {
    /// Runs one catch-up round against the highest peer.
    ///
    /// Returns `false` when another round is running, no peer is ahead, or
    /// the round was abandoned after dropping a faulty peer.
    pub async fn catch_up(&self) -> Result<bool> {
        if self.inner.catching_up.swap(true, Ordering::AcqRel) {
            trace!("catch-up already running");
            return Ok(false);
        }
        let _guard = CatchUpGuard(&self.inner.catching_up);
        self.catch_up_from_best().await
    }

    async fn catch_up_from_best(&self) -> Result<bool> {
        let chain = &self.inner.chain;
        let tip = chain.height().await?;
        let Some(best) = self.inner.peers.peers().into_iter().max_by_key(|p| p.height()) else {
            return Ok(false);
        };
        if best.height() <= tip {
            return Ok(false);
        }
        let peer = best.id();
        debug!(peer = %peer, tip, claimed = best.height(), "catching up");

        let (header, consensus) = match best
            .request(Request::GetConsentedHeader { height: None })
            .await
            .and_then(|r| r.into_consented_header())
        {
            Ok(answer) => answer,
            Err(e) => {
                self.drop_peer(peer, &format!("consented header request failed: {}", e))
                    .await;
                return Ok(false);
            }
        };

        let target = header.height;
        if target <= tip {
            debug!(peer = %peer, target, tip, "peer is not ahead");
            return Ok(false);
        }
        let validators = chain.validator_set_at(tip).await?;
        if let Err(e) = consensus.validate(&header.hash(), &chain.genesis_hash(), &validators) {
            self.drop_peer(peer, &format!("invalid certificate for {}: {}", target, e))
                .await;
            return Ok(false);
        }

        match self.sync_headers(&best, header, tip).await {
            Ok(()) => {}
            Err(e @ ConsensusError::Storage(_)) => return Err(e),
            Err(e) => {
                self.drop_peer(peer, &format!("bad header chain: {}", e)).await;
                return Ok(false);
            }
        }

        if !self.backfill_bodies(tip + 1, target).await? {
            return Ok(false);
        }

        if !chain.advance_to(target, consensus).await? {
            return Ok(false);
        }
        for height in tip + 1..=target {
            if let Ok(body) = chain.body_of(height).await {
                self.inner.pool.remove_committed(&body.transactions);
            }
        }

        info!(from = tip, height = target, peer = %peer, "caught up");
        self.emit(crate::events::SyncEvent::CaughtUp { height: target });
        self.inner.activity.notify_one();
        self.inner.pending_ready.notify_one();
        Ok(true)
    }

    /// Fetches and stores headers from `top` down to `tip + 1`, checking that
    /// each links to the next and the lowest links to the local tip.
    async fn sync_headers(&self, peer: &PeerHandle, top: BlockHeader, tip: u64) -> Result<()> {
        let chain = &self.inner.chain;
        let store = chain.store();
        let max = self.inner.config.max_headers_per_fetch;

        let mut next = top;
        store.set_header(next.height, next.clone()).await?;

        while next.height > tip + 1 {
            let count = (next.height - tip - 1).min(max);
            let headers = peer
                .request(Request::GetHeaders {
                    before: next.height,
                    count,
                })
                .await?
                .into_headers()?;
            if headers.is_empty() || headers.len() as u64 > count {
                return Err(ConsensusError::BadResponse(format!(
                    "asked for {} headers below {}, got {}",
                    count,
                    next.height,
                    headers.len()
                )));
            }

            for header in headers.into_iter().rev() {
                if header.height + 1 != next.height || header.hash() != next.last_block_hash {
                    return Err(ConsensusError::BadResponse(format!(
                        "header {} does not link to {}",
                        header.height, next.height
                    )));
                }
                store.set_header(header.height, header.clone()).await?;
                next = header;
            }
        }

        let tip_hash = chain.hash_of(tip).await?;
        if next.last_block_hash != tip_hash {
            return Err(ConsensusError::BadResponse(format!(
                "header {} does not extend local tip {}",
                next.height, tip
            )));
        }
        Ok(())
    }

    /// Downloads bodies for `from..=to`, highest batch first, spreading
    /// batches over idle peers. Returns `false` if peers ran out.
    async fn backfill_bodies(&self, from: u64, to: u64) -> Result<bool> {
        let mut queue = body_batches(from, to, self.inner.config.max_bodies_per_fetch);
        let mut workers = JoinSet::new();

        loop {
            while let Some(&(start, end)) = queue.front() {
                let Some(claim) = self.claim_peer(end) else {
                    break;
                };
                queue.pop_front();
                let store = self.inner.chain.store().clone();
                workers.spawn(async move {
                    let peer = claim.peer().id();
                    fetch_bodies(&claim, store.as_ref(), start, end)
                        .await
                        .map_err(|e| (start, end, peer, e))
                });
            }

            let Some(joined) = workers.join_next().await else {
                if queue.is_empty() {
                    return Ok(true);
                }
                warn!(remaining = queue.len(), "no idle peer left for body batches");
                return Ok(false);
            };

            match joined {
                Ok(Ok(())) => {}
                Ok(Err((start, end, _, e @ ConsensusError::Storage(_)))) => {
                    warn!(start, end, error = %e, "storing bodies failed");
                    workers.abort_all();
                    return Err(e);
                }
                Ok(Err((start, end, peer, e))) => {
                    self.drop_peer(
                        peer,
                        &format!("bodies {}..={} rejected: {}", start, end, e),
                    )
                    .await;
                    queue.push_back((start, end));
                }
                Err(e) => {
                    return Err(ConsensusError::Fatal(format!("body worker failed: {}", e)));
                }
            }
        }
    }

    /// Claims a random idle peer whose height reaches `height`.
    fn claim_peer(&self, height: u64) -> Option<ClaimedPeer> {
        let mut peers: Vec<Arc<PeerHandle>> = self
            .inner
            .peers
            .peers()
            .into_iter()
            .filter(|p| p.height() >= height)
            .collect();
        peers.shuffle(&mut rand::thread_rng());
        peers.iter().find_map(|p| p.try_claim())
    }
}

async fn fetch_bodies(
    claim: &ClaimedPeer,
    store: &dyn BlockStore,
    start: u64,
    end: u64,
) -> Result<()> {
    let bodies = claim
        .request(Request::GetBodies {
            from: start,
            to: end,
        })
        .await?
        .into_bodies()?;
    if bodies.len() as u64 != end - start + 1 {
        return Err(ConsensusError::BadResponse(format!(
            "asked for bodies {}..={}, got {}",
            start,
            end,
            bodies.len()
        )));
    }

    for (height, body) in (start..=end).zip(bodies) {
        let header = store.header(height).await?;
        body.validate_against(&header)?;
        store.set_body(height, body).await?;
    }
    Ok(())
}

/// Splits `from..=to` into inclusive batches of at most `size`, highest first.
fn body_batches(from: u64, to: u64, size: u64) -> VecDeque<(u64, u64)> {
    let mut batches = VecDeque::new();
    if from > to {
        return batches;
    }
    let mut end = to;
    loop {
        let start = end.saturating_sub(size - 1).max(from);
        batches.push_back((start, end));
        if start == from {
            break;
        }
        end = start - 1;
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_body_batches_highest_first() {
        let batches: Vec<_> = body_batches(2, 11, 4).into_iter().collect();
        assert_eq!(batches, vec![(8, 11), (4, 7), (2, 3)]);
    }

    #[test]
    fn test_body_batches_edges() {
        assert!(body_batches(5, 4, 3).is_empty());
        assert_eq!(body_batches(5, 5, 3), VecDeque::from(vec![(5, 5)]));
        assert_eq!(body_batches(1, 6, 3), VecDeque::from(vec![(4, 6), (1, 3)]));
    }

    proptest! {
        #[test]
        fn prop_body_batches_partition_range(from in 1u64..500, len in 0u64..300, size in 1u64..70) {
            let to = from + len;
            let batches: Vec<_> = body_batches(from, to, size).into_iter().collect();

            let mut expected_end = to;
            for (start, end) in &batches {
                prop_assert_eq!(*end, expected_end);
                prop_assert!(start <= end);
                prop_assert!(end - start < size);
                expected_end = start.wrapping_sub(1);
            }
            prop_assert_eq!(batches.last().map(|b| b.0), Some(from));
        }
    }

    #[tokio::test]
    async fn test_catch_up_without_peers() {
        let (sync, _, _) = super::super::tests::setup().await;
        assert!(!sync.catch_up().await.unwrap());
        assert!(!sync.inner.catching_up.load(Ordering::Acquire));
    }
}
