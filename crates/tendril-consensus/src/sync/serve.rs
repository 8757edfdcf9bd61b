//! Answers sync requests from peers.

use super::Synchronizer;
use crate::error::Result;
use tendril_p2p::{P2pError, Request, Response};
use tracing::trace;

impl Synchronizer {
    /// Serves `request` from the local chain.
    ///
    /// Holds the chain's read lock so the answer never straddles an append.
    pub async fn serve(&self, request: Request) -> Result<Response> {
        let chain = &self.inner.chain;
        let config = &self.inner.config;
        let _guard = chain.read().await;
        trace!(?request, "serving request");

        match request {
            Request::GetConsentedHeader { height } => {
                let consented = chain.consented_height().await?;
                let height = height.unwrap_or(consented);
                if height == 0 || height > consented {
                    return Err(P2pError::Rejected(format!(
                        "no consented header at height {} (consented {})",
                        height, consented
                    ))
                    .into());
                }
                Ok(Response::ConsentedHeader {
                    header: chain.header_of(height).await?,
                    consensus: chain.consensus_of(height).await?,
                })
            }
            Request::GetHeaders { before, count } => {
                let tip = chain.height().await?;
                if before <= 1 || before > tip + 1 || count == 0 {
                    return Err(P2pError::Rejected(format!(
                        "no headers below {} (tip {})",
                        before, tip
                    ))
                    .into());
                }
                let count = count.min(config.max_headers_per_fetch);
                let from = before.saturating_sub(count).max(1);
                let mut headers = Vec::with_capacity((before - from) as usize);
                for height in from..before {
                    headers.push(chain.header_of(height).await?);
                }
                Ok(Response::Headers(headers))
            }
            Request::GetBodies { from, to } => {
                let tip = chain.height().await?;
                if from == 0 || from > to || to > tip {
                    return Err(P2pError::Rejected(format!(
                        "no bodies for {}..={} (tip {})",
                        from, to, tip
                    ))
                    .into());
                }
                if to - from + 1 > config.max_bodies_per_fetch {
                    return Err(P2pError::Rejected(format!(
                        "{} bodies requested, limit is {}",
                        to - from + 1,
                        config.max_bodies_per_fetch
                    ))
                    .into());
                }
                let mut bodies = Vec::with_capacity((to - from + 1) as usize);
                for height in from..=to {
                    bodies.push(chain.body_of(height).await?);
                }
                Ok(Response::Bodies(bodies))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{certify, next_block, setup};
    use super::*;
    use crate::error::ConsensusError;
    use tendril_types::Hashable;

    async fn grown(blocks: u64) -> Synchronizer {
        let (sync, keys, _) = setup().await;
        let chain = sync.chain().clone();
        let genesis = chain.genesis().clone();
        sync.new_block_from_local(genesis.clone(), certify(&chain, &keys, &genesis));
        for parent in 1..blocks {
            sync.process_pending().await.unwrap();
            let block = next_block(&chain, parent).await;
            let qc = certify(&chain, &keys, &block);
            sync.new_block_from_local(block, qc);
        }
        sync.process_pending().await.unwrap();
        assert_eq!(chain.height().await.unwrap(), blocks);
        sync
    }

    #[tokio::test]
    async fn test_consented_header_defaults_to_tip() {
        let sync = grown(3).await;
        let response = sync
            .serve(Request::GetConsentedHeader { height: None })
            .await
            .unwrap();
        let (header, consensus) = response.into_consented_header().unwrap();
        assert_eq!(header.height, 3);
        assert_eq!(consensus.vote.block_hash, header.hash());

        let (header, consensus) = sync
            .serve(Request::GetConsentedHeader { height: Some(2) })
            .await
            .unwrap()
            .into_consented_header()
            .unwrap();
        assert_eq!(header.height, 2);
        assert_eq!(consensus.vote.block_hash, header.hash());
    }

    #[tokio::test]
    async fn test_unconsented_genesis_is_rejected() {
        let (sync, _, _) = setup().await;
        let err = sync
            .serve(Request::GetConsentedHeader { height: None })
            .await
            .unwrap_err();
        assert!(matches!(err, ConsensusError::P2p(P2pError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_headers_and_bodies_ranges() {
        let sync = grown(5).await;

        let headers = sync
            .serve(Request::GetHeaders { before: 5, count: 3 })
            .await
            .unwrap()
            .into_headers()
            .unwrap();
        let heights: Vec<_> = headers.iter().map(|h| h.height).collect();
        assert_eq!(heights, vec![2, 3, 4]);

        let headers = sync
            .serve(Request::GetHeaders { before: 3, count: 10 })
            .await
            .unwrap()
            .into_headers()
            .unwrap();
        assert_eq!(headers.len(), 2);

        let bodies = sync
            .serve(Request::GetBodies { from: 2, to: 5 })
            .await
            .unwrap()
            .into_bodies()
            .unwrap();
        assert_eq!(bodies.len(), 4);

        assert!(sync.serve(Request::GetBodies { from: 4, to: 6 }).await.is_err());
        assert!(sync
            .serve(Request::GetHeaders { before: 7, count: 1 })
            .await
            .is_err());
    }
}
