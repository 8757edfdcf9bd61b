//! Shared helpers for consensus integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::Arc;
use tendril_consensus::{
    devnet_keypair, Blockchain, Genesis, Mempool, SyncConfig, Synchronizer,
};
use tendril_p2p::{
    Message, P2pError, PeerConnection, PeerHandle, PeerId, PeerSet, Request, Response,
};
use tendril_storage::MemoryStore;
use tendril_types::{
    Block, ConsensusMessage, Keypair, QuorumCertificate, Transaction, Vote, VoteKind,
};

/// Routes engine and synchronizer logs to the test output; honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One node's chain-side components.
pub struct Node {
    pub chain: Arc<Blockchain>,
    pub sync: Synchronizer,
    pub peers: Arc<PeerSet>,
    pub pool: Arc<Mempool>,
}

/// Creates a node over a fresh in-memory store.
pub async fn node(genesis: &Genesis) -> Node {
    let chain = Arc::new(Blockchain::new(
        Arc::new(MemoryStore::new()),
        genesis.block().unwrap(),
        genesis.validator_set().unwrap(),
    ));
    chain.ready().await.unwrap();

    let peers = Arc::new(PeerSet::new());
    let pool = Arc::new(Mempool::with_defaults());
    let sync = Synchronizer::new(SyncConfig::default(), chain.clone(), peers.clone(), pool.clone());
    Node {
        chain,
        sync,
        peers,
        pool,
    }
}

/// Devnet keys for `count` validators.
pub fn keys(count: u64) -> Vec<Keypair> {
    (0..count).map(devnet_keypair).collect()
}

/// Precommit certificate for `block` signed by every key.
pub fn certify(chain: &Blockchain, keys: &[Keypair], block: &Block) -> QuorumCertificate {
    let vote = Vote::new(block.height(), 1, block.hash());
    let signatures = keys
        .iter()
        .map(|key| {
            ConsensusMessage::vote(VoteKind::Precommit, vote, &chain.genesis_hash(), key)
                .signature()
                .clone()
        })
        .collect();
    QuorumCertificate::new(vote, signatures)
}

/// Certifies genesis if needed, then commits `count` blocks on top of the
/// tip through the node's synchronizer.
pub async fn extend(node: &Node, keys: &[Keypair], count: u64) {
    let chain = &node.chain;
    if chain.consented_height().await.unwrap() == 0 {
        let genesis = chain.genesis().clone();
        node.sync
            .new_block_from_local(genesis.clone(), certify(chain, keys, &genesis));
        node.sync.process_pending().await.unwrap();
    }

    for _ in 0..count {
        let parent = chain.height().await.unwrap();
        let block = Block::new(
            parent + 1,
            1_700_000_000_000 + parent,
            chain.hash_of(parent).await.unwrap(),
            chain.genesis_validators().hash(),
            chain.genesis().header.app_state_hash,
            vec![Transaction::new(format!("transfer-{}", parent).into_bytes())],
            chain.consensus_of(parent).await.unwrap(),
        );
        let qc = certify(chain, keys, &block);
        node.sync.new_block_from_local(block, qc);
        node.sync.process_pending().await.unwrap();
    }
    assert_eq!(chain.consented_height().await.unwrap(), chain.height().await.unwrap());
}

/// In-process connection answering requests from another node's
/// synchronizer.
pub struct Loopback {
    remote: Synchronizer,
    tamper_headers: bool,
}

#[async_trait]
impl PeerConnection for Loopback {
    async fn send(&self, _message: Message) -> tendril_p2p::Result<()> {
        Ok(())
    }

    async fn request(&self, request: Request) -> tendril_p2p::Result<Response> {
        let response = self
            .remote
            .serve(request)
            .await
            .map_err(|e| P2pError::Rejected(e.to_string()))?;
        match response {
            Response::Headers(mut headers) if self.tamper_headers && headers.len() > 2 => {
                headers[1].timestamp += 1;
                Ok(Response::Headers(headers))
            }
            other => Ok(other),
        }
    }

    async fn close(&self) {}
}

/// Registers `remote` as a peer of `local` and returns its id.
pub async fn connect(local: &Node, remote: &Node, seed: u8, tamper_headers: bool) -> PeerId {
    let id = PeerId::from_public_key(&[seed; 32]);
    let connection = Arc::new(Loopback {
        remote: remote.sync.clone(),
        tamper_headers,
    });
    let height = remote.chain.height().await.unwrap();
    local
        .peers
        .add(Arc::new(PeerHandle::new(id, connection, height)));
    id
}
