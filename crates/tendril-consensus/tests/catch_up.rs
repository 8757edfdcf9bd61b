//! Synchronizer catch-up against an in-process peer.

mod common;

use common::{connect, extend, keys, node};
use tendril_consensus::{generate_devnet_genesis, SyncEvent};
use tendril_p2p::PeerRegistry;
use tendril_types::Hashable;

#[tokio::test]
async fn test_catch_up_reaches_peer_height() {
    common::init_tracing();
    let genesis = generate_devnet_genesis(4);
    let keys = keys(4);
    let local = node(&genesis).await;
    let remote = node(&genesis).await;

    extend(&local, &keys, 0).await;
    extend(&remote, &keys, 150).await;
    assert_eq!(local.chain.height().await.unwrap(), 1);
    assert_eq!(remote.chain.height().await.unwrap(), 151);

    connect(&local, &remote, 7, false).await;
    let mut events = local.sync.subscribe();
    assert!(local.sync.catch_up().await.unwrap());

    assert_eq!(local.chain.height().await.unwrap(), 151);
    assert_eq!(local.chain.consented_height().await.unwrap(), 151);
    for height in 2..=151 {
        let header = local.chain.header_of(height).await.unwrap();
        assert_eq!(header.hash(), remote.chain.hash_of(height).await.unwrap());
        assert_eq!(
            header.last_block_hash,
            local.chain.hash_of(height - 1).await.unwrap()
        );
        let body = local.chain.body_of(height).await.unwrap();
        body.validate_against(&header).unwrap();
    }
    assert_eq!(
        local.chain.consensus_of(151).await.unwrap(),
        remote.chain.consensus_of(151).await.unwrap()
    );

    let mut caught_up = false;
    while let Ok(event) = events.try_recv() {
        if let SyncEvent::CaughtUp { height } = event {
            assert_eq!(height, 151);
            caught_up = true;
        }
    }
    assert!(caught_up);

    // Nothing left to fetch.
    assert!(!local.sync.catch_up().await.unwrap());
}

#[tokio::test]
async fn test_broken_header_chain_drops_peer() {
    let genesis = generate_devnet_genesis(4);
    let keys = keys(4);
    let local = node(&genesis).await;
    let remote = node(&genesis).await;

    extend(&local, &keys, 0).await;
    extend(&remote, &keys, 10).await;

    let peer = connect(&local, &remote, 9, true).await;
    let mut events = local.sync.subscribe();
    assert!(!local.sync.catch_up().await.unwrap());

    assert_eq!(local.chain.height().await.unwrap(), 1);
    assert!(local.peers.get(&peer).is_none());
    assert!(matches!(
        events.try_recv(),
        Ok(SyncEvent::PeerDropped { peer: dropped, .. }) if dropped == peer
    ));
}

#[tokio::test]
async fn test_gossiped_blocks_from_peer_are_admitted() {
    let genesis = generate_devnet_genesis(4);
    let keys = keys(4);
    let local = node(&genesis).await;
    let remote = node(&genesis).await;

    extend(&local, &keys, 0).await;
    extend(&remote, &keys, 3).await;
    let peer = connect(&local, &remote, 3, false).await;

    // Deliver highest first; admission still goes in height order.
    for height in (2..=4).rev() {
        let block = remote.chain.block_of(height).await.unwrap();
        let consensus = remote.chain.consensus_of(height).await.unwrap();
        local.sync.new_block(block, consensus, peer).await.unwrap();
    }
    local.sync.process_pending().await.unwrap();

    assert_eq!(local.chain.height().await.unwrap(), 4);
    assert_eq!(
        local.chain.hash_of(4).await.unwrap(),
        remote.chain.hash_of(4).await.unwrap()
    );
}
