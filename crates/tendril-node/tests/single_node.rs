//! Runs a one-validator node and feeds it transactions through the router.

use std::time::Duration;
use tendril_consensus::ConsensusConfig;
use tendril_node::{Node, NodeConfig};
use tendril_p2p::{Message, PeerId};
use tendril_types::Transaction;

fn fast_config() -> NodeConfig {
    NodeConfig {
        consensus: ConsensusConfig {
            idle_poll_ms: 5,
            ..ConsensusConfig::default()
        },
        ..NodeConfig::default()
    }
}

#[tokio::test]
async fn test_node_commits_routed_transactions() {
    let node = Node::build(fast_config()).await.unwrap();
    let chain = node.chain().clone();
    let router = node.router().clone();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let running = tokio::spawn(node.run(async {
        let _ = stop_rx.await;
    }));

    let client = PeerId::from_public_key(&[42; 32]);
    let reached = tokio::time::timeout(Duration::from_secs(30), async {
        let mut sent = 0u64;
        loop {
            let height = chain.height().await.unwrap();
            if chain.consented_height().await.unwrap() >= 4 {
                break;
            }
            if sent < height {
                let tx = Transaction::new(format!("routed-{}", height).into_bytes());
                router
                    .handle_message(client, Message::NewTransaction(tx))
                    .await
                    .unwrap();
                sent = height;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "node stalled");

    let _ = stop_tx.send(());
    running.await.unwrap().unwrap();

    let tip = chain.height().await.unwrap();
    let with_transactions = {
        let mut count = 0;
        for height in 2..=tip {
            count += chain.body_of(height).await.unwrap().transactions.len();
        }
        count
    };
    assert!(with_transactions > 0);
}

#[tokio::test]
async fn test_hello_reports_chain_status() {
    let node = Node::build(NodeConfig::default()).await.unwrap();
    match node.router().hello().await.unwrap() {
        Message::Hello {
            genesis_hash,
            height,
            consensus_height,
        } => {
            assert_eq!(genesis_hash, node.chain().genesis_hash());
            assert_eq!(height, 1);
            assert_eq!(consensus_height, 0);
        }
        other => panic!("unexpected message {}", other.kind()),
    }
}

#[tokio::test]
async fn test_observer_node_builds() {
    let config = NodeConfig {
        observer: true,
        ..NodeConfig::default()
    };
    let node = Node::build(config).await.unwrap();
    assert_eq!(node.chain().height().await.unwrap(), 1);
    assert!(node.peers().is_empty());
}
