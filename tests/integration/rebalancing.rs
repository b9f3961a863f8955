//! Integration test: rebalancing.
//!
//! Start with a small cluster, add and remove nodes, verify that every key
//! ends up on the node the ring routes it to.

use ringmaster_integration_tests::{IntegrationCluster, node_address};

/// 3-node cluster, write 1000 keys, add 2 more nodes.
#[tokio::test]
#[ntest::timeout(30000)]
async fn test_add_nodes_moves_keys_to_new_owners() {
    let c = IntegrationCluster::new(3, 16);
    c.write_keys("obj", 1000).await;
    c.assert_placement("before expansion").await;

    let fourth = c.add_node().await;
    c.assert_placement("after fourth node").await;
    let fifth = c.add_node().await;
    c.assert_placement("after fifth node").await;

    assert_eq!(c.master().list_nodes().await.len(), 5);
    assert!(c.storage().key_count(&fourth) > 0, "new node received no keys");
    assert!(c.storage().key_count(&fifth) > 0, "new node received no keys");
}

/// Removing a node hands all of its keys to the survivors.
#[tokio::test]
#[ntest::timeout(30000)]
async fn test_remove_node_drains_its_keys() {
    let c = IntegrationCluster::new(4, 16);
    c.write_keys("obj", 1000).await;

    let victim = node_address(1);
    assert!(c.storage().key_count(&victim) > 0);

    assert!(c.master().remove_node(&victim).await.unwrap());
    c.assert_placement("after removal").await;
    assert_eq!(c.storage().key_count(&victim), 0);
}

/// A single node owns the whole space; a second node takes over its share.
#[tokio::test]
#[ntest::timeout(30000)]
async fn test_single_node_then_second() {
    let c = IntegrationCluster::new(0, 8);

    let first = c.add_node().await;
    c.write_keys("solo", 300).await;
    assert_eq!(c.storage().key_count(&first), 300);

    let second = c.add_node().await;
    c.assert_placement("after second node").await;
    assert!(c.storage().key_count(&second) > 0);

    // Back to one node: everything returns to it.
    assert!(c.master().remove_node(&second).await.unwrap());
    c.assert_placement("back to one node").await;
    assert_eq!(c.storage().key_count(&first), 300);
}

/// Nodes join and leave in turn; placement holds after every step.
#[tokio::test]
#[ntest::timeout(60000)]
async fn test_churn_keeps_placement() {
    let c = IntegrationCluster::new(3, 8);
    c.write_keys("churn", 800).await;

    for round in 0..6 {
        let added = c.add_node().await;
        c.assert_placement(&format!("round {round} add")).await;

        let nodes = c.master().list_nodes().await;
        let leaving = nodes
            .iter()
            .find(|address| **address != added)
            .cloned()
            .unwrap();
        assert!(c.master().remove_node(&leaving).await.unwrap());
        c.assert_placement(&format!("round {round} remove")).await;
    }

    assert_eq!(c.master().list_nodes().await.len(), 3);
    assert!(c.master().pending_migrations().await.is_empty());
}

/// Re-adding an existing node changes nothing.
#[tokio::test]
#[ntest::timeout(30000)]
async fn test_duplicate_add_moves_nothing() {
    let c = IntegrationCluster::new(3, 16);
    c.write_keys("dup", 200).await;
    let version = c.master().version().await;

    assert!(!c.master().add_node(&node_address(0)).await.unwrap());
    assert_eq!(c.master().version().await, version);
    c.assert_placement("after duplicate add").await;
}
