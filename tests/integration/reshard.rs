//! Integration test: changing the number of virtual points per node.

use ringmaster_integration_tests::IntegrationCluster;

/// Density goes up, then down; keys follow each rebuilt ring.
#[tokio::test]
#[ntest::timeout(30000)]
async fn test_reshard_up_and_down() {
    let c = IntegrationCluster::new(4, 1);
    c.write_keys("obj", 1000).await;

    let outcome = c.master().update_shard_count(64).await.unwrap();
    assert!(outcome.report.is_clean());
    assert!(outcome.report.dispatched() > 0);
    assert_eq!(c.master().ring_snapshot().await.len(), 4 * 64);
    c.assert_placement("after reshard to 64").await;

    c.master().set_shard_count(8).await.unwrap();
    assert_eq!(c.master().virtual_node_count().await, 8);
    c.assert_placement("after reshard to 8").await;
}

/// More points per node evens out the key distribution.
#[tokio::test]
#[ntest::timeout(30000)]
async fn test_reshard_spreads_keys() {
    let c = IntegrationCluster::new(4, 128);
    c.write_keys("even", 4000).await;

    for address in c.master().list_nodes().await {
        let count = c.storage().key_count(&address);
        assert!(
            (400..=1600).contains(&count),
            "{address} holds {count} of 4000 keys"
        );
    }
}

/// Resharding an empty master only changes the density.
#[tokio::test]
#[ntest::timeout(30000)]
async fn test_reshard_without_nodes() {
    let c = IntegrationCluster::new(0, 4);

    let outcome = c.master().update_shard_count(32).await.unwrap();
    assert_eq!(outcome.report.dispatched(), 0);

    let first = c.add_node().await;
    assert_eq!(c.master().ring_snapshot().await.len(), 32);
    c.write_keys("late", 100).await;
    assert_eq!(c.storage().key_count(&first), 100);
}
