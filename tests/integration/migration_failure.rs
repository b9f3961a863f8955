//! Integration test: migrations that fail stay pending until retried.

use std::time::Duration;

use ringmaster_coordinator::{MasterConfig, TopologyEvent};
use ringmaster_integration_tests::{IntegrationCluster, node_address};
use ringmaster_migration::{ExecutorConfig, MigrationError};

/// The source of every move is down: the topology changes, the data does
/// not, and a retry after recovery completes the move.
#[tokio::test]
#[ntest::timeout(30000)]
async fn test_failed_moves_are_retried_after_recovery() {
    let c = IntegrationCluster::new(3, 16);
    c.write_keys("obj", 600).await;
    let mut events = c.master().subscribe();

    let sick = node_address(0);
    c.storage().kill_node(&sick);

    let added = c.add_node().await;
    assert!(c.master().list_nodes().await.contains(&added));

    let pending = c.master().pending_migrations().await;
    assert!(!pending.is_empty());
    assert!(pending.iter().all(|command| command.source.address() == sick));
    assert!(!c.misplaced().await.is_empty());

    // NodeAdded first, then one MigrationFailed per pending command.
    assert!(matches!(
        events.recv().await.unwrap(),
        TopologyEvent::NodeAdded { .. }
    ));
    for _ in 0..pending.len() {
        assert!(matches!(
            events.recv().await.unwrap(),
            TopologyEvent::MigrationFailed { .. }
        ));
    }

    // Retrying while the node is still down keeps everything pending.
    let report = c.master().retry_pending().await;
    assert_eq!(report.failed.len(), pending.len());
    assert_eq!(c.master().pending_migrations().await.len(), pending.len());

    c.storage().revive_node(&sick);
    let report = c.master().retry_pending().await;
    assert!(report.is_clean());
    assert!(c.master().pending_migrations().await.is_empty());
    c.assert_placement("after retry").await;
}

/// Moves from healthy nodes complete even when another source is down.
#[tokio::test]
#[ntest::timeout(30000)]
async fn test_healthy_sources_are_unaffected() {
    let c = IntegrationCluster::new(4, 32);
    c.write_keys("obj", 800).await;

    let sick = node_address(2);
    c.storage().kill_node(&sick);
    let outcome = c.master().update_shard_count(8).await.unwrap();

    assert!(!outcome.report.completed.is_empty());
    assert!(!outcome.report.failed.is_empty());
    assert!(
        outcome
            .report
            .failed
            .iter()
            .all(|f| f.command.source.address() == sick || f.command.target.address() == sick)
    );

    c.storage().revive_node(&sick);
    c.master().retry_pending().await;
    c.assert_placement("after retry").await;
}

/// A node that fails, recovers, and sees its would-be target leave again
/// still owns its data: retrying must not ship it to the departed node.
#[tokio::test]
#[ntest::timeout(30000)]
async fn test_retry_after_target_removed_keeps_placement() {
    let c = IntegrationCluster::new(3, 16);
    c.write_keys("obj", 600).await;

    let sick = node_address(0);
    c.storage().kill_node(&sick);
    let added = c.add_node().await;
    assert!(!c.master().pending_migrations().await.is_empty());

    c.storage().revive_node(&sick);
    assert!(c.master().remove_node(&added).await.unwrap());
    c.assert_placement("after removal").await;

    let report = c.master().retry_pending().await;
    assert!(report.is_clean());
    assert!(report.completed.is_empty());
    assert!(c.master().pending_migrations().await.is_empty());
    assert_eq!(c.storage().key_count(&added), 0);
    c.assert_placement("after retry").await;
}

/// A per-call timeout turns a hung client into a pending migration instead
/// of blocking the master.
#[tokio::test]
#[ntest::timeout(30000)]
async fn test_hung_source_times_out_into_pending() {
    let limit = Duration::from_millis(100);
    let config = MasterConfig {
        virtual_nodes: 16,
        executor: ExecutorConfig {
            max_concurrent: 2,
            call_timeout: Some(limit),
        },
        ..MasterConfig::default()
    };
    let c = IntegrationCluster::with_config(2, config);
    c.write_keys("obj", 200).await;
    let mut events = c.master().subscribe();

    let stuck = node_address(0);
    c.storage().hang_node(&stuck);
    let added = c.add_node().await;

    let pending = c.master().pending_migrations().await;
    assert!(!pending.is_empty());
    assert!(pending.iter().all(|command| command.source.address() == stuck));
    assert!(!c.misplaced().await.is_empty());

    assert!(matches!(
        events.recv().await.unwrap(),
        TopologyEvent::NodeAdded { .. }
    ));
    for _ in 0..pending.len() {
        match events.recv().await.unwrap() {
            TopologyEvent::MigrationFailed { error, .. } => {
                assert_eq!(error, MigrationError::Timeout(limit));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    c.storage().revive_node(&stuck);
    let report = c.master().retry_pending().await;
    assert!(report.is_clean());
    assert!(c.storage().key_count(&added) > 0);
    c.assert_placement("after retry").await;
}
