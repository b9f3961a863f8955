//! Integration test: stress.
//!
//! Concurrent topology changes with concurrent routing readers. Verifies
//! that readers never see a partial ring and that no key is lost.

use std::sync::Arc;

use ringmaster_integration_tests::IntegrationCluster;
use tokio::sync::Barrier;

/// 8 writers add (and some remove) nodes while 8 readers route keys.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(60000)]
async fn test_concurrent_changes_and_reads() {
    const VNODES: u32 = 16;
    let c = Arc::new(IntegrationCluster::new(3, VNODES));
    c.write_keys("stress", 2000).await;

    let barrier = Arc::new(Barrier::new(16));
    let mut handles = Vec::new();

    for writer_id in 0..8 {
        let cluster = c.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            let added = cluster.add_node().await;
            if writer_id % 2 == 1 {
                assert!(cluster.master().remove_node(&added).await.unwrap());
            }
        }));
    }

    for reader_id in 0..8 {
        let cluster = c.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            for i in 0..250 {
                let ring = cluster.master().ring_snapshot().await;
                assert_eq!(ring.len(), ring.node_count() * VNODES as usize);

                let key = format!("stress-{}", (reader_id * 250 + i) % 2000);
                assert!(cluster.master().resolve(&key).await.is_some());
                tokio::task::yield_now().await;
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(c.master().list_nodes().await.len(), 3 + 4);
    assert_eq!(c.master().version().await, 12);
    c.assert_placement("after concurrent changes").await;
}

/// Many nodes with dense rings: placement still exact.
#[tokio::test]
#[ntest::timeout(60000)]
async fn test_large_cluster_growth() {
    let c = IntegrationCluster::new(2, 64);
    c.write_keys("big", 5000).await;

    for _ in 0..18 {
        c.add_node().await;
    }

    assert_eq!(c.master().list_nodes().await.len(), 20);
    assert_eq!(c.master().ring_snapshot().await.len(), 20 * 64);
    c.assert_placement("after growth to 20 nodes").await;
}
