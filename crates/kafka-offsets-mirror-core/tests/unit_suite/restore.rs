//! Restore processor tests.
//!
//! Tests for replaying mirrored positions onto live groups:
//! - Clamping to the destination high-watermark
//! - Missing destination partitions
//! - Connection and watermark caching per group
//! - Shutdown of cached connections

use std::sync::Arc;

use parking_lot::Mutex;

use kafka_offsets_mirror_core::{
    OffsetKey, OffsetsProcessor, RestoreProcessor, RestoreTask, ShardedDispatcher, TopicPartition,
};

use super::helpers::{Call, MockCluster, MockConnector};

fn task(group: &str, topic: &str, partition: i32, offset: i64) -> RestoreTask {
    RestoreTask::new(OffsetKey::new(group, topic, partition), offset)
}

fn processor(cluster: &Arc<MockCluster>) -> RestoreProcessor {
    RestoreProcessor::new(Box::new(MockConnector::new(cluster)))
}

fn orders_cluster() -> Arc<MockCluster> {
    Arc::new(
        MockCluster::new()
            .with_topic("orders", 2)
            .with_end_offset("orders", 0, 40)
            .with_end_offset("orders", 1, 75),
    )
}

// ============================================================================
// Clamping
// ============================================================================

#[tokio::test]
async fn test_requested_offset_beyond_high_watermark_is_clamped() {
    let cluster = orders_cluster();
    let mut restore = processor(&cluster);

    restore.process(&task("app", "orders", 0, 100)).await.unwrap();

    let tp = TopicPartition::new("orders", 0);
    assert_eq!(cluster.seeks(), vec![("app".to_string(), tp.clone(), 40)]);
    assert!(cluster
        .calls()
        .contains(&Call::Commit("app".to_string(), vec![(tp, 40)])));
}

#[tokio::test]
async fn test_requested_offset_below_high_watermark_is_kept() {
    let cluster = orders_cluster();
    let mut restore = processor(&cluster);

    restore.process(&task("app", "orders", 0, 20)).await.unwrap();

    assert_eq!(
        cluster.seeks(),
        vec![("app".to_string(), TopicPartition::new("orders", 0), 20)]
    );
}

#[tokio::test]
async fn test_seek_is_followed_by_commit() {
    let cluster = orders_cluster();
    let mut restore = processor(&cluster);

    restore.process(&task("app", "orders", 1, 10)).await.unwrap();

    let calls = cluster.calls();
    let seek = calls
        .iter()
        .position(|c| matches!(c, Call::Seek(..)))
        .unwrap();
    let commit = calls
        .iter()
        .position(|c| matches!(c, Call::Commit(..)))
        .unwrap();
    assert!(seek < commit);
}

// ============================================================================
// Missing partitions
// ============================================================================

#[tokio::test]
async fn test_missing_partition_is_skipped() {
    let cluster = orders_cluster();
    let mut restore = processor(&cluster);
    let missing = task("app", "orders", 5, 10);

    restore.process(&missing).await.unwrap();

    assert!(cluster.seeks().is_empty());
    assert_eq!(cluster.count(|c| matches!(c, Call::Commit(..))), 0);
    assert_eq!(cluster.count(|c| matches!(c, Call::Assign(..))), 0);
    assert_eq!(restore.high_watermark(&missing.key), None);
}

#[tokio::test]
async fn test_missing_topic_is_skipped() {
    let cluster = orders_cluster();
    let mut restore = processor(&cluster);

    restore.process(&task("app", "payments", 0, 10)).await.unwrap();

    assert!(cluster.seeks().is_empty());
    assert_eq!(cluster.count(|c| matches!(c, Call::Commit(..))), 0);
}

// ============================================================================
// Caching
// ============================================================================

#[tokio::test]
async fn test_connection_and_watermark_are_cached() {
    let cluster = orders_cluster();
    let mut restore = processor(&cluster);

    restore.process(&task("app", "orders", 0, 10)).await.unwrap();
    restore.process(&task("app", "orders", 0, 30)).await.unwrap();
    restore.process(&task("app", "orders", 0, 90)).await.unwrap();

    assert_eq!(cluster.count(|c| matches!(c, Call::Connect(_))), 1);
    assert_eq!(cluster.count(|c| matches!(c, Call::EndOffset(..))), 1);
    assert_eq!(restore.connection_count(), 1);
    assert_eq!(
        restore.high_watermark(&OffsetKey::new("app", "orders", 0)),
        Some(40)
    );

    let offsets: Vec<i64> = cluster.seeks().into_iter().map(|(_, _, o)| o).collect();
    assert_eq!(offsets, vec![10, 30, 40]);
}

#[tokio::test]
async fn test_switching_partition_reassigns() {
    let cluster = orders_cluster();
    let mut restore = processor(&cluster);

    restore.process(&task("app", "orders", 0, 100)).await.unwrap();
    restore.process(&task("app", "orders", 1, 100)).await.unwrap();

    let assigns: Vec<Call> = cluster
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::Assign(..)))
        .collect();
    assert_eq!(
        assigns,
        vec![
            Call::Assign("app".to_string(), vec![TopicPartition::new("orders", 0)]),
            Call::Assign("app".to_string(), vec![TopicPartition::new("orders", 1)]),
        ]
    );

    // The assignment is replaced, so only the new partition is committed.
    assert!(cluster.calls().contains(&Call::Commit(
        "app".to_string(),
        vec![(TopicPartition::new("orders", 1), 75)]
    )));
}

#[tokio::test]
async fn test_one_connection_per_group() {
    let cluster = orders_cluster();
    let mut restore = processor(&cluster);

    restore.process(&task("a", "orders", 0, 1)).await.unwrap();
    restore.process(&task("b", "orders", 0, 1)).await.unwrap();
    restore.process(&task("a", "orders", 0, 2)).await.unwrap();

    assert_eq!(restore.connection_count(), 2);
    assert_eq!(
        cluster.count(|c| matches!(c, Call::Connect(g) if g == "a")),
        1
    );
    assert_eq!(
        cluster.count(|c| matches!(c, Call::Connect(g) if g == "b")),
        1
    );
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_close_attempts_every_connection() {
    let cluster = Arc::new(
        MockCluster::new()
            .with_topic("orders", 1)
            .with_end_offset("orders", 0, 10)
            .with_failing_close("a"),
    );
    let mut restore = processor(&cluster);

    for group in ["a", "b", "c"] {
        restore.process(&task(group, "orders", 0, 5)).await.unwrap();
    }
    restore.close().await.unwrap();

    let mut closed: Vec<String> = cluster
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::Close(group) => Some(group),
            _ => None,
        })
        .collect();
    closed.sort();
    assert_eq!(closed, vec!["a", "b", "c"]);
    assert_eq!(restore.connection_count(), 0);
}

#[tokio::test]
async fn test_restore_behind_dispatcher() {
    let cluster = orders_cluster();
    let lanes = Arc::new(Mutex::new(Vec::new()));
    let mut dispatcher = ShardedDispatcher::new(4, 16, |lane| {
        lanes.lock().push(lane);
        processor(&cluster)
    })
    .unwrap();

    for offset in [5, 15, 25, 35, 45] {
        for group in ["g1", "g2", "g3"] {
            dispatcher
                .submit(task(group, "orders", 0, offset))
                .await
                .unwrap();
        }
    }
    dispatcher.close().await;

    assert_eq!(lanes.lock().len(), 4);
    // Each group lives on one lane, so it is connected exactly once.
    for group in ["g1", "g2", "g3"] {
        assert_eq!(
            cluster.count(|c| matches!(c, Call::Connect(g) if g == group)),
            1
        );
        let seeks: Vec<i64> = cluster
            .seeks()
            .into_iter()
            .filter(|(g, _, _)| g == group)
            .map(|(_, _, o)| o)
            .collect();
        assert_eq!(seeks, vec![5, 15, 25, 35, 40]);
    }
    assert_eq!(cluster.count(|c| matches!(c, Call::Close(_))), 3);
}
