//! Sharded dispatcher tests.
//!
//! - Per-key ordering across lanes
//! - Stable key to lane routing
//! - Backpressure on full lanes
//! - Draining on close

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use kafka_offsets_mirror_core::{MirrorRecord, OffsetKey, OffsetsProcessor, Result, ShardedDispatcher};

use super::helpers::{commit, RecordingProcessor};

type Seen = Arc<Mutex<Vec<(usize, MirrorRecord)>>>;

fn recording_dispatcher(num_lanes: usize, capacity: usize, seen: &Seen) -> ShardedDispatcher<MirrorRecord> {
    let closed = Arc::new(Mutex::new(Vec::new()));
    ShardedDispatcher::new(num_lanes, capacity, |lane| {
        RecordingProcessor::new(lane, seen, &closed)
    })
    .unwrap()
}

fn offset_of(record: &MirrorRecord) -> i64 {
    record.value.as_ref().map(|v| v.offset).unwrap_or(-1)
}

// ============================================================================
// Ordering and routing
// ============================================================================

#[tokio::test]
async fn test_per_key_order_is_preserved() {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let mut dispatcher = recording_dispatcher(4, 8, &seen);

    let groups = ["alpha", "beta", "gamma", "delta", "epsilon", "zeta"];
    for offset in 0..100 {
        for group in groups {
            dispatcher
                .submit(commit(group, "orders", 0, offset))
                .await
                .unwrap();
        }
    }
    dispatcher.close().await;

    let seen = seen.lock();
    assert_eq!(seen.len(), 600);

    let mut per_key: HashMap<OffsetKey, Vec<i64>> = HashMap::new();
    for (_, record) in seen.iter() {
        per_key
            .entry(record.key.clone())
            .or_default()
            .push(offset_of(record));
    }
    for (key, offsets) in per_key {
        assert_eq!(offsets, (0..100).collect::<Vec<_>>(), "order broken for {}", key);
    }
}

#[tokio::test]
async fn test_same_key_always_same_lane() {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let mut dispatcher = recording_dispatcher(7, 16, &seen);

    let records: Vec<MirrorRecord> = (0..50)
        .map(|i| commit(&format!("group-{}", i % 10), "orders", i % 3, i as i64))
        .collect();

    for record in &records {
        let lane = dispatcher.lane_for(record);
        for _ in 0..5 {
            assert_eq!(dispatcher.lane_for(record), lane);
        }
        assert!(lane < dispatcher.num_lanes());
        dispatcher.submit(record.clone()).await.unwrap();
    }
    dispatcher.close().await;

    // Each record was handled on the lane it routes to, and every key on one lane.
    let mut lanes_per_key: HashMap<OffsetKey, Vec<usize>> = HashMap::new();
    for (lane, record) in seen.lock().iter() {
        let expected = records
            .iter()
            .find(|r| r.key == record.key)
            .map(|r| dispatcher.lane_for(r))
            .unwrap();
        assert_eq!(*lane, expected);
        lanes_per_key.entry(record.key.clone()).or_default().push(*lane);
    }
    for lanes in lanes_per_key.values() {
        assert!(lanes.windows(2).all(|w| w[0] == w[1]));
    }
}

#[tokio::test]
async fn test_routing_stable_across_dispatchers() {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let mut first = recording_dispatcher(5, 4, &seen);
    let mut second = recording_dispatcher(5, 4, &seen);

    for i in 0..20 {
        let record = commit(&format!("g{}", i), "t", i, 0);
        assert_eq!(first.lane_for(&record), second.lane_for(&record));
    }

    first.close().await;
    second.close().await;
}

// ============================================================================
// Backpressure and shutdown
// ============================================================================

struct Gated {
    gate: Arc<Semaphore>,
    seen: Arc<Mutex<Vec<i64>>>,
}

#[async_trait]
impl OffsetsProcessor<MirrorRecord> for Gated {
    async fn process(&mut self, record: &MirrorRecord) -> Result<()> {
        self.gate.acquire().await.unwrap().forget();
        self.seen.lock().push(offset_of(record));
        Ok(())
    }
}

#[tokio::test]
async fn test_submit_blocks_when_lane_is_full() {
    let gate = Arc::new(Semaphore::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut dispatcher = ShardedDispatcher::new(1, 1, |_| Gated {
        gate: Arc::clone(&gate),
        seen: Arc::clone(&seen),
    })
    .unwrap();

    // One record held by the lane, one in the queue.
    dispatcher.submit(commit("g", "t", 0, 1)).await.unwrap();
    dispatcher.submit(commit("g", "t", 0, 2)).await.unwrap();

    let third = tokio::time::timeout(
        Duration::from_millis(100),
        dispatcher.submit(commit("g", "t", 0, 3)),
    )
    .await;
    assert!(third.is_err(), "submit should wait for lane capacity");

    gate.add_permits(10);
    dispatcher.submit(commit("g", "t", 0, 4)).await.unwrap();
    dispatcher.close().await;

    assert_eq!(*seen.lock(), vec![1, 2, 4]);
}

#[tokio::test]
async fn test_close_drains_queued_records() {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let closed = Arc::new(Mutex::new(Vec::new()));
    let mut dispatcher = ShardedDispatcher::new(3, 64, |lane| {
        RecordingProcessor::new(lane, &seen, &closed).with_delay(Duration::from_millis(2))
    })
    .unwrap();

    for i in 0..60 {
        dispatcher
            .submit(commit(&format!("g{}", i % 6), "t", 0, i))
            .await
            .unwrap();
    }
    dispatcher.close().await;

    assert_eq!(seen.lock().len(), 60);

    let mut closed = closed.lock().clone();
    closed.sort();
    assert_eq!(closed, vec![0, 1, 2], "every lane closes its processor once");
}
