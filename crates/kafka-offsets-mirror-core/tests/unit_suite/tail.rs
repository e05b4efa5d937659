//! Tailing loop tests.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use kafka_offsets_mirror_core::{
    CompositeProcessor, FilterPolicy, FilterRule, LoopState, MirrorConverter, MirrorRecord,
    OffsetsLoop, RestoreConverter, RestoreTask, ShardedDispatcher,
};

use super::helpers::{
    raw_commit, raw_garbage, raw_group_metadata, raw_tombstone, RecordingProcessor,
    RejectingProcessor, ScriptedSource,
};

type Seen<T> = Arc<Mutex<Vec<(usize, T)>>>;

fn mirror_loop(
    source: ScriptedSource,
    filter: FilterPolicy,
    seen: &Seen<MirrorRecord>,
    poll_timeout: Duration,
) -> OffsetsLoop<MirrorConverter> {
    let closed = Arc::new(Mutex::new(Vec::new()));
    OffsetsLoop::new(
        Box::new(source),
        MirrorConverter,
        filter,
        Box::new(RecordingProcessor::new(0, seen, &closed)),
        poll_timeout,
    )
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_stop_before_run_closes_without_polling() {
    let source = ScriptedSource::new(vec![vec![raw_commit(0, "g", "t", 0, 1)]]);
    let closed = source.closed_flag();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let tail = mirror_loop(source, FilterPolicy::default(), &seen, Duration::from_millis(10));
    let handle = tail.handle();

    assert_eq!(handle.state(), LoopState::Created);
    assert!(handle.stop());

    let stats = tail.run().await.unwrap();

    assert_eq!(stats.polled, 0);
    assert!(seen.lock().is_empty());
    assert!(closed.load(Ordering::SeqCst));
    assert_eq!(handle.state(), LoopState::Stopped);
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let tail = mirror_loop(
        ScriptedSource::new(Vec::new()),
        FilterPolicy::default(),
        &seen,
        Duration::from_millis(10),
    );
    let handle = tail.handle();
    let running = tokio::spawn(tail.run());

    let mut stoppers = Vec::new();
    for _ in 0..8 {
        let handle = handle.clone();
        stoppers.push(tokio::spawn(async move { handle.stop() }));
    }
    let mut accepted = 0;
    for stopper in stoppers {
        if stopper.await.unwrap() {
            accepted += 1;
        }
    }

    assert_eq!(accepted, 1);
    assert!(handle.is_stop_requested());
    running.await.unwrap().unwrap();
    assert_eq!(handle.state(), LoopState::Stopped);
    assert!(!handle.stop());
}

#[tokio::test]
async fn test_stop_interrupts_pending_poll() {
    let source = ScriptedSource::new(Vec::new());
    let exhausted = source.exhausted();
    let closed = source.closed_flag();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let tail = mirror_loop(source, FilterPolicy::default(), &seen, Duration::from_secs(3600));
    let handle = tail.handle();
    let running = tokio::spawn(tail.run());

    // The source is now parked in a one hour poll.
    exhausted.notified().await;
    assert_eq!(handle.state(), LoopState::Running);
    handle.stop();

    let stats = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("stop should interrupt the poll")
        .unwrap()
        .unwrap();
    assert_eq!(stats.polled, 0);
    assert!(closed.load(Ordering::SeqCst));
}

// ============================================================================
// Record handling
// ============================================================================

#[tokio::test]
async fn test_records_are_converted_filtered_and_processed() {
    let source = ScriptedSource::new(vec![
        vec![
            raw_commit(0, "app", "orders", 0, 10),
            raw_group_metadata(1, "app"),
            raw_commit(2, "app", "_internal", 0, 5),
        ],
        vec![
            raw_garbage(3),
            raw_tombstone(4, "app", "orders", 1),
            raw_commit(5, "tooling-1", "orders", 0, 7),
        ],
    ]);
    let exhausted = source.exhausted();
    let filter = FilterPolicy::new(vec![
        FilterRule::group("tooling-.*").unwrap(),
        FilterRule::topic("_.*").unwrap(),
    ]);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let tail = mirror_loop(source, filter, &seen, Duration::from_millis(10));
    let handle = tail.handle();
    let running = tokio::spawn(tail.run());

    exhausted.notified().await;
    handle.stop();
    let stats = running.await.unwrap().unwrap();

    assert_eq!(stats.polled, 6);
    assert_eq!(stats.processed, 2);
    assert_eq!(stats.filtered, 2);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.undecodable, 1);
    assert_eq!(stats.failed, 0);

    let seen = seen.lock();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].1.value.as_ref().map(|v| v.offset), Some(10));
    assert!(seen[1].1.is_tombstone());
    assert_eq!(seen[1].1.key.partition(), 1);
}

#[tokio::test]
async fn test_shutdown_drains_dispatcher() {
    let batches: Vec<_> = (0..10)
        .map(|batch| {
            (0..20)
                .map(|i| {
                    let n = batch * 20 + i;
                    raw_commit(n, &format!("g{}", n % 7), "orders", (n % 3) as i32, n)
                })
                .collect()
        })
        .collect();
    let source = ScriptedSource::new(batches);
    let exhausted = source.exhausted();

    let seen: Seen<MirrorRecord> = Arc::new(Mutex::new(Vec::new()));
    let closed = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = ShardedDispatcher::new(4, 8, |lane| {
        RecordingProcessor::new(lane, &seen, &closed).with_delay(Duration::from_millis(1))
    })
    .unwrap();

    let tail = OffsetsLoop::new(
        Box::new(source),
        MirrorConverter,
        FilterPolicy::default(),
        Box::new(dispatcher),
        Duration::from_millis(10),
    );
    let handle = tail.handle();
    let running = tokio::spawn(tail.run());

    exhausted.notified().await;
    handle.stop();
    let stats = running.await.unwrap().unwrap();

    assert_eq!(stats.processed, 200);
    assert_eq!(seen.lock().len(), 200);
    assert_eq!(closed.lock().len(), 4);
}

#[tokio::test]
async fn test_restore_pipeline_skips_tombstones() {
    let source = ScriptedSource::new(vec![vec![
        raw_commit(0, "app", "orders", 0, 10),
        raw_tombstone(1, "app", "orders", 0),
        raw_commit(2, "app", "orders", 0, 12),
    ]]);
    let exhausted = source.exhausted();
    let seen: Seen<RestoreTask> = Arc::new(Mutex::new(Vec::new()));
    let closed = Arc::new(Mutex::new(Vec::new()));

    let tail = OffsetsLoop::new(
        Box::new(source),
        RestoreConverter,
        FilterPolicy::default(),
        Box::new(RecordingProcessor::new(0, &seen, &closed)),
        Duration::from_millis(10),
    );
    let handle = tail.handle();
    let running = tokio::spawn(tail.run());

    exhausted.notified().await;
    handle.stop();
    let stats = running.await.unwrap().unwrap();

    assert_eq!(stats.processed, 2);
    assert_eq!(stats.skipped, 1);
    let offsets: Vec<i64> = seen.lock().iter().map(|(_, t)| t.requested_offset).collect();
    assert_eq!(offsets, vec![10, 12]);
    assert_eq!(*closed.lock(), vec![0]);
}

// ============================================================================
// Processor failures
// ============================================================================

#[tokio::test]
async fn test_failing_chain_stage_counts_as_failed() {
    let source = ScriptedSource::new(vec![vec![
        raw_commit(0, "app", "orders", 0, 10),
        raw_commit(1, "app", "orders", 1, 11),
    ]]);
    let exhausted = source.exhausted();
    let seen: Seen<MirrorRecord> = Arc::new(Mutex::new(Vec::new()));
    let closed = Arc::new(Mutex::new(Vec::new()));
    let chain = CompositeProcessor::<MirrorRecord>::default()
        .with(RejectingProcessor)
        .with(RecordingProcessor::new(0, &seen, &closed));

    let tail = OffsetsLoop::new(
        Box::new(source),
        MirrorConverter,
        FilterPolicy::default(),
        Box::new(chain),
        Duration::from_millis(10),
    );
    let handle = tail.handle();
    let running = tokio::spawn(tail.run());

    exhausted.notified().await;
    handle.stop();
    let stats = running.await.unwrap().unwrap();

    assert_eq!(stats.processed, 0);
    assert_eq!(stats.failed, 2);
    // Stages after the failing one still see every record.
    assert_eq!(seen.lock().len(), 2);
    assert_eq!(*closed.lock(), vec![0]);
}

#[tokio::test]
async fn test_submit_to_closed_dispatcher_counts_as_failed() {
    let source = ScriptedSource::new(vec![vec![
        raw_commit(0, "app", "orders", 0, 10),
        raw_tombstone(1, "app", "orders", 0),
    ]]);
    let exhausted = source.exhausted();
    let seen: Seen<MirrorRecord> = Arc::new(Mutex::new(Vec::new()));
    let closed = Arc::new(Mutex::new(Vec::new()));
    let mut dispatcher = ShardedDispatcher::new(2, 4, |lane| {
        RecordingProcessor::new(lane, &seen, &closed)
    })
    .unwrap();
    dispatcher.close().await;

    let chain = CompositeProcessor::<MirrorRecord>::default().with(dispatcher);
    let tail = OffsetsLoop::new(
        Box::new(source),
        MirrorConverter,
        FilterPolicy::default(),
        Box::new(chain),
        Duration::from_millis(10),
    );
    let handle = tail.handle();
    let running = tokio::spawn(tail.run());

    exhausted.notified().await;
    handle.stop();
    let stats = running.await.unwrap().unwrap();

    assert_eq!(stats.processed, 0);
    assert_eq!(stats.failed, 2);
    assert!(seen.lock().is_empty());
}
