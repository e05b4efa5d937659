//! Test helper utilities.
//!
//! In-memory stand-ins for the source log, downstream processors and the
//! destination cluster's group connections.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use kafka_offsets_mirror_core::codec;
use kafka_offsets_mirror_core::{
    Error, GroupConnection, GroupConnector, MirrorRecord, OffsetKey, OffsetValue,
    OffsetsProcessor, OffsetsSource, RawRecord, Result, TopicPartition,
};

/// Offset commit record for a key
pub fn commit(group: &str, topic: &str, partition: i32, offset: i64) -> MirrorRecord {
    MirrorRecord::commit(OffsetKey::new(group, topic, partition), OffsetValue::new(offset))
}

/// Raw source record carrying an encoded offset commit
pub fn raw_commit(log_offset: i64, group: &str, topic: &str, partition: i32, offset: i64) -> RawRecord {
    let key = codec::encode_key(&OffsetKey::new(group, topic, partition)).unwrap();
    let value = codec::encode_value(&OffsetValue::new(offset)).unwrap();
    RawRecord {
        partition: 0,
        offset: log_offset,
        key: Some(key.to_vec()),
        value: Some(value.to_vec()),
    }
}

/// Raw source record carrying a tombstone
pub fn raw_tombstone(log_offset: i64, group: &str, topic: &str, partition: i32) -> RawRecord {
    let key = codec::encode_key(&OffsetKey::new(group, topic, partition)).unwrap();
    RawRecord {
        partition: 0,
        offset: log_offset,
        key: Some(key.to_vec()),
        value: None,
    }
}

/// Raw source record with a group metadata key (key version 2)
pub fn raw_group_metadata(log_offset: i64, group: &str) -> RawRecord {
    let mut key = vec![0u8, 2];
    key.extend_from_slice(&(group.len() as i16).to_be_bytes());
    key.extend_from_slice(group.as_bytes());
    RawRecord {
        partition: 0,
        offset: log_offset,
        key: Some(key),
        value: Some(vec![0, 3, 1, 2, 3]),
    }
}

/// Raw source record that cannot be decoded
pub fn raw_garbage(log_offset: i64) -> RawRecord {
    RawRecord {
        partition: 0,
        offset: log_offset,
        key: Some(vec![0, 1, 0]),
        value: Some(vec![0]),
    }
}

// ============================================================================
// Source
// ============================================================================

/// Source replaying fixed batches, then idling until the poll timeout.
pub struct ScriptedSource {
    batches: VecDeque<Vec<RawRecord>>,
    closed: Arc<AtomicBool>,
    exhausted: Arc<Notify>,
}

impl ScriptedSource {
    pub fn new(batches: Vec<Vec<RawRecord>>) -> Self {
        Self {
            batches: batches.into(),
            closed: Arc::new(AtomicBool::new(false)),
            exhausted: Arc::new(Notify::new()),
        }
    }

    /// Flag set once the source is closed
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }

    /// Notified when the last scripted batch has been handed out
    pub fn exhausted(&self) -> Arc<Notify> {
        Arc::clone(&self.exhausted)
    }
}

#[async_trait]
impl OffsetsSource for ScriptedSource {
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<RawRecord>> {
        if let Some(batch) = self.batches.pop_front() {
            return Ok(batch);
        }
        self.exhausted.notify_one();
        tokio::time::sleep(timeout).await;
        Ok(Vec::new())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Processors
// ============================================================================

/// Processor recording every record it sees, optionally slowly.
pub struct RecordingProcessor<T> {
    pub lane: usize,
    pub seen: Arc<Mutex<Vec<(usize, T)>>>,
    pub closed: Arc<Mutex<Vec<usize>>>,
    pub delay: Option<Duration>,
}

impl<T> RecordingProcessor<T> {
    pub fn new(lane: usize, seen: &Arc<Mutex<Vec<(usize, T)>>>, closed: &Arc<Mutex<Vec<usize>>>) -> Self {
        Self {
            lane,
            seen: Arc::clone(seen),
            closed: Arc::clone(closed),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl<T> OffsetsProcessor<T> for RecordingProcessor<T>
where
    T: Clone + Send + Sync,
{
    async fn process(&mut self, record: &T) -> Result<()> {
        match self.delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }
        self.seen.lock().push((self.lane, record.clone()));
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed.lock().push(self.lane);
        Ok(())
    }
}

/// Processor rejecting every record.
pub struct RejectingProcessor;

#[async_trait]
impl<T> OffsetsProcessor<T> for RejectingProcessor
where
    T: Send + Sync,
{
    async fn process(&mut self, _record: &T) -> Result<()> {
        Err(Error::InvalidState("record rejected".to_string()))
    }
}

// ============================================================================
// Destination cluster
// ============================================================================

/// Calls observed by the mock group connections
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect(String),
    Assign(String, Vec<TopicPartition>),
    EndOffset(String, TopicPartition),
    Seek(String, TopicPartition, i64),
    Commit(String, Vec<(TopicPartition, i64)>),
    Close(String),
}

/// In-memory destination cluster shared by mock connections.
#[derive(Default)]
pub struct MockCluster {
    partitions: HashMap<String, Vec<i32>>,
    end_offsets: HashMap<TopicPartition, i64>,
    failing_close: HashSet<String>,
    calls: Mutex<Vec<Call>>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a topic with `partitions` partitions
    pub fn with_topic(mut self, topic: &str, partitions: i32) -> Self {
        self.partitions.insert(topic.to_string(), (0..partitions).collect());
        self
    }

    pub fn with_end_offset(mut self, topic: &str, partition: i32, offset: i64) -> Self {
        self.end_offsets
            .insert(TopicPartition::new(topic, partition), offset);
        self
    }

    /// Make closing the connection of `group` fail
    pub fn with_failing_close(mut self, group: &str) -> Self {
        self.failing_close.insert(group.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn seeks(&self) -> Vec<(String, TopicPartition, i64)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Seek(group, tp, offset) => Some((group, tp, offset)),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, matcher: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| matcher(c)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

pub struct MockConnector {
    cluster: Arc<MockCluster>,
}

impl MockConnector {
    pub fn new(cluster: &Arc<MockCluster>) -> Self {
        Self {
            cluster: Arc::clone(cluster),
        }
    }
}

#[async_trait]
impl GroupConnector for MockConnector {
    async fn connect(&mut self, group_id: &str) -> Result<Box<dyn GroupConnection>> {
        self.cluster.record(Call::Connect(group_id.to_string()));
        Ok(Box::new(MockConnection {
            group: group_id.to_string(),
            cluster: Arc::clone(&self.cluster),
            assignment: Vec::new(),
            positions: HashMap::new(),
        }))
    }
}

pub struct MockConnection {
    group: String,
    cluster: Arc<MockCluster>,
    assignment: Vec<TopicPartition>,
    positions: HashMap<TopicPartition, i64>,
}

#[async_trait]
impl GroupConnection for MockConnection {
    fn assignment(&self) -> &[TopicPartition] {
        &self.assignment
    }

    async fn partitions_for(&mut self, topic: &str) -> Result<Vec<i32>> {
        Ok(self.cluster.partitions.get(topic).cloned().unwrap_or_default())
    }

    fn assign(&mut self, partitions: Vec<TopicPartition>) {
        self.cluster
            .record(Call::Assign(self.group.clone(), partitions.clone()));
        self.positions.retain(|tp, _| partitions.contains(tp));
        self.assignment = partitions;
    }

    async fn end_offset(&mut self, partition: &TopicPartition) -> Result<i64> {
        self.cluster
            .record(Call::EndOffset(self.group.clone(), partition.clone()));
        Ok(self.cluster.end_offsets.get(partition).copied().unwrap_or(0))
    }

    fn seek(&mut self, partition: &TopicPartition, offset: i64) -> Result<()> {
        if !self.assignment.contains(partition) {
            return Err(Error::InvalidState(format!("{} not assigned", partition)));
        }
        self.cluster
            .record(Call::Seek(self.group.clone(), partition.clone(), offset));
        self.positions.insert(partition.clone(), offset);
        Ok(())
    }

    async fn commit_sync(&mut self) -> Result<()> {
        let mut committed: Vec<_> = self
            .positions
            .iter()
            .map(|(tp, offset)| (tp.clone(), *offset))
            .collect();
        committed.sort();
        self.cluster.record(Call::Commit(self.group.clone(), committed));
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.cluster.record(Call::Close(self.group.clone()));
        if self.cluster.failing_close.contains(&self.group) {
            return Err(Error::Connection(format!("close failed for {}", self.group)));
        }
        Ok(())
    }
}
