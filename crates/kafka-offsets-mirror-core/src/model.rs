//! Domain records flowing through the mirror and restore pipelines.

use std::fmt;

/// Identity of a committed position: consumer group, topic and partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OffsetKey {
    group: String,
    topic: String,
    partition: i32,
}

impl OffsetKey {
    pub fn new(group: impl Into<String>, topic: impl Into<String>, partition: i32) -> Self {
        Self {
            group: group.into(),
            topic: topic.into(),
            partition,
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    /// Topic and partition without the group
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }
}

impl fmt::Display for OffsetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{},{}]", self.group, self.topic, self.partition)
    }
}

/// A topic partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// One committed position for a key at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetValue {
    pub offset: i64,
    pub metadata: String,
    pub leader_epoch: Option<i32>,
    pub commit_timestamp: Option<i64>,
    pub expire_timestamp: Option<i64>,
}

impl OffsetValue {
    /// A value with no metadata or timestamps
    pub fn new(offset: i64) -> Self {
        Self {
            offset,
            metadata: String::new(),
            leader_epoch: None,
            commit_timestamp: None,
            expire_timestamp: None,
        }
    }
}

/// A decoded offset commit, or a tombstone when `value` is `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorRecord {
    pub key: OffsetKey,
    pub value: Option<OffsetValue>,
}

impl MirrorRecord {
    pub fn commit(key: OffsetKey, value: OffsetValue) -> Self {
        Self {
            key,
            value: Some(value),
        }
    }

    pub fn tombstone(key: OffsetKey) -> Self {
        Self { key, value: None }
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }
}

/// Request to move a live group's position for one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreTask {
    pub key: OffsetKey,
    pub requested_offset: i64,
}

impl RestoreTask {
    pub fn new(key: OffsetKey, requested_offset: i64) -> Self {
        Self {
            key,
            requested_offset,
        }
    }
}

/// Records that carry an [`OffsetKey`], used for filtering and routing.
pub trait Keyed {
    fn offset_key(&self) -> &OffsetKey;
}

impl Keyed for MirrorRecord {
    fn offset_key(&self) -> &OffsetKey {
        &self.key
    }
}

impl Keyed for RestoreTask {
    fn offset_key(&self) -> &OffsetKey {
        &self.key
    }
}

/// Raw key/value pair read from a log, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
}
