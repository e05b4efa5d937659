//! Replays mirrored positions onto live consumer groups.
//!
//! A [`RestoreProcessor`] is created per dispatcher lane and owns that lane's
//! group connections and high-watermark cache. The dispatcher sends every
//! record of a group to the same lane, so these caches are never shared.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::OffsetsProcessor;
use crate::model::{OffsetKey, RestoreTask, TopicPartition};
use crate::{Error, Result};

/// Consumer-side connection acting on behalf of one consumer group.
///
/// Positions are only moved explicitly with [`seek`](Self::seek) and
/// persisted with [`commit_sync`](Self::commit_sync); nothing is consumed.
#[async_trait]
pub trait GroupConnection: Send {
    /// Partitions currently assigned to this connection
    fn assignment(&self) -> &[TopicPartition];

    /// Partitions of `topic` on the cluster, empty when the topic does not exist
    async fn partitions_for(&mut self, topic: &str) -> Result<Vec<i32>>;

    /// Replace the whole assignment
    fn assign(&mut self, partitions: Vec<TopicPartition>);

    /// Current high-watermark of a partition
    async fn end_offset(&mut self, partition: &TopicPartition) -> Result<i64>;

    /// Set the position of an assigned partition
    fn seek(&mut self, partition: &TopicPartition, offset: i64) -> Result<()>;

    /// Commit the positions of all assigned partitions and wait for the result
    async fn commit_sync(&mut self) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// Opens [`GroupConnection`]s.
#[async_trait]
pub trait GroupConnector: Send {
    async fn connect(&mut self, group_id: &str) -> Result<Box<dyn GroupConnection>>;

    /// Release resources shared by the connections this connector opened
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Seeks each task's group to the requested offset, clamped to the
/// partition's high-watermark, and commits it.
pub struct RestoreProcessor {
    connector: Box<dyn GroupConnector>,
    connections: HashMap<String, Box<dyn GroupConnection>>,
    high_watermarks: HashMap<OffsetKey, i64>,
}

impl RestoreProcessor {
    pub fn new(connector: Box<dyn GroupConnector>) -> Self {
        Self {
            connector,
            connections: HashMap::new(),
            high_watermarks: HashMap::new(),
        }
    }

    /// Cached high-watermark for a key
    pub fn high_watermark(&self, key: &OffsetKey) -> Option<i64> {
        self.high_watermarks.get(key).copied()
    }

    /// Number of open group connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    async fn restore(&mut self, task: &RestoreTask) -> Result<()> {
        let key = &task.key;
        let partition = key.topic_partition();

        let connection = match self.connections.entry(key.group().to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                debug!(group = key.group(), "Opening group connection");
                let connection = self.connector.connect(key.group()).await?;
                entry.insert(connection)
            }
        };

        if !connection.assignment().contains(&partition) {
            let partitions = connection.partitions_for(key.topic()).await?;
            if !partitions.contains(&key.partition()) {
                warn!(
                    key = %key,
                    "Partition does not exist on the destination, skipping restore"
                );
                return Ok(());
            }

            let high_watermark = connection.end_offset(&partition).await?;
            connection.assign(vec![partition.clone()]);
            self.high_watermarks.insert(key.clone(), high_watermark);
        }

        let high_watermark = self.high_watermarks.get(key).copied().ok_or_else(|| {
            Error::InvalidState(format!("no high-watermark cached for {}", key))
        })?;

        let offset = task.requested_offset.min(high_watermark);
        connection.seek(&partition, offset)?;
        connection.commit_sync().await?;

        debug!(
            key = %key,
            requested = task.requested_offset,
            high_watermark,
            offset,
            "Restored group position"
        );
        Ok(())
    }
}

#[async_trait]
impl OffsetsProcessor<RestoreTask> for RestoreProcessor {
    async fn process(&mut self, task: &RestoreTask) -> Result<()> {
        self.restore(task).await
    }

    async fn close(&mut self) -> Result<()> {
        let count = self.connections.len();
        for (group, mut connection) in self.connections.drain() {
            if let Err(e) = connection.close().await {
                error!(group = %group, error = %e, "Failed to close group connection");
            }
        }
        if let Err(e) = self.connector.close().await {
            error!(error = %e, "Failed to close group connector");
        }
        info!(connections = count, "Restore processor closed");
        Ok(())
    }
}
