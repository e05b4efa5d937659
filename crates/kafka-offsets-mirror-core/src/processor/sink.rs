//! Writer for the replica offsets topic.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::OffsetsProcessor;
use crate::codec;
use crate::kafka::{OutgoingRecord, PartitionLeaderRouter};
use crate::model::MirrorRecord;
use crate::{Error, Result};

/// Produces mirrored commits to the target topic.
///
/// Records are re-encoded in the internal offsets format and keyed the same
/// way, so the replica topic compacts like the source and can be read back by
/// the restore pipeline. Clones share the producer connections.
#[derive(Clone)]
pub struct OffsetsSinkProcessor {
    router: Arc<PartitionLeaderRouter>,
    topic: String,
    partitions: usize,
}

impl OffsetsSinkProcessor {
    /// Resolve the target topic's partition count. Fails if the topic does not exist.
    pub async fn connect(router: Arc<PartitionLeaderRouter>, topic: impl Into<String>) -> Result<Self> {
        let topic = topic.into();
        let partitions = router.partition_count(&topic).await?;
        debug!("Sink writes to {} ({} partitions)", topic, partitions);
        Ok(Self {
            router,
            topic,
            partitions,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl OffsetsProcessor<MirrorRecord> for OffsetsSinkProcessor {
    async fn process(&mut self, record: &MirrorRecord) -> Result<()> {
        let (partition, outgoing) = replica_record(
            record,
            self.partitions,
            chrono::Utc::now().timestamp_millis(),
        )?;

        let offset = self
            .router
            .produce(&self.topic, partition, vec![outgoing])
            .await?;

        debug!(
            key = %record.key,
            tombstone = record.is_tombstone(),
            partition,
            offset,
            "Mirrored offset record"
        );
        Ok(())
    }
}

/// Replica topic record for a mirrored commit and the partition it goes to.
///
/// Tombstones keep the commit's key and carry a null value, so compaction
/// removes the key from the replica as well.
pub fn replica_record(
    record: &MirrorRecord,
    partitions: usize,
    timestamp: i64,
) -> Result<(i32, OutgoingRecord)> {
    let key = codec::encode_key(&record.key)?;
    let value = record.value.as_ref().map(codec::encode_value).transpose()?;
    let partition = partition_for_key(&key, partitions).ok_or_else(|| {
        Error::InvalidState(format!("replica topic for {} has no partitions", record.key))
    })?;

    Ok((
        partition,
        OutgoingRecord {
            key: Some(key),
            value,
            timestamp,
        },
    ))
}

/// Partition chosen by Kafka's default partitioner for a non-null key.
pub fn partition_for_key(key: &[u8], partitions: usize) -> Option<i32> {
    if partitions == 0 {
        return None;
    }
    let positive = (murmur2(key) & 0x7fff_ffff) as u32;
    Some((positive % partitions as u32) as i32)
}

/// Kafka's 32-bit murmur2 hash.
pub fn murmur2(data: &[u8]) -> i32 {
    const SEED: u32 = 0x9747_b28c;
    const M: u32 = 0x5bd1_e995;
    const R: u32 = 24;

    let length = data.len();
    let mut h: u32 = SEED ^ (length as u32);

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M);
        h ^= k;
    }

    let tail = chunks.remainder();
    if tail.len() >= 3 {
        h ^= (tail[2] as u32) << 16;
    }
    if tail.len() >= 2 {
        h ^= (tail[1] as u32) << 8;
    }
    if !tail.is_empty() {
        h ^= tail[0] as u32;
        h = h.wrapping_mul(M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;

    h as i32
}
