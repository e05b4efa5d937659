//! Kafka Fetch and ListOffsets API implementation.

use bytes::Bytes;
use kafka_protocol::messages::fetch_request::{FetchPartition, FetchTopic};
use kafka_protocol::messages::list_offsets_request::{ListOffsetsPartition, ListOffsetsTopic};
use kafka_protocol::messages::{
    ApiKey, BrokerId, FetchRequest, FetchResponse, ListOffsetsRequest, ListOffsetsResponse,
    TopicName,
};
use kafka_protocol::protocol::StrBytes;
use kafka_protocol::records::{Compression, RecordBatchDecoder};
use tracing::trace;

use super::KafkaClient;
use crate::error::KafkaError;
use crate::model::RawRecord;
use crate::Result;

/// ListOffsets timestamp selecting the log start offset
pub const EARLIEST_TIMESTAMP: i64 = -2;

/// ListOffsets timestamp selecting the log end offset
pub const LATEST_TIMESTAMP: i64 = -1;

/// Result of fetching one partition
#[derive(Debug)]
pub struct PartitionFetch {
    pub partition: i32,
    /// Partition error code (0 = success)
    pub error_code: i16,
    pub high_watermark: i64,
    /// Data records at or after the requested offset
    pub records: Vec<RawRecord>,
    /// Offset to request next
    pub next_offset: i64,
}

/// Fetch several partitions of one topic from a single broker.
///
/// `partitions` holds `(partition, fetch_offset)` pairs. Partition errors are
/// reported per partition rather than failing the whole request.
pub async fn fetch(
    client: &KafkaClient,
    topic: &str,
    partitions: &[(i32, i64)],
    max_wait_ms: i32,
    partition_max_bytes: i32,
) -> Result<Vec<PartitionFetch>> {
    let fetch_partitions = partitions
        .iter()
        .map(|&(partition, offset)| {
            FetchPartition::default()
                .with_partition(partition)
                .with_fetch_offset(offset)
                .with_partition_max_bytes(partition_max_bytes)
                .with_log_start_offset(-1)
        })
        .collect();

    let fetch_topic = FetchTopic::default()
        .with_topic(TopicName(StrBytes::from_string(topic.to_string())))
        .with_partitions(fetch_partitions);

    let request = FetchRequest::default()
        .with_replica_id(BrokerId(-1)) // Client mode
        .with_max_wait_ms(max_wait_ms)
        .with_min_bytes(1)
        .with_max_bytes(partition_max_bytes.saturating_mul(partitions.len().max(1) as i32))
        .with_isolation_level(0) // READ_UNCOMMITTED
        .with_topics(vec![fetch_topic]);

    let response: FetchResponse = client.send_request(ApiKey::Fetch, request).await?;

    if response.error_code != 0 {
        return Err(KafkaError::BrokerError {
            code: response.error_code,
            message: format!("Fetch error for {}: code {}", topic, response.error_code),
        }
        .into());
    }

    let mut results = Vec::with_capacity(partitions.len());

    for topic_response in &response.responses {
        if topic_response.topic.as_str() != topic {
            continue;
        }

        for partition_response in &topic_response.partitions {
            let partition = partition_response.partition_index;
            let Some(&(_, fetch_offset)) = partitions.iter().find(|(p, _)| *p == partition)
            else {
                continue;
            };

            let mut result = PartitionFetch {
                partition,
                error_code: partition_response.error_code,
                high_watermark: partition_response.high_watermark,
                records: Vec::new(),
                next_offset: fetch_offset,
            };

            if result.error_code == 0 {
                if let Some(data) = partition_response.records.as_ref() {
                    let (records, next_offset) =
                        decode_records(data, partition, fetch_offset)?;
                    result.records = records;
                    result.next_offset = next_offset;
                }
            }

            trace!(
                "Fetched {} records from {}:{} starting at offset {}",
                result.records.len(),
                topic,
                partition,
                fetch_offset
            );
            results.push(result);
        }
    }

    Ok(results)
}

/// Decode record batches, dropping control records and records before
/// `fetch_offset`. Returns the records and the next offset to fetch.
fn decode_records(data: &Bytes, partition: i32, fetch_offset: i64) -> Result<(Vec<RawRecord>, i64)> {
    if data.is_empty() {
        return Ok((Vec::new(), fetch_offset));
    }

    let mut buf = data.clone();
    let decoded = RecordBatchDecoder::decode::<
        _,
        fn(&mut Bytes, Compression) -> anyhow::Result<Bytes>,
    >(&mut buf)
    .map_err(|e| KafkaError::Protocol(format!("Failed to decode records: {:?}", e)))?;

    let mut next_offset = fetch_offset;
    let mut records = Vec::with_capacity(decoded.len());

    for record in decoded {
        // Batches are returned whole, so they may start before the fetch offset.
        if record.offset < fetch_offset {
            continue;
        }
        next_offset = next_offset.max(record.offset + 1);
        if record.control {
            continue;
        }
        records.push(RawRecord {
            partition,
            offset: record.offset,
            key: record.key.map(|k| k.to_vec()),
            value: record.value.map(|v| v.to_vec()),
        });
    }

    Ok((records, next_offset))
}

/// Resolve the offset for `timestamp` ([`EARLIEST_TIMESTAMP`] or
/// [`LATEST_TIMESTAMP`]) of one partition.
pub async fn list_offset(
    client: &KafkaClient,
    topic: &str,
    partition: i32,
    timestamp: i64,
) -> Result<i64> {
    let list_topic = ListOffsetsTopic::default()
        .with_name(TopicName(StrBytes::from_string(topic.to_string())))
        .with_partitions(vec![ListOffsetsPartition::default()
            .with_partition_index(partition)
            .with_timestamp(timestamp)]);

    let request = ListOffsetsRequest::default()
        .with_replica_id(BrokerId(-1)) // Client mode
        .with_isolation_level(0) // READ_UNCOMMITTED
        .with_topics(vec![list_topic]);

    let response: ListOffsetsResponse = client.send_request(ApiKey::ListOffsets, request).await?;

    let found = response
        .topics
        .iter()
        .filter(|t| t.name.as_str() == topic)
        .flat_map(|t| t.partitions.iter())
        .find(|p| p.partition_index == partition);

    match found {
        Some(p) if p.error_code != 0 => Err(KafkaError::BrokerError {
            code: p.error_code,
            message: format!(
                "ListOffsets error for {}:{}: code {}",
                topic, partition, p.error_code
            ),
        }
        .into()),
        Some(p) => Ok(p.offset),
        None => Err(KafkaError::PartitionNotAvailable {
            topic: topic.to_string(),
            partition,
        }
        .into()),
    }
}
