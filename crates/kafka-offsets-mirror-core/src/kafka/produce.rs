//! Kafka Produce API implementation.

use bytes::{Bytes, BytesMut};
use indexmap::IndexMap;
use kafka_protocol::messages::produce_request::{PartitionProduceData, TopicProduceData};
use kafka_protocol::messages::{ApiKey, ProduceRequest, ProduceResponse, TopicName};
use kafka_protocol::protocol::StrBytes;
use kafka_protocol::records::{
    Compression, Record, RecordBatchEncoder, RecordEncodeOptions, TimestampType,
    NO_PARTITION_LEADER_EPOCH, NO_PRODUCER_EPOCH, NO_PRODUCER_ID, NO_SEQUENCE,
};
use tracing::trace;

use super::KafkaClient;
use crate::error::KafkaError;
use crate::Result;

/// A record to append. A `None` value is a tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingRecord {
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    /// Creation timestamp in milliseconds
    pub timestamp: i64,
}

/// Append records to one partition, waiting for all in-sync replicas.
///
/// Returns the base offset assigned to the first record.
pub async fn produce(
    client: &KafkaClient,
    topic: &str,
    partition: i32,
    records: Vec<OutgoingRecord>,
) -> Result<i64> {
    if records.is_empty() {
        return Ok(-1);
    }

    let record_count = records.len();
    let batch: Vec<Record> = records
        .into_iter()
        .enumerate()
        .map(|(i, r)| Record {
            transactional: false,
            control: false,
            partition_leader_epoch: NO_PARTITION_LEADER_EPOCH,
            producer_id: NO_PRODUCER_ID,
            producer_epoch: NO_PRODUCER_EPOCH,
            timestamp_type: TimestampType::Creation,
            offset: i as i64, // Relative, the broker assigns the real offset
            sequence: NO_SEQUENCE,
            timestamp: r.timestamp,
            key: r.key,
            value: r.value,
            headers: IndexMap::new(),
        })
        .collect();

    let options = RecordEncodeOptions {
        version: 2,
        compression: Compression::None,
    };

    let mut records_buf = BytesMut::new();
    RecordBatchEncoder::encode::<_, _, fn(&mut BytesMut, &mut BytesMut, Compression) -> anyhow::Result<()>>(
        &mut records_buf,
        batch.iter(),
        &options,
    )
        .map_err(|e| KafkaError::Protocol(format!("Failed to encode records: {:?}", e)))?;

    let topic_data = TopicProduceData::default()
        .with_name(TopicName(StrBytes::from_string(topic.to_string())))
        .with_partition_data(vec![PartitionProduceData::default()
            .with_index(partition)
            .with_records(Some(records_buf.freeze()))]);

    let request = ProduceRequest::default()
        .with_acks(-1) // Wait for all replicas
        .with_timeout_ms(30000)
        .with_topic_data(vec![topic_data]);

    let response: ProduceResponse = client.send_request(ApiKey::Produce, request).await?;

    let partition_response = response
        .responses
        .iter()
        .filter(|t| t.name.as_str() == topic)
        .flat_map(|t| t.partition_responses.iter())
        .find(|p| p.index == partition)
        .ok_or_else(|| {
            KafkaError::Protocol("No partition response in produce response".to_string())
        })?;

    if partition_response.error_code != 0 {
        return Err(KafkaError::BrokerError {
            code: partition_response.error_code,
            message: format!(
                "Produce error for {}:{}: code {}",
                topic, partition, partition_response.error_code
            ),
        }
        .into());
    }

    trace!(
        "Produced {} records to {}:{} at offset {}",
        record_count,
        topic,
        partition,
        partition_response.base_offset
    );

    Ok(partition_response.base_offset)
}
