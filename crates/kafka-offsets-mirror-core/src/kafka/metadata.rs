//! Kafka Metadata API implementation.

use kafka_protocol::messages::metadata_request::MetadataRequestTopic;
use kafka_protocol::messages::{ApiKey, MetadataRequest, MetadataResponse, TopicName};
use kafka_protocol::protocol::StrBytes;
use tracing::debug;

use super::KafkaClient;
use crate::Result;

/// Broker metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMetadata {
    pub node_id: i32,
    pub host: String,
    pub port: i32,
}

impl BrokerMetadata {
    /// `host:port` address of the broker
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Topic metadata
#[derive(Debug, Clone)]
pub struct TopicMetadata {
    pub name: String,
    /// Topic-level error code (3 = unknown topic)
    pub error_code: i16,
    pub partitions: Vec<PartitionMetadata>,
}

/// Partition metadata
#[derive(Debug, Clone)]
pub struct PartitionMetadata {
    pub partition_id: i32,
    /// Leader broker id, -1 while leaderless
    pub leader_id: i32,
    pub error_code: i16,
}

/// Brokers and requested topics as seen by one broker.
#[derive(Debug, Clone, Default)]
pub struct ClusterMetadata {
    pub brokers: Vec<BrokerMetadata>,
    pub topics: Vec<TopicMetadata>,
}

impl ClusterMetadata {
    pub fn topic(&self, name: &str) -> Option<&TopicMetadata> {
        self.topics.iter().find(|t| t.name == name)
    }
}

/// Fetch metadata for the given topics, or for all topics when `None`.
pub async fn fetch_metadata(
    client: &KafkaClient,
    topics: Option<&[String]>,
) -> Result<ClusterMetadata> {
    let requested = topics.map(|names| {
        names
            .iter()
            .map(|name| {
                MetadataRequestTopic::default()
                    .with_name(Some(TopicName(StrBytes::from_string(name.clone()))))
            })
            .collect::<Vec<_>>()
    });

    let request = MetadataRequest::default()
        .with_topics(requested)
        .with_allow_auto_topic_creation(false);

    let response: MetadataResponse = client.send_request(ApiKey::Metadata, request).await?;

    let brokers: Vec<BrokerMetadata> = response
        .brokers
        .iter()
        .map(|broker| BrokerMetadata {
            node_id: broker.node_id.0,
            host: broker.host.to_string(),
            port: broker.port,
        })
        .collect();

    let topics: Vec<TopicMetadata> = response
        .topics
        .iter()
        .filter_map(|topic| {
            let name = topic.name.as_ref()?.to_string();
            if topic.error_code != 0 {
                debug!("Topic {} has error code {}", name, topic.error_code);
            }

            let mut partitions: Vec<PartitionMetadata> = topic
                .partitions
                .iter()
                .map(|p| PartitionMetadata {
                    partition_id: p.partition_index,
                    leader_id: p.leader_id.0,
                    error_code: p.error_code,
                })
                .collect();
            partitions.sort_by_key(|p| p.partition_id);

            Some(TopicMetadata {
                name,
                error_code: topic.error_code,
                partitions,
            })
        })
        .collect();

    debug!(
        "Discovered {} brokers and {} topics",
        brokers.len(),
        topics.len()
    );

    Ok(ClusterMetadata { brokers, topics })
}
