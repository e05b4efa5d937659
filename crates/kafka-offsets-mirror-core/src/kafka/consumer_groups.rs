//! Consumer group offset operations.
//!
//! - FindCoordinator: locate the broker managing a group
//! - OffsetFetch: read committed positions of a group
//! - OffsetCommit: write positions of a group
//!
//! Commits are issued outside any group generation (generation -1, empty
//! member id), which the coordinator accepts for groups without live members
//! and for simple assignment.

use kafka_protocol::messages::offset_commit_request::{
    OffsetCommitRequestPartition, OffsetCommitRequestTopic,
};
use kafka_protocol::messages::offset_fetch_request::OffsetFetchRequestTopic;
use kafka_protocol::messages::{
    ApiKey, FindCoordinatorRequest, FindCoordinatorResponse, GroupId, OffsetCommitRequest,
    OffsetCommitResponse, OffsetFetchRequest, OffsetFetchResponse, TopicName,
};
use kafka_protocol::protocol::StrBytes;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::metadata::BrokerMetadata;
use super::KafkaClient;
use crate::error::KafkaError;
use crate::model::TopicPartition;
use crate::Result;

/// Committed offset for a partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedOffset {
    pub partition: i32,
    /// Committed offset, -1 when the group has none
    pub offset: i64,
    /// Error code (0 = success)
    pub error_code: i16,
}

/// Whether a broker error means the coordinator must be looked up again
pub fn is_coordinator_error(code: i16) -> bool {
    // COORDINATOR_LOAD_IN_PROGRESS, COORDINATOR_NOT_AVAILABLE, NOT_COORDINATOR
    matches!(code, 14..=16)
}

/// Locate the coordinator broker of a consumer group
pub async fn find_coordinator(client: &KafkaClient, group_id: &str) -> Result<BrokerMetadata> {
    let request = FindCoordinatorRequest::default()
        .with_key(StrBytes::from_string(group_id.to_string()))
        .with_key_type(0); // Group

    let response: FindCoordinatorResponse = client
        .send_request(ApiKey::FindCoordinator, request)
        .await?;

    if response.error_code != 0 {
        return Err(KafkaError::CoordinatorNotAvailable {
            group: group_id.to_string(),
            code: response.error_code,
        }
        .into());
    }

    let coordinator = BrokerMetadata {
        node_id: response.node_id.0,
        host: response.host.to_string(),
        port: response.port,
    };
    debug!(
        "Coordinator for group {} is broker {} at {}",
        group_id,
        coordinator.node_id,
        coordinator.address()
    );
    Ok(coordinator)
}

/// Fetch committed offsets of `group_id` for the given partitions of a topic
pub async fn fetch_offsets(
    client: &KafkaClient,
    group_id: &str,
    topic: &str,
    partitions: &[i32],
) -> Result<Vec<CommittedOffset>> {
    let request = OffsetFetchRequest::default()
        .with_group_id(GroupId(StrBytes::from_string(group_id.to_string())))
        .with_topics(Some(vec![OffsetFetchRequestTopic::default()
            .with_name(TopicName(StrBytes::from_string(topic.to_string())))
            .with_partition_indexes(partitions.to_vec())]));

    let response: OffsetFetchResponse = client.send_request(ApiKey::OffsetFetch, request).await?;

    if response.error_code != 0 {
        return Err(KafkaError::BrokerError {
            code: response.error_code,
            message: format!(
                "OffsetFetch failed for group {}: code {}",
                group_id, response.error_code
            ),
        }
        .into());
    }

    let offsets: Vec<CommittedOffset> = response
        .topics
        .iter()
        .filter(|t| t.name.as_str() == topic)
        .flat_map(|t| t.partitions.iter())
        .map(|p| CommittedOffset {
            partition: p.partition_index,
            offset: p.committed_offset,
            error_code: p.error_code,
        })
        .collect();

    debug!(
        "Fetched {} committed offsets for group {}",
        offsets.len(),
        group_id
    );
    Ok(offsets)
}

/// Commit offsets for a consumer group.
///
/// Fails with the first partition error reported by the coordinator.
pub async fn commit_offsets(
    client: &KafkaClient,
    group_id: &str,
    offsets: &[(TopicPartition, i64)],
) -> Result<()> {
    if offsets.is_empty() {
        return Ok(());
    }

    let mut by_topic: BTreeMap<&str, Vec<OffsetCommitRequestPartition>> = BTreeMap::new();
    for (tp, offset) in offsets {
        by_topic.entry(tp.topic.as_str()).or_default().push(
            OffsetCommitRequestPartition::default()
                .with_partition_index(tp.partition)
                .with_committed_offset(*offset)
                .with_committed_metadata(Some(StrBytes::from_static_str(""))),
        );
    }

    let topics = by_topic
        .into_iter()
        .map(|(topic, partitions)| {
            OffsetCommitRequestTopic::default()
                .with_name(TopicName(StrBytes::from_string(topic.to_string())))
                .with_partitions(partitions)
        })
        .collect();

    let request = OffsetCommitRequest::default()
        .with_group_id(GroupId(StrBytes::from_string(group_id.to_string())))
        .with_topics(topics);

    let response: OffsetCommitResponse = client.send_request(ApiKey::OffsetCommit, request).await?;

    for topic in &response.topics {
        for partition in &topic.partitions {
            if partition.error_code != 0 {
                warn!(
                    "Failed to commit offset for {}:{} in group {} - error code {}",
                    topic.name.as_str(),
                    partition.partition_index,
                    group_id,
                    partition.error_code
                );
                return Err(KafkaError::BrokerError {
                    code: partition.error_code,
                    message: format!(
                        "OffsetCommit failed for {}:{} in group {}",
                        topic.name.as_str(),
                        partition.partition_index,
                        group_id
                    ),
                }
                .into());
            }
        }
    }

    debug!("Committed {} offsets for group {}", offsets.len(), group_id);
    Ok(())
}
