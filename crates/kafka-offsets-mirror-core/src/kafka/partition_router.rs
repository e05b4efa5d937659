//! Partition leader routing for multi-broker Kafka clusters.
//!
//! Fetch, produce and ListOffsets requests must reach the partition leader.
//! The router caches leaders per `(topic, partition)` and one connection per
//! broker, refreshing both when a broker reports that it no longer leads.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::KafkaConfig;
use crate::error::KafkaError;
use crate::Result;

use super::consumer_groups::find_coordinator;
use super::fetch::{self, PartitionFetch};
use super::metadata::{fetch_metadata, BrokerMetadata, ClusterMetadata};
use super::produce::{self, OutgoingRecord};
use super::KafkaClient;

/// UNKNOWN_TOPIC_OR_PARTITION
const UNKNOWN_TOPIC_OR_PARTITION: i16 = 3;

/// Routes Kafka requests to the correct partition leader broker.
pub struct PartitionLeaderRouter {
    /// Kafka configuration (for creating new connections)
    config: KafkaConfig,

    /// Map of broker_id -> BrokerMetadata (host:port info)
    broker_metadata: RwLock<HashMap<i32, BrokerMetadata>>,

    /// Map of (topic, partition) -> leader broker_id
    partition_leaders: RwLock<HashMap<(String, i32), i32>>,

    /// Connection pool: broker_id -> KafkaClient
    connections: RwLock<HashMap<i32, Arc<KafkaClient>>>,

    /// Bootstrap client for metadata and coordinator lookups
    bootstrap_client: KafkaClient,
}

impl PartitionLeaderRouter {
    /// Connect to the bootstrap servers. Leaders are loaded per topic on demand.
    pub async fn new(config: KafkaConfig) -> Result<Self> {
        let bootstrap_client = KafkaClient::new(config.clone());
        bootstrap_client.connect().await?;

        Ok(Self {
            config,
            broker_metadata: RwLock::new(HashMap::new()),
            partition_leaders: RwLock::new(HashMap::new()),
            connections: RwLock::new(HashMap::new()),
            bootstrap_client,
        })
    }

    pub fn config(&self) -> &KafkaConfig {
        &self.config
    }

    /// Reload brokers and the leaders of `topic`.
    pub async fn refresh_metadata(&self, topic: &str) -> Result<ClusterMetadata> {
        debug!("Refreshing metadata for topic {}", topic);
        let metadata = fetch_metadata(&self.bootstrap_client, Some(&[topic.to_string()])).await?;

        {
            let mut brokers = self.broker_metadata.write().await;
            brokers.clear();
            for broker in &metadata.brokers {
                brokers.insert(broker.node_id, broker.clone());
            }
        }

        if let Some(topic_metadata) = metadata.topic(topic) {
            let mut leaders = self.partition_leaders.write().await;
            leaders.retain(|(t, _), _| t != topic);
            for partition in &topic_metadata.partitions {
                leaders.insert((topic.to_string(), partition.partition_id), partition.leader_id);
            }
            info!(
                "Refreshed metadata for {}: {} brokers, {} partitions",
                topic,
                metadata.brokers.len(),
                topic_metadata.partitions.len()
            );
        }

        Ok(metadata)
    }

    /// Partitions of `topic`, or `None` when the topic does not exist.
    pub async fn partitions_for(&self, topic: &str) -> Result<Option<Vec<i32>>> {
        let metadata = self.refresh_metadata(topic).await?;
        match metadata.topic(topic) {
            Some(t) if t.error_code == UNKNOWN_TOPIC_OR_PARTITION => Ok(None),
            Some(t) if t.error_code != 0 => Err(KafkaError::BrokerError {
                code: t.error_code,
                message: format!("Metadata error for topic {}", topic),
            }
            .into()),
            Some(t) => Ok(Some(t.partitions.iter().map(|p| p.partition_id).collect())),
            None => Ok(None),
        }
    }

    /// Number of partitions of an existing topic.
    pub async fn partition_count(&self, topic: &str) -> Result<usize> {
        match self.partitions_for(topic).await? {
            Some(partitions) if !partitions.is_empty() => Ok(partitions.len()),
            _ => Err(KafkaError::TopicNotExists(topic.to_string()).into()),
        }
    }

    /// Get the leader broker ID for a partition.
    pub async fn get_leader(&self, topic: &str, partition: i32) -> Result<i32> {
        let cached = {
            let leaders = self.partition_leaders.read().await;
            leaders.get(&(topic.to_string(), partition)).copied()
        };

        let leader = match cached {
            Some(leader) if leader >= 0 => Some(leader),
            _ => {
                self.refresh_metadata(topic).await?;
                let leaders = self.partition_leaders.read().await;
                leaders.get(&(topic.to_string(), partition)).copied()
            }
        };

        match leader {
            Some(leader) if leader >= 0 => Ok(leader),
            _ => Err(KafkaError::PartitionNotAvailable {
                topic: topic.to_string(),
                partition,
            }
            .into()),
        }
    }

    /// Group partitions by leader broker.
    ///
    /// Partitions without a known leader are left out and logged; they are
    /// retried on the next call.
    pub async fn group_by_leader(
        &self,
        topic: &str,
        partitions: impl IntoIterator<Item = i32>,
    ) -> Result<BTreeMap<i32, Vec<i32>>> {
        let mut grouped: BTreeMap<i32, Vec<i32>> = BTreeMap::new();
        for partition in partitions {
            match self.get_leader(topic, partition).await {
                Ok(leader) => grouped.entry(leader).or_default().push(partition),
                Err(crate::Error::Kafka(KafkaError::PartitionNotAvailable { .. })) => {
                    warn!("No leader for {}/{}, skipping for now", topic, partition);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(grouped)
    }

    /// Get or create a connection to a specific broker.
    async fn get_broker_connection(&self, broker_id: i32) -> Result<Arc<KafkaClient>> {
        {
            let connections = self.connections.read().await;
            if let Some(client) = connections.get(&broker_id) {
                return Ok(Arc::clone(client));
            }
        }

        let broker_addr = {
            let brokers = self.broker_metadata.read().await;
            brokers
                .get(&broker_id)
                .map(BrokerMetadata::address)
                .ok_or_else(|| KafkaError::Protocol(format!("Unknown broker ID: {}", broker_id)))?
        };

        debug!(
            "Creating new connection to broker {} at {}",
            broker_id, broker_addr
        );

        let client = Arc::new(KafkaClient::for_broker(&self.config, broker_addr));
        client.connect().await?;

        let mut connections = self.connections.write().await;
        let pooled = connections
            .entry(broker_id)
            .or_insert_with(|| Arc::clone(&client));
        Ok(Arc::clone(pooled))
    }

    /// Fetch several partitions of `topic` from one broker.
    pub async fn fetch_from(
        &self,
        broker_id: i32,
        topic: &str,
        partitions: &[(i32, i64)],
        max_wait_ms: i32,
        partition_max_bytes: i32,
    ) -> Result<Vec<PartitionFetch>> {
        let client = self.get_broker_connection(broker_id).await?;
        let result = fetch::fetch(&client, topic, partitions, max_wait_ms, partition_max_bytes).await;
        if result.is_err() {
            self.drop_connection(broker_id).await;
        }
        result
    }

    /// Resolve a partition's offset for a ListOffsets timestamp, routing to
    /// the leader and retrying once after a leadership change.
    pub async fn list_offset(&self, topic: &str, partition: i32, timestamp: i64) -> Result<i64> {
        match self.list_offset_internal(topic, partition, timestamp).await {
            Ok(offset) => Ok(offset),
            Err(e) if is_not_leader_error(&e) => {
                warn!(
                    "NOT_LEADER_OR_FOLLOWER for {}/{} during list_offset, refreshing metadata",
                    topic, partition
                );
                self.refresh_metadata(topic).await?;
                self.list_offset_internal(topic, partition, timestamp).await
            }
            Err(e) => Err(e),
        }
    }

    async fn list_offset_internal(&self, topic: &str, partition: i32, timestamp: i64) -> Result<i64> {
        let leader = self.get_leader(topic, partition).await?;
        let client = self.get_broker_connection(leader).await?;
        fetch::list_offset(&client, topic, partition, timestamp).await
    }

    /// Produce records to a partition, routing to the correct leader.
    pub async fn produce(
        &self,
        topic: &str,
        partition: i32,
        records: Vec<OutgoingRecord>,
    ) -> Result<i64> {
        match self
            .produce_internal(topic, partition, records.clone())
            .await
        {
            Ok(offset) => Ok(offset),
            Err(e) if is_not_leader_error(&e) => {
                warn!(
                    "NOT_LEADER_OR_FOLLOWER for {}/{} during produce, refreshing metadata",
                    topic, partition
                );
                self.refresh_metadata(topic).await?;
                self.produce_internal(topic, partition, records).await
            }
            Err(e) => Err(e),
        }
    }

    async fn produce_internal(
        &self,
        topic: &str,
        partition: i32,
        records: Vec<OutgoingRecord>,
    ) -> Result<i64> {
        let leader = self.get_leader(topic, partition).await?;
        let client = self.get_broker_connection(leader).await?;
        let result = produce::produce(&client, topic, partition, records).await;
        if matches!(&result, Err(crate::Error::Kafka(KafkaError::Protocol(_)))) {
            self.drop_connection(leader).await;
        }
        result
    }

    /// Open a dedicated connection to the coordinator of `group_id`.
    pub async fn coordinator_client(&self, group_id: &str) -> Result<KafkaClient> {
        let coordinator = find_coordinator(&self.bootstrap_client, group_id).await?;
        let client = KafkaClient::for_broker(&self.config, coordinator.address());
        client.connect().await?;
        Ok(client)
    }

    /// Forget the pooled connection to a broker.
    pub async fn drop_connection(&self, broker_id: i32) {
        let removed = self.connections.write().await.remove(&broker_id);
        if removed.is_some() {
            debug!("Dropped connection to broker {}", broker_id);
        }
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        let connections: Vec<_> = self.connections.write().await.drain().collect();
        for (broker_id, client) in connections {
            if let Err(e) = client.disconnect().await {
                debug!("Error closing connection to broker {}: {}", broker_id, e);
            }
        }
        if let Err(e) = self.bootstrap_client.disconnect().await {
            debug!("Error closing bootstrap connection: {}", e);
        }
    }
}

/// Whether a partition error code means leadership moved.
pub fn is_not_leader_code(code: i16) -> bool {
    // LEADER_NOT_AVAILABLE, NOT_LEADER_OR_FOLLOWER, FENCED_LEADER_EPOCH, UNKNOWN_LEADER_EPOCH
    matches!(code, 5 | 6 | 74 | 75)
}

/// Check if an error reports a leadership change.
fn is_not_leader_error(error: &crate::Error) -> bool {
    match error {
        crate::Error::Kafka(e) => e.code().is_some_and(is_not_leader_code),
        _ => false,
    }
}
