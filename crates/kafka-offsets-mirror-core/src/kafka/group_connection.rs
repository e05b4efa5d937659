//! Group connections backed by the wire client.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::consumer_groups::{commit_offsets, is_coordinator_error};
use super::fetch::LATEST_TIMESTAMP;
use super::{KafkaClient, PartitionLeaderRouter};
use crate::config::KafkaConfig;
use crate::error::KafkaError;
use crate::model::TopicPartition;
use crate::processor::{GroupConnection, GroupConnector};
use crate::{Error, Result};

/// Connection committing positions for one group through its coordinator.
pub struct KafkaGroupConnection {
    group_id: String,
    router: Arc<PartitionLeaderRouter>,
    coordinator: KafkaClient,
    assignment: Vec<TopicPartition>,
    positions: HashMap<TopicPartition, i64>,
}

#[async_trait]
impl GroupConnection for KafkaGroupConnection {
    fn assignment(&self) -> &[TopicPartition] {
        &self.assignment
    }

    async fn partitions_for(&mut self, topic: &str) -> Result<Vec<i32>> {
        Ok(self.router.partitions_for(topic).await?.unwrap_or_default())
    }

    fn assign(&mut self, partitions: Vec<TopicPartition>) {
        debug!(group = %self.group_id, ?partitions, "Assigning partitions");
        self.positions.retain(|tp, _| partitions.contains(tp));
        self.assignment = partitions;
    }

    async fn end_offset(&mut self, partition: &TopicPartition) -> Result<i64> {
        self.router
            .list_offset(&partition.topic, partition.partition, LATEST_TIMESTAMP)
            .await
    }

    fn seek(&mut self, partition: &TopicPartition, offset: i64) -> Result<()> {
        if !self.assignment.contains(partition) {
            return Err(Error::InvalidState(format!(
                "cannot seek unassigned partition {} for group {}",
                partition, self.group_id
            )));
        }
        self.positions.insert(partition.clone(), offset);
        Ok(())
    }

    async fn commit_sync(&mut self) -> Result<()> {
        let offsets: Vec<(TopicPartition, i64)> = self
            .positions
            .iter()
            .map(|(tp, offset)| (tp.clone(), *offset))
            .collect();

        match commit_offsets(&self.coordinator, &self.group_id, &offsets).await {
            Err(Error::Kafka(e)) if e.code().is_some_and(is_coordinator_error) => {
                debug!(group = %self.group_id, error = %e, "Coordinator moved, reconnecting");
                self.coordinator = self.router.coordinator_client(&self.group_id).await?;
                commit_offsets(&self.coordinator, &self.group_id, &offsets).await
            }
            other => other,
        }
    }

    async fn close(&mut self) -> Result<()> {
        debug!(group = %self.group_id, "Closing group connection");
        self.coordinator.disconnect().await
    }
}

/// Opens [`KafkaGroupConnection`]s against one cluster.
///
/// The metadata router is created on first use and shared by every
/// connection this connector opens.
pub struct KafkaGroupConnector {
    config: KafkaConfig,
    router: Option<Arc<PartitionLeaderRouter>>,
}

impl KafkaGroupConnector {
    pub fn new(config: KafkaConfig) -> Self {
        Self {
            config,
            router: None,
        }
    }

    async fn router(&mut self) -> Result<Arc<PartitionLeaderRouter>> {
        if let Some(router) = &self.router {
            return Ok(Arc::clone(router));
        }
        let router = Arc::new(PartitionLeaderRouter::new(self.config.clone()).await?);
        self.router = Some(Arc::clone(&router));
        Ok(router)
    }
}

#[async_trait]
impl GroupConnector for KafkaGroupConnector {
    async fn connect(&mut self, group_id: &str) -> Result<Box<dyn GroupConnection>> {
        let router = self.router().await?;
        let coordinator = router.coordinator_client(group_id).await.map_err(|e| match e {
            Error::Kafka(KafkaError::NoBrokersAvailable) => Error::Connection(format!(
                "coordinator of group {} is unreachable",
                group_id
            )),
            other => other,
        })?;

        Ok(Box::new(KafkaGroupConnection {
            group_id: group_id.to_string(),
            router,
            coordinator,
            assignment: Vec::new(),
            positions: HashMap::new(),
        }))
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(router) = self.router.take() {
            router.close().await;
        }
        Ok(())
    }
}
