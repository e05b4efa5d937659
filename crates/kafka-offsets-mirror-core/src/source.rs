//! Source log consumption.
//!
//! [`KafkaOffsetsSource`] reads every partition of one topic on behalf of a
//! consumer group, without joining the group: partitions are assigned
//! manually and positions are committed outside any generation.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{KafkaConfig, TailOptions};
use crate::error::KafkaError;
use crate::kafka::consumer_groups::is_coordinator_error;
use crate::kafka::{
    commit_offsets, fetch_offsets, is_not_leader_code, KafkaClient, PartitionLeaderRouter,
    PartitionFetch, EARLIEST_TIMESTAMP, LATEST_TIMESTAMP,
};
use crate::model::{RawRecord, TopicPartition};
use crate::{Error, Result};

/// OFFSET_OUT_OF_RANGE
const OFFSET_OUT_OF_RANGE: i16 = 1;

/// UNKNOWN_TOPIC_OR_PARTITION
const UNKNOWN_TOPIC_OR_PARTITION: i16 = 3;

/// Upper bound of a single fetch long-poll.
const MAX_FETCH_WAIT: Duration = Duration::from_millis(500);

/// Pause after a round where no broker could be fetched from.
const RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// A log of raw key/value records.
#[async_trait]
pub trait OffsetsSource: Send {
    /// Wait up to `timeout` for records. An empty batch means the wait expired.
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<RawRecord>>;

    /// Persist consumed positions and release connections
    async fn close(&mut self) -> Result<()>;
}

/// Outcome of one fetch round, before it is applied to the consumer positions.
#[derive(Debug, Default)]
struct FetchRound {
    records: Vec<RawRecord>,
    positions: BTreeMap<i32, i64>,
    out_of_range: Vec<i32>,
    refresh: bool,
    failed_brokers: usize,
}

impl FetchRound {
    fn collect(topic: &str, responses: Vec<(i32, Result<Vec<PartitionFetch>>)>) -> Self {
        let mut round = Self::default();
        for (broker, response) in responses {
            let partitions = match response {
                Ok(partitions) => partitions,
                Err(e) => {
                    warn!(broker, error = %e, "Fetch from broker failed");
                    round.failed_brokers += 1;
                    round.refresh = true;
                    continue;
                }
            };
            for fetched in partitions {
                match fetched.error_code {
                    0 => {
                        round.positions.insert(fetched.partition, fetched.next_offset);
                        round.records.extend(fetched.records);
                    }
                    OFFSET_OUT_OF_RANGE => round.out_of_range.push(fetched.partition),
                    code if is_not_leader_code(code) || code == UNKNOWN_TOPIC_OR_PARTITION => {
                        round.refresh = true
                    }
                    code => warn!(
                        topic,
                        partition = fetched.partition,
                        code,
                        "Fetch returned an error"
                    ),
                }
            }
        }
        round
    }

    /// Move `positions` forward and hand out the round's records.
    fn apply(self, positions: &mut BTreeMap<i32, i64>) -> Vec<RawRecord> {
        positions.extend(self.positions);
        self.records
    }
}

/// Tails one topic over the wire client.
pub struct KafkaOffsetsSource {
    router: PartitionLeaderRouter,
    topic: String,
    group_id: String,
    positions: BTreeMap<i32, i64>,
    committed: BTreeMap<i32, i64>,
    coordinator: Option<KafkaClient>,
    max_partition_fetch_bytes: i32,
    auto_commit_interval: Duration,
    last_commit: Instant,
}

impl KafkaOffsetsSource {
    /// Connect, discover the topic's partitions and resolve start positions.
    ///
    /// Fails when the cluster is unreachable or the topic does not exist.
    pub async fn connect(config: KafkaConfig, options: &TailOptions) -> Result<Self> {
        let router = PartitionLeaderRouter::new(config).await?;
        let topic = options.source_topic.clone();

        let partitions = match router.partitions_for(&topic).await? {
            Some(partitions) if !partitions.is_empty() => partitions,
            _ => return Err(KafkaError::TopicNotExists(topic).into()),
        };

        let coordinator = router.coordinator_client(&options.group_id).await?;

        let mut source = Self {
            router,
            topic,
            group_id: options.group_id.clone(),
            positions: BTreeMap::new(),
            committed: BTreeMap::new(),
            coordinator: Some(coordinator),
            max_partition_fetch_bytes: options.max_partition_fetch_bytes,
            auto_commit_interval: Duration::from_millis(options.auto_commit_interval_ms),
            last_commit: Instant::now(),
        };
        source
            .initialize_positions(&partitions, options.from_beginning)
            .await?;

        info!(
            topic = %source.topic,
            group = %source.group_id,
            partitions = partitions.len(),
            from_beginning = options.from_beginning,
            "Source consumer ready"
        );
        Ok(source)
    }

    /// Current position per partition
    pub fn positions(&self) -> &BTreeMap<i32, i64> {
        &self.positions
    }

    async fn initialize_positions(&mut self, partitions: &[i32], from_beginning: bool) -> Result<()> {
        let committed: HashMap<i32, i64> = match (&self.coordinator, from_beginning) {
            (Some(coordinator), false) => {
                fetch_offsets(coordinator, &self.group_id, &self.topic, partitions)
                    .await?
                    .into_iter()
                    .filter(|c| c.error_code == 0 && c.offset >= 0)
                    .map(|c| (c.partition, c.offset))
                    .collect()
            }
            _ => HashMap::new(),
        };

        let reset = if from_beginning {
            EARLIEST_TIMESTAMP
        } else {
            LATEST_TIMESTAMP
        };

        for &partition in partitions {
            let position = match committed.get(&partition) {
                Some(&offset) => {
                    self.committed.insert(partition, offset);
                    offset
                }
                None => self.router.list_offset(&self.topic, partition, reset).await?,
            };
            debug!(topic = %self.topic, partition, position, "Start position");
            self.positions.insert(partition, position);
        }

        Ok(())
    }

    /// One fetch from every partition leader, concurrently.
    async fn fetch_round(&mut self, max_wait_ms: i32) -> Result<Vec<RawRecord>> {
        let grouped = self
            .router
            .group_by_leader(&self.topic, self.positions.keys().copied())
            .await?;

        if grouped.is_empty() {
            tokio::time::sleep(RETRY_BACKOFF).await;
            self.refresh_metadata().await;
            return Ok(Vec::new());
        }

        let router = &self.router;
        let topic = self.topic.as_str();
        let max_bytes = self.max_partition_fetch_bytes;
        let requests = grouped.into_iter().map(|(broker, partitions)| {
            let fetches: Vec<(i32, i64)> = partitions
                .into_iter()
                .filter_map(|p| self.positions.get(&p).map(|&offset| (p, offset)))
                .collect();
            async move {
                let result = router
                    .fetch_from(broker, topic, &fetches, max_wait_ms, max_bytes)
                    .await;
                (broker, result)
            }
        });
        let responses = join_all(requests).await;
        let broker_count = responses.len();
        let mut round = FetchRound::collect(&self.topic, responses);

        // Positions move only after the last await, together with the records.
        for partition in std::mem::take(&mut round.out_of_range) {
            let earliest = self
                .router
                .list_offset(&self.topic, partition, EARLIEST_TIMESTAMP)
                .await?;
            warn!(
                topic = %self.topic,
                partition,
                earliest,
                "Position out of range, resetting to earliest"
            );
            round.positions.insert(partition, earliest);
        }

        if round.refresh {
            self.refresh_metadata().await;
        }
        if round.failed_brokers == broker_count && round.records.is_empty() {
            tokio::time::sleep(RETRY_BACKOFF).await;
        }

        Ok(round.apply(&mut self.positions))
    }

    async fn refresh_metadata(&self) {
        if let Err(e) = self.router.refresh_metadata(&self.topic).await {
            warn!(topic = %self.topic, error = %e, "Metadata refresh failed");
        }
    }

    /// Commit positions that moved since the last commit.
    async fn commit(&mut self) -> Result<()> {
        let pending: Vec<(TopicPartition, i64)> = self
            .positions
            .iter()
            .filter(|(p, offset)| self.committed.get(*p) != Some(*offset))
            .map(|(&p, &offset)| (TopicPartition::new(self.topic.clone(), p), offset))
            .collect();

        self.last_commit = Instant::now();
        if pending.is_empty() {
            return Ok(());
        }

        if self.coordinator.is_none() {
            self.coordinator = Some(self.router.coordinator_client(&self.group_id).await?);
        }
        let coordinator = self
            .coordinator
            .as_ref()
            .ok_or_else(|| Error::InvalidState("no group coordinator".to_string()))?;

        match commit_offsets(coordinator, &self.group_id, &pending).await {
            Ok(()) => {
                for (tp, offset) in pending {
                    self.committed.insert(tp.partition, offset);
                }
                debug!(group = %self.group_id, "Committed source positions");
                Ok(())
            }
            Err(e) => {
                let rediscover = match &e {
                    Error::Kafka(KafkaError::Protocol(_)) => true,
                    Error::Kafka(k) => k.code().is_some_and(is_coordinator_error),
                    _ => false,
                };
                if rediscover {
                    self.coordinator = None;
                }
                Err(e)
            }
        }
    }

    async fn maybe_commit(&mut self) {
        if self.last_commit.elapsed() < self.auto_commit_interval {
            return;
        }
        if let Err(e) = self.commit().await {
            warn!(group = %self.group_id, error = %e, "Auto-commit of source positions failed");
        }
    }
}

#[async_trait]
impl OffsetsSource for KafkaOffsetsSource {
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<RawRecord>> {
        self.maybe_commit().await;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let max_wait = remaining.min(MAX_FETCH_WAIT).as_millis() as i32;

            let records = self.fetch_round(max_wait).await?;
            if !records.is_empty() || Instant::now() >= deadline {
                return Ok(records);
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        let result = self.commit().await;
        if let Some(coordinator) = self.coordinator.take() {
            if let Err(e) = coordinator.disconnect().await {
                debug!(error = %e, "Error closing coordinator connection");
            }
        }
        self.router.close().await;
        info!(topic = %self.topic, group = %self.group_id, "Source consumer closed");
        result
    }
}
