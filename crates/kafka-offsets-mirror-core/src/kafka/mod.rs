//! Kafka protocol client implementation.

mod client;
pub mod consumer_groups;
mod fetch;
mod group_connection;
mod metadata;
mod partition_router;
mod produce;
mod tls;

pub use client::KafkaClient;
pub use consumer_groups::{commit_offsets, fetch_offsets, find_coordinator, CommittedOffset};
pub use fetch::{list_offset, PartitionFetch, EARLIEST_TIMESTAMP, LATEST_TIMESTAMP};
pub use group_connection::{KafkaGroupConnection, KafkaGroupConnector};
pub use metadata::{BrokerMetadata, ClusterMetadata, PartitionMetadata, TopicMetadata};
pub use partition_router::{is_not_leader_code, PartitionLeaderRouter};
pub use produce::{produce, OutgoingRecord};
