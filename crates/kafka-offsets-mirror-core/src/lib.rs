//! Kafka Offsets Mirror Core Library
//!
//! Tails the internal consumer offsets topic of a source cluster and mirrors
//! every committed position into a replica topic on a destination cluster, or
//! replays a replica topic onto live consumer groups during failover.
//!
//! A pipeline is an [`OffsetsLoop`]: an [`OffsetsSource`] is polled, records
//! are decoded by a [`RecordConverter`], dropped by a [`FilterPolicy`] when
//! they match an ignore rule, and handed to an [`OffsetsProcessor`], usually a
//! [`ShardedDispatcher`] keeping per-key order across parallel lanes.

pub mod codec;
pub mod config;
pub mod converter;
pub mod error;
pub mod filter;
pub mod kafka;
pub mod model;
pub mod processor;
pub mod source;
pub mod tail;

pub use config::{FilterConfig, KafkaConfig, MirrorOptions, TailOptions};
pub use converter::{MirrorConverter, RecordConverter, RestoreConverter};
pub use error::{DecodeError, Error, KafkaError, Result};
pub use filter::{FilterPolicy, FilterRule};
pub use model::{Keyed, MirrorRecord, OffsetKey, OffsetValue, RawRecord, RestoreTask, TopicPartition};
pub use processor::{
    CompositeProcessor, GroupConnection, GroupConnector, LoggingProcessor, OffsetsProcessor,
    OffsetsSinkProcessor, RestoreProcessor, ShardedDispatcher,
};
pub use source::{KafkaOffsetsSource, OffsetsSource};
pub use tail::{LoopHandle, LoopState, LoopStats, OffsetsLoop};
