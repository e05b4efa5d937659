//! Record handlers sitting behind the tailing loop.
//!
//! Every stage of a pipeline is an [`OffsetsProcessor`]: the logging stage,
//! the sharded dispatcher, the sink writing the replica topic and the restore
//! processor seeking live groups.

mod composite;
mod dispatcher;
mod logging;
mod restore;
mod sink;

pub use composite::CompositeProcessor;
pub use dispatcher::ShardedDispatcher;
pub use logging::LoggingProcessor;
pub use restore::{GroupConnection, GroupConnector, RestoreProcessor};
pub use sink::{murmur2, partition_for_key, replica_record, OffsetsSinkProcessor};

use async_trait::async_trait;

use crate::Result;

/// Handles one record at a time.
///
/// `close` is called once after the last record, and releases whatever the
/// processor holds.
#[async_trait]
pub trait OffsetsProcessor<T>: Send {
    async fn process(&mut self, record: &T) -> Result<()>;

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<T, P> OffsetsProcessor<T> for Box<P>
where
    T: Send + Sync,
    P: OffsetsProcessor<T> + ?Sized,
{
    async fn process(&mut self, record: &T) -> Result<()> {
        (**self).process(record).await
    }

    async fn close(&mut self) -> Result<()> {
        (**self).close().await
    }
}
