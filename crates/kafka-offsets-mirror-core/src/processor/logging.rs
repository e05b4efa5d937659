use async_trait::async_trait;
use tracing::info;

use super::OffsetsProcessor;
use crate::model::{MirrorRecord, RestoreTask};
use crate::Result;

/// Emits one structured event per record.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingProcessor;

#[async_trait]
impl OffsetsProcessor<MirrorRecord> for LoggingProcessor {
    async fn process(&mut self, record: &MirrorRecord) -> Result<()> {
        let key = &record.key;
        match &record.value {
            Some(value) => info!(
                group = key.group(),
                topic = key.topic(),
                partition = key.partition(),
                offset = value.offset,
                "Offset commit"
            ),
            None => info!(
                group = key.group(),
                topic = key.topic(),
                partition = key.partition(),
                "Offset tombstone"
            ),
        }
        Ok(())
    }
}

#[async_trait]
impl OffsetsProcessor<RestoreTask> for LoggingProcessor {
    async fn process(&mut self, task: &RestoreTask) -> Result<()> {
        info!(
            group = task.key.group(),
            topic = task.key.topic(),
            partition = task.key.partition(),
            offset = task.requested_offset,
            "Restore request"
        );
        Ok(())
    }
}
