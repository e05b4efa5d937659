//! Conversion of raw log records into typed pipeline records.

use crate::codec::{self, OffsetsMessage};
use crate::error::DecodeError;
use crate::model::{MirrorRecord, RestoreTask};

/// Turns a raw key/value pair into a typed record.
///
/// `Ok(None)` means the record is not relevant to the pipeline and is dropped
/// before filtering.
pub trait RecordConverter: Send + Sync {
    type Output: Send;

    fn convert(
        &self,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
    ) -> std::result::Result<Option<Self::Output>, DecodeError>;
}

/// Converter for the source offsets topic. Tombstones are kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct MirrorConverter;

impl RecordConverter for MirrorConverter {
    type Output = MirrorRecord;

    fn convert(
        &self,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
    ) -> std::result::Result<Option<MirrorRecord>, DecodeError> {
        match codec::decode(key, value)? {
            OffsetsMessage::OffsetCommit { key, value } => Ok(Some(MirrorRecord { key, value })),
            OffsetsMessage::Other { .. } => Ok(None),
        }
    }
}

/// Converter for the replica topic feeding the restore pipeline.
///
/// Tombstones carry no position to restore and are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct RestoreConverter;

impl RecordConverter for RestoreConverter {
    type Output = RestoreTask;

    fn convert(
        &self,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
    ) -> std::result::Result<Option<RestoreTask>, DecodeError> {
        match codec::decode(key, value)? {
            OffsetsMessage::OffsetCommit {
                key,
                value: Some(value),
            } => Ok(Some(RestoreTask::new(key, value.offset))),
            _ => Ok(None),
        }
    }
}
