//! Binary layout of records in the internal consumer offsets topic.
//!
//! All integers are big-endian. Strings are prefixed with an `i16` length,
//! except in flexible value versions (4+) which use compact strings
//! (unsigned varint of `length + 1`) followed by tagged fields.
//!
//! Key:
//! ```text
//! version: i16
//!   0 | 1  => group: string, topic: string, partition: i32   (offset commit)
//!   2      => group: string                                  (group metadata)
//!   3+     => coordinator records of newer group protocols
//! ```
//!
//! Offset commit value:
//! ```text
//! version: i16
//!   0 => offset: i64, metadata: string, commit_timestamp: i64
//!   1 => offset: i64, metadata: string, commit_timestamp: i64, expire_timestamp: i64
//!   2 => offset: i64, metadata: string, commit_timestamp: i64
//!   3 => offset: i64, leader_epoch: i32, metadata: string, commit_timestamp: i64
//!   4 => offset: i64, leader_epoch: i32, metadata: compact string,
//!        commit_timestamp: i64, tagged fields
//! ```
//!
//! A key with an empty or missing value is a tombstone.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::DecodeError;
use crate::model::{OffsetKey, OffsetValue};
use crate::{Error, Result};

/// Key versions describing an offset commit
pub const KEY_V0_OFFSET_COMMIT: i16 = 0;
pub const KEY_V1_OFFSET_COMMIT: i16 = 1;

/// Key version describing group metadata
pub const KEY_V2_GROUP_METADATA: i16 = 2;

/// Sentinel written when a leader epoch or timestamp is unknown
const UNKNOWN: i64 = -1;

type DecodeResult<T> = std::result::Result<T, DecodeError>;

/// Classification of a raw offsets topic record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OffsetsMessage {
    /// Offset commit; `value` is `None` for a tombstone
    OffsetCommit {
        key: OffsetKey,
        value: Option<OffsetValue>,
    },
    /// Any other record type sharing the topic
    Other { key_version: i16 },
}

/// Decode a raw record from the offsets topic.
pub fn decode(key: Option<&[u8]>, value: Option<&[u8]>) -> DecodeResult<OffsetsMessage> {
    let mut key_buf = key.ok_or(DecodeError::MissingKey)?;
    let key_version = read_i16(&mut key_buf, "key version")?;

    match key_version {
        KEY_V0_OFFSET_COMMIT | KEY_V1_OFFSET_COMMIT => {
            let key = decode_key_fields(&mut key_buf)?;
            let value = match value {
                Some(bytes) if !bytes.is_empty() => Some(decode_value(bytes)?),
                _ => None,
            };
            Ok(OffsetsMessage::OffsetCommit { key, value })
        }
        v if v >= KEY_V2_GROUP_METADATA => Ok(OffsetsMessage::Other { key_version: v }),
        v => Err(DecodeError::UnsupportedKeyVersion(v)),
    }
}

fn decode_key_fields(buf: &mut &[u8]) -> DecodeResult<OffsetKey> {
    let group = read_string(buf, "group")?;
    let topic = read_string(buf, "topic")?;
    let partition = read_i32(buf, "partition")?;
    Ok(OffsetKey::new(group, topic, partition))
}

/// Decode an offset commit value.
pub fn decode_value(bytes: &[u8]) -> DecodeResult<OffsetValue> {
    let mut buf = bytes;
    let version = read_i16(&mut buf, "value version")?;

    let value = match version {
        0 | 2 => {
            let offset = read_i64(&mut buf, "offset")?;
            let metadata = read_string(&mut buf, "metadata")?;
            let commit_timestamp = read_i64(&mut buf, "commit timestamp")?;
            OffsetValue {
                offset,
                metadata,
                leader_epoch: None,
                commit_timestamp: known(commit_timestamp),
                expire_timestamp: None,
            }
        }
        1 => {
            let offset = read_i64(&mut buf, "offset")?;
            let metadata = read_string(&mut buf, "metadata")?;
            let commit_timestamp = read_i64(&mut buf, "commit timestamp")?;
            let expire_timestamp = read_i64(&mut buf, "expire timestamp")?;
            OffsetValue {
                offset,
                metadata,
                leader_epoch: None,
                commit_timestamp: known(commit_timestamp),
                expire_timestamp: known(expire_timestamp),
            }
        }
        3 | 4 => {
            let offset = read_i64(&mut buf, "offset")?;
            let leader_epoch = read_i32(&mut buf, "leader epoch")?;
            let metadata = if version == 3 {
                read_string(&mut buf, "metadata")?
            } else {
                read_compact_string(&mut buf, "metadata")?
            };
            let commit_timestamp = read_i64(&mut buf, "commit timestamp")?;
            // Tagged fields of flexible versions carry nothing we mirror.
            OffsetValue {
                offset,
                metadata,
                leader_epoch: known(leader_epoch as i64).map(|e| e as i32),
                commit_timestamp: known(commit_timestamp),
                expire_timestamp: None,
            }
        }
        v => return Err(DecodeError::UnsupportedValueVersion(v)),
    };

    Ok(value)
}

/// Encode an offset commit key (version 1).
///
/// Fails when the group or topic does not fit an `i16` length prefix.
pub fn encode_key(key: &OffsetKey) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(10 + key.group().len() + key.topic().len());
    buf.put_i16(KEY_V1_OFFSET_COMMIT);
    put_string(&mut buf, key.group(), "group")?;
    put_string(&mut buf, key.topic(), "topic")?;
    buf.put_i32(key.partition());
    Ok(buf.freeze())
}

/// Encode an offset commit value.
///
/// Version 1 is used when an expire timestamp is present, version 3 otherwise.
/// Metadata longer than an `i16` length prefix allows is rejected.
pub fn encode_value(value: &OffsetValue) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(32 + value.metadata.len());
    let commit_timestamp = value.commit_timestamp.unwrap_or(UNKNOWN);

    match value.expire_timestamp {
        Some(expire_timestamp) => {
            buf.put_i16(1);
            buf.put_i64(value.offset);
            put_string(&mut buf, &value.metadata, "metadata")?;
            buf.put_i64(commit_timestamp);
            buf.put_i64(expire_timestamp);
        }
        None => {
            buf.put_i16(3);
            buf.put_i64(value.offset);
            buf.put_i32(value.leader_epoch.unwrap_or(UNKNOWN as i32));
            put_string(&mut buf, &value.metadata, "metadata")?;
            buf.put_i64(commit_timestamp);
        }
    }

    Ok(buf.freeze())
}

fn known(v: i64) -> Option<i64> {
    (v >= 0).then_some(v)
}

fn read_i16(buf: &mut &[u8], field: &'static str) -> DecodeResult<i16> {
    if buf.remaining() < 2 {
        return Err(DecodeError::Truncated(field));
    }
    Ok(buf.get_i16())
}

fn read_i32(buf: &mut &[u8], field: &'static str) -> DecodeResult<i32> {
    if buf.remaining() < 4 {
        return Err(DecodeError::Truncated(field));
    }
    Ok(buf.get_i32())
}

fn read_i64(buf: &mut &[u8], field: &'static str) -> DecodeResult<i64> {
    if buf.remaining() < 8 {
        return Err(DecodeError::Truncated(field));
    }
    Ok(buf.get_i64())
}

fn read_string(buf: &mut &[u8], field: &'static str) -> DecodeResult<String> {
    let len = read_i16(buf, field)?;
    if len < 0 {
        return Ok(String::new());
    }
    read_utf8(buf, len as usize, field)
}

fn read_compact_string(buf: &mut &[u8], field: &'static str) -> DecodeResult<String> {
    let len_plus_one = read_unsigned_varint(buf, field)?;
    if len_plus_one == 0 {
        return Ok(String::new());
    }
    read_utf8(buf, (len_plus_one - 1) as usize, field)
}

fn read_utf8(buf: &mut &[u8], len: usize, field: &'static str) -> DecodeResult<String> {
    if buf.remaining() < len {
        return Err(DecodeError::Truncated(field));
    }
    let s = std::str::from_utf8(&buf[..len])
        .map_err(|_| DecodeError::InvalidUtf8(field))?
        .to_string();
    buf.advance(len);
    Ok(s)
}

fn read_unsigned_varint(buf: &mut &[u8], field: &'static str) -> DecodeResult<u32> {
    let mut value = 0u32;
    for i in 0..5 {
        if !buf.has_remaining() {
            return Err(DecodeError::Truncated(field));
        }
        let byte = buf.get_u8();
        value |= ((byte & 0x7f) as u32) << (i * 7);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(DecodeError::Truncated(field))
}

fn put_string(buf: &mut BytesMut, s: &str, field: &'static str) -> Result<()> {
    let len = i16::try_from(s.len()).map_err(|_| {
        Error::Serialization(format!(
            "{} is {} bytes, longer than the {} byte limit",
            field,
            s.len(),
            i16::MAX
        ))
    })?;
    buf.put_i16(len);
    buf.put_slice(s.as_bytes());
    Ok(())
}
