//! Self-delimited binary record codec for segment files.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! u8      key_tag        0 = no key, 1 = string key, 2 = integer key
//! [u32    key_len, bytes key]    only if key_tag == 1
//! [u64    key_value]             only if key_tag == 2
//! u64     send_timestamp_micros
//! u32     payload_len
//! bytes   payload
//! ```
//!
//! Grounded on `sdk/src/batching/messages_batch.rs`'s fixed/length-prefixed
//! field layout over `bytes::{Buf, BufMut}`. A short read on any field
//! (including a field that straddles the end of the buffer) is reported as
//! `Ok(None)` — "no more data yet", never an error — which is how a
//! partially-flushed tail after a producer crash is tolerated (spec.md §3,
//! §4.2, §8 property 9).

use crate::timestamp::Timestamp;
use bytes::{Buf, BufMut, Bytes, BytesMut};

const KEY_TAG_NONE: u8 = 0;
const KEY_TAG_STRING: u8 = 1;
const KEY_TAG_INT: u8 = 2;

/// The small scalar key carried alongside a record, per spec.md §3
/// ("key: optional scalar"). Opaque payload + scalar key removes the
/// cross-language object-graph serialization the original Python
/// implementation relied on (spec.md §9 Design Notes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordKey {
    String(String),
    Int(u64),
}

impl RecordKey {
    pub fn as_bytes_for_hash(&self) -> Vec<u8> {
        match self {
            RecordKey::String(s) => s.as_bytes().to_vec(),
            RecordKey::Int(i) => i.to_le_bytes().to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Option<RecordKey>,
    pub timestamp: Timestamp,
    pub payload: Bytes,
}

/// A capability injected at queue-open time, per spec.md §9 Design Notes
/// ("Polymorphic storage"). `BinaryCodec` is the only built-in
/// implementation and the default everywhere in this crate.
pub trait RecordCodec: Send + Sync {
    fn encode(&self, record: &Record, out: &mut Vec<u8>);

    /// Decode one record starting at the front of `buf`. Returns:
    /// - `Ok(Some((record, consumed_bytes)))` on a full, valid record
    /// - `Ok(None)` if `buf` doesn't yet hold a complete record (end of
    ///   stream / truncated tail — not an error)
    fn decode(&self, buf: &[u8]) -> Option<(Record, usize)>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BinaryCodec;

impl RecordCodec for BinaryCodec {
    fn encode(&self, record: &Record, out: &mut Vec<u8>) {
        match &record.key {
            None => out.put_u8(KEY_TAG_NONE),
            Some(RecordKey::String(s)) => {
                out.put_u8(KEY_TAG_STRING);
                out.put_u32_le(s.len() as u32);
                out.extend_from_slice(s.as_bytes());
            }
            Some(RecordKey::Int(i)) => {
                out.put_u8(KEY_TAG_INT);
                out.put_u64_le(*i);
            }
        }
        out.put_u64_le(record.timestamp.as_micros());
        out.put_u32_le(record.payload.len() as u32);
        out.extend_from_slice(&record.payload);
    }

    fn decode(&self, buf: &[u8]) -> Option<(Record, usize)> {
        let mut cursor = buf;
        let start_len = cursor.len();

        if cursor.remaining() < 1 {
            return None;
        }
        let key_tag = cursor.get_u8();
        let key = match key_tag {
            KEY_TAG_NONE => None,
            KEY_TAG_STRING => {
                if cursor.remaining() < 4 {
                    return None;
                }
                let len = cursor.get_u32_le() as usize;
                if cursor.remaining() < len {
                    return None;
                }
                let bytes = cursor.copy_to_bytes(len);
                let s = String::from_utf8(bytes.to_vec()).ok()?;
                Some(RecordKey::String(s))
            }
            KEY_TAG_INT => {
                if cursor.remaining() < 8 {
                    return None;
                }
                Some(RecordKey::Int(cursor.get_u64_le()))
            }
            _ => return None,
        };

        if cursor.remaining() < 8 {
            return None;
        }
        let timestamp = Timestamp::from_micros(cursor.get_u64_le());

        if cursor.remaining() < 4 {
            return None;
        }
        let payload_len = cursor.get_u32_le() as usize;
        if cursor.remaining() < payload_len {
            return None;
        }
        let payload = cursor.copy_to_bytes(payload_len);

        let consumed = start_len - cursor.remaining();
        Some((
            Record {
                key,
                timestamp,
                payload,
            },
            consumed,
        ))
    }
}

/// Append-only encode buffer helper used by the producer/segment writer.
pub fn encode_all(codec: &dyn RecordCodec, records: &[Record]) -> BytesMut {
    let mut out = Vec::new();
    for record in records {
        codec.encode(record, &mut out);
    }
    BytesMut::from(&out[..])
}
