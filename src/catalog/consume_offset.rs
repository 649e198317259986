//! `consume_logs(queue, group_id, partition, log_file, offset)` — spec.md
//! §6, logical key `(queue, group_id, partition)`.
//!
//! Grounded on `persistency/partitions.rs::load_consumer_offsets`'s
//! key-prefixed scan over a `sled::Db`, adapted from "load everything at
//! stream-load time" to a point lookup.

use super::Catalog;
use crate::error::QueueResult;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumeOffsetRecord {
    pub log_file: String,
    pub offset: u64,
}

/// Result of looking up a consumer's stored offset, resolving spec.md
/// §9's open question instead of silently returning `None` when the
/// referenced segment was reclaimed by retention GC. See DESIGN.md.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOffsetLookup {
    /// No offset has ever been committed for this (queue, group, partition).
    NotFound,
    /// An offset exists and its segment is still present.
    Found(ConsumeOffsetRecord),
    /// An offset exists, but the segment it refers to has been removed by
    /// retention GC. The caller decides whether to skip to the newest
    /// available segment or replay from the oldest.
    Expired(ConsumeOffsetRecord),
}

fn key(group: &str, queue: &str, partition: u32) -> String {
    format!("offset:{queue}:{group}:{partition}")
}

impl Catalog {
    pub async fn get_consume_offset(
        &self,
        group: &str,
        queue: &str,
        partition: u32,
    ) -> QueueResult<ConsumeOffsetLookup> {
        let record = match self.db.get(key(group, queue, partition))? {
            Some(bytes) => rmp_serde::from_slice::<ConsumeOffsetRecord>(&bytes)?,
            None => return Ok(ConsumeOffsetLookup::NotFound),
        };

        let segment_exists = self
            .db
            .scan_prefix(format!("log:{queue}:{partition:04}:"))
            .filter_map(|entry| entry.ok())
            .any(|(_, value)| {
                rmp_serde::from_slice::<LogSegmentRecordFileOnly>(&value)
                    .map(|r| r.file_name == record.log_file)
                    .unwrap_or(false)
            });

        if segment_exists {
            Ok(ConsumeOffsetLookup::Found(record))
        } else {
            Ok(ConsumeOffsetLookup::Expired(record))
        }
    }

    pub async fn put_consume_offset(
        &self,
        group: &str,
        queue: &str,
        partition: u32,
        log_file: &str,
        offset: u64,
    ) -> QueueResult<()> {
        let record = ConsumeOffsetRecord {
            log_file: log_file.to_string(),
            offset,
        };
        let encoded = rmp_serde::to_vec(&record)?;
        let _guard = self.lock().await?;
        self.db.insert(key(group, queue, partition), encoded)?;
        self.db.flush_async().await?;
        Ok(())
    }
}

/// Only the field we need to check segment existence; avoids pulling in
/// `log_index`'s full record type for a structurally-compatible read.
#[derive(Deserialize)]
struct LogSegmentRecordFileOnly {
    file_name: String,
}
