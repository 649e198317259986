//! `queue_logs(log_file, queue, partition, timestamp)` with an index on
//! `(queue, timestamp)` — spec.md §6.
//!
//! Keys are `log:{queue}:{partition:04}:{bucket:020}:{file}` so sled's
//! byte-ordered keyspace gives ordered-by-bucket range scans for free,
//! the same trick `persistency/partitions.rs` relies on for its
//! `{kind}_offsets:{stream}:{topic}:{partition}` prefix scans.

use super::Catalog;
use crate::error::QueueResult;
use crate::timestamp::Timestamp;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSegmentRecord {
    pub file_name: String,
    pub queue: String,
    pub partition: u32,
    pub bucket_timestamp: u64,
}

fn key_prefix(queue: &str, partition: u32) -> String {
    format!("log:{queue}:{partition:04}:")
}

fn key(queue: &str, partition: u32, bucket_timestamp: u64, file_name: &str) -> String {
    format!(
        "{}{bucket_timestamp:020}:{file_name}",
        key_prefix(queue, partition)
    )
}

impl Catalog {
    /// Insert-if-absent on `file_name`: a rotation race across processes
    /// may attempt duplicate inserts for the same file, which are
    /// silently deduplicated (spec.md §4.1).
    pub async fn put_log(
        &self,
        file_name: &str,
        queue: &str,
        partition: u32,
        bucket_timestamp: Timestamp,
    ) -> QueueResult<()> {
        let record = LogSegmentRecord {
            file_name: file_name.to_string(),
            queue: queue.to_string(),
            partition,
            bucket_timestamp: bucket_timestamp.as_secs(),
        };
        let encoded = rmp_serde::to_vec(&record)?;
        let key = key(queue, partition, bucket_timestamp.as_secs(), file_name);

        match self.db.compare_and_swap(
            key,
            None as Option<&[u8]>,
            Some(encoded.as_slice()),
        )? {
            Ok(()) => {
                self.db.flush_async().await?;
                tracing::info!(queue, partition, file_name, "registered new log segment");
            }
            Err(_already_present) => {
                tracing::debug!(
                    queue,
                    partition,
                    file_name,
                    "log segment already registered, ignoring duplicate"
                );
            }
        }
        Ok(())
    }

    /// Up to `limit` segments with `bucket_timestamp >= from_timestamp`,
    /// ascending by bucket timestamp.
    pub async fn get_logs(
        &self,
        queue: &str,
        partition: u32,
        from_timestamp: Timestamp,
        limit: usize,
    ) -> QueueResult<Vec<LogSegmentRecord>> {
        let prefix = key_prefix(queue, partition);
        let from_key = key(queue, partition, from_timestamp.as_secs(), "");
        let mut results = Vec::new();
        for entry in self.db.range(from_key..).take_while(|entry| {
            entry
                .as_ref()
                .map(|(k, _)| k.starts_with(prefix.as_bytes()))
                .unwrap_or(false)
        }) {
            let (_, value) = entry?;
            let record: LogSegmentRecord = rmp_serde::from_slice(&value)?;
            results.push(record);
            if results.len() >= limit {
                break;
            }
        }
        Ok(results)
    }

    /// Atomically deletes index rows with `bucket_timestamp < floor(now)
    /// - backup_hours*3600` and returns the removed file names. Caller
    /// unlinks the files after this returns (spec.md §4.1, §4.3).
    pub async fn cleanup_expired(
        &self,
        queue: &str,
        backup_hours: u32,
    ) -> QueueResult<Vec<String>> {
        let cutoff = Timestamp::now().as_secs().saturating_sub(backup_hours as u64 * 3600);
        let _guard = self.lock().await?;

        let prefix = format!("log:{queue}:");
        let mut expired_keys = Vec::new();
        let mut expired_files = Vec::new();
        for entry in self.db.scan_prefix(prefix.as_bytes()) {
            let (k, value) = entry?;
            let record: LogSegmentRecord = rmp_serde::from_slice(&value)?;
            if record.bucket_timestamp < cutoff {
                expired_keys.push(k);
                expired_files.push(record.file_name);
            }
        }

        for k in &expired_keys {
            self.db.remove(k)?;
        }
        if !expired_keys.is_empty() {
            self.db.flush_async().await?;
            tracing::info!(queue, removed = expired_keys.len(), "retention GC removed expired log index rows");
        }

        Ok(expired_files)
    }
}
