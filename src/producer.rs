//! Producer: partition routing, per-partition buffering, bucket-aligned
//! commit and retention trigger (spec.md §4.3).
//!
//! Grounded on `examples/original_source/FileMessageQueue.py`'s
//! `Publisher` (per-partition buffer, bucket rotation on commit), with
//! the least-loaded counters taken from the teacher's own atomic-counter
//! idiom (`AtomicU64` fields used for connection/message counters
//! throughout `server/src/streaming/*`).

use crate::catalog::Catalog;
use crate::error::{QueueError, QueueResult};
use crate::hash::hash_bytes;
use crate::record::{encode_all, BinaryCodec, Record, RecordCodec, RecordKey};
use crate::segment::{segment_file_name, SegmentWriter};
use crate::timestamp::Timestamp;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// An open segment descriptor for one partition, kept across commits that
/// land in the same bucket (spec.md §4.3 "Rotation").
struct OpenSegment {
    writer: SegmentWriter,
    bucket: Timestamp,
}

pub struct Producer {
    catalog: Arc<Catalog>,
    queue_name: String,
    partitions: u32,
    backup_hours: u32,
    bucket_minutes: u32,
    buffers: Vec<Mutex<Vec<Record>>>,
    writers: Vec<Mutex<Option<OpenSegment>>>,
    send_counters: Vec<AtomicU64>,
    codec: Arc<dyn RecordCodec>,
}

impl Producer {
    /// Opens (creating if absent) `queue_name` and returns a producer
    /// bound to it. `create_queue` is idempotent, so calling this
    /// repeatedly with different options only takes effect on first
    /// creation (spec.md §4.1).
    pub async fn open(
        catalog: Arc<Catalog>,
        queue_name: &str,
        partitions: u32,
        backup_hours: u32,
        bucket_minutes: u32,
    ) -> QueueResult<Self> {
        let queue = catalog
            .create_queue(queue_name, partitions, backup_hours, bucket_minutes)
            .await?;
        let n = queue.partitions as usize;
        Ok(Producer {
            catalog,
            queue_name: queue.name,
            partitions: queue.partitions,
            backup_hours: queue.backup_hours,
            bucket_minutes: queue.bucket_minutes,
            buffers: (0..n).map(|_| Mutex::new(Vec::new())).collect(),
            writers: (0..n).map(|_| Mutex::new(None)).collect(),
            send_counters: (0..n).map(|_| AtomicU64::new(0)).collect(),
            codec: Arc::new(BinaryCodec),
        })
    }

    /// Buffers `(now, key, payload)` into the chosen partition's
    /// in-memory list and returns the partition it landed on.
    pub async fn send(
        &self,
        payload: impl Into<Bytes>,
        partition: Option<u32>,
        key: Option<RecordKey>,
    ) -> QueueResult<u32> {
        let partition = self.route(partition, key.as_ref())?;
        let record = Record {
            key,
            timestamp: Timestamp::now(),
            payload: payload.into(),
        };
        self.buffers[partition as usize].lock().await.push(record);
        self.send_counters[partition as usize].fetch_add(1, Ordering::Relaxed);
        Ok(partition)
    }

    fn route(&self, partition: Option<u32>, key: Option<&RecordKey>) -> QueueResult<u32> {
        if self.partitions == 1 {
            return Ok(0);
        }
        if let Some(p) = partition {
            if p >= self.partitions {
                return Err(QueueError::InvalidPartition {
                    queue: self.queue_name.clone(),
                    partition: p,
                    partitions: self.partitions,
                });
            }
            return Ok(p);
        }
        if let Some(key) = key {
            return Ok(hash_bytes(&key.as_bytes_for_hash()) % self.partitions);
        }
        // Least-loaded, ties broken by lowest partition index.
        let mut best = 0u32;
        let mut best_count = u64::MAX;
        for i in 0..self.partitions {
            let count = self.send_counters[i as usize].load(Ordering::Relaxed);
            if count < best_count {
                best_count = count;
                best = i;
            }
        }
        Ok(best)
    }

    /// Flushes every non-empty partition buffer to its current (or
    /// newly-rotated) segment, registers freshly-created segments with
    /// the catalog, then triggers retention GC.
    ///
    /// Failure to open a segment file is fatal to this call and the
    /// buffer for that partition is left untouched so the next `commit`
    /// retries (spec.md §4.3 "Failure semantics").
    pub async fn commit(&self) -> QueueResult<()> {
        let bucket = Timestamp::now().bucket_floor(self.bucket_minutes);
        let mut rotated = Vec::new();

        for partition in 0..self.partitions {
            let mut buffer = self.buffers[partition as usize].lock().await;
            if buffer.is_empty() {
                continue;
            }

            let mut slot = self.writers[partition as usize].lock().await;
            let needs_new_segment = match slot.as_ref() {
                Some(open) => open.bucket != bucket,
                None => true,
            };
            if needs_new_segment {
                *slot = None; // drop the prior descriptor before opening a new one
                let file_name = segment_file_name(bucket, partition);
                let path = self.catalog.queue_dir(&self.queue_name).join(&file_name);
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                let (writer, is_new) = SegmentWriter::open_append(&path)?;
                *slot = Some(OpenSegment { writer, bucket });
                if is_new {
                    rotated.push((partition, file_name, bucket));
                }
            }

            let encoded = encode_all(self.codec.as_ref(), &buffer);
            slot.as_mut().unwrap().writer.append(&encoded)?;
            buffer.clear();
        }

        for (partition, file_name, bucket) in rotated {
            self.catalog
                .put_log(&file_name, &self.queue_name, partition, bucket)
                .await?;
        }

        self.cleanup_expired_logs().await?;
        Ok(())
    }

    /// Asks the catalog for expired segment names under the catalog lock,
    /// then unlinks them on disk outside the lock. Individual unlink
    /// failures are logged and swallowed (spec.md §4.3, §5 "Crash
    /// recovery").
    pub async fn cleanup_expired_logs(&self) -> QueueResult<()> {
        let expired = self
            .catalog
            .cleanup_expired(&self.queue_name, self.backup_hours)
            .await?;
        for file_name in expired {
            let path = self.catalog.queue_dir(&self.queue_name).join(&file_name);
            if let Err(err) = tokio::fs::remove_file(&path).await {
                tracing::warn!(
                    queue = %self.queue_name,
                    file_name,
                    error = %err,
                    "retention GC failed to unlink expired segment; leaving orphan file on disk"
                );
            }
        }
        Ok(())
    }
}
