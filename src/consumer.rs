//! Partition Consumer: exclusive-ownership claim, offset-resuming reads
//! across segment rotations, and the open-next-segment algorithm
//! (spec.md §4.4).
//!
//! Grounded on `examples/original_source/FileMessageQueue.py`'s
//! `Consumer` (`_recovery`, `__open_nextfile`, persisted `(file, offset)`
//! savepoint), generalized from a `glob`-based directory scan onto the
//! catalog's `get_logs` index.

use crate::catalog::{Catalog, ConsumeOffsetLookup};
use crate::error::{QueueError, QueueResult};
use crate::record::{BinaryCodec, RecordCodec, RecordKey};
use crate::segment::{parse_segment_file_name, segment_file_name, SegmentReader};
use crate::timestamp::Timestamp;
use bytes::Bytes;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

/// A decoded record handed back to the caller, annotated with the
/// position to resume at (spec.md §4.4 `poll()` contract).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub queue: String,
    pub partition: u32,
    pub key: Option<RecordKey>,
    pub payload: Bytes,
    pub send_timestamp: Timestamp,
    pub next_position: u64,
}

/// `(bucket_timestamp, offset)`, per spec.md §4.4 `position()`/`seek()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub bucket: Timestamp,
    pub offset: u64,
}

struct StagedAck {
    file_name: String,
    offset: u64,
}

/// Claims exclusive ownership of `(queue, group, partition)` and streams
/// records from the last committed offset. See the module-level state
/// machine in spec.md §4.4: `UNCLAIMED → CLAIMED → READING → CLAIMED →
/// CLOSED`, where `READING` is exactly "a read descriptor is open"
/// (`self.reader.is_some()`).
pub struct PartitionConsumer {
    catalog: Arc<Catalog>,
    queue_name: String,
    queue_partitions: u32,
    group: String,
    partition: u32,
    pid: u32,
    auto_ack: bool,
    codec: Arc<dyn RecordCodec>,
    lookahead: usize,

    current_bucket: Timestamp,
    resume_offset: u64,
    prefetch: VecDeque<crate::catalog::LogSegmentRecord>,
    reader: Option<SegmentReader>,
    current_file: Option<String>,
    staged_ack: Option<StagedAck>,
    closed: bool,
}

impl PartitionConsumer {
    /// Opens a consumer on `(queue_name, group, partition)` for the
    /// current process. Fails with `AlreadyClaimed` if a live process
    /// already owns this triple.
    pub async fn open(
        catalog: Arc<Catalog>,
        queue_name: &str,
        group: &str,
        partition: u32,
        auto_ack: bool,
        poll_latest: bool,
    ) -> QueueResult<Self> {
        let queue = catalog
            .get_queue(queue_name)
            .await?
            .ok_or_else(|| QueueError::QueueNotFound(queue_name.to_string()))?;
        if partition >= queue.partitions {
            return Err(QueueError::InvalidPartition {
                queue: queue_name.to_string(),
                partition,
                partitions: queue.partitions,
            });
        }

        let pid = std::process::id();
        let claimed = catalog
            .register_consumer(group, queue_name, partition, pid)
            .await?;
        if !claimed {
            return Err(QueueError::AlreadyClaimed {
                queue: queue_name.to_string(),
                group: group.to_string(),
                partition,
            });
        }

        let lookup = catalog.get_consume_offset(group, queue_name, partition).await?;
        let (current_bucket, resume_offset) = match lookup {
            ConsumeOffsetLookup::Found(record) => {
                let (bucket, _partition) = parse_segment_file_name(&record.log_file)
                    .ok_or_else(|| {
                        QueueError::IoError(anyhow::anyhow!(
                            "stored consume offset names an unparseable segment file: {}",
                            record.log_file
                        ))
                    })?;
                (bucket, record.offset)
            }
            // An expired offset's segment is gone; resume from the oldest
            // available segment (DESIGN.md's Open Question resolution).
            ConsumeOffsetLookup::Expired(_) => (Timestamp::from_secs(0), 0),
            ConsumeOffsetLookup::NotFound if poll_latest => {
                (Timestamp::now().bucket_floor(queue.bucket_minutes), 0)
            }
            ConsumeOffsetLookup::NotFound => (Timestamp::from_secs(0), 0),
        };

        Ok(PartitionConsumer {
            lookahead: catalog.lookahead(),
            catalog,
            queue_name: queue_name.to_string(),
            queue_partitions: queue.partitions,
            group: group.to_string(),
            partition,
            pid,
            auto_ack,
            codec: Arc::new(BinaryCodec),
            current_bucket,
            resume_offset,
            prefetch: VecDeque::new(),
            reader: None,
            current_file: None,
            staged_ack: None,
            closed: false,
        })
    }

    fn segment_path(&self, file_name: &str) -> PathBuf {
        self.catalog.queue_dir(&self.queue_name).join(file_name)
    }

    /// spec.md §4.4 "Open-next-segment algorithm". Returns `Ok(true)` if
    /// `self.reader` is now open, `Ok(false)` if there is no more data
    /// available right now (not an error).
    async fn open_next_segment(&mut self) -> QueueResult<bool> {
        let mut retried_missing = false;

        loop {
            let head = match self.prefetch.pop_front() {
                Some(head) => head,
                None => {
                    let logs = self
                        .catalog
                        .get_logs(&self.queue_name, self.partition, self.current_bucket, self.lookahead)
                        .await?;
                    if logs.is_empty() {
                        return Ok(false);
                    }
                    let mut logs: VecDeque<_> = logs.into();
                    let head = logs.pop_front().unwrap();
                    self.prefetch = logs;
                    head
                }
            };

            let path = self.segment_path(&head.file_name);

            if head.bucket_timestamp == self.current_bucket.as_secs() {
                let size = match SegmentReader::file_size(&path) {
                    Ok(size) => size,
                    Err(_not_found) => {
                        if retried_missing {
                            return Ok(false);
                        }
                        retried_missing = true;
                        self.prefetch.clear();
                        continue;
                    }
                };
                if self.resume_offset < size {
                    let reader = SegmentReader::open(&path, self.resume_offset)?;
                    self.reader = Some(reader);
                    self.current_file = Some(head.file_name);
                    return Ok(true);
                } else if self.prefetch.is_empty() {
                    return Ok(false);
                } else {
                    continue;
                }
            }

            match SegmentReader::open(&path, 0) {
                Ok(reader) => {
                    self.reader = Some(reader);
                    self.current_bucket = Timestamp::from_secs(head.bucket_timestamp);
                    self.resume_offset = 0;
                    self.current_file = Some(head.file_name);
                    return Ok(true);
                }
                Err(_not_found) => {
                    if retried_missing {
                        return Ok(false);
                    }
                    retried_missing = true;
                    self.prefetch.clear();
                }
            }
        }
    }

    /// Decodes one record, advancing across segment rotations as needed.
    /// Returns `Ok(None)` when there is no new data — not an error
    /// (spec.md §4.4, §5 "`poll()` never blocks on new data").
    pub async fn poll(&mut self) -> QueueResult<Option<Message>> {
        if self.reader.is_none() && !self.open_next_segment().await? {
            return Ok(None);
        }

        loop {
            let record = {
                let reader = self.reader.as_mut().expect("reader just confirmed open");
                reader.read_one(self.codec.as_ref())?
            };

            match record {
                Some(record) => {
                    let new_position = self.reader.as_ref().unwrap().position();
                    self.resume_offset = new_position;
                    if self.auto_ack {
                        self.staged_ack = Some(StagedAck {
                            file_name: self.current_file.clone().expect("reading implies a current file"),
                            offset: new_position,
                        });
                    }
                    return Ok(Some(Message {
                        queue: self.queue_name.clone(),
                        partition: self.partition,
                        key: record.key,
                        payload: record.payload,
                        send_timestamp: record.timestamp,
                        next_position: new_position,
                    }));
                }
                None => {
                    self.reader = None;
                    if !self.open_next_segment().await? {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Manually stages an ack at `next_position` in the currently open
    /// segment, for callers (e.g. the fan-in consumer) that opened this
    /// consumer with `auto_ack=false` and decide per-message whether to
    /// acknowledge.
    pub fn stage_ack(&mut self, next_position: u64) {
        if let Some(file_name) = self.current_file.clone() {
            self.staged_ack = Some(StagedAck {
                file_name,
                offset: next_position,
            });
        }
    }

    /// If an ack is staged, durably upserts the consume offset and clears
    /// the staged ack.
    pub async fn commit(&mut self) -> QueueResult<()> {
        if let Some(ack) = self.staged_ack.take() {
            self.catalog
                .put_consume_offset(&self.group, &self.queue_name, self.partition, &ack.file_name, ack.offset)
                .await?;
        }
        Ok(())
    }

    pub fn position(&self) -> Position {
        Position {
            bucket: self.current_bucket,
            offset: self.resume_offset,
        }
    }

    /// Validates that `position`'s segment exists, its offset is within
    /// file size and lies on a record boundary, then takes effect as an
    /// immediate ack+commit (spec.md §4.4).
    pub async fn seek(&mut self, position: Position) -> QueueResult<()> {
        let file_name = segment_file_name(position.bucket, self.partition);
        let path = self.segment_path(&file_name);
        let size = SegmentReader::file_size(&path).map_err(|_| {
            QueueError::InvalidPosition(format!(
                "no segment for bucket {} partition {}",
                position.bucket.as_secs(),
                self.partition
            ))
        })?;
        if position.offset > size {
            return Err(QueueError::InvalidPosition(
                "offset is beyond the segment's file size".to_string(),
            ));
        }
        if position.offset < size {
            let mut probe = SegmentReader::open(&path, position.offset)?;
            if probe.read_one(self.codec.as_ref())?.is_none() {
                return Err(QueueError::InvalidPosition(
                    "offset does not lie on a record boundary".to_string(),
                ));
            }
        }

        self.reader = None;
        self.prefetch.clear();
        self.current_bucket = position.bucket;
        self.resume_offset = position.offset;
        self.current_file = Some(file_name.clone());
        self.staged_ack = Some(StagedAck {
            file_name,
            offset: position.offset,
        });
        self.commit().await
    }

    /// Unregisters this consumer if the registry still names this pid,
    /// then marks this handle closed so `Drop` does not warn.
    pub async fn close(mut self) -> QueueResult<()> {
        self.reader = None;
        self.catalog
            .unregister_consumer(&self.group, &self.queue_name, self.partition, self.pid)
            .await?;
        self.closed = true;
        Ok(())
    }

    pub fn partition(&self) -> u32 {
        self.partition
    }

    pub fn queue_partitions(&self) -> u32 {
        self.queue_partitions
    }
}

impl Drop for PartitionConsumer {
    fn drop(&mut self) {
        if !self.closed {
            tracing::warn!(
                queue = %self.queue_name,
                group = %self.group,
                partition = self.partition,
                "PartitionConsumer dropped without calling close(); the registration lingers until a liveness probe steals it"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::Producer;

    async fn setup(dir: &std::path::Path, partitions: u32) -> (Arc<Catalog>, Producer) {
        let catalog = Arc::new(Catalog::open(dir).await.unwrap());
        let producer = Producer::open(catalog.clone(), "q", partitions, 48, 5).await.unwrap();
        (catalog, producer)
    }

    #[tokio::test]
    async fn round_trip_single_partition() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, producer) = setup(dir.path(), 1).await;
        for i in 0..5 {
            producer
                .send(Bytes::from(format!("msg-{i}")), None, None)
                .await
                .unwrap();
        }
        producer.commit().await.unwrap();

        let mut consumer = PartitionConsumer::open(catalog, "q", "g", 0, true, false)
            .await
            .unwrap();
        let mut seen = Vec::new();
        while let Some(message) = consumer.poll().await.unwrap() {
            seen.push(String::from_utf8(message.payload.to_vec()).unwrap());
            consumer.commit().await.unwrap();
        }
        assert_eq!(seen, vec!["msg-0", "msg-1", "msg-2", "msg-3", "msg-4"]);
        consumer.close().await.unwrap();
    }

    #[tokio::test]
    async fn offset_durability_resumes_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, producer) = setup(dir.path(), 1).await;
        for i in 0..10 {
            producer
                .send(Bytes::from(format!("msg-{i}")), None, None)
                .await
                .unwrap();
        }
        producer.commit().await.unwrap();

        let mut first = PartitionConsumer::open(catalog.clone(), "q", "g", 0, true, false)
            .await
            .unwrap();
        for _ in 0..5 {
            first.poll().await.unwrap().unwrap();
            first.commit().await.unwrap();
        }
        first.close().await.unwrap();

        let mut second = PartitionConsumer::open(catalog, "q", "g", 0, true, false)
            .await
            .unwrap();
        let next = second.poll().await.unwrap().unwrap();
        assert_eq!(next.payload, Bytes::from_static(b"msg-5"));
    }

    #[tokio::test]
    async fn second_claim_on_live_owner_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, _producer) = setup(dir.path(), 1).await;
        let _first = PartitionConsumer::open(catalog.clone(), "q", "g", 0, true, false)
            .await
            .unwrap();
        let err = PartitionConsumer::open(catalog, "q", "g", 0, true, false)
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::AlreadyClaimed { .. }));
    }

    #[tokio::test]
    async fn poll_returns_none_with_no_data() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, _producer) = setup(dir.path(), 1).await;
        let mut consumer = PartitionConsumer::open(catalog, "q", "g", 0, true, false)
            .await
            .unwrap();
        assert!(consumer.poll().await.unwrap().is_none());
    }
}
