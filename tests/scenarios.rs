//! End-to-end scenarios from spec.md §8 (S1-S6) exercised against a real
//! temp-directory catalog and real segment files on disk.

use bytes::Bytes;
use filequeue::catalog::Catalog;
use filequeue::consumer::PartitionConsumer;
use filequeue::error::QueueError;
use filequeue::fanin::FanInConsumer;
use filequeue::producer::Producer;
use filequeue::record::{RecordCodec, RecordKey};
use filequeue::timestamp::Timestamp;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

async fn open_catalog() -> (tempfile::TempDir, Arc<Catalog>) {
    let dir = tempfile::tempdir().unwrap();
    let catalog = Arc::new(Catalog::open(dir.path()).await.unwrap());
    (dir, catalog)
}

/// S1: 30 unkeyed, unrouted sends across 3 partitions split exactly 10/10/10.
#[tokio::test]
async fn s1_least_loaded_splits_evenly() {
    let (_dir, catalog) = open_catalog().await;
    let producer = Producer::open(catalog.clone(), "q", 3, 48, 5).await.unwrap();

    let mut sent = HashSet::new();
    for i in 0..30 {
        let payload = format!("msg-{i}");
        sent.insert(payload.clone());
        producer.send(Bytes::from(payload), None, None).await.unwrap();
    }
    producer.commit().await.unwrap();

    let mut union = HashSet::new();
    for partition in 0..3u32 {
        let mut consumer = PartitionConsumer::open(catalog.clone(), "q", "s1", partition, true, false)
            .await
            .unwrap();
        let mut count = 0;
        while let Some(message) = consumer.poll().await.unwrap() {
            union.insert(String::from_utf8(message.payload.to_vec()).unwrap());
            count += 1;
        }
        assert_eq!(count, 10, "partition {partition} should receive exactly 10 messages");
        consumer.close().await.unwrap();
    }
    assert_eq!(union, sent);
}

/// S2: key-routed messages land on the same partition, deterministically,
/// and are read back in order.
#[tokio::test]
async fn s2_key_routing_is_consistent_and_ordered() {
    let (_dir, catalog) = open_catalog().await;
    let producer = Producer::open(catalog.clone(), "q", 3, 48, 5).await.unwrap();

    let p1 = producer
        .send(Bytes::from_static(b"hello"), None, Some(RecordKey::String("k1".into())))
        .await
        .unwrap();
    let p2 = producer
        .send(Bytes::from_static(b"world"), None, Some(RecordKey::String("k1".into())))
        .await
        .unwrap();
    assert_eq!(p1, p2);
    producer.commit().await.unwrap();

    let mut consumer = PartitionConsumer::open(catalog, "q", "s2", p1, true, false)
        .await
        .unwrap();
    let first = consumer.poll().await.unwrap().unwrap();
    let second = consumer.poll().await.unwrap().unwrap();
    assert_eq!(first.payload, Bytes::from_static(b"hello"));
    assert_eq!(second.payload, Bytes::from_static(b"world"));
    consumer.close().await.unwrap();
}

/// S3: a second consumer in the same group, opened after the first
/// closes, resumes at message 6.
#[tokio::test]
async fn s3_group_resumes_after_commit_and_close() {
    let (_dir, catalog) = open_catalog().await;
    let producer = Producer::open(catalog.clone(), "q", 1, 48, 5).await.unwrap();
    for i in 0..10 {
        producer.send(Bytes::from(format!("msg-{i}")), None, None).await.unwrap();
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
    second.close().await.unwrap();
}

/// S4: a live owner blocks a second claim; once it closes (simulating the
/// owner exiting), the second attempt succeeds.
#[tokio::test]
async fn s4_exclusive_claim_then_release() {
    let (_dir, catalog) = open_catalog().await;
    let _producer = Producer::open(catalog.clone(), "q", 3, 48, 5).await.unwrap();

    let a = PartitionConsumer::open(catalog.clone(), "q", "g", 1, true, false)
        .await
        .unwrap();
    let err = PartitionConsumer::open(catalog.clone(), "q", "g", 1, true, false)
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::AlreadyClaimed { .. }));

    a.close().await.unwrap();
    let b = PartitionConsumer::open(catalog, "q", "g", 1, true, false)
        .await
        .unwrap();
    b.close().await.unwrap();
}

/// S4 (dead-owner variant): a registration left behind by a pid that no
/// longer exists is stolen by the next open.
#[tokio::test]
async fn s4_dead_owner_is_stolen_through_the_public_api() {
    let (_dir, catalog) = open_catalog().await;
    let _producer = Producer::open(catalog.clone(), "q", 1, 48, 5).await.unwrap();

    assert!(catalog
        .register_consumer("g", "q", 0, u32::MAX - 1)
        .await
        .unwrap());

    let consumer = PartitionConsumer::open(catalog, "q", "g", 0, true, false)
        .await
        .unwrap();
    consumer.close().await.unwrap();
}

/// S5: a segment older than the retention horizon is removed from both
/// the index and the filesystem by the next producer commit.
#[tokio::test]
async fn s5_retention_gc_removes_expired_segment() {
    let (_dir, catalog) = open_catalog().await;
    catalog.create_queue("q", 1, 48, 5).await.unwrap();

    let expired_bucket = Timestamp::now().bucket_floor(5).as_secs() - 49 * 3600;
    let expired_bucket = Timestamp::from_secs(expired_bucket);
    let file_name = filequeue::segment::segment_file_name(expired_bucket, 0);
    let queue_dir = catalog.queue_dir("q");
    tokio::fs::create_dir_all(&queue_dir).await.unwrap();
    tokio::fs::write(queue_dir.join(&file_name), b"").await.unwrap();
    catalog.put_log(&file_name, "q", 0, expired_bucket).await.unwrap();

    let producer = Producer::open(catalog.clone(), "q", 1, 48, 5).await.unwrap();
    producer.send(Bytes::from_static(b"keeps-the-queue-alive"), None, None).await.unwrap();
    producer.commit().await.unwrap();

    assert!(!queue_dir.join(&file_name).exists());
    let logs = catalog.get_logs("q", 0, Timestamp::from_secs(0), 10).await.unwrap();
    assert!(logs.iter().all(|log| log.file_name != file_name));
}

/// S6: fan-in over partitions {0, 2} yields messages in global
/// `send_timestamp` order.
#[tokio::test]
async fn s6_fan_in_over_selected_partitions_is_timestamp_ordered() {
    let (_dir, catalog) = open_catalog().await;
    let producer = Producer::open(catalog.clone(), "q", 3, 48, 5).await.unwrap();

    for i in 0..10u32 {
        let partition = if i % 2 == 0 { 0 } else { 2 };
        producer
            .send(Bytes::from(format!("msg-{i}")), Some(partition), None)
            .await
            .unwrap();
    }
    producer.commit().await.unwrap();

    let c0 = PartitionConsumer::open(catalog.clone(), "q", "fanin", 0, false, false)
        .await
        .unwrap();
    let c2 = PartitionConsumer::open(catalog.clone(), "q", "fanin", 2, false, false)
        .await
        .unwrap();
    let mut fanin = FanInConsumer::new(vec![c0, c2], Duration::from_millis(1));

    let mut timestamps = Vec::new();
    while let Some(message) = fanin.poll().await.unwrap() {
        timestamps.push(message.send_timestamp);
        fanin.commit().await.unwrap();
    }
    assert_eq!(timestamps.len(), 10);
    assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));
    fanin.close().await.unwrap();
}

/// Property 8: producing across a bucket boundary and reading back must
/// not drop or duplicate messages.
#[tokio::test]
async fn cross_bucket_rotation_has_no_gap_or_duplication() {
    let (_dir, catalog) = open_catalog().await;
    let producer = Producer::open(catalog.clone(), "q", 1, 48, 1).await.unwrap();

    producer.send(Bytes::from_static(b"before"), None, None).await.unwrap();
    producer.commit().await.unwrap();

    // Force the next commit into a different 1-minute bucket by writing a
    // segment for a bucket two minutes in the future directly, simulating
    // wall-clock advancement without sleeping the test.
    let next_bucket = Timestamp::from_secs(Timestamp::now().bucket_floor(1).as_secs() + 120);
    let file_name = filequeue::segment::segment_file_name(next_bucket, 0);
    catalog.put_log(&file_name, "q", 0, next_bucket).await.unwrap();
    let queue_dir = catalog.queue_dir("q");
    let (mut writer, _) =
        filequeue::segment::SegmentWriter::open_append(&queue_dir.join(&file_name)).unwrap();
    let mut encoded = Vec::new();
    filequeue::record::BinaryCodec.encode(
        &filequeue::record::Record {
            key: None,
            timestamp: next_bucket,
            payload: Bytes::from_static(b"after"),
        },
        &mut encoded,
    );
    writer.append(&encoded).unwrap();

    let mut consumer = PartitionConsumer::open(catalog, "q", "g", 0, true, false)
        .await
        .unwrap();
    let first = consumer.poll().await.unwrap().unwrap();
    let second = consumer.poll().await.unwrap().unwrap();
    assert_eq!(first.payload, Bytes::from_static(b"before"));
    assert_eq!(second.payload, Bytes::from_static(b"after"));
    assert!(consumer.poll().await.unwrap().is_none());
    consumer.close().await.unwrap();
}
