//! End-to-end slot-protocol coverage across the three consumer sync
//! policies (spec §8.4 scenarios 1, 2, 5).

use datahub::config::{BlockPolicy, ChecksumPolicy, ConsumerSyncPolicy, DataBlockConfig, PhysicalPageSize};
use datahub::{ConsumerHandle, DataBlockSchema, DataHubResult, ProducerHandle};
use std::time::Duration;

#[derive(Clone, Copy)]
#[repr(C)]
struct Reading {
    seq: u64,
    payload: [u8; 256],
}

unsafe impl DataBlockSchema for Reading {
    fn blds() -> datahub::Blds {
        datahub::Blds::builder()
            .field("seq", "u64")
            .field("payload", "u8[256]")
    }
    fn schema_version() -> (u16, u16, u16) {
        (1, 0, 0)
    }
}

fn unique_name(tag: &str) -> String {
    format!("slot_protocol_{tag}_{}", std::process::id())
}

fn reading(seq: u64) -> Reading {
    Reading {
        seq,
        payload: [0x41; 256],
    }
}

fn config(policy: ConsumerSyncPolicy, capacity: u64) -> DataBlockConfig {
    DataBlockConfig {
        physical_page_size: PhysicalPageSize::Page4Ki,
        logical_unit_size: 4096,
        ring_buffer_capacity: capacity,
        flex_zone_size: 0,
        policy: BlockPolicy::RingBuffer,
        consumer_sync_policy: policy,
        checksum_policy: ChecksumPolicy::None,
    }
}

/// Scenario 1: single-producer single-consumer, Latest_only. The consumer
/// should see a monotonically non-decreasing sequence ending at the last
/// value written, never repeating a value it already observed.
#[test]
fn latest_only_sees_monotonic_subsequence() -> DataHubResult<()> {
    let name = unique_name("latest_only");
    let mut producer = ProducerHandle::<Reading>::create(&name, config(ConsumerSyncPolicy::LatestOnly, 4))?;
    let secret = producer.shared_secret();
    let mut consumer = ConsumerHandle::<Reading>::attach(&name, secret, Duration::from_millis(100))?;

    for i in 0..20u64 {
        let mut txn = producer.begin_write(Duration::from_millis(100)).unwrap();
        txn.write_value(&reading(i));
        txn.commit()?;
    }

    let mut last_seen = None;
    for _ in 0..20 {
        if let Ok(read) = consumer.next(Duration::from_millis(20)) {
            let seq = read.value().unwrap().seq;
            if let Some(prev) = last_seen {
                assert!(seq > prev, "saw {seq} after {prev}, expected strictly increasing");
            }
            last_seen = Some(seq);
        }
    }
    assert_eq!(last_seen, Some(19));

    drop(consumer);
    producer.destroy()?;
    Ok(())
}

/// Scenario 2 (reduced): multiple Sync_reader consumers attaching at
/// different times each observe every slot committed from their own
/// attach point onward, strictly in order.
#[test]
fn sync_reader_multiple_consumers_observe_in_order() -> DataHubResult<()> {
    let name = unique_name("sync_reader");
    let mut producer =
        ProducerHandle::<Reading>::create(&name, config(ConsumerSyncPolicy::SyncReader, 16))?;

    let secret = producer.shared_secret();
    let mut early = ConsumerHandle::<Reading>::attach(&name, secret, Duration::from_millis(100))?;

    for i in 0..10u64 {
        let mut txn = producer.begin_write(Duration::from_millis(100)).unwrap();
        txn.write_value(&reading(i));
        txn.commit()?;
    }

    let mut late = ConsumerHandle::<Reading>::attach(&name, secret, Duration::from_millis(100))?;

    for i in 10..20u64 {
        let mut txn = producer.begin_write(Duration::from_millis(100)).unwrap();
        txn.write_value(&reading(i));
        txn.commit()?;
    }

    let mut early_seqs = Vec::new();
    while let Ok(read) = early.next(Duration::from_millis(20)) {
        early_seqs.push(read.value().unwrap().seq);
    }
    assert_eq!(early_seqs, (0..20).collect::<Vec<_>>());

    let mut late_seqs = Vec::new();
    while let Ok(read) = late.next(Duration::from_millis(20)) {
        late_seqs.push(read.value().unwrap().seq);
    }
    assert_eq!(late_seqs, (10..20).collect::<Vec<_>>());

    drop(early);
    drop(late);
    producer.destroy()?;
    Ok(())
}

/// Scenario 5: ring-full backpressure under Single_reader. With capacity 8
/// and the reader stalled, the producer should eventually time out waiting
/// for a free slot rather than corrupt unread data.
#[test]
fn single_reader_ring_full_backpressure_times_out() -> DataHubResult<()> {
    let name = unique_name("backpressure");
    let mut producer =
        ProducerHandle::<Reading>::create(&name, config(ConsumerSyncPolicy::SingleReader, 8))?;
    let secret = producer.shared_secret();
    let consumer = ConsumerHandle::<Reading>::attach(&name, secret, Duration::from_millis(100))?;

    let mut committed = 0;
    for i in 0..20u64 {
        match producer.begin_write(Duration::from_millis(20)) {
            Ok(mut txn) => {
                txn.write_value(&reading(i));
                txn.commit()?;
                committed += 1;
            }
            Err(_) => break,
        }
    }

    assert!(committed >= 8, "expected at least capacity writes to succeed, got {committed}");
    assert!(committed < 20, "expected backpressure to eventually block further writes");
    assert!(producer.metrics().writer_timeout_count > 0);

    drop(consumer);
    producer.destroy()?;
    Ok(())
}
