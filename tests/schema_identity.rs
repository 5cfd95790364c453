//! Schema identity and checksum enforcement (spec §4.7, §8.1.7, §8.4.4,
//! §8.4.6).

use datahub::config::{BlockPolicy, ChecksumPolicy, ConsumerSyncPolicy, DataBlockConfig, PhysicalPageSize};
use datahub::{ConsumerHandle, DataBlockSchema, DataHubError, DataHubResult, ProducerHandle};
use std::time::Duration;

#[derive(Clone, Copy)]
#[repr(C)]
struct Wide {
    seq: u64,
    buf: [u8; 256],
}

unsafe impl DataBlockSchema for Wide {
    fn blds() -> datahub::Blds {
        datahub::Blds::builder()
            .field("seq", "u64")
            .field("buf", "u8[256]")
    }
    fn schema_version() -> (u16, u16, u16) {
        (1, 0, 0)
    }
}

#[derive(Clone, Copy)]
#[repr(C)]
struct Narrow {
    seq: u64,
    buf: [u8; 128],
}

unsafe impl DataBlockSchema for Narrow {
    fn blds() -> datahub::Blds {
        datahub::Blds::builder()
            .field("seq", "u64")
            .field("buf", "u8[128]")
    }
    fn schema_version() -> (u16, u16, u16) {
        (1, 0, 0)
    }
}

fn unique_name(tag: &str) -> String {
    format!("schema_identity_{tag}_{}", std::process::id())
}

fn config(checksum_policy: ChecksumPolicy) -> DataBlockConfig {
    DataBlockConfig {
        physical_page_size: PhysicalPageSize::Page4Ki,
        logical_unit_size: 4096,
        ring_buffer_capacity: 4,
        flex_zone_size: 0,
        policy: BlockPolicy::RingBuffer,
        consumer_sync_policy: ConsumerSyncPolicy::SyncReader,
        checksum_policy,
    }
}

/// Scenario 4: a consumer expecting a differently-shaped payload type is
/// rejected at attach, with the mismatch counted in segment metrics.
#[test]
fn mismatched_schema_rejected_at_attach() -> DataHubResult<()> {
    let name = unique_name("mismatch");
    let producer = ProducerHandle::<Wide>::create(&name, config(ChecksumPolicy::None))?;
    let secret = producer.shared_secret();

    let err = ConsumerHandle::<Narrow>::attach(&name, secret, Duration::from_millis(50)).unwrap_err();
    assert!(matches!(
        err,
        DataHubError::SchemaMismatch {
            which: datahub::error::SchemaRegion::DataBlock,
            ..
        }
    ));
    assert_eq!(producer.metrics().schema_mismatch_count, 1);

    producer.destroy()?;
    Ok(())
}

/// Two independent calls to the same type's `schema_info()` within one
/// process produce an identical fingerprint (spec §8.2's round-trip
/// property).
#[test]
fn schema_hash_is_stable_within_a_process() {
    let a = Wide::schema_info();
    let b = Wide::schema_info();
    assert_eq!(a.hash, b.hash);
    assert_eq!(a.version, b.version);
}

/// Scenario 6: a corrupted payload with an intact stored checksum is
/// reported as a checksum mismatch rather than silently accepted, and the
/// failure is counted.
#[test]
fn corrupted_payload_is_caught_under_enforced_checksum() -> DataHubResult<()> {
    let name = unique_name("checksum");
    let mut producer = ProducerHandle::<Wide>::create(&name, config(ChecksumPolicy::Enforced))?;
    let secret = producer.shared_secret();
    let mut consumer = ConsumerHandle::<Wide>::attach(&name, secret, Duration::from_millis(100))?;

    {
        let mut txn = producer.begin_write(Duration::from_millis(100)).unwrap();
        txn.write_value(&Wide { seq: 1, buf: [0xAB; 256] });
        txn.commit()?;
    }

    // An external tool clobbering payload bytes after commit, leaving the
    // stored checksum untouched. Simulated via a second raw attach onto the
    // same backing file rather than through the typed producer API.
    {
        let mut raw = datahub::Segment::attach(&name, Duration::from_millis(100))?;
        raw.slot_data_mut(0)[0] ^= 0xFF;
    }

    let read = consumer.next(Duration::from_millis(100)).unwrap();
    let err = read.bytes().unwrap_err();
    assert_eq!(err, datahub::SlotError::ChecksumMismatch);
    assert_eq!(producer.metrics().checksum_failures, 1);

    drop(read);
    drop(consumer);
    producer.destroy()?;
    Ok(())
}
