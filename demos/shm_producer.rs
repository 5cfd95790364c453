//! Minimal producer: creates a segment and writes one `Reading` per second
//! until interrupted.

use datahub::config::{BlockPolicy, ChecksumPolicy, ConsumerSyncPolicy, DataBlockConfig, PhysicalPageSize};
use datahub::{Blds, DataBlockSchema, ProducerHandle};
use std::time::Duration;

#[derive(Clone, Copy)]
#[repr(C)]
struct Reading {
    seq: u64,
    celsius_milli: i32,
}

unsafe impl DataBlockSchema for Reading {
    fn blds() -> Blds {
        Blds::builder().field("seq", "u64").field("celsius_milli", "i32")
    }
    fn schema_version() -> (u16, u16, u16) {
        (1, 0, 0)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    datahub::init_tracing();

    let cfg = DataBlockConfig {
        physical_page_size: PhysicalPageSize::Page4Ki,
        logical_unit_size: 4096,
        ring_buffer_capacity: 16,
        flex_zone_size: 0,
        policy: BlockPolicy::RingBuffer,
        consumer_sync_policy: ConsumerSyncPolicy::SyncReader,
        checksum_policy: ChecksumPolicy::Enforced,
    };

    let mut producer = ProducerHandle::<Reading>::create("sensor_demo", cfg)?;
    println!(
        "producer ready: {} (shared secret: {})",
        producer.name(),
        producer.shared_secret()
    );

    for seq in 0..20u64 {
        let mut txn = producer.begin_write(Duration::from_secs(5))?;
        txn.write_value(&Reading {
            seq,
            celsius_milli: 20_000 + (seq as i32 * 37) % 5000,
        });
        txn.commit()?;
        println!("wrote seq {seq}");
        std::thread::sleep(Duration::from_millis(200));
    }

    producer.destroy()?;
    Ok(())
}
