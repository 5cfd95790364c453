//! Concurrent multi-consumer access under Sync_reader and producer
//! write-pressure contention.

use criterion::{criterion_group, criterion_main, Criterion};
use datahub::config::{BlockPolicy, ChecksumPolicy, ConsumerSyncPolicy, DataBlockConfig, PhysicalPageSize};
use datahub::{ConsumerHandle, DataBlockSchema, ProducerHandle};
use std::hint::black_box;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[derive(Clone, Copy)]
#[repr(C)]
struct Payload {
    seq: u64,
    buf: [u8; 504],
}

unsafe impl DataBlockSchema for Payload {
    fn blds() -> datahub::Blds {
        datahub::Blds::builder()
            .field("seq", "u64")
            .field("buf", "u8[504]")
    }
    fn schema_version() -> (u16, u16, u16) {
        (1, 0, 0)
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

/// Ten consumers attached under Sync_reader, each draining the same
/// commit stream concurrently.
fn bench_concurrent_sync_readers(c: &mut Criterion) {
    let name = format!("bench_concurrent_readers_{}", std::process::id());
    let mut producer = ProducerHandle::<Payload>::create(&name, config(ConsumerSyncPolicy::SyncReader, 64)).unwrap();
    let secret = producer.shared_secret();

    for seq in 0..100u64 {
        let mut txn = producer.begin_write(Duration::from_millis(50)).unwrap();
        txn.write_value(&Payload { seq, buf: [0xAA; 504] });
        txn.commit().unwrap();
    }

    c.bench_function("concurrent_10_sync_readers", |b| {
        b.iter(|| {
            let barrier = Arc::new(Barrier::new(11));
            let name = name.clone();
            let handles: Vec<_> = (0..10)
                .map(|_| {
                    let barrier = barrier.clone();
                    let name = name.clone();
                    thread::spawn(move || {
                        let mut consumer =
                            ConsumerHandle::<Payload>::attach(&name, secret, Duration::from_millis(100))
                                .unwrap();
                        barrier.wait();
                        while let Ok(read) = consumer.next(Duration::from_millis(20)) {
                            black_box(read.value().unwrap());
                        }
                    })
                })
                .collect();

            barrier.wait();
            for handle in handles {
                handle.join().unwrap();
            }
        });
    });

    producer.destroy().unwrap();
}

/// A producer writing continuously under Sync_reader contention with one
/// reader draining concurrently, measuring writer stall behavior.
fn bench_writer_reader_contention(c: &mut Criterion) {
    use rand::Rng;
    let mut rng = rand::thread_rng();

    c.bench_function("writer_under_reader_pressure", |b| {
        b.iter(|| {
            let name = format!(
                "bench_contention_{}_{}",
                std::process::id(),
                rng.gen::<u32>(),
            );
            let barrier_created = Arc::new(Barrier::new(2));
            let barrier_start = Arc::new(Barrier::new(2));
            let shared_secret = Arc::new(std::sync::atomic::AtomicU64::new(0));

            let bc_writer = barrier_created.clone();
            let bs_writer = barrier_start.clone();
            let bc_reader = barrier_created.clone();
            let bs_reader = barrier_start.clone();
            let secret_writer = shared_secret.clone();
            let secret_reader = shared_secret.clone();

            let writer_name = name.clone();
            let writer_handle = thread::spawn(move || {
                let mut producer = ProducerHandle::<Payload>::create(
                    &writer_name,
                    config(ConsumerSyncPolicy::SyncReader, 8),
                )
                .unwrap();
                secret_writer.store(producer.shared_secret(), std::sync::atomic::Ordering::Release);
                bc_writer.wait();
                bs_writer.wait();

                for seq in 0..50u64 {
                    if let Ok(mut txn) = producer.begin_write(Duration::from_millis(50)) {
                        txn.write_value(&Payload { seq, buf: [0xAA; 504] });
                        black_box(txn.commit().unwrap());
                    }
                    thread::yield_now();
                }
                producer.destroy().unwrap();
            });

            let reader_name = name.clone();
            let reader_handle = thread::spawn(move || {
                bc_reader.wait();
                let secret = secret_reader.load(std::sync::atomic::Ordering::Acquire);
                let mut consumer = loop {
                    match ConsumerHandle::<Payload>::attach(&reader_name, secret, Duration::from_millis(10)) {
                        Ok(c) => break c,
                        Err(_) => thread::yield_now(),
                    }
                };
                bs_reader.wait();

                for _ in 0..100 {
                    if let Ok(read) = consumer.next(Duration::from_millis(50)) {
                        black_box(read.value().unwrap());
                    }
                    thread::yield_now();
                }
            });

            writer_handle.join().unwrap();
            reader_handle.join().unwrap();
        });
    });
}

criterion_group!(benches, bench_concurrent_sync_readers, bench_writer_reader_contention);
criterion_main!(benches);
