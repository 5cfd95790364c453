//! Consumer handle and read transactions (spec §4.8), generalizing
//! `evo_shared_memory::reader::SegmentReader`'s optimistic-read retry loop
//! to the per-slot state machine and the three sync policies.

use crate::blake2_slot_hash;
use crate::config::{ChecksumPolicy, ConsumerSyncPolicy};
use crate::error::{DataHubError, DataHubResult, SchemaRegion};
use crate::header::HEADER_SIZE;
use crate::heartbeat;
use crate::schema::DataBlockSchema;
use crate::segment::Segment;
use crate::slot::SlotError;
use std::marker::PhantomData;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

/// Maximum times a torn read is retried before giving up (spec §4.3,
/// mirroring `SegmentReader::read_range`'s retry bound).
const MAX_READ_RETRIES: u32 = 10;

/// One attached consumer. Multiple consumers may attach to the same
/// segment concurrently; each gets its own heartbeat-table slot and, under
/// `SyncReader`, its own cursor.
pub struct ConsumerHandle<T: DataBlockSchema> {
    segment: Segment,
    sync_policy: ConsumerSyncPolicy,
    checksum_policy: ChecksumPolicy,
    heartbeat_slot: usize,
    cursor: u64,
    _payload: PhantomData<T>,
}

impl<T: DataBlockSchema> ConsumerHandle<T> {
    /// Attach to an existing segment, verifying identity and schema before
    /// registering a heartbeat-table entry (spec §4.2 attach step 4-5,
    /// §4.7, §4.8, §8.4.4). `expected_secret` must match the value returned
    /// by the producer's `ProducerHandle::shared_secret`.
    pub fn attach(name: &str, expected_secret: u64, attach_timeout: Duration) -> DataHubResult<Self> {
        let segment = Segment::attach(name, attach_timeout)?;
        let header = segment.header();

        if header.format_version < crate::header::MIN_SUPPORTED_FORMAT_VERSION
            || header.format_version > crate::header::MAX_SUPPORTED_FORMAT_VERSION
        {
            return Err(DataHubError::IdentityMismatch {
                name: name.to_string(),
                reason: format!("unsupported format version {}", header.format_version),
            });
        }
        if header.shared_secret != expected_secret {
            return Err(DataHubError::IdentityMismatch {
                name: name.to_string(),
                reason: "shared secret mismatch".into(),
            });
        }
        if !header.layout_checksum_valid() {
            return Err(DataHubError::HeaderCorrupt { name: name.to_string() });
        }

        // This crate doesn't yet expose a typed flex-zone schema, so the
        // only valid fingerprint for "no flex zone" is all-zero.
        if header.flex_zone_schema_hash != [0u8; 32] {
            return Err(DataHubError::SchemaMismatch {
                name: name.to_string(),
                which: SchemaRegion::FlexZone,
            });
        }

        let expected = T::schema_info();
        if header.data_block_schema_hash != expected.hash {
            header.metrics.schema_mismatch_count.fetch_add(1, Ordering::Relaxed);
            return Err(DataHubError::SchemaMismatch {
                name: name.to_string(),
                which: SchemaRegion::DataBlock,
            });
        }

        let sync_policy = match header.consumer_sync_policy {
            0 => ConsumerSyncPolicy::LatestOnly,
            1 => ConsumerSyncPolicy::SingleReader,
            _ => ConsumerSyncPolicy::SyncReader,
        };
        let checksum_policy = match header.checksum_policy {
            0 => ChecksumPolicy::None,
            1 => ChecksumPolicy::Enforced,
            _ => ChecksumPolicy::Manual,
        };

        let start_cursor = header.commit_index.load(Ordering::Acquire);
        let heartbeat_slot = heartbeat::register_consumer(
            name,
            &header.consumer_heartbeats,
            crate::platform::get_current_pid(),
            start_cursor,
        )?;

        Ok(Self {
            segment,
            sync_policy,
            checksum_policy,
            heartbeat_slot,
            cursor: start_cursor,
            _payload: PhantomData,
        })
    }

    /// Segment name.
    pub fn name(&self) -> &str {
        self.segment.name()
    }

    /// Current metrics counters for this segment (spec §6.4).
    pub fn metrics(&self) -> crate::metrics::MetricsSnapshot {
        crate::metrics::snapshot(&self.segment)
    }

    /// Flex-zone bytes, if the segment has one.
    pub fn flex_zone(&self) -> &[u8] {
        self.segment.flex_zone()
    }

    /// Wait for and read the next slot according to this consumer's sync
    /// policy: `LatestOnly` jumps straight to the most recent commit
    /// (possibly skipping slots), `SingleReader`/`SyncReader` advance the
    /// cursor one slot at a time.
    pub fn next(&mut self, timeout: Duration) -> Result<ReadTransaction<'_, T>, SlotError> {
        let deadline = Instant::now() + timeout;
        let capacity = self.segment.ring_buffer_capacity() as u64;

        loop {
            let committed = self.segment.header().commit_index.load(Ordering::Acquire);

            let target = match self.sync_policy {
                ConsumerSyncPolicy::LatestOnly => {
                    if committed == 0 {
                        None
                    } else {
                        Some(committed - 1)
                    }
                }
                ConsumerSyncPolicy::SingleReader | ConsumerSyncPolicy::SyncReader => {
                    if self.cursor < committed {
                        Some(self.cursor)
                    } else {
                        None
                    }
                }
            };

            if let Some(ring_index) = target {
                let slot_index = (ring_index % capacity) as usize;
                let slot = self.segment.slot(slot_index);

                match slot.begin_read(self.sync_policy) {
                    Ok(generation) => {
                        self.cursor = ring_index + 1;
                        heartbeat::beat_consumer(
                            &self.segment.header().consumer_heartbeats,
                            self.heartbeat_slot,
                            self.cursor,
                        );
                        return Ok(ReadTransaction {
                            consumer: self,
                            slot_index,
                            ring_index,
                            generation,
                            finished: false,
                        });
                    }
                    Err(_) => {
                        // Lost a race with an overwrite (Latest_only) or a
                        // peer reader transitioning the slot; retry.
                    }
                }
            }

            if Instant::now() >= deadline {
                return Err(SlotError::ReaderTimeout);
            }
            std::thread::yield_now();
        }
    }

    /// Refresh this consumer's heartbeat without reading, for an idle
    /// consumer that still wants to be counted as live.
    pub fn heartbeat(&self) {
        heartbeat::beat_consumer(
            &self.segment.header().consumer_heartbeats,
            self.heartbeat_slot,
            self.cursor,
        );
    }
}

impl<T: DataBlockSchema> Drop for ConsumerHandle<T> {
    fn drop(&mut self) {
        heartbeat::deregister_consumer(&self.segment.header().consumer_heartbeats, self.heartbeat_slot);
    }
}

/// One in-progress read of a committed slot. The payload is only valid
/// while held; [`Self::bytes`] re-checks `write_generation` and returns
/// [`SlotError::Torn`] if the producer overwrote the slot mid-read
/// (spec §4.3's optimistic-read discipline, reused per slot).
pub struct ReadTransaction<'c, T: DataBlockSchema> {
    consumer: &'c mut ConsumerHandle<T>,
    slot_index: usize,
    ring_index: u64,
    generation: u64,
    finished: bool,
}

impl<'c, T: DataBlockSchema> ReadTransaction<'c, T> {
    /// Monotonic ring index this transaction read.
    pub fn ring_index(&self) -> u64 {
        self.ring_index
    }

    /// Raw payload bytes, retrying internally up to
    /// [`MAX_READ_RETRIES`] if the producer wraps around mid-read. Under
    /// `ChecksumPolicy::Enforced`, also verifies the stored digest against
    /// the payload and reports `ChecksumMismatch` rather than bytes an
    /// external tool clobbered after commit (spec §8.4.6).
    pub fn bytes(&self) -> Result<&[u8], SlotError> {
        let slot = self.consumer.segment.slot(self.slot_index);
        for _ in 0..MAX_READ_RETRIES {
            if slot.is_read_consistent(self.generation) {
                let bytes = self.consumer.segment.slot_data(self.slot_index);
                if self.consumer.checksum_policy == ChecksumPolicy::Enforced {
                    let stored = self.consumer.segment.slot_checksum(self.slot_index);
                    if stored[0] != 0 {
                        let recomputed = blake2_slot_hash(bytes);
                        if &stored[1..33] != recomputed.as_slice() {
                            self.consumer
                                .segment
                                .header()
                                .metrics
                                .checksum_failures
                                .fetch_add(1, Ordering::Relaxed);
                            return Err(SlotError::ChecksumMismatch);
                        }
                    }
                }
                return Ok(bytes);
            }
            std::thread::yield_now();
        }
        Err(SlotError::Torn)
    }

    /// Interpret the payload as `T`, a bytewise copy out of shared memory.
    pub fn value(&self) -> Result<T, SlotError> {
        let bytes = self.bytes()?;
        debug_assert!(bytes.len() >= std::mem::size_of::<T>());
        Ok(unsafe { std::ptr::read_unaligned(bytes.as_ptr() as *const T) })
    }

    /// Release the read. Equivalent to dropping, but lets callers observe
    /// the exact moment a slot becomes reusable by the producer.
    pub fn release(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.consumer.segment.slot(self.slot_index).end_read();
        }
    }
}

impl<T: DataBlockSchema> Drop for ReadTransaction<'_, T> {
    fn drop(&mut self) {
        self.finish();
    }
}

const _: () = assert!(HEADER_SIZE > 0);
