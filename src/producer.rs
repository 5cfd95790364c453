//! Producer handle and write transactions (spec §4.8), generalizing
//! `evo_shared_memory::writer::SegmentWriter`'s single-writer discipline to
//! the ring-buffer slot protocol.

use crate::blake2_slot_hash;
use crate::config::{ChecksumPolicy, ConsumerSyncPolicy, DataBlockConfig};
use crate::error::{DataHubError, DataHubResult};
use crate::heartbeat;
use crate::schema::DataBlockSchema;
use crate::segment::Segment;
use crate::slot::SlotError;
use std::marker::PhantomData;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

/// The exclusive producer side of a segment. One process may hold this at
/// a time; creating a segment that already exists fails with
/// [`DataHubError::AlreadyExists`].
pub struct ProducerHandle<T: DataBlockSchema> {
    segment: Segment,
    cfg: DataBlockConfig,
    next_slot_hint: u64,
    _payload: PhantomData<T>,
}

impl<T: DataBlockSchema> ProducerHandle<T> {
    /// Create a brand new segment and become its producer.
    pub fn create(name: &str, cfg: DataBlockConfig) -> DataHubResult<Self> {
        cfg.validate()?;
        let schema = T::schema_info();
        let segment = Segment::create(name, &cfg, [0u8; 32], schema.hash, schema.version)?;
        heartbeat::beat_producer(
            &segment.header().producer_pid,
            crate::platform::get_current_pid(),
            &segment.header().producer_last_heartbeat_ns,
        );
        Ok(Self {
            segment,
            cfg,
            next_slot_hint: 0,
            _payload: PhantomData,
        })
    }

    /// Segment name.
    pub fn name(&self) -> &str {
        self.segment.name()
    }

    /// The shared secret consumers must present to [`crate::ConsumerHandle::attach`]
    /// (spec §4.8).
    pub fn shared_secret(&self) -> u64 {
        self.segment.shared_secret()
    }

    /// Current metrics counters for this segment (spec §6.4).
    pub fn metrics(&self) -> crate::metrics::MetricsSnapshot {
        crate::metrics::snapshot(&self.segment)
    }

    /// Tear the segment down: flips the header to `CLOSING` and unlinks the
    /// backing file (spec §4.2's header lifecycle).
    pub fn destroy(self) -> DataHubResult<()> {
        self.segment.destroy()
    }

    /// Refresh the producer's liveness heartbeat (spec §4.6). Callers on a
    /// tight write loop can rely on `begin_write` to do this implicitly;
    /// an idle producer should call this periodically on its own.
    pub fn heartbeat(&self) {
        heartbeat::beat_producer(
            &self.segment.header().producer_pid,
            crate::platform::get_current_pid(),
            &self.segment.header().producer_last_heartbeat_ns,
        );
    }

    /// Write the flex zone, if the segment was configured with one.
    /// Checksum handling follows `checksum_policy`: under `Enforced` the
    /// hash is recomputed here; under `Manual` the caller is responsible.
    pub fn publish_flex_zone(&mut self, bytes: &[u8]) -> DataHubResult<()> {
        if bytes.len() != self.segment.flex_zone().len() {
            return Err(DataHubError::InvalidLayout {
                reason: format!(
                    "flex zone is {} bytes, got {}",
                    self.segment.flex_zone().len(),
                    bytes.len()
                ),
            });
        }
        self.segment.flex_zone_mut().copy_from_slice(bytes);
        Ok(())
    }

    /// Acquire the next slot to write into, waiting up to `timeout` for one
    /// to become available. Under `SyncReader`, also waits for the slowest
    /// live consumer to have moved past the slot being reclaimed.
    pub fn begin_write(&mut self, timeout: Duration) -> Result<WriteTransaction<'_, T>, SlotError> {
        self.heartbeat();
        let deadline = Instant::now() + timeout;
        let capacity = self.segment.ring_buffer_capacity() as u64;

        loop {
            let slot_index = (self.next_slot_hint % capacity) as usize;
            let slot = self.segment.slot(slot_index);

            match slot.state() {
                crate::slot::SlotState::Free => {
                    slot.begin_write()?;
                    let index = self.next_slot_hint;
                    self.next_slot_hint += 1;
                    return Ok(WriteTransaction {
                        producer: self,
                        slot_index,
                        ring_index: index,
                        finished: false,
                    });
                }
                crate::slot::SlotState::Committed | crate::slot::SlotState::Reading => {
                    match self.cfg.consumer_sync_policy {
                        ConsumerSyncPolicy::LatestOnly => {
                            if slot.request_overwrite() {
                                continue;
                            }
                        }
                        ConsumerSyncPolicy::SingleReader | ConsumerSyncPolicy::SyncReader => {
                            if self.reader_has_cleared(slot_index) {
                                continue;
                            }
                        }
                    }
                }
                _ => {}
            }

            if Instant::now() >= deadline {
                self.segment
                    .header()
                    .metrics
                    .writer_timeout_count
                    .fetch_add(1, Ordering::Relaxed);
                return Err(SlotError::WriterTimeout);
            }
            std::thread::yield_now();
        }
    }

    fn reader_has_cleared(&self, slot_index: usize) -> bool {
        let slowest = heartbeat::slowest_live_consumer_slot(&self.segment.header().consumer_heartbeats);
        match slowest {
            Some(slowest_slot) => slowest_slot > slot_index as u64,
            None => true,
        }
    }
}

/// An in-progress write into one slot. Drop without calling [`Self::commit`]
/// aborts the write, returning the slot to `Free` (spec §4.4's writer-crash
/// safety: a half-written slot must never look committed).
pub struct WriteTransaction<'p, T: DataBlockSchema> {
    producer: &'p mut ProducerHandle<T>,
    slot_index: usize,
    ring_index: u64,
    finished: bool,
}

impl<'p, T: DataBlockSchema> WriteTransaction<'p, T> {
    /// Monotonic ring index this transaction is writing, useful for
    /// diagnostics and for consumers correlating against heartbeat cursors.
    pub fn ring_index(&self) -> u64 {
        self.ring_index
    }

    /// Raw payload bytes to write into.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.producer.segment.slot_data_mut(self.slot_index)
    }

    /// Write a payload value directly, bypassing manual byte copying.
    pub fn write_value(&mut self, value: &T) {
        let bytes = self.bytes_mut();
        let src = unsafe {
            std::slice::from_raw_parts(value as *const T as *const u8, std::mem::size_of::<T>())
        };
        bytes[..src.len()].copy_from_slice(src);
    }

    /// Commit the write, making it visible to consumers. Under
    /// `ChecksumPolicy::Enforced` the payload digest is recomputed and
    /// stored before the slot is published, so any consumer reading under
    /// the same policy can detect external corruption (spec §4.4.1,
    /// §8.4.6).
    pub fn commit(mut self) -> DataHubResult<()> {
        self.finished = true;
        if self.producer.cfg.checksum_policy == ChecksumPolicy::Enforced {
            let digest = blake2_slot_hash(self.producer.segment.slot_data(self.slot_index));
            let stored = self.producer.segment.slot_checksum_mut(self.slot_index);
            stored[0] = 1;
            stored[1..33].copy_from_slice(&digest);
        }
        let slot = self.producer.segment.slot(self.slot_index);
        slot.publish().map_err(|e| DataHubError::Operational {
            name: self.producer.segment.name().to_string(),
            reason: format!("publish failed: {e:?}"),
        })?;
        self.producer
            .segment
            .header()
            .commit_index
            .fetch_add(1, Ordering::Release);
        Ok(())
    }

    /// Explicitly abort, equivalent to dropping without committing.
    pub fn abort(mut self) {
        self.finished = true;
        let _ = self.producer.segment.slot(self.slot_index).abort_write();
    }
}

impl<T: DataBlockSchema> Drop for WriteTransaction<'_, T> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.producer.segment.slot(self.slot_index).abort_write();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BlockPolicy, ChecksumPolicy, PhysicalPageSize};

    #[derive(Clone, Copy)]
    #[repr(C)]
    struct Tick {
        seq: u64,
    }

    unsafe impl DataBlockSchema for Tick {
        fn blds() -> crate::schema::Blds {
            crate::schema::Blds::builder().field("seq", "u64")
        }
        fn schema_version() -> (u16, u16, u16) {
            (1, 0, 0)
        }
    }

    fn test_config() -> DataBlockConfig {
        DataBlockConfig {
            physical_page_size: PhysicalPageSize::Page4Ki,
            logical_unit_size: 4096,
            ring_buffer_capacity: 2,
            flex_zone_size: 0,
            policy: BlockPolicy::RingBuffer,
            consumer_sync_policy: ConsumerSyncPolicy::LatestOnly,
            checksum_policy: ChecksumPolicy::None,
        }
    }

    #[test]
    fn create_and_write_commit() -> DataHubResult<()> {
        let name = format!("prod_test_{}", std::process::id());
        let mut producer = ProducerHandle::<Tick>::create(&name, test_config())?;
        let mut txn = producer
            .begin_write(Duration::from_millis(100))
            .expect("slot available");
        txn.write_value(&Tick { seq: 7 });
        txn.commit()?;

        assert_eq!(
            producer.segment.header().commit_index.load(Ordering::Acquire),
            1
        );
        producer.destroy()?;
        Ok(())
    }

    #[test]
    fn dropped_transaction_aborts() -> DataHubResult<()> {
        let name = format!("prod_abort_test_{}", std::process::id());
        let mut producer = ProducerHandle::<Tick>::create(&name, test_config())?;
        {
            let _txn = producer
                .begin_write(Duration::from_millis(100))
                .expect("slot available");
        }
        assert_eq!(producer.segment.slot(0).state(), crate::slot::SlotState::Free);
        producer.destroy()?;
        Ok(())
    }
}
