//! Segment layout: header, flex zone, slot-control array, slot-checksum
//! array, and ring-buffer payload region, mapped as one contiguous
//! `/dev/shm` file (spec §4.2, §6.1).
//!
//! ```text
//! [ header (4096) | flex zone | slot-state array | slot-checksum array | ring data ]
//! ```

use crate::config::{BlockPolicy, ChecksumPolicy, ConsumerSyncPolicy, DataBlockConfig, PhysicalPageSize};
use crate::error::{DataHubError, DataHubResult};
use crate::header::{self, SegmentHeader, HEADER_SIZE};
use crate::platform::{self, LinuxMemoryConfig};
use crate::slot::SlotControl;
use memmap2::MmapMut;
use std::sync::atomic::Ordering;

/// Directory backing all segment files, mirroring
/// `evo_shared_memory::writer`'s use of `/dev/shm` directly rather than a
/// configurable prefix.
const SHM_DIR: &str = "/dev/shm";

fn segment_path(name: &str) -> String {
    format!("{SHM_DIR}/datahub_{name}")
}

/// A mapped segment: header plus the three variable-length regions that
/// follow it.
pub struct Segment {
    name: String,
    mmap: MmapMut,
    flex_zone_size: usize,
    ring_buffer_capacity: usize,
    logical_unit_size: usize,
    slot_state_offset: usize,
    slot_checksum_offset: usize,
    ring_data_offset: usize,
}

impl Segment {
    /// Total mapped size for a given layout, not yet page-rounded.
    fn compute_total_size(cfg: &DataBlockConfig) -> usize {
        HEADER_SIZE
            + cfg.flex_zone_size as usize
            + cfg.ring_buffer_capacity as usize * header::SLOT_STATE_STRIDE
            + cfg.ring_buffer_capacity as usize * header::SLOT_CHECKSUM_STRIDE
            + cfg.ring_buffer_capacity as usize * cfg.logical_unit_size as usize
    }

    /// Create a brand new segment, initializing its header and regions.
    /// Fails with [`DataHubError::AlreadyExists`] if the backing file is
    /// already present, matching `SegmentWriter::create`'s exclusive-create
    /// discipline.
    pub fn create(
        name: &str,
        cfg: &DataBlockConfig,
        flex_hash: [u8; 32],
        data_hash: [u8; 32],
        schema_version: u32,
    ) -> DataHubResult<Self> {
        cfg.validate()?;

        let path = segment_path(name);
        if std::path::Path::new(&path).exists() {
            return Err(DataHubError::AlreadyExists { name: name.into() });
        }

        let total_size = Self::compute_total_size(cfg);
        let mmap = platform::create_segment_mmap(&path, total_size, &LinuxMemoryConfig::default())
            .map_err(|e| {
                let _ = platform::unlink_segment(&path);
                e
            })?;

        let mut segment = Self::from_parts(name.to_string(), mmap, cfg);
        segment.init_header(cfg, flex_hash, data_hash, schema_version);
        Ok(segment)
    }

    /// Attach to an existing, fully-initialized segment. Retries briefly if
    /// the header is still `UNINIT` (spec §8.4.6: a consumer racing
    /// producer startup should wait, not fail).
    pub fn attach(name: &str, attach_timeout: std::time::Duration) -> DataHubResult<Self> {
        let path = segment_path(name);
        let deadline = std::time::Instant::now() + attach_timeout;

        loop {
            match platform::attach_segment_mmap(&path) {
                Ok(mmap) => {
                    let peek = unsafe { &*(mmap.as_ptr() as *const SegmentHeader) };
                    if peek.magic != header::MAGIC {
                        return Err(DataHubError::IdentityMismatch {
                            name: name.into(),
                            reason: "magic mismatch".into(),
                        });
                    }
                    match peek.init_state.load(Ordering::Acquire) {
                        header::init_state::READY => {
                            let cfg = Self::read_layout_as_config(peek);
                            return Ok(Self::from_parts(name.to_string(), mmap, &cfg));
                        }
                        header::init_state::CLOSING => {
                            return Err(DataHubError::NotFound { name: name.into() })
                        }
                        _ => {
                            if std::time::Instant::now() >= deadline {
                                return Err(DataHubError::InitTimeout { name: name.into() });
                            }
                            std::thread::sleep(std::time::Duration::from_millis(1));
                        }
                    }
                }
                Err(DataHubError::Io { source }) if source.kind() == std::io::ErrorKind::NotFound => {
                    if std::time::Instant::now() >= deadline {
                        return Err(DataHubError::NotFound { name: name.into() });
                    }
                    std::thread::sleep(std::time::Duration::from_millis(1));
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn read_layout_as_config(h: &SegmentHeader) -> DataBlockConfig {
        let page = match h.physical_page_size {
            n if n == PhysicalPageSize::Page4Ki.bytes() => PhysicalPageSize::Page4Ki,
            n if n == PhysicalPageSize::Page4Mi.bytes() => PhysicalPageSize::Page4Mi,
            _ => PhysicalPageSize::Page16Mi,
        };
        DataBlockConfig {
            physical_page_size: page,
            logical_unit_size: h.logical_unit_size,
            ring_buffer_capacity: h.ring_buffer_capacity,
            flex_zone_size: h.flex_zone_size,
            policy: BlockPolicy::RingBuffer,
            consumer_sync_policy: match h.consumer_sync_policy {
                0 => ConsumerSyncPolicy::LatestOnly,
                1 => ConsumerSyncPolicy::SingleReader,
                _ => ConsumerSyncPolicy::SyncReader,
            },
            checksum_policy: match h.checksum_policy {
                0 => ChecksumPolicy::None,
                1 => ChecksumPolicy::Enforced,
                _ => ChecksumPolicy::Manual,
            },
        }
    }

    fn from_parts(name: String, mmap: MmapMut, cfg: &DataBlockConfig) -> Self {
        let ring_capacity = cfg.ring_buffer_capacity as usize;
        let slot_state_offset = HEADER_SIZE + cfg.flex_zone_size as usize;
        let slot_checksum_offset = slot_state_offset + ring_capacity * header::SLOT_STATE_STRIDE;
        let ring_data_offset = slot_checksum_offset + ring_capacity * header::SLOT_CHECKSUM_STRIDE;

        Self {
            name,
            mmap,
            flex_zone_size: cfg.flex_zone_size as usize,
            ring_buffer_capacity: ring_capacity,
            logical_unit_size: cfg.logical_unit_size as usize,
            slot_state_offset,
            slot_checksum_offset,
            ring_data_offset,
        }
    }

    fn init_header(
        &mut self,
        cfg: &DataBlockConfig,
        flex_hash: [u8; 32],
        data_hash: [u8; 32],
        schema_version: u32,
    ) {
        let ring_buffer_offset = self.ring_data_offset as u64;
        let slot_state_offset = self.slot_state_offset;
        let ring_buffer_capacity = self.ring_buffer_capacity;

        // Initialize the slot-control array first, via a raw pointer into
        // the mapping rather than through `self`, so this loop doesn't
        // overlap the mutable header borrow taken below.
        let slot_base = unsafe { self.mmap.as_mut_ptr().add(slot_state_offset) as *mut SlotControl };
        for i in 0..ring_buffer_capacity {
            unsafe { std::ptr::write(slot_base.add(i), SlotControl::new()) };
        }

        let h = self.header_mut();
        h.magic = header::MAGIC;
        h.format_version = 1;
        h.header_size = HEADER_SIZE as u32;
        h.shared_secret = random_secret();
        h.init_state = std::sync::atomic::AtomicU32::new(header::init_state::UNINIT);

        h.flex_zone_schema_hash = flex_hash;
        h.data_block_schema_hash = data_hash;
        h.schema_version = schema_version;

        h.flex_zone_size = cfg.flex_zone_size;
        h.ring_buffer_capacity = cfg.ring_buffer_capacity;
        h.logical_unit_size = cfg.logical_unit_size;
        h.physical_page_size = cfg.physical_page_size.bytes();
        h.policy = match cfg.policy {
            BlockPolicy::RingBuffer => 0,
        };
        h.consumer_sync_policy = match cfg.consumer_sync_policy {
            ConsumerSyncPolicy::LatestOnly => 0,
            ConsumerSyncPolicy::SingleReader => 1,
            ConsumerSyncPolicy::SyncReader => 2,
        };
        h.checksum_policy = match cfg.checksum_policy {
            ChecksumPolicy::None => 0,
            ChecksumPolicy::Enforced => 1,
            ChecksumPolicy::Manual => 2,
        };

        h.flex_zone_offset = HEADER_SIZE as u64;
        h.ring_buffer_offset = ring_buffer_offset;

        h.producer_pid.store(platform::get_current_pid(), Ordering::Release);

        // Compute and store the full-header checksum now that every
        // layout-describing field has its final value (spec §4.2 step 5).
        h.store_layout_checksum();

        // Release fence so every initialized field above is visible to any
        // consumer that observes READY via acquire on `init_state`.
        h.init_state.store(header::init_state::READY, Ordering::Release);
    }

    /// Immutable header view.
    pub fn header(&self) -> &SegmentHeader {
        unsafe { &*(self.mmap.as_ptr() as *const SegmentHeader) }
    }

    fn header_mut(&mut self) -> &mut SegmentHeader {
        unsafe { &mut *(self.mmap.as_mut_ptr() as *mut SegmentHeader) }
    }

    /// The segment's registered name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The shared secret a consumer must present to attach (spec §4.8).
    pub fn shared_secret(&self) -> u64 {
        self.header().shared_secret
    }

    /// Ring buffer capacity (number of logically addressed slots).
    pub fn ring_buffer_capacity(&self) -> usize {
        self.ring_buffer_capacity
    }

    /// Flex-zone bytes, if any were configured.
    pub fn flex_zone(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.mmap.as_ptr().add(HEADER_SIZE), self.flex_zone_size) }
    }

    /// Mutable flex-zone bytes; only the producer should write here.
    pub fn flex_zone_mut(&mut self) -> &mut [u8] {
        unsafe {
            std::slice::from_raw_parts_mut(self.mmap.as_mut_ptr().add(HEADER_SIZE), self.flex_zone_size)
        }
    }

    fn slot_controls(&self) -> &[SlotControl] {
        unsafe {
            std::slice::from_raw_parts(
                self.mmap.as_ptr().add(self.slot_state_offset) as *const SlotControl,
                self.ring_buffer_capacity,
            )
        }
    }

    /// Control block for one ring slot.
    pub fn slot(&self, index: usize) -> &SlotControl {
        &self.slot_controls()[index]
    }

    /// Raw checksum bytes for one ring slot: a validity byte followed by a
    /// 32-byte BLAKE2b-256 digest (spec §4.4.1).
    pub fn slot_checksum(&self, index: usize) -> &[u8] {
        let offset = self.slot_checksum_offset + index * header::SLOT_CHECKSUM_STRIDE;
        unsafe {
            std::slice::from_raw_parts(
                self.mmap.as_ptr().add(offset),
                header::SLOT_CHECKSUM_STRIDE,
            )
        }
    }

    /// Mutable checksum bytes for one ring slot.
    pub fn slot_checksum_mut(&mut self, index: usize) -> &mut [u8] {
        let offset = self.slot_checksum_offset + index * header::SLOT_CHECKSUM_STRIDE;
        unsafe {
            std::slice::from_raw_parts_mut(
                self.mmap.as_mut_ptr().add(offset),
                header::SLOT_CHECKSUM_STRIDE,
            )
        }
    }

    /// Payload bytes for one ring slot.
    pub fn slot_data(&self, index: usize) -> &[u8] {
        let offset = self.ring_data_offset + index * self.logical_unit_size;
        unsafe { std::slice::from_raw_parts(self.mmap.as_ptr().add(offset), self.logical_unit_size) }
    }

    /// Mutable payload bytes for one ring slot; only the current writer of
    /// that slot should touch this.
    pub fn slot_data_mut(&mut self, index: usize) -> &mut [u8] {
        let offset = self.ring_data_offset + index * self.logical_unit_size;
        unsafe {
            std::slice::from_raw_parts_mut(self.mmap.as_mut_ptr().add(offset), self.logical_unit_size)
        }
    }

    /// Begin teardown: flips `init_state` to `CLOSING` so new attachers see
    /// `NotFound` instead of racing the unlink, then removes the backing
    /// file. Existing attachers keep their mapping valid until they drop it
    /// (spec §4.2's header lifecycle).
    pub fn destroy(mut self) -> DataHubResult<()> {
        self.header_mut()
            .init_state
            .store(header::init_state::CLOSING, Ordering::Release);
        platform::unlink_segment(&segment_path(&self.name))
    }
}

fn random_secret() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    RandomState::new().build_hasher().finish()
}
