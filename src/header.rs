//! Segment control header: layout constants and the 4 KiB wire-format
//! struct mapped at offset 0 of every segment (spec §3.1, §4.2, §6.1).
//!
//! The header is a fixed-size, 64-byte-aligned block of atomics plus a
//! reserved tail. Every field that can be touched by more than one process
//! is an atomic; fields that are written once at creation and never again
//! (magic, layout descriptor) are plain integers protected by the
//! segment-management lock during that one write.

use crate::owner::OwnerState;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Magic value identifying a DataHub segment header.
pub const MAGIC: u64 = 0x4441_5448_5542_0001; // "DATHUB" + format rev

/// Oldest wire format an attaching consumer will accept.
pub const MIN_SUPPORTED_FORMAT_VERSION: u32 = 1;
/// Newest wire format an attaching consumer will accept.
pub const MAX_SUPPORTED_FORMAT_VERSION: u32 = 1;

/// Total size of [`SegmentHeader`] in bytes; also the offset at which the
/// flex zone begins.
pub const HEADER_SIZE: usize = 4096;

/// Bytes per consumer heartbeat table entry.
pub const HEARTBEAT_ENTRY_SIZE: usize = 64;

/// Fixed capacity of the consumer heartbeat table (spec §4.6: "a fixed,
/// modest table rather than an unbounded one").
pub const HEARTBEAT_CAPACITY: usize = 8;

/// Per-slot state-byte stride in the slot-state array (spec §4.4).
pub const SLOT_STATE_STRIDE: usize = 48;

/// Per-slot checksum stride in the slot-checksum array (spec §4.4.1).
pub const SLOT_CHECKSUM_STRIDE: usize = 33;

/// Header init-state values (spec §4.2's header lifecycle: a fresh mapping
/// starts `UNINIT`, the creator flips it to `READY` after the layout
/// descriptor and schema hashes are durably written).
pub mod init_state {
    /// The segment file exists but the header has not finished
    /// initialization; attaching consumers must wait or fail.
    pub const UNINIT: u32 = 0;
    /// The header is fully initialized and safe to read by any attacher.
    pub const READY: u32 = 1;
    /// The producer is tearing the segment down; attach attempts should
    /// fail with `NotFound` rather than racing the unlink.
    pub const CLOSING: u32 = 2;
}

/// One entry in the consumer heartbeat table (spec §4.6).
#[repr(C, align(64))]
pub struct ConsumerHeartbeatEntry {
    /// OS pid of the registered consumer, 0 if the slot is free.
    pub consumer_pid: AtomicU32,
    _pad0: u32,
    /// Monotonic nanosecond timestamp of the consumer's last heartbeat.
    pub last_heartbeat_ns: AtomicU64,
    /// Next ring slot this consumer intends to read (Sync_reader cursor).
    pub next_read_slot: AtomicU64,
    _reserved: [u8; 40],
}

impl ConsumerHeartbeatEntry {
    /// A zeroed, unregistered entry.
    pub const fn new() -> Self {
        Self {
            consumer_pid: AtomicU32::new(0),
            _pad0: 0,
            last_heartbeat_ns: AtomicU64::new(0),
            next_read_slot: AtomicU64::new(0),
            _reserved: [0; 40],
        }
    }
}

impl Default for ConsumerHeartbeatEntry {
    fn default() -> Self {
        Self::new()
    }
}

const _: () = assert!(std::mem::size_of::<ConsumerHeartbeatEntry>() == HEARTBEAT_ENTRY_SIZE);

/// Segment-wide metrics counters (spec §6.4: writer_timeout_count,
/// writer_reader_timeout_count, checksum_failures, schema_mismatch_count).
#[repr(C, align(32))]
pub struct HeaderMetrics {
    /// Times the producer gave up waiting for a free slot.
    pub writer_timeout_count: AtomicU64,
    /// Times the producer gave up waiting for a lagging reader under
    /// Sync_reader.
    pub writer_reader_timeout_count: AtomicU64,
    /// Checksum verification failures observed by any consumer.
    pub checksum_failures: AtomicU64,
    /// Schema identity mismatches observed at attach time.
    pub schema_mismatch_count: AtomicU64,
}

impl HeaderMetrics {
    const fn new() -> Self {
        Self {
            writer_timeout_count: AtomicU64::new(0),
            writer_reader_timeout_count: AtomicU64::new(0),
            checksum_failures: AtomicU64::new(0),
            schema_mismatch_count: AtomicU64::new(0),
        }
    }
}

/// The 4 KiB control header mapped at offset 0 of every segment.
///
/// Layout, in declaration order: identity, schema fingerprints, layout
/// descriptor, coordination indices, producer liveness, consumer heartbeat
/// table, metrics, region offsets, header checksum, reserved padding to
/// [`HEADER_SIZE`].
#[repr(C, align(64))]
pub struct SegmentHeader {
    // --- Identity (spec §3.1) ---
    /// Must equal [`MAGIC`] for a valid segment.
    pub magic: u64,
    /// Wire format revision; bumped on breaking header layout changes.
    pub format_version: u32,
    /// Size of this header in bytes; always [`HEADER_SIZE`] today, carried
    /// explicitly so a future format revision can grow it.
    pub header_size: u32,
    /// Random value chosen at creation and required of every attaching
    /// consumer (spec §4.2 step 4, §4.8); detects a consumer racing an
    /// unlink-then-recreate of the same segment name.
    pub shared_secret: u64,
    /// See [`init_state`].
    pub init_state: AtomicU32,
    _identity_pad: u32,

    // --- Schema identity (spec §4.7) ---
    /// BLAKE2b-256 of the flex-zone type's BLDS; all zero if no flex zone.
    pub flex_zone_schema_hash: [u8; 32],
    /// BLAKE2b-256 of the datablock payload type's BLDS.
    pub data_block_schema_hash: [u8; 32],
    /// Packed `(major, minor, patch)` of the datablock payload type.
    pub schema_version: u32,
    _schema_pad: u32,

    // --- Layout descriptor (spec §6.3), written once at creation ---
    /// Bytes reserved for the flex zone, 0 if unused.
    pub flex_zone_size: u64,
    /// Number of logically addressed ring slots.
    pub ring_buffer_capacity: u64,
    /// Per-slot payload size in bytes.
    pub logical_unit_size: u64,
    /// Physical page size the layout was computed against.
    pub physical_page_size: u64,
    /// [`crate::config::BlockPolicy`] discriminant.
    pub policy: u32,
    /// [`crate::config::ConsumerSyncPolicy`] discriminant.
    pub consumer_sync_policy: u32,
    /// [`crate::config::ChecksumPolicy`] discriminant.
    pub checksum_policy: u32,
    _layout_pad: u32,

    // --- Coordination indices (spec §4.3) ---
    /// Monotonic count of slots the producer has begun writing.
    pub write_index: AtomicU64,
    /// Monotonic count of slots fully committed and visible to consumers.
    pub commit_index: AtomicU64,
    /// Shared cursor under Single_reader; unused under other policies.
    pub read_index: AtomicU64,

    // --- Producer liveness (spec §4.6) ---
    /// OS pid of the current producer, 0 if none has ever attached.
    pub producer_pid: AtomicU32,
    _producer_pad: u32,
    /// Monotonic nanosecond timestamp of the producer's last heartbeat.
    pub producer_last_heartbeat_ns: AtomicU64,

    /// The segment-management lock, guarding header mutation outside the
    /// per-slot write path (e.g. consumer table registration).
    pub management_lock: OwnerState,

    /// Explicit padding to the 64-byte alignment `consumer_heartbeats`
    /// requires; without it the compiler inserts the same gap implicitly
    /// and `FIXED_FIELDS_SIZE` below would under-count the struct.
    _heartbeat_table_align_pad: [u8; 32],

    /// Consumer heartbeat table (spec §4.6): fixed capacity, CAS-registered.
    pub consumer_heartbeats: [ConsumerHeartbeatEntry; HEARTBEAT_CAPACITY],

    /// Segment-wide counters (spec §6.4).
    pub metrics: HeaderMetrics,

    /// Byte offset of the flex zone from the start of the segment.
    pub flex_zone_offset: u64,
    /// Byte offset of the ring buffer region from the start of the segment.
    pub ring_buffer_offset: u64,

    /// CRC32 over the layout-describing fields only (identity, schema
    /// fingerprints, layout descriptor, region offsets) — not the
    /// coordination indices, heartbeats, lock, or metrics, which mutate
    /// continuously during healthy operation. Spec §3.1/§7 treats a
    /// mismatch as `HeaderCorrupt`.
    pub header_checksum: AtomicU32,
    _checksum_pad: u32,

    _reserved: [u8; RESERVED_BYTES],
}

// Every summand here must correspond to an actual field (or explicit pad)
// in `SegmentHeader` above, in declaration order, including any padding
// the natural C layout would otherwise insert implicitly. When adding a
// field, re-derive this by hand: a field whose alignment exceeds the
// running offset's alignment forces a gap that must be accounted for
// explicitly, either by reordering or by an explicit `_pad` field.
const FIXED_FIELDS_SIZE: usize = 8 // magic
    + 4 + 4 // format_version, header_size
    + 8 // shared_secret
    + 4 + 4 // init_state, _identity_pad
    + 32 + 32 // schema hashes
    + 4 + 4 // schema_version, _schema_pad
    + 8 + 8 + 8 + 8 // layout descriptor u64s
    + 4 + 4 + 4 + 4 // layout descriptor u32s + pad
    + 8 + 8 + 8 // coordination indices
    + 4 + 4 // producer_pid, pad
    + 8 // producer_last_heartbeat_ns
    + 32 // management_lock (OwnerState)
    + 32 // _heartbeat_table_align_pad: aligns consumer_heartbeats to 64
    + HEARTBEAT_CAPACITY * HEARTBEAT_ENTRY_SIZE
    + 32 // metrics
    + 8 + 8 // region offsets
    + 4 + 4; // header_checksum, pad

/// Padding needed to make [`SegmentHeader`] exactly [`HEADER_SIZE`] bytes.
const RESERVED_BYTES: usize = HEADER_SIZE - FIXED_FIELDS_SIZE;

impl SegmentHeader {
    /// Offset of `commit_index` within the header, used by [`crate::slot`]
    /// to compute absolute atomic addresses without holding a typed
    /// reference across an mmap remap.
    pub const COMMIT_INDEX_OFFSET: usize = std::mem::offset_of!(SegmentHeader, commit_index);

    /// Recompute the CRC32 over the layout-describing fields (spec §3.1):
    /// identity, schema fingerprints, layout descriptor, and region
    /// offsets. Deliberately excludes everything that mutates during
    /// normal healthy operation (coordination indices, heartbeats, the
    /// management lock, metrics).
    pub fn compute_layout_checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.magic.to_le_bytes());
        hasher.update(&self.format_version.to_le_bytes());
        hasher.update(&self.header_size.to_le_bytes());
        hasher.update(&self.shared_secret.to_le_bytes());
        hasher.update(&self.flex_zone_schema_hash);
        hasher.update(&self.data_block_schema_hash);
        hasher.update(&self.schema_version.to_le_bytes());
        hasher.update(&self.flex_zone_size.to_le_bytes());
        hasher.update(&self.ring_buffer_capacity.to_le_bytes());
        hasher.update(&self.logical_unit_size.to_le_bytes());
        hasher.update(&self.physical_page_size.to_le_bytes());
        hasher.update(&self.policy.to_le_bytes());
        hasher.update(&self.consumer_sync_policy.to_le_bytes());
        hasher.update(&self.checksum_policy.to_le_bytes());
        hasher.update(&self.flex_zone_offset.to_le_bytes());
        hasher.update(&self.ring_buffer_offset.to_le_bytes());
        hasher.finalize()
    }

    /// Compute and durably store the layout checksum. Called once at
    /// creation, after every layout-describing field has its final value
    /// and before the header flips to `READY` (spec §4.2 step 5).
    pub fn store_layout_checksum(&self) {
        let checksum = self.compute_layout_checksum();
        self.header_checksum.store(checksum, Ordering::Release);
    }

    /// Whether the stored checksum matches a fresh recomputation. `false`
    /// means the layout-describing fields were tampered with or corrupted
    /// since creation (spec §7: `HeaderCorrupt`).
    pub fn layout_checksum_valid(&self) -> bool {
        self.header_checksum.load(Ordering::Acquire) == self.compute_layout_checksum()
    }
}

const _: () = assert!(std::mem::size_of::<SegmentHeader>() == HEADER_SIZE);
const _: () = assert!(std::mem::align_of::<SegmentHeader>() == 64);
