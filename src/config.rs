//! DataBlock configuration (spec §6.3).
//!
//! Every field here is required — unlike a typical `Default`-driven config
//! struct, safety-relevant layout choices are never silently defaulted. The
//! enum variants may have an obvious "usual" choice, but the caller always
//! states the whole config explicitly, the way
//! `evo_shared_memory::segment::validate_segment_size` insists on an
//! explicit, validated size rather than falling back to one.

use crate::error::{DataHubError, DataHubResult};

/// Physical page size the segment is built on (spec §6.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysicalPageSize {
    /// 4 KiB — the common case.
    Page4Ki,
    /// 4 MiB huge page.
    Page4Mi,
    /// 16 MiB huge page.
    Page16Mi,
}

impl PhysicalPageSize {
    /// Size in bytes.
    pub const fn bytes(self) -> u64 {
        match self {
            PhysicalPageSize::Page4Ki => 4 * 1024,
            PhysicalPageSize::Page4Mi => 4 * 1024 * 1024,
            PhysicalPageSize::Page16Mi => 16 * 1024 * 1024,
        }
    }
}

/// Segment allocation policy. Spec §6.3 names `RingBuffer` as the only
/// policy defined today; the enum is kept non-exhaustive-shaped so a future
/// policy doesn't need a breaking change here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockPolicy {
    /// The only policy this spec defines: a capacity-bounded ring of
    /// logically-addressed slots.
    RingBuffer,
}

/// Consumer synchronization policy (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerSyncPolicy {
    /// Readers always jump to the most recently committed slot; may skip
    /// slots; writer only transiently blocks via DRAINING.
    LatestOnly,
    /// A single shared `read_index` cursor; writer blocks on ring-full.
    SingleReader,
    /// Per-consumer cursors; writer blocks on the slowest consumer.
    SyncReader,
}

/// Checksum enforcement policy (spec §6.3, §4.4.1, §4.4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumPolicy {
    /// No checksums computed or verified.
    None,
    /// Slot and flex-zone checksums computed on every commit, verified on
    /// every release.
    Enforced,
    /// The library never computes a checksum on its own; the caller invokes
    /// `publish_flex_zone`/checksum updates explicitly.
    Manual,
}

/// Full configuration for a DataBlock segment, supplied by the producer at
/// creation time.
#[derive(Debug, Clone)]
pub struct DataBlockConfig {
    /// Physical page size the layout is built against.
    pub physical_page_size: PhysicalPageSize,
    /// Per-slot payload size; must be a multiple of `physical_page_size`.
    pub logical_unit_size: u64,
    /// Number of logically-addressed ring slots (N >= 1).
    pub ring_buffer_capacity: u64,
    /// Flex-zone size in bytes; must be a multiple of 4 KiB, may be 0.
    pub flex_zone_size: u64,
    /// Segment allocation policy.
    pub policy: BlockPolicy,
    /// Consumer synchronization policy.
    pub consumer_sync_policy: ConsumerSyncPolicy,
    /// Checksum enforcement policy.
    pub checksum_policy: ChecksumPolicy,
}

const FOUR_KIB: u64 = 4096;

impl DataBlockConfig {
    /// Validate layout constraints from spec §4.2/§6.3.
    pub fn validate(&self) -> DataHubResult<()> {
        if self.ring_buffer_capacity == 0 {
            return Err(DataHubError::InvalidConfig {
                reason: "ring_buffer_capacity must be >= 1".into(),
            });
        }

        let page = self.physical_page_size.bytes();
        if self.logical_unit_size == 0 || self.logical_unit_size % page != 0 {
            return Err(DataHubError::InvalidConfig {
                reason: format!(
                    "logical_unit_size ({}) must be a nonzero multiple of physical_page_size ({})",
                    self.logical_unit_size, page
                ),
            });
        }

        if self.flex_zone_size % FOUR_KIB != 0 {
            return Err(DataHubError::InvalidConfig {
                reason: format!(
                    "flex_zone_size ({}) must be a multiple of 4 KiB",
                    self.flex_zone_size
                ),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> DataBlockConfig {
        DataBlockConfig {
            physical_page_size: PhysicalPageSize::Page4Ki,
            logical_unit_size: 4096,
            ring_buffer_capacity: 8,
            flex_zone_size: 0,
            policy: BlockPolicy::RingBuffer,
            consumer_sync_policy: ConsumerSyncPolicy::SyncReader,
            checksum_policy: ChecksumPolicy::Enforced,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn zero_capacity_rejected() {
        let mut cfg = base_config();
        cfg.ring_buffer_capacity = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unaligned_logical_unit_size_rejected() {
        let mut cfg = base_config();
        cfg.logical_unit_size = 4097;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unaligned_flex_zone_rejected() {
        let mut cfg = base_config();
        cfg.flex_zone_size = 100;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn capacity_one_is_valid() {
        let mut cfg = base_config();
        cfg.ring_buffer_capacity = 1;
        assert!(cfg.validate().is_ok());
    }
}
