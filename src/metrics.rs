//! Read-only accessors over a segment's built-in metrics counters
//! (spec §6.4): `writer_timeout_count`, `writer_reader_timeout_count`,
//! `checksum_failures`, `schema_mismatch_count`.

use crate::segment::Segment;
use std::sync::atomic::Ordering;

/// A point-in-time snapshot of a segment's metrics counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Times the producer gave up waiting for a free slot.
    pub writer_timeout_count: u64,
    /// Times the producer gave up waiting for a lagging reader.
    pub writer_reader_timeout_count: u64,
    /// Checksum verification failures observed by any consumer.
    pub checksum_failures: u64,
    /// Schema identity mismatches observed at attach time.
    pub schema_mismatch_count: u64,
}

/// Read the current metrics counters out of a segment's header.
pub fn snapshot(segment: &Segment) -> MetricsSnapshot {
    let m = &segment.header().metrics;
    MetricsSnapshot {
        writer_timeout_count: m.writer_timeout_count.load(Ordering::Relaxed),
        writer_reader_timeout_count: m.writer_reader_timeout_count.load(Ordering::Relaxed),
        checksum_failures: m.checksum_failures.load(Ordering::Relaxed),
        schema_mismatch_count: m.schema_mismatch_count.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BlockPolicy, ChecksumPolicy, ConsumerSyncPolicy, DataBlockConfig, PhysicalPageSize};
    use crate::error::DataHubResult;

    #[test]
    fn fresh_segment_has_zeroed_metrics() -> DataHubResult<()> {
        let name = format!("metrics_test_{}", std::process::id());
        let cfg = DataBlockConfig {
            physical_page_size: PhysicalPageSize::Page4Ki,
            logical_unit_size: 4096,
            ring_buffer_capacity: 1,
            flex_zone_size: 0,
            policy: BlockPolicy::RingBuffer,
            consumer_sync_policy: ConsumerSyncPolicy::LatestOnly,
            checksum_policy: ChecksumPolicy::None,
        };
        let segment = crate::segment::Segment::create(&name, &cfg, [0; 32], [0; 32], 0)?;
        assert_eq!(snapshot(&segment), MetricsSnapshot::default());
        segment.destroy()?;
        Ok(())
    }
}
