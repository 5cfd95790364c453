//! Producer and consumer liveness tracking (spec §4.6).
//!
//! Heartbeats are cheap, lock-free timestamp writes; a reader only pays for
//! the `kill(pid, 0)` liveness probe once a heartbeat has gone stale. This
//! mirrors `evo_shared_memory::writer`'s `last_write_ts` freshness check,
//! generalized to a fixed table of consumers instead of a single writer.

use crate::error::DataHubError;
use crate::header::{ConsumerHeartbeatEntry, HEARTBEAT_CAPACITY};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A heartbeat older than this is considered stale and triggers a liveness
/// probe before the holder is treated as dead (spec §4.6).
pub const STALE_THRESHOLD_NS: u64 = 2_000_000_000;

/// Monotonic-ish nanosecond timestamp suitable for heartbeat comparison.
/// Wall-clock based (not `Instant`) since it must be writable into shared
/// memory and read back by an unrelated process.
pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

/// Record a producer heartbeat.
pub fn beat_producer(pid_cell: &AtomicU32, pid: u32, last_heartbeat: &AtomicU64) {
    pid_cell.store(pid, Ordering::Release);
    last_heartbeat.store(now_ns(), Ordering::Release);
}

/// Whether a heartbeat timestamp is stale relative to now.
pub fn is_stale(last_heartbeat_ns: u64) -> bool {
    now_ns().saturating_sub(last_heartbeat_ns) > STALE_THRESHOLD_NS
}

/// Register a consumer into the first free slot of the fixed heartbeat
/// table via CAS. Returns the slot index on success.
pub fn register_consumer(
    segment_name: &str,
    table: &[ConsumerHeartbeatEntry; HEARTBEAT_CAPACITY],
    pid: u32,
    start_slot: u64,
) -> Result<usize, DataHubError> {
    for (i, entry) in table.iter().enumerate() {
        if entry
            .consumer_pid
            .compare_exchange(0, pid, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            entry.last_heartbeat_ns.store(now_ns(), Ordering::Release);
            entry.next_read_slot.store(start_slot, Ordering::Release);
            return Ok(i);
        }
    }
    Err(DataHubError::HeartbeatTableFull {
        name: segment_name.to_string(),
    })
}

/// Remove a consumer's registration, freeing the slot for reuse.
pub fn deregister_consumer(table: &[ConsumerHeartbeatEntry; HEARTBEAT_CAPACITY], slot: usize) {
    if let Some(entry) = table.get(slot) {
        entry.next_read_slot.store(0, Ordering::Release);
        entry.last_heartbeat_ns.store(0, Ordering::Release);
        entry.consumer_pid.store(0, Ordering::Release);
    }
}

/// Refresh a registered consumer's heartbeat and advertised read cursor.
pub fn beat_consumer(table: &[ConsumerHeartbeatEntry; HEARTBEAT_CAPACITY], slot: usize, read_slot: u64) {
    if let Some(entry) = table.get(slot) {
        entry.next_read_slot.store(read_slot, Ordering::Release);
        entry.last_heartbeat_ns.store(now_ns(), Ordering::Release);
    }
}

/// The lowest `next_read_slot` among all live (non-stale) registered
/// consumers. Used by Sync_reader to decide how far the producer may
/// safely advance before it would overwrite unread data. Returns `None`
/// if no consumer is currently registered and live.
pub fn slowest_live_consumer_slot(table: &[ConsumerHeartbeatEntry; HEARTBEAT_CAPACITY]) -> Option<u64> {
    table
        .iter()
        .filter(|e| e.consumer_pid.load(Ordering::Acquire) != 0)
        .filter(|e| !is_stale(e.last_heartbeat_ns.load(Ordering::Acquire)))
        .map(|e| e.next_read_slot.load(Ordering::Acquire))
        .min()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::ConsumerHeartbeatEntry;

    fn fresh_table() -> [ConsumerHeartbeatEntry; HEARTBEAT_CAPACITY] {
        std::array::from_fn(|_| ConsumerHeartbeatEntry::new())
    }

    #[test]
    fn register_finds_free_slot() {
        let table = fresh_table();
        let slot = register_consumer("t", &table, 42, 0).unwrap();
        assert_eq!(table[slot].consumer_pid.load(Ordering::Acquire), 42);
    }

    #[test]
    fn table_full_when_all_slots_taken() {
        let table = fresh_table();
        for pid in 1..=HEARTBEAT_CAPACITY as u32 {
            register_consumer("t", &table, pid, 0).unwrap();
        }
        assert!(register_consumer("t", &table, 999, 0).is_err());
    }

    #[test]
    fn deregister_frees_the_slot() {
        let table = fresh_table();
        let slot = register_consumer("t", &table, 42, 0).unwrap();
        deregister_consumer(&table, slot);
        assert_eq!(table[slot].consumer_pid.load(Ordering::Acquire), 0);
        assert!(register_consumer("t", &table, 7, 0).is_ok());
    }

    #[test]
    fn slowest_consumer_tracks_minimum_cursor() {
        let table = fresh_table();
        let a = register_consumer("t", &table, 1, 10).unwrap();
        let b = register_consumer("t", &table, 2, 3).unwrap();
        beat_consumer(&table, a, 10);
        beat_consumer(&table, b, 3);
        assert_eq!(slowest_live_consumer_slot(&table), Some(3));
    }

    #[test]
    fn no_live_consumers_returns_none() {
        let table = fresh_table();
        assert_eq!(slowest_live_consumer_slot(&table), None);
    }

    #[test]
    fn freshly_beaten_heartbeat_is_not_stale() {
        assert!(!is_stale(now_ns()));
    }
}
