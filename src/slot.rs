//! Slot state machine: `FREE -> WRITING -> COMMITTED -> READING -> FREE`,
//! with a transient `DRAINING` state used only by Latest_only overwrite
//! (spec §4.4).

use crate::config::ConsumerSyncPolicy;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// One slot's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SlotState {
    /// No valid payload; available for the producer to claim.
    Free = 0,
    /// The producer is writing; not yet visible to any consumer.
    Writing = 1,
    /// Fully written and visible; a consumer may begin reading.
    Committed = 2,
    /// One or more consumers are currently reading.
    Reading = 3,
    /// A committed-but-unread slot is being overwritten under Latest_only;
    /// in-flight readers finish, new readers are redirected, then the slot
    /// returns to Free for the producer (spec §4.4.3).
    Draining = 4,
}

impl SlotState {
    fn from_u32(v: u32) -> Self {
        match v {
            0 => SlotState::Free,
            1 => SlotState::Writing,
            2 => SlotState::Committed,
            3 => SlotState::Reading,
            4 => SlotState::Draining,
            other => panic!("corrupt slot state value {other}"),
        }
    }
}

/// Error returned when a slot operation cannot proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotError {
    /// No free slot became available before the deadline.
    WriterTimeout,
    /// Under Sync_reader, the slowest consumer hasn't caught up; the
    /// producer gave up waiting rather than overwrite unread data.
    ReaderTimeout,
    /// The slot's contents changed mid-read (write_generation moved);
    /// the caller should retry the read.
    Torn,
    /// The slot was not in the state the caller expected it to be in.
    UnexpectedState(SlotState),
    /// Under `ChecksumPolicy::Enforced`, the stored digest didn't match the
    /// recomputed payload hash (spec §8.4.6).
    ChecksumMismatch,
}

/// Per-slot control block: the 48-byte stride entry in the slot-state array
/// (spec §4.4). Holds the state, an even/odd write generation counter for
/// optimistic reads, the count of active readers, and (for Sync_reader) how
/// many consumers still need to read this slot before it can be reclaimed.
#[repr(C, align(16))]
pub struct SlotControl {
    state: AtomicU32,
    active_readers: AtomicU32,
    write_generation: AtomicU64,
    pending_readers: AtomicU32,
    _reserved: [u8; 28],
}

const _: () = assert!(std::mem::size_of::<SlotControl>() == crate::header::SLOT_STATE_STRIDE);

impl SlotControl {
    /// A fresh, Free slot.
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(SlotState::Free as u32),
            active_readers: AtomicU32::new(0),
            write_generation: AtomicU64::new(0),
            pending_readers: AtomicU32::new(0),
            _reserved: [0; 28],
        }
    }

    /// Current state, acquire-ordered so callers observing `Committed` also
    /// observe the payload bytes written before the transition.
    pub fn state(&self) -> SlotState {
        SlotState::from_u32(self.state.load(Ordering::Acquire))
    }

    /// Current write generation. Even means stable, odd means a write is
    /// in flight (spec §4.3's optimistic-read discipline, reused per-slot).
    pub fn write_generation(&self) -> u64 {
        self.write_generation.load(Ordering::Acquire)
    }

    /// Claim a Free slot for writing. Fails with `UnexpectedState` if the
    /// slot isn't Free (caller should pick another slot or wait).
    pub fn begin_write(&self) -> Result<(), SlotError> {
        self.state
            .compare_exchange(
                SlotState::Free as u32,
                SlotState::Writing as u32,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| {
                self.write_generation.fetch_add(1, Ordering::AcqRel);
            })
            .map_err(|observed| SlotError::UnexpectedState(SlotState::from_u32(observed)))
    }

    /// Publish a finished write: bump the generation to even (stable) and
    /// transition Writing -> Committed. The generation bump happens before
    /// the state release so a consumer that observes Committed via acquire
    /// never sees a stale (odd) generation.
    pub fn publish(&self) -> Result<(), SlotError> {
        let current = self.state.load(Ordering::Acquire);
        if current != SlotState::Writing as u32 {
            return Err(SlotError::UnexpectedState(SlotState::from_u32(current)));
        }
        self.write_generation.fetch_add(1, Ordering::AcqRel);
        self.state.store(SlotState::Committed as u32, Ordering::Release);
        Ok(())
    }

    /// Abort an in-progress write, returning the slot to Free without
    /// publishing. Used when the producer detects an error mid-write.
    pub fn abort_write(&self) -> Result<(), SlotError> {
        self.state
            .compare_exchange(
                SlotState::Writing as u32,
                SlotState::Free as u32,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(|observed| SlotError::UnexpectedState(SlotState::from_u32(observed)))
    }

    /// Begin a read under the given policy: Committed -> Reading (first
    /// reader) or stay Reading (additional concurrent readers), bumping
    /// `active_readers`. Returns the generation observed at entry so the
    /// caller can detect a torn read after copying the payload.
    pub fn begin_read(&self, policy: ConsumerSyncPolicy) -> Result<u64, SlotError> {
        let _ = policy;
        loop {
            let current = self.state.load(Ordering::Acquire);
            if current == SlotState::Committed as u32 || current == SlotState::Reading as u32 {
                match self.state.compare_exchange(
                    current,
                    SlotState::Reading as u32,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        self.active_readers.fetch_add(1, Ordering::AcqRel);
                        return Ok(self.write_generation());
                    }
                    Err(_) => continue,
                }
            }
            return Err(SlotError::UnexpectedState(SlotState::from_u32(current)));
        }
    }

    /// Verify the slot wasn't overwritten mid-read: the generation must be
    /// unchanged and even (spec §4.3 optimistic read protocol).
    pub fn is_read_consistent(&self, observed_generation: u64) -> bool {
        observed_generation % 2 == 0 && self.write_generation() == observed_generation
    }

    /// Release a read. Drops `active_readers`; the last reader to leave
    /// transitions Reading -> Committed so a future reader (Sync_reader) or
    /// the producer (Latest_only/Single_reader reclaim) can act on it.
    /// Under Draining, the last reader instead completes the transition to
    /// Free, handing the slot back to the producer (spec §4.4.3).
    pub fn end_read(&self) {
        let remaining = self.active_readers.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining > 0 {
            return;
        }

        loop {
            let current = self.state.load(Ordering::Acquire);
            if current != SlotState::Reading as u32 {
                return;
            }
            let target = if self.pending_readers.load(Ordering::Acquire) > 0 {
                SlotState::Draining as u32
            } else {
                SlotState::Committed as u32
            };
            if self
                .state
                .compare_exchange(current, target, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                if target == SlotState::Draining as u32 {
                    self.finish_drain();
                }
                return;
            }
        }
    }

    /// Mark a slot for overwrite under Latest_only: Committed -> Draining
    /// if unread, or request drain-on-last-reader-exit if currently being
    /// read. Returns `true` once the slot is actually Free and available.
    pub fn request_overwrite(&self) -> bool {
        match self.state.compare_exchange(
            SlotState::Committed as u32,
            SlotState::Draining as u32,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                self.finish_drain();
                true
            }
            Err(observed) if observed == SlotState::Reading as u32 => {
                self.pending_readers.fetch_add(1, Ordering::AcqRel);
                false
            }
            Err(observed) => observed == SlotState::Free as u32,
        }
    }

    fn finish_drain(&self) {
        self.pending_readers.store(0, Ordering::Release);
        self.state.store(SlotState::Free as u32, Ordering::Release);
    }

    /// Force a slot stuck in `Writing` back to `Free`, bumping the
    /// generation so any consumer that had snapshotted the prior
    /// generation detects staleness rather than trusting half-written
    /// bytes (spec §4.6 zombie reclamation, scenario §8.4.3). Only
    /// meaningful when the caller has already confirmed the producer that
    /// left the slot in `Writing` is dead; returns `false` if the slot
    /// wasn't actually stuck.
    pub fn reclaim_stuck_write(&self) -> bool {
        self.state
            .compare_exchange(
                SlotState::Writing as u32,
                SlotState::Free as u32,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| {
                self.write_generation.fetch_add(1, Ordering::AcqRel);
            })
            .is_ok()
    }
}

impl Default for SlotControl {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_slot_is_free() {
        let slot = SlotControl::new();
        assert_eq!(slot.state(), SlotState::Free);
    }

    #[test]
    fn write_publish_read_cycle() {
        let slot = SlotControl::new();
        slot.begin_write().unwrap();
        assert_eq!(slot.state(), SlotState::Writing);
        slot.publish().unwrap();
        assert_eq!(slot.state(), SlotState::Committed);

        let gen = slot.begin_read(ConsumerSyncPolicy::SyncReader).unwrap();
        assert!(slot.is_read_consistent(gen));
        slot.end_read();
        assert_eq!(slot.state(), SlotState::Committed);
    }

    #[test]
    fn double_begin_write_fails() {
        let slot = SlotControl::new();
        slot.begin_write().unwrap();
        assert_eq!(
            slot.begin_write().unwrap_err(),
            SlotError::UnexpectedState(SlotState::Writing)
        );
    }

    #[test]
    fn read_before_commit_fails() {
        let slot = SlotControl::new();
        assert!(slot.begin_read(ConsumerSyncPolicy::LatestOnly).is_err());
    }

    #[test]
    fn overwrite_unread_committed_slot_is_immediate() {
        let slot = SlotControl::new();
        slot.begin_write().unwrap();
        slot.publish().unwrap();
        assert!(slot.request_overwrite());
        assert_eq!(slot.state(), SlotState::Free);
    }

    #[test]
    fn overwrite_during_read_drains_on_last_reader_exit() {
        let slot = SlotControl::new();
        slot.begin_write().unwrap();
        slot.publish().unwrap();
        let gen = slot.begin_read(ConsumerSyncPolicy::LatestOnly).unwrap();
        assert!(!slot.request_overwrite());
        assert_eq!(slot.state(), SlotState::Reading);
        assert!(slot.is_read_consistent(gen));
        slot.end_read();
        assert_eq!(slot.state(), SlotState::Free);
    }

    #[test]
    fn abort_write_returns_to_free() {
        let slot = SlotControl::new();
        slot.begin_write().unwrap();
        slot.abort_write().unwrap();
        assert_eq!(slot.state(), SlotState::Free);
    }

    #[test]
    fn reclaim_stuck_write_frees_slot_and_bumps_generation() {
        let slot = SlotControl::new();
        slot.begin_write().unwrap();
        let gen_before = slot.write_generation();
        assert!(slot.reclaim_stuck_write());
        assert_eq!(slot.state(), SlotState::Free);
        assert!(slot.write_generation() > gen_before);
    }

    #[test]
    fn reclaim_stuck_write_is_noop_on_non_writing_slot() {
        let slot = SlotControl::new();
        assert!(!slot.reclaim_stuck_write());
    }
}
