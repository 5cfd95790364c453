//! Owner state shared by every intra-segment lock.
//!
//! A single 32-byte layout is reused by every lock in a segment (the per-slot
//! write lock, the segment management lock). Interpretation of the fields
//! varies by lock mode: pid/tid mode treats `token` as a generation counter
//! bumped on every release; token mode treats it as an opaque handoff token.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Sentinel pid value meaning "unowned".
pub const NO_OWNER: u32 = 0;

/// Owner record backing a [`crate::spinlock::SharedSpinLock`].
///
/// Lives inside shared memory, so every field is an atomic and the struct
/// carries no padding beyond what's needed to round out to 32 bytes.
#[repr(C)]
pub struct OwnerState {
    pid: AtomicU32,
    tid: AtomicU32,
    /// Generation counter (pid/tid mode) or handoff token (token mode).
    token: AtomicU64,
    recursion_count: AtomicU32,
    _reserved: [u8; 12],
}

impl OwnerState {
    /// Construct an unowned state.
    pub const fn new() -> Self {
        Self {
            pid: AtomicU32::new(NO_OWNER),
            tid: AtomicU32::new(0),
            token: AtomicU64::new(0),
            recursion_count: AtomicU32::new(0),
            _reserved: [0; 12],
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid.load(Ordering::Acquire)
    }

    pub fn tid(&self) -> u32 {
        self.tid.load(Ordering::Acquire)
    }

    pub fn generation(&self) -> u64 {
        self.token.load(Ordering::Acquire)
    }

    pub fn recursion_count(&self) -> u32 {
        self.recursion_count.load(Ordering::Relaxed)
    }

    /// Attempt to claim ownership from the unowned state via CAS.
    ///
    /// Returns the previous `(pid, generation)` pair on failure so the
    /// caller can decide whether to back off or reclaim.
    pub fn try_claim(&self, pid: u32, tid: u32) -> Result<u64, (u32, u64)> {
        match self
            .pid
            .compare_exchange(NO_OWNER, pid, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                self.tid.store(tid, Ordering::Release);
                let gen = self.token.load(Ordering::Acquire);
                Ok(gen)
            }
            Err(observed) => Err((observed, self.token.load(Ordering::Acquire))),
        }
    }

    /// Same-thread recursive acquire: caller already owns the lock.
    pub fn is_held_by(&self, pid: u32, tid: u32) -> bool {
        self.pid.load(Ordering::Acquire) == pid && self.tid.load(Ordering::Acquire) == tid
    }

    pub fn enter_recursive(&self) -> u32 {
        self.recursion_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Returns the depth remaining after this exit.
    pub fn exit_recursive(&self) -> u32 {
        self.recursion_count.fetch_sub(1, Ordering::AcqRel) - 1
    }

    /// Release ownership, bumping the generation counter so that any stale
    /// holder of the previous generation can detect the handoff.
    pub fn release(&self) {
        self.recursion_count.store(0, Ordering::Relaxed);
        self.tid.store(0, Ordering::Release);
        self.token.fetch_add(1, Ordering::AcqRel);
        self.pid.store(NO_OWNER, Ordering::Release);
    }

    /// Force-replace ownership (zombie reclamation). Bumps generation.
    pub fn force_claim(&self, pid: u32, tid: u32) -> u64 {
        let gen = self.token.fetch_add(1, Ordering::AcqRel) + 1;
        self.tid.store(tid, Ordering::Release);
        self.recursion_count.store(0, Ordering::Relaxed);
        self.pid.store(pid, Ordering::Release);
        gen
    }

    /// Token-mode handoff: any holder of `token` may transfer ownership.
    pub fn handoff_token(&self, expected: u64, new_token: u64) -> bool {
        self.token
            .compare_exchange(expected, new_token, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for OwnerState {
    fn default() -> Self {
        Self::new()
    }
}
