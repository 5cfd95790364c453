//! Linux-specific shared memory operations.

use crate::error::DataHubError;
use memmap2::{MmapMut, MmapOptions};
use nix::unistd::getpid;
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;

/// Linux-specific memory mapping configuration.
pub struct LinuxMemoryConfig {
    /// Use `populate()` (MAP_POPULATE) to fault pages in at map time, for
    /// deterministic first-touch latency.
    pub locked: bool,
}

impl Default for LinuxMemoryConfig {
    fn default() -> Self {
        Self { locked: true }
    }
}

/// Create a memory-mapped segment backed by a `/dev/shm` file.
pub fn create_segment_mmap(
    path: &str,
    size: usize,
    config: &LinuxMemoryConfig,
) -> Result<MmapMut, DataHubError> {
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .mode(0o600)
        .open(path)?;

    file.set_len(size as u64)?;

    let mut mmap_options = MmapOptions::new();
    if config.locked {
        mmap_options.populate();
    }

    let mmap = unsafe { mmap_options.map_mut(&file)? };
    Ok(mmap)
}

/// Attach to an existing segment file.
pub fn attach_segment_mmap(path: &str) -> Result<MmapMut, DataHubError> {
    let file = OpenOptions::new().read(true).write(true).open(path)?;
    let mmap = unsafe { MmapOptions::new().map_mut(&file)? };
    Ok(mmap)
}

/// Remove the segment's backing file, making the name unattachable.
pub fn unlink_segment(path: &str) -> Result<(), DataHubError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Check if a process is alive using `kill(pid, 0)`.
///
/// Gated by heartbeat freshness upstream (spec §4.6): callers only reach
/// for this syscall once a heartbeat has already gone stale, so the hot
/// path never pays for it.
pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), None) {
        Ok(_) => true,
        Err(nix::Error::ESRCH) => false,
        Err(nix::Error::EPERM) => true,
        Err(_) => false,
    }
}

/// Get current process ID.
pub fn get_current_pid() -> u32 {
    getpid().as_raw() as u32
}

/// Get the current thread's OS-level id, used for pid/tid lock ownership.
pub fn get_current_tid() -> u32 {
    // Linux thread id; distinct from the pthread_t returned by
    // std::thread::current().id().
    unsafe { libc::syscall(libc::SYS_gettid) as u32 }
}
