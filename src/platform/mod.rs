//! Platform-specific shared memory and process operations.

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(target_os = "linux")]
pub use linux::{
    attach_segment_mmap, create_segment_mmap, get_current_pid, is_process_alive,
    unlink_segment, LinuxMemoryConfig,
};
