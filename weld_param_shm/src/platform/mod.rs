//! Platform layer: region mapping, process liveness and futex signaling

pub mod linux;

pub use linux::{
    LinuxMemoryConfig, attach_region_mmap, create_region_mmap, futex_wait, futex_wake_all,
    get_current_pid, is_process_alive,
};
