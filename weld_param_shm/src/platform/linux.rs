//! Linux-specific shared memory operations

use crate::error::{ShmError, ShmResult};
use memmap2::{MmapMut, MmapOptions};
use nix::unistd::getpid;
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::sync::atomic::AtomicU32;
use std::time::Duration;

/// Linux-specific memory mapping configuration
#[derive(Debug, Clone, Copy)]
pub struct LinuxMemoryConfig {
    /// Pre-fault all pages at mapping time
    pub locked: bool,
}

impl Default for LinuxMemoryConfig {
    fn default() -> Self {
        Self { locked: true }
    }
}

/// Create a fresh memory-mapped region file.
///
/// Fails with `AlreadyExists` if `path` exists; callers unlink stale files
/// first so readers still holding the old inode keep a valid mapping.
pub fn create_region_mmap(
    path: &str,
    size: usize,
    config: &LinuxMemoryConfig,
) -> ShmResult<MmapMut> {
    let file = OpenOptions::new()
        .create_new(true)
        .read(true)
        .write(true)
        .mode(0o600) // Owner read/write only
        .open(path)
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => ShmError::AlreadyExists {
                name: path.to_string(),
            },
            _ => ShmError::Io { source: e },
        })?;

    // Fresh file pages read as zero.
    file.set_len(size as u64)?;

    let mut mmap_options = MmapOptions::new();
    if config.locked {
        mmap_options.populate();
    }

    let mmap = unsafe { mmap_options.map_mut(&file)? };
    Ok(mmap)
}

/// Attach to an existing region file.
pub fn attach_region_mmap(path: &str) -> ShmResult<MmapMut> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ShmError::NotFound {
                name: path.to_string(),
            },
            _ => ShmError::Io { source: e },
        })?;

    let mmap = unsafe { MmapOptions::new().map_mut(&file)? };
    Ok(mmap)
}

/// Check if process is alive using kill(pid, 0)
pub fn is_process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }

    #[cfg(target_os = "linux")]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        // A null signal tests for existence without delivering anything.
        match kill(Pid::from_raw(pid as i32), None) {
            Ok(_) => true,
            Err(nix::Error::ESRCH) => false,
            Err(nix::Error::EPERM) => true, // Exists, owned by another user
            Err(_) => false,
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

/// Get current process ID
pub fn get_current_pid() -> u32 {
    getpid().as_raw() as u32
}

/// Block while `*word == expected`, for at most `timeout`.
///
/// Uses a shared (non-private) futex so the wakeup crosses process
/// boundaries. Returns on wake, value change, timeout or signal; callers
/// re-check their condition.
#[cfg(target_os = "linux")]
pub fn futex_wait(word: &AtomicU32, expected: u32, timeout: Duration) {
    let ts = libc::timespec {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_nsec: timeout.subsec_nanos() as libc::c_long,
    };
    // EAGAIN, ETIMEDOUT and EINTR all mean "re-check".
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAIT,
            expected,
            &ts as *const libc::timespec,
            std::ptr::null::<u32>(),
            0u32,
        );
    }
}

/// Wake every waiter blocked on `word`.
#[cfg(target_os = "linux")]
pub fn futex_wake_all(word: &AtomicU32) {
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAKE,
            i32::MAX,
            std::ptr::null::<libc::timespec>(),
            std::ptr::null::<u32>(),
            0u32,
        );
    }
}

/// Poll fallback for targets without futex
#[cfg(not(target_os = "linux"))]
pub fn futex_wait(word: &AtomicU32, expected: u32, timeout: Duration) {
    use std::sync::atomic::Ordering;
    use std::time::Instant;

    const POLL_INTERVAL: Duration = Duration::from_micros(200);
    let deadline = Instant::now() + timeout;
    while word.load(Ordering::Acquire) == expected {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

/// No-op: pollers observe the generation change on their own
#[cfg(not(target_os = "linux"))]
pub fn futex_wake_all(_word: &AtomicU32) {}
