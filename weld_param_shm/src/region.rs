//! Mapped parameter region: segment plus signal block
//!
//! A region is either a file in `/dev/shm` shared between processes, or a
//! zeroed heap block standing in for it inside one process (unit tests,
//! simulation). Both expose the same typed views, so the writer and reader
//! handles do not care which one they hold.
//!
//! Invariant: the backing memory is exactly `region_size::<JS, JC, DK>()`
//! bytes, 64-byte aligned. Constructors enforce it before any typed view is
//! handed out.

use crate::error::{ShmError, ShmResult};
use crate::layout::{SharedParameterSegment, SignalBlock, region_size, signal_offset};
use crate::platform::{
    LinuxMemoryConfig, attach_region_mmap, create_region_mmap, is_process_alive,
};
use memmap2::MmapMut;
use std::alloc::{Layout, alloc_zeroed, dealloc, handle_alloc_error};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, warn};
use weld::consts::{CACHE_LINE_SIZE, DOKU_PAR_N, JC_PAR_N, JS_PAR_N};

/// Directory holding region files
pub const SHM_DIR: &str = "/dev/shm";

/// File path of the region called `name`
pub fn segment_path(name: &str) -> String {
    format!("{SHM_DIR}/weld_{name}")
}

/// Zeroed, cache-line aligned heap block
struct HeapBlock {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: the block is plain memory accessed only through atomics.
unsafe impl Send for HeapBlock {}
unsafe impl Sync for HeapBlock {}

impl HeapBlock {
    fn zeroed(size: usize) -> Self {
        let layout = match Layout::from_size_align(size, CACHE_LINE_SIZE) {
            Ok(layout) => layout,
            Err(_) => handle_alloc_error(Layout::new::<u8>()),
        };
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).unwrap_or_else(|| handle_alloc_error(layout));
        Self { ptr, layout }
    }
}

impl Drop for HeapBlock {
    fn drop(&mut self) {
        // SAFETY: allocated in `zeroed` with the same layout.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

enum Backing {
    Mapped {
        mmap: MmapMut,
        path: String,
        /// Unlink the file on drop
        owned: bool,
    },
    Heap(HeapBlock),
}

/// Parameter region handle
pub struct SegmentRegion<
    const JS: usize = JS_PAR_N,
    const JC: usize = JC_PAR_N,
    const DK: usize = DOKU_PAR_N,
> {
    name: String,
    backing: Backing,
}

/// Region with the build-time bounds
pub type WeldRegion = SegmentRegion;

impl<const JS: usize, const JC: usize, const DK: usize> SegmentRegion<JS, JC, DK> {
    /// Size of the backing memory in bytes
    pub const SIZE: usize = region_size::<JS, JC, DK>();

    /// Heap-backed region for single-process use
    pub fn in_memory(name: &str) -> Self {
        Self {
            name: name.to_string(),
            backing: Backing::Heap(HeapBlock::zeroed(Self::SIZE)),
        }
    }

    /// Create the file-backed region `name` as its owner.
    ///
    /// A leftover file whose recorded writer is dead (or whose size belongs
    /// to another layout) is unlinked and replaced. A file owned by a live
    /// writer is refused with `AlreadyExists`.
    pub fn create(name: &str, config: &LinuxMemoryConfig) -> ShmResult<Self> {
        let path = segment_path(name);

        if std::path::Path::new(&path).exists() {
            if let Some(pid) = Self::recorded_writer(&path) {
                if is_process_alive(pid) {
                    return Err(ShmError::AlreadyExists {
                        name: name.to_string(),
                    });
                }
            }
            warn!(segment = name, "Replacing stale parameter segment");
            std::fs::remove_file(&path)?;
        }

        let mmap = create_region_mmap(&path, Self::SIZE, config)?;
        debug!(segment = name, size = Self::SIZE, "Parameter region created");

        Ok(Self {
            name: name.to_string(),
            backing: Backing::Mapped {
                mmap,
                path,
                owned: true,
            },
        })
    }

    /// Attach to the file-backed region `name`.
    ///
    /// A file whose size differs from this build's layout cannot be the same
    /// protocol version and is rejected with `VersionMismatch`, reading
    /// nothing but the leading version word.
    pub fn open(name: &str, expected_version: u32) -> ShmResult<Self> {
        let path = segment_path(name);
        let mmap = attach_region_mmap(&path).map_err(|e| match e {
            ShmError::NotFound { .. } => ShmError::NotFound {
                name: name.to_string(),
            },
            other => other,
        })?;

        if mmap.len() != Self::SIZE {
            let found = if mmap.len() >= 4 {
                // SAFETY: mapping is page aligned and at least 4 bytes long.
                let word = unsafe { &*(mmap.as_ptr() as *const AtomicU32) };
                word.load(Ordering::Acquire)
            } else {
                0
            };
            warn!(
                segment = name,
                expected_size = Self::SIZE,
                actual_size = mmap.len(),
                "Parameter region size does not match this build"
            );
            return Err(ShmError::VersionMismatch {
                expected: expected_version,
                found,
            });
        }

        Ok(Self {
            name: name.to_string(),
            backing: Backing::Mapped {
                mmap,
                path,
                owned: false,
            },
        })
    }

    /// Region name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backing file path, if file-backed
    pub fn path(&self) -> Option<&str> {
        match &self.backing {
            Backing::Mapped { path, .. } => Some(path),
            Backing::Heap(_) => None,
        }
    }

    fn base(&self) -> *const u8 {
        match &self.backing {
            Backing::Mapped { mmap, .. } => mmap.as_ptr(),
            Backing::Heap(block) => block.ptr.as_ptr(),
        }
    }

    /// Typed view of the parameter segment
    pub fn segment(&self) -> &SharedParameterSegment<JS, JC, DK> {
        // SAFETY: backing is SIZE bytes, page or cache-line aligned, and the
        // segment consists only of atomics, for which every bit pattern is
        // valid and shared access is sound.
        unsafe { &*(self.base() as *const SharedParameterSegment<JS, JC, DK>) }
    }

    /// Typed view of the signal block
    pub fn signal(&self) -> &SignalBlock {
        // SAFETY: as for `segment`; the offset is cache-line aligned.
        unsafe { &*(self.base().add(signal_offset::<JS, JC, DK>()) as *const SignalBlock) }
    }

    /// Writer PID recorded in an existing region file, if it has our layout
    fn recorded_writer(path: &str) -> Option<u32> {
        let mmap = attach_region_mmap(path).ok()?;
        if mmap.len() != Self::SIZE {
            return None;
        }
        // SAFETY: size checked above.
        let signal = unsafe {
            &*(mmap.as_ptr().add(signal_offset::<JS, JC, DK>()) as *const SignalBlock)
        };
        Some(signal.writer_pid.load(Ordering::Acquire))
    }
}

impl<const JS: usize, const JC: usize, const DK: usize> Drop for SegmentRegion<JS, JC, DK> {
    fn drop(&mut self) {
        if let Backing::Mapped {
            path, owned: true, ..
        } = &self.backing
        {
            let _ = std::fs::remove_file(path);
            debug!(segment = %self.name, "Parameter region removed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type SmallRegion = SegmentRegion<4, 2, 3>;

    fn unique(tag: &str) -> String {
        format!("region_{}_{}", tag, std::process::id())
    }

    #[test]
    fn in_memory_region_is_zeroed_and_aligned() {
        let region = SmallRegion::in_memory("mem");
        assert_eq!(region.segment().version.load(Ordering::Relaxed), 0);
        assert_eq!(region.signal().generation.load(Ordering::Relaxed), 0);
        assert_eq!(region.base() as usize % CACHE_LINE_SIZE, 0);
        assert!(region.path().is_none());
    }

    #[test]
    fn create_open_and_unlink() {
        let name = unique("create");
        let path = segment_path(&name);
        {
            let owner = SmallRegion::create(&name, &LinuxMemoryConfig::default()).unwrap();
            owner.segment().version.store(3, Ordering::Release);

            let attached = SmallRegion::open(&name, 3).unwrap();
            assert_eq!(attached.segment().version.load(Ordering::Acquire), 3);
            drop(attached);
            // Non-owners never unlink.
            assert!(std::path::Path::new(&path).exists());
        }
        assert!(!std::path::Path::new(&path).exists());
    }

    #[test]
    fn live_owner_blocks_second_create() {
        let name = unique("exclusive");
        let owner = SmallRegion::create(&name, &LinuxMemoryConfig::default()).unwrap();
        owner
            .signal()
            .writer_pid
            .store(std::process::id(), Ordering::Release);

        let second = SmallRegion::create(&name, &LinuxMemoryConfig::default());
        assert!(matches!(second, Err(ShmError::AlreadyExists { .. })));
    }

    #[test]
    fn stale_file_is_replaced() {
        let name = unique("stale");
        let path = segment_path(&name);
        std::fs::write(&path, [0u8; 16]).unwrap();

        let region = SmallRegion::create(&name, &LinuxMemoryConfig::default()).unwrap();
        assert_eq!(
            std::fs::metadata(&path).unwrap().len() as usize,
            SmallRegion::SIZE
        );
        drop(region);
    }

    #[test]
    fn open_rejects_foreign_layout_size() {
        let name = unique("foreign");
        let path = segment_path(&name);
        let mut bytes = vec![0u8; 128];
        bytes[..4].copy_from_slice(&3u32.to_ne_bytes());
        std::fs::write(&path, &bytes).unwrap();

        let result = SmallRegion::open(&name, 3);
        assert!(matches!(
            result,
            Err(ShmError::VersionMismatch {
                expected: 3,
                found: 3
            })
        ));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn open_missing_region_is_not_found() {
        let result = SmallRegion::open(&unique("missing"), 3);
        assert!(matches!(result, Err(ShmError::NotFound { .. })));
    }
}
