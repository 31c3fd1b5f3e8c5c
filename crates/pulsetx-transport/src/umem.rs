//! UMEM frame pool.
//!
//! One anonymous, page-backed mapping divided into equal-size frames. Frame
//! `i` lives at UMEM address `i * frame_size`, which is also the value placed
//! in TX descriptors and returned on the completion ring.

use crate::error::TransportError;
use std::io;
use std::os::raw::c_void;
use std::ptr;
use std::sync::Arc;

/// Smallest chunk size the kernel accepts
pub const XDP_UMEM_MIN_CHUNK_SIZE: u32 = 2048;

const HUGE_PAGE_SIZE: usize = 2 * 1024 * 1024;

/// UMEM configuration
#[derive(Debug, Clone)]
pub struct UmemConfig {
    /// Size of each frame in bytes (power of 2 unless `unaligned_chunks`)
    pub frame_size: u32,

    /// Number of frames in the pool
    pub num_frames: u32,

    /// Headroom reserved by the kernel in front of each frame
    pub headroom: u32,

    /// Fill ring entries (power of 2)
    pub fill_ring_size: u32,

    /// Completion ring entries (power of 2)
    pub comp_ring_size: u32,

    /// Register with `XDP_UMEM_UNALIGNED_CHUNK_FLAG` and back the pool with huge pages
    pub unaligned_chunks: bool,

    /// mlock() the pool after mapping it
    pub lock_pages: bool,
}

impl Default for UmemConfig {
    fn default() -> Self {
        Self {
            frame_size: 4096,
            num_frames: 4096,
            headroom: 0,
            fill_ring_size: 4096,
            comp_ring_size: 2048,
            unaligned_chunks: false,
            lock_pages: true,
        }
    }
}

impl UmemConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), TransportError> {
        if !self.unaligned_chunks && !self.frame_size.is_power_of_two() {
            return Err(TransportError::InvalidConfig(format!(
                "frame_size {} must be a power of 2 without unaligned chunks",
                self.frame_size
            )));
        }

        if self.frame_size < XDP_UMEM_MIN_CHUNK_SIZE {
            return Err(TransportError::InvalidConfig(format!(
                "frame_size must be >= {XDP_UMEM_MIN_CHUNK_SIZE}"
            )));
        }

        if self.headroom >= self.frame_size {
            return Err(TransportError::InvalidConfig(
                "headroom must be smaller than frame_size".into(),
            ));
        }

        if self.num_frames == 0 {
            return Err(TransportError::InvalidConfig(
                "num_frames must be non-zero".into(),
            ));
        }

        if !self.fill_ring_size.is_power_of_two() {
            return Err(TransportError::InvalidConfig(
                "fill_ring_size must be power of 2".into(),
            ));
        }

        if !self.comp_ring_size.is_power_of_two() {
            return Err(TransportError::InvalidConfig(
                "comp_ring_size must be power of 2".into(),
            ));
        }

        Ok(())
    }

    /// Total pool size in bytes
    pub fn size(&self) -> usize {
        self.frame_size as usize * self.num_frames as usize
    }

    /// Create a UMEM with this configuration
    pub fn create(&self) -> Result<Umem, TransportError> {
        Umem::new(self.clone())
    }
}

/// The raw mapping. Unmapped when the last owner (pool or region view) drops.
#[derive(Debug)]
struct Mapping {
    base: *mut u8,
    /// Mapped length (rounded up to the huge page size when huge pages are used)
    mapped: usize,
    locked: bool,
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: base/mapped are the values returned by and passed to mmap.
        unsafe {
            if self.locked {
                libc::munlock(self.base as *const c_void, self.mapped);
            }
            libc::munmap(self.base as *mut c_void, self.mapped);
        }
    }
}

// SAFETY: the mapping is plain memory; synchronisation of frame contents is
// the job of the ring protocol.
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

/// UMEM frame pool
#[derive(Debug)]
pub struct Umem {
    config: UmemConfig,
    mapping: Arc<Mapping>,
}

impl Umem {
    /// Map (and optionally lock) a new pool.
    pub fn new(config: UmemConfig) -> Result<Self, TransportError> {
        config.validate()?;

        let size = config.size();
        let mut flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_POPULATE;
        let mut mapped = size;
        if config.unaligned_chunks {
            flags |= libc::MAP_HUGETLB;
            mapped = size.div_ceil(HUGE_PAGE_SIZE) * HUGE_PAGE_SIZE;
        }

        // SAFETY: anonymous private mapping; the result is checked for MAP_FAILED.
        let buffer = unsafe {
            libc::mmap(
                ptr::null_mut(),
                mapped,
                libc::PROT_READ | libc::PROT_WRITE,
                flags,
                -1,
                0,
            )
        };

        if buffer == libc::MAP_FAILED {
            return Err(TransportError::UmemCreation(format!(
                "mmap of {mapped} bytes failed: {}",
                io::Error::last_os_error()
            )));
        }

        let mut mapping = Mapping {
            base: buffer.cast::<u8>(),
            mapped,
            locked: false,
        };

        if config.lock_pages {
            // SAFETY: buffer is valid for `mapped` bytes. On failure `mapping`
            // is dropped, which unmaps it.
            let ret = unsafe { libc::mlock(buffer, mapped) };
            if ret != 0 {
                return Err(TransportError::UmemCreation(format!(
                    "Failed to lock memory (check ulimit -l): {}",
                    io::Error::last_os_error()
                )));
            }
            mapping.locked = true;
        }

        tracing::debug!(
            frames = config.num_frames,
            frame_size = config.frame_size,
            bytes = size,
            huge_pages = config.unaligned_chunks,
            "UMEM mapped"
        );

        Ok(Self {
            config,
            mapping: Arc::new(mapping),
        })
    }

    /// Configuration this pool was created with
    pub fn config(&self) -> &UmemConfig {
        &self.config
    }

    /// Base pointer of the pool (registered with the kernel)
    pub fn as_ptr(&self) -> *const u8 {
        self.mapping.base
    }

    /// Pool size in bytes
    pub fn size(&self) -> usize {
        self.config.size()
    }

    /// Get frame size
    pub fn frame_size(&self) -> u32 {
        self.config.frame_size
    }

    /// Get number of frames
    pub fn num_frames(&self) -> u32 {
        self.config.num_frames
    }

    /// UMEM address of a frame
    pub fn addr_of(&self, index: u32) -> u64 {
        u64::from(index) * u64::from(self.config.frame_size)
    }

    /// Whether `[addr, addr + len)` lies inside the pool
    pub fn contains(&self, addr: u64, len: u32) -> bool {
        addr.checked_add(u64::from(len))
            .is_some_and(|end| end <= self.size() as u64)
    }

    /// Get frame at index
    pub fn frame(&self, index: u32) -> Option<&[u8]> {
        self.frames(index, 1)
    }

    /// Get mutable frame at index
    pub fn frame_mut(&mut self, index: u32) -> Option<&mut [u8]> {
        self.frames_mut(index, 1)
    }

    /// `count` consecutive frames starting at `first`, as one slice
    pub fn frames(&self, first: u32, count: u32) -> Option<&[u8]> {
        let (offset, len) = self.span(first, count)?;
        // SAFETY: span() bounds-checked the range against the mapping.
        Some(unsafe { std::slice::from_raw_parts(self.mapping.base.add(offset), len) })
    }

    /// Mutable view of `count` consecutive frames starting at `first`
    pub fn frames_mut(&mut self, first: u32, count: u32) -> Option<&mut [u8]> {
        let (offset, len) = self.span(first, count)?;
        // SAFETY: span() bounds-checked the range; `&mut self` rules out
        // aliasing through this pool.
        Some(unsafe { std::slice::from_raw_parts_mut(self.mapping.base.add(offset), len) })
    }

    /// Shared read-only view used by in-process consumers of the TX ring.
    pub fn region(&self) -> UmemRegion {
        UmemRegion {
            mapping: Arc::clone(&self.mapping),
            size: self.size(),
        }
    }

    fn span(&self, first: u32, count: u32) -> Option<(usize, usize)> {
        let end = first.checked_add(count)?;
        if count == 0 || end > self.config.num_frames {
            return None;
        }
        let frame = self.config.frame_size as usize;
        Some((first as usize * frame, count as usize * frame))
    }
}

/// Read-only handle on a pool's memory that keeps the mapping alive.
///
/// Plays the role of the device reading TX frames: contents are copied out
/// while the producer may be rewriting other frames.
#[derive(Debug, Clone)]
pub struct UmemRegion {
    mapping: Arc<Mapping>,
    size: usize,
}

impl UmemRegion {
    /// Pool size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Copy `len` bytes starting at UMEM address `addr`.
    pub fn copy_out(&self, addr: u64, len: u32) -> Option<Vec<u8>> {
        let end = addr.checked_add(u64::from(len))?;
        if end > self.size as u64 {
            return None;
        }
        let mut out = vec![0u8; len as usize];
        // SAFETY: range checked above; the Arc keeps the mapping alive.
        unsafe {
            ptr::copy_nonoverlapping(
                self.mapping.base.add(addr as usize),
                out.as_mut_ptr(),
                len as usize,
            );
        }
        Some(out)
    }
}
