//! Single-producer/single-consumer descriptor rings.
//!
//! The rings follow the AF_XDP cursor protocol: a power-of-two slot array, a
//! free-running 32-bit producer cursor and a free-running 32-bit consumer
//! cursor. Each side keeps a private cached copy of the other side's cursor
//! and only refreshes it (with an acquire load) when the cached view runs dry.
//! Publishing is a single release store, so every slot written before
//! [`ProducerRing::submit`] is visible to the consumer before the cursor that
//! exposes it.
//!
//! A ring is either mapped from an XSK socket (the kernel is the other side)
//! or allocated on the heap as a connected [`pair`] for in-process use.

use crate::error::TransportError;
use crate::sys::{XDP_RING_NEED_WAKEUP, XdpRingOffset};
use std::cell::UnsafeCell;
use std::fmt;
use std::io;
use std::os::raw::{c_int, c_void};
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// TX/RX ring descriptor (`struct xdp_desc`)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct XdpDesc {
    /// Offset of the packet data within the UMEM
    pub addr: u64,

    /// Length of the data in this descriptor
    pub len: u32,

    /// Option bits (`XDP_PKT_CONTD` for non-final fragments)
    pub options: u32,
}

/// Element type that can live in a ring slot.
///
/// Fill and completion rings carry bare UMEM addresses (`u64`); TX and RX
/// rings carry [`XdpDesc`].
pub trait RingEntry: Copy + Default + Send + 'static {}

impl RingEntry for u64 {}
impl RingEntry for XdpDesc {}

#[repr(C, align(64))]
struct PaddedCursor(AtomicU32);

/// Heap storage shared by both ends of an in-process ring.
struct HeapRing<T> {
    producer: PaddedCursor,
    consumer: PaddedCursor,
    flags: AtomicU32,
    slots: Box<[UnsafeCell<T>]>,
}

enum Backing<T> {
    Mmap { base: *mut c_void, len: usize },
    Heap(#[allow(dead_code)] Arc<HeapRing<T>>),
}

impl<T> Drop for Backing<T> {
    fn drop(&mut self) {
        if let Backing::Mmap { base, len } = *self {
            // SAFETY: base/len are exactly what mmap returned for this ring and
            // the mapping is unmapped only here, once.
            unsafe {
                libc::munmap(base, len);
            }
        }
    }
}

/// Raw view of one ring: cursor, flag and slot pointers plus their storage.
struct RingView<T> {
    producer: *const AtomicU32,
    consumer: *const AtomicU32,
    flags: *const AtomicU32,
    slots: *mut T,
    size: u32,
    mask: u32,
    _backing: Backing<T>,
}

// SAFETY: the pointers reference storage owned by `_backing` (an mmap owned by
// this view, or a heap allocation kept alive by the Arc). Cross-thread access
// to the cursors goes through atomics and slot access is partitioned by the
// cursor protocol.
unsafe impl<T: Send> Send for RingView<T> {}

impl<T: RingEntry> RingView<T> {
    fn heap(storage: &Arc<HeapRing<T>>, size: u32) -> Self {
        Self {
            producer: &storage.producer.0,
            consumer: &storage.consumer.0,
            flags: &storage.flags,
            slots: UnsafeCell::raw_get(storage.slots.as_ptr()),
            size,
            mask: size - 1,
            _backing: Backing::Heap(Arc::clone(storage)),
        }
    }

    /// Map a ring of `size` entries from an XSK socket.
    ///
    /// # Safety
    ///
    /// `fd` must be an AF_XDP socket on which the ring selected by `pgoff` has
    /// been sized to `size` entries, and `offsets` must be the layout the
    /// kernel reported for that ring.
    unsafe fn mapped(
        fd: c_int,
        pgoff: libc::off_t,
        offsets: &XdpRingOffset,
        size: u32,
    ) -> Result<Self, TransportError> {
        if !size.is_power_of_two() {
            return Err(TransportError::Ring(format!(
                "ring size {size} is not a power of 2"
            )));
        }

        let len = offsets.desc as usize + size as usize * std::mem::size_of::<T>();

        // SAFETY: shared mapping of the socket's ring region; the kernel
        // validates the page offset and length and MAP_FAILED is checked.
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_POPULATE,
                fd,
                pgoff,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(TransportError::Ring(format!(
                "Failed to mmap ring (pgoff {pgoff:#x}): {}",
                io::Error::last_os_error()
            )));
        }

        let at = |off: u64| base.cast::<u8>().wrapping_add(off as usize);
        Ok(Self {
            producer: at(offsets.producer).cast::<AtomicU32>(),
            consumer: at(offsets.consumer).cast::<AtomicU32>(),
            flags: at(offsets.flags).cast::<AtomicU32>(),
            slots: at(offsets.desc).cast::<T>(),
            size,
            mask: size - 1,
            _backing: Backing::Mmap { base, len },
        })
    }

    fn producer(&self) -> &AtomicU32 {
        // SAFETY: points into live ring storage, 4-byte aligned by the kernel
        // ABI (mmap) or by construction (heap).
        unsafe { &*self.producer }
    }

    fn consumer(&self) -> &AtomicU32 {
        // SAFETY: as for `producer`.
        unsafe { &*self.consumer }
    }

    fn flags(&self) -> &AtomicU32 {
        // SAFETY: as for `producer`.
        unsafe { &*self.flags }
    }

    fn slot(&self, idx: u32) -> *mut T {
        // SAFETY: masking keeps the offset inside the `size`-entry slot array.
        unsafe { self.slots.add((idx & self.mask) as usize) }
    }
}

/// Producer end of a ring (TX ring, fill ring).
pub struct ProducerRing<T: RingEntry> {
    view: RingView<T>,
    cached_prod: u32,
    /// Consumer cursor plus ring size, so `cached_cons - cached_prod` is free space.
    cached_cons: u32,
}

impl<T: RingEntry> ProducerRing<T> {
    fn from_view(view: RingView<T>) -> Self {
        let cached_prod = view.producer().load(Ordering::Relaxed);
        let cached_cons = view.consumer().load(Ordering::Acquire).wrapping_add(view.size);
        Self {
            view,
            cached_prod,
            cached_cons,
        }
    }

    /// Map the producer side of a socket ring.
    ///
    /// # Safety
    ///
    /// See [`ConsumerRing::mapped`].
    pub(crate) unsafe fn mapped(
        fd: c_int,
        pgoff: libc::off_t,
        offsets: &XdpRingOffset,
        size: u32,
    ) -> Result<Self, TransportError> {
        // SAFETY: forwarded caller contract.
        unsafe { RingView::mapped(fd, pgoff, offsets, size) }.map(Self::from_view)
    }

    /// Number of slots in the ring
    pub fn capacity(&self) -> u32 {
        self.view.size
    }

    /// Free slots, refreshing the consumer cursor only if fewer than `wanted`
    /// are known to be free.
    pub fn free(&mut self, wanted: u32) -> u32 {
        let free = self.cached_cons.wrapping_sub(self.cached_prod);
        if free >= wanted {
            return free;
        }
        self.cached_cons = self
            .view
            .consumer()
            .load(Ordering::Acquire)
            .wrapping_add(self.view.size);
        self.cached_cons.wrapping_sub(self.cached_prod)
    }

    /// Claim `n` contiguous slots.
    ///
    /// Returns the cursor of the first claimed slot, or `None` when the ring
    /// does not currently have `n` free slots. Never blocks.
    pub fn reserve(&mut self, n: u32) -> Option<u32> {
        if n > self.view.size || self.free(n) < n {
            return None;
        }
        let idx = self.cached_prod;
        self.cached_prod = idx.wrapping_add(n);
        Some(idx)
    }

    /// Fill a reserved, not yet submitted slot.
    pub fn write(&mut self, idx: u32, entry: T) {
        debug_assert!(
            self.cached_prod.wrapping_sub(idx).wrapping_sub(1) < self.reserved(),
            "slot {idx} is not reserved"
        );
        // SAFETY: the slot belongs to the reserved window, which the consumer
        // cannot read until the producer cursor is published past it.
        unsafe { self.view.slot(idx).write_volatile(entry) }
    }

    /// Publish `n` reserved slots to the consumer.
    pub fn submit(&mut self, n: u32) {
        debug_assert!(n <= self.reserved(), "submitting more than reserved");
        let prod = self.view.producer().load(Ordering::Relaxed);
        self.view
            .producer()
            .store(prod.wrapping_add(n), Ordering::Release);
    }

    /// Drop the last `n` reservations without publishing them.
    pub fn cancel(&mut self, n: u32) {
        debug_assert!(n <= self.reserved(), "cancelling more than reserved");
        self.cached_prod = self.cached_prod.wrapping_sub(n);
    }

    /// Whether the consumer has asked for an explicit wakeup.
    pub fn needs_wakeup(&self) -> bool {
        self.view.flags().load(Ordering::Acquire) & XDP_RING_NEED_WAKEUP != 0
    }

    /// Entries published but not yet taken by the consumer.
    pub fn pending(&self) -> u32 {
        self.view
            .producer()
            .load(Ordering::Relaxed)
            .wrapping_sub(self.view.consumer().load(Ordering::Acquire))
    }

    fn reserved(&self) -> u32 {
        self.cached_prod
            .wrapping_sub(self.view.producer().load(Ordering::Relaxed))
    }
}

impl<T: RingEntry> fmt::Debug for ProducerRing<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerRing")
            .field("size", &self.view.size)
            .field("cached_prod", &self.cached_prod)
            .field("cached_cons", &self.cached_cons)
            .finish()
    }
}

/// Consumer end of a ring (completion ring, RX ring).
pub struct ConsumerRing<T: RingEntry> {
    view: RingView<T>,
    cached_prod: u32,
    cached_cons: u32,
}

impl<T: RingEntry> ConsumerRing<T> {
    fn from_view(view: RingView<T>) -> Self {
        let cached_cons = view.consumer().load(Ordering::Relaxed);
        let cached_prod = view.producer().load(Ordering::Acquire);
        Self {
            view,
            cached_prod,
            cached_cons,
        }
    }

    /// Map the consumer side of a socket ring.
    ///
    /// # Safety
    ///
    /// `fd` must be an AF_XDP socket on which the ring selected by `pgoff`
    /// was sized to `size` entries, and `offsets` must be the kernel-reported
    /// layout for that ring.
    pub(crate) unsafe fn mapped(
        fd: c_int,
        pgoff: libc::off_t,
        offsets: &XdpRingOffset,
        size: u32,
    ) -> Result<Self, TransportError> {
        // SAFETY: forwarded caller contract.
        unsafe { RingView::mapped(fd, pgoff, offsets, size) }.map(Self::from_view)
    }

    /// Number of slots in the ring
    pub fn capacity(&self) -> u32 {
        self.view.size
    }

    /// Entries ready to consume, capped at `max`.
    pub fn available(&mut self, max: u32) -> u32 {
        let mut entries = self.cached_prod.wrapping_sub(self.cached_cons);
        if entries == 0 {
            self.cached_prod = self.view.producer().load(Ordering::Acquire);
            entries = self.cached_prod.wrapping_sub(self.cached_cons);
        }
        entries.min(max)
    }

    /// Take up to `max` ready entries.
    ///
    /// Returns the cursor of the first entry and the number taken, or `None`
    /// when nothing is ready. Entries stay owned by the ring until
    /// [`release`](Self::release) is called.
    pub fn peek(&mut self, max: u32) -> Option<(u32, u32)> {
        let n = self.available(max);
        if n == 0 {
            return None;
        }
        let idx = self.cached_cons;
        self.cached_cons = idx.wrapping_add(n);
        Some((idx, n))
    }

    /// Read a peeked entry.
    pub fn read(&self, idx: u32) -> T {
        // SAFETY: the producer published this slot (acquire load in
        // `available`) and will not rewrite it until it is released.
        unsafe { self.view.slot(idx).read_volatile() }
    }

    /// Hand `n` peeked entries back to the producer.
    pub fn release(&mut self, n: u32) {
        let cons = self.view.consumer().load(Ordering::Relaxed);
        debug_assert!(
            n <= self.cached_cons.wrapping_sub(cons),
            "releasing more than peeked"
        );
        self.view
            .consumer()
            .store(cons.wrapping_add(n), Ordering::Release);
    }

    /// Set or clear the need-wakeup flag seen by the producer.
    pub(crate) fn set_need_wakeup(&self, on: bool) {
        if on {
            self.view
                .flags()
                .fetch_or(XDP_RING_NEED_WAKEUP, Ordering::Release);
        } else {
            self.view
                .flags()
                .fetch_and(!XDP_RING_NEED_WAKEUP, Ordering::Release);
        }
    }
}

impl<T: RingEntry> fmt::Debug for ConsumerRing<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerRing")
            .field("size", &self.view.size)
            .field("cached_prod", &self.cached_prod)
            .field("cached_cons", &self.cached_cons)
            .finish()
    }
}

/// Create a connected in-process ring of `size` entries.
pub fn pair<T: RingEntry>(size: u32) -> Result<(ProducerRing<T>, ConsumerRing<T>), TransportError> {
    if size == 0 || !size.is_power_of_two() {
        return Err(TransportError::InvalidConfig(format!(
            "ring size {size} must be a non-zero power of 2"
        )));
    }

    let storage = Arc::new(HeapRing {
        producer: PaddedCursor(AtomicU32::new(0)),
        consumer: PaddedCursor(AtomicU32::new(0)),
        flags: AtomicU32::new(0),
        slots: (0..size).map(|_| UnsafeCell::new(T::default())).collect(),
    });

    let producer = ProducerRing::from_view(RingView::heap(&storage, size));
    let consumer = ConsumerRing::from_view(RingView::heap(&storage, size));
    Ok((producer, consumer))
}
