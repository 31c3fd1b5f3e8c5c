//! Kernel ABI for AF_XDP sockets (linux/if_xdp.h).
//!
//! The layouts below must match the kernel headers exactly. They are declared
//! here rather than pulled from `libc` so the crate builds against older libc
//! releases that predate the XDP definitions.

use std::os::raw::c_int;

/// `AF_XDP` address family
pub const AF_XDP: c_int = 44;

/// `SOL_XDP` socket option level
pub const SOL_XDP: c_int = 283;

// SOL_XDP socket options
pub const XDP_MMAP_OFFSETS: c_int = 1;
pub const XDP_RX_RING: c_int = 2;
pub const XDP_TX_RING: c_int = 3;
pub const XDP_UMEM_REG: c_int = 4;
pub const XDP_UMEM_FILL_RING: c_int = 5;
pub const XDP_UMEM_COMPLETION_RING: c_int = 6;
pub const XDP_STATISTICS: c_int = 7;
pub const XDP_OPTIONS: c_int = 8;

/// `xdp_options.flags` bit reported when the socket runs in zero-copy mode
pub const XDP_OPTIONS_ZEROCOPY: u32 = 1 << 0;

// mmap page offsets for each ring
pub const XDP_PGOFF_RX_RING: libc::off_t = 0;
pub const XDP_PGOFF_TX_RING: libc::off_t = 0x8000_0000;
pub const XDP_UMEM_PGOFF_FILL_RING: libc::off_t = 0x1_0000_0000;
pub const XDP_UMEM_PGOFF_COMPLETION_RING: libc::off_t = 0x1_8000_0000;

/// Bind flag: share the UMEM of another socket
pub const XDP_SHARED_UMEM: u16 = 1 << 0;
/// Bind flag: force copy mode
pub const XDP_COPY: u16 = 1 << 1;
/// Bind flag: force zero-copy mode
pub const XDP_ZEROCOPY: u16 = 1 << 2;
/// Bind flag: enable the need-wakeup ring flag
pub const XDP_USE_NEED_WAKEUP: u16 = 1 << 3;
/// Bind flag: multi-buffer (scatter-gather) packets
pub const XDP_USE_SG: u16 = 1 << 4;

/// UMEM registration flag: chunks may start at any address
pub const XDP_UMEM_UNALIGNED_CHUNK_FLAG: u32 = 1 << 0;

/// Ring flag set by the kernel when it needs a `sendto` to resume
pub const XDP_RING_NEED_WAKEUP: u32 = 1 << 0;

/// Descriptor option: more fragments of this packet follow
pub const XDP_PKT_CONTD: u32 = 1 << 0;

// Busy-poll socket options (SOL_SOCKET level)
pub const SO_BUSY_POLL: c_int = 46;
pub const SO_PREFER_BUSY_POLL: c_int = 69;
pub const SO_BUSY_POLL_BUDGET: c_int = 70;

/// `struct xdp_umem_reg`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct XdpUmemReg {
    pub addr: u64,
    pub len: u64,
    pub chunk_size: u32,
    pub headroom: u32,
    pub flags: u32,
}

/// `struct xdp_ring_offset`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct XdpRingOffset {
    pub producer: u64,
    pub consumer: u64,
    pub desc: u64,
    pub flags: u64,
}

/// `struct xdp_mmap_offsets`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct XdpMmapOffsets {
    pub rx: XdpRingOffset,
    pub tx: XdpRingOffset,
    /// fill ring
    pub fr: XdpRingOffset,
    /// completion ring
    pub cr: XdpRingOffset,
}

/// `struct sockaddr_xdp`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SockaddrXdp {
    pub sxdp_family: u16,
    pub sxdp_flags: u16,
    pub sxdp_ifindex: u32,
    pub sxdp_queue_id: u32,
    pub sxdp_shared_umem_fd: u32,
}

/// `struct xdp_options`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct XdpOptions {
    pub flags: u32,
}

/// `struct xdp_statistics`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct XdpStatistics {
    pub rx_dropped: u64,
    pub rx_invalid_descs: u64,
    pub tx_invalid_descs: u64,
    pub rx_ring_full: u64,
    pub rx_fill_ring_empty_descs: u64,
    pub tx_ring_empty_descs: u64,
}
