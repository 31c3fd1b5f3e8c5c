//! AF_XDP (XSK) sockets for transmit.
//!
//! The first socket on a queue registers the UMEM and owns its fill and
//! completion rings. Further sockets bind with `XDP_SHARED_UMEM` to the same
//! interface queue; the kernel then routes all of their completions through
//! the owner's completion ring.
//!
//! Only the TX ring is created. No XDP program is needed for transmit.

use crate::error::{TransportError, is_transient_send_error};
use crate::queue::{DriverStats, DriverStatsSource, TxQueue};
use crate::ring::{ConsumerRing, ProducerRing, XdpDesc};
use crate::sys::*;
use crate::umem::Umem;
use socket2::{Domain, Socket, Type};
use std::ffi::CString;
use std::io;
use std::mem::size_of;
use std::os::fd::AsRawFd;
use std::os::raw::{c_int, c_void};
use std::sync::Arc;
use tracing::{debug, info};

/// Busy-poll tuning applied to each socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusyPollConfig {
    /// `SO_BUSY_POLL` timeout in microseconds
    pub timeout_us: u32,
    /// `SO_BUSY_POLL_BUDGET` packets per poll
    pub budget: u32,
}

/// AF_XDP socket configuration
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Queue ID to attach to
    pub queue_id: u32,

    /// Number of TX ring entries (must be power of 2)
    pub tx_ring_size: u32,

    /// Bind flags (XDP_COPY, XDP_ZEROCOPY, XDP_USE_NEED_WAKEUP, XDP_USE_SG)
    pub bind_flags: u16,

    /// Busy-poll tuning, if any
    pub busy_poll: Option<BusyPollConfig>,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            queue_id: 0,
            tx_ring_size: 2048,
            bind_flags: XDP_USE_NEED_WAKEUP,
            busy_poll: None,
        }
    }
}

impl SocketConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), TransportError> {
        if !self.tx_ring_size.is_power_of_two() {
            return Err(TransportError::InvalidConfig(
                "tx_ring_size must be power of 2".into(),
            ));
        }

        if self.bind_flags & XDP_COPY != 0 && self.bind_flags & XDP_ZEROCOPY != 0 {
            return Err(TransportError::InvalidConfig(
                "copy and zero-copy modes are mutually exclusive".into(),
            ));
        }

        if self.bind_flags & XDP_SHARED_UMEM != 0 {
            return Err(TransportError::InvalidConfig(
                "XDP_SHARED_UMEM is set internally for secondary sockets".into(),
            ));
        }

        Ok(())
    }
}

/// Resolve an interface name to its index
pub fn interface_index(ifname: &str) -> Result<u32, TransportError> {
    let name = CString::new(ifname)
        .map_err(|e| TransportError::InvalidConfig(format!("Invalid interface name: {e}")))?;

    // SAFETY: if_nametoindex reads a NUL-terminated string, which CString guarantees.
    let idx = unsafe { libc::if_nametoindex(name.as_ptr()) };
    if idx == 0 {
        return Err(TransportError::InvalidConfig(format!(
            "Interface '{ifname}' not found"
        )));
    }
    Ok(idx)
}

fn set_opt<T>(fd: c_int, level: c_int, name: c_int, value: &T) -> io::Result<()> {
    // SAFETY: `value` is a live, properly sized option value for the duration
    // of the call; the kernel validates level and name.
    let ret = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            (value as *const T).cast::<c_void>(),
            size_of::<T>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Read a fixed-size option. Returns the value and the length the kernel filled in.
fn get_opt<T: Default>(fd: c_int, level: c_int, name: c_int) -> io::Result<(T, usize)> {
    let mut value = T::default();
    let mut len = size_of::<T>() as libc::socklen_t;
    // SAFETY: the buffer is `len` bytes of writable, properly aligned memory.
    let ret = unsafe {
        libc::getsockopt(
            fd,
            level,
            name,
            (&mut value as *mut T).cast::<c_void>(),
            &mut len,
        )
    };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok((value, len as usize))
    }
}

fn driver_stats_of(fd: c_int) -> Option<DriverStats> {
    match get_opt::<XdpStatistics>(fd, SOL_XDP, XDP_STATISTICS) {
        Ok((raw, len)) if len == size_of::<XdpStatistics>() => Some(raw.into()),
        Ok((_, len)) => {
            debug!(len, "XDP_STATISTICS returned a short structure");
            None
        }
        Err(e) => {
            debug!(error = %e, "XDP_STATISTICS unavailable");
            None
        }
    }
}

fn new_xdp_socket() -> Result<Socket, TransportError> {
    Socket::new(Domain::from(AF_XDP), Type::from(libc::SOCK_RAW), None)
        .map_err(|e| TransportError::SocketCreation(e.to_string()))
}

fn configure_ring(fd: c_int, option: c_int, size: u32, name: &str) -> Result<(), TransportError> {
    set_opt(fd, SOL_XDP, option, &size)
        .map_err(|e| TransportError::Ring(format!("Failed to configure {name} ring: {e}")))
}

fn apply_busy_poll(fd: c_int, busy_poll: &BusyPollConfig) -> Result<(), TransportError> {
    let opts: [(c_int, c_int, &str); 3] = [
        (SO_PREFER_BUSY_POLL, 1, "SO_PREFER_BUSY_POLL"),
        (SO_BUSY_POLL, busy_poll.timeout_us as c_int, "SO_BUSY_POLL"),
        (SO_BUSY_POLL_BUDGET, busy_poll.budget as c_int, "SO_BUSY_POLL_BUDGET"),
    ];
    for (name, value, label) in opts {
        set_opt(fd, libc::SOL_SOCKET, name, &value)
            .map_err(|e| TransportError::SocketCreation(format!("{label}: {e}")))?;
    }
    Ok(())
}

/// AF_XDP socket with a TX ring
pub struct XskSocket {
    tx: ProducerRing<XdpDesc>,
    socket: Socket,
    ifname: String,
    queue_id: u32,
    zero_copy: bool,
}

impl XskSocket {
    /// Create the UMEM-owning socket for `ifname`.
    ///
    /// Returns the socket and the completion ring, which every socket sharing
    /// this UMEM on the same queue completes into.
    pub fn new_owner(
        ifname: &str,
        umem: &Umem,
        config: &SocketConfig,
    ) -> Result<(Self, ConsumerRing<u64>), TransportError> {
        config.validate()?;
        let ifindex = interface_index(ifname)?;
        let socket = new_xdp_socket()?;
        let fd = socket.as_raw_fd();
        let umem_config = umem.config();

        let reg = XdpUmemReg {
            addr: umem.as_ptr() as u64,
            len: umem.size() as u64,
            chunk_size: umem_config.frame_size,
            headroom: umem_config.headroom,
            flags: if umem_config.unaligned_chunks {
                XDP_UMEM_UNALIGNED_CHUNK_FLAG
            } else {
                0
            },
        };
        set_opt(fd, SOL_XDP, XDP_UMEM_REG, &reg)
            .map_err(|e| TransportError::UmemCreation(format!("Failed to register UMEM: {e}")))?;

        configure_ring(fd, XDP_UMEM_FILL_RING, umem_config.fill_ring_size, "fill")?;
        configure_ring(fd, XDP_UMEM_COMPLETION_RING, umem_config.comp_ring_size, "completion")?;
        configure_ring(fd, XDP_TX_RING, config.tx_ring_size, "TX")?;

        let offsets = mmap_offsets(fd)?;

        // SAFETY: the completion ring was sized above and `offsets.cr` is the
        // layout the kernel reported for it.
        let completion = unsafe {
            ConsumerRing::<u64>::mapped(
                fd,
                XDP_UMEM_PGOFF_COMPLETION_RING,
                &offsets.cr,
                umem_config.comp_ring_size,
            )?
        };

        let socket = Self::finish(socket, ifname, ifindex, config, config.bind_flags, 0, &offsets)?;
        info!(
            ifname,
            queue_id = config.queue_id,
            zero_copy = socket.zero_copy,
            "AF_XDP socket bound (UMEM owner)"
        );
        Ok((socket, completion))
    }

    /// Create a socket sharing `owner`'s UMEM on the same interface queue.
    pub fn new_shared(owner: &XskSocket, config: &SocketConfig) -> Result<Self, TransportError> {
        config.validate()?;
        if config.queue_id != owner.queue_id {
            return Err(TransportError::InvalidConfig(format!(
                "shared sockets must use the owner's queue {} (got {})",
                owner.queue_id, config.queue_id
            )));
        }
        let ifindex = interface_index(&owner.ifname)?;
        let socket = new_xdp_socket()?;
        let fd = socket.as_raw_fd();

        configure_ring(fd, XDP_TX_RING, config.tx_ring_size, "TX")?;
        let offsets = mmap_offsets(fd)?;

        // The kernel rejects mode flags on shared binds; they follow the owner.
        let socket = Self::finish(
            socket,
            &owner.ifname,
            ifindex,
            config,
            XDP_SHARED_UMEM,
            owner.socket.as_raw_fd() as u32,
            &offsets,
        )?;
        info!(
            ifname = %socket.ifname,
            queue_id = config.queue_id,
            "AF_XDP socket bound (shared UMEM)"
        );
        Ok(socket)
    }

    /// Map the TX ring, apply busy poll, bind and probe the data path mode.
    fn finish(
        socket: Socket,
        ifname: &str,
        ifindex: u32,
        config: &SocketConfig,
        bind_flags: u16,
        shared_umem_fd: u32,
        offsets: &XdpMmapOffsets,
    ) -> Result<Self, TransportError> {
        let fd = socket.as_raw_fd();

        // SAFETY: the TX ring was sized on this socket and `offsets.tx` is the
        // layout the kernel reported for it.
        let tx = unsafe {
            ProducerRing::<XdpDesc>::mapped(fd, XDP_PGOFF_TX_RING, &offsets.tx, config.tx_ring_size)?
        };

        if let Some(busy_poll) = &config.busy_poll {
            apply_busy_poll(fd, busy_poll)?;
        }

        let addr = SockaddrXdp {
            sxdp_family: AF_XDP as u16,
            sxdp_flags: bind_flags,
            sxdp_ifindex: ifindex,
            sxdp_queue_id: config.queue_id,
            sxdp_shared_umem_fd: shared_umem_fd,
        };
        // SAFETY: addr is a complete sockaddr_xdp and its exact size is passed.
        let ret = unsafe {
            libc::bind(
                fd,
                (&addr as *const SockaddrXdp).cast::<libc::sockaddr>(),
                size_of::<SockaddrXdp>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(TransportError::SocketBind {
                ifname: ifname.to_string(),
                queue_id: config.queue_id,
                source: io::Error::last_os_error(),
            });
        }

        let zero_copy = get_opt::<XdpOptions>(fd, SOL_XDP, XDP_OPTIONS)
            .map(|(opts, _)| opts.flags & XDP_OPTIONS_ZEROCOPY != 0)
            .unwrap_or(bind_flags & XDP_ZEROCOPY != 0);

        Ok(Self {
            tx,
            socket,
            ifname: ifname.to_string(),
            queue_id: config.queue_id,
            zero_copy,
        })
    }

    /// Interface name
    pub fn ifname(&self) -> &str {
        &self.ifname
    }

    /// Current driver counters, `None` when the kernel cannot report them
    pub fn driver_stats(&self) -> Option<DriverStats> {
        driver_stats_of(self.socket.as_raw_fd())
    }
}

fn mmap_offsets(fd: c_int) -> Result<XdpMmapOffsets, TransportError> {
    get_opt::<XdpMmapOffsets>(fd, SOL_XDP, XDP_MMAP_OFFSETS)
        .map(|(offsets, _)| offsets)
        .map_err(|e| TransportError::Ring(format!("Failed to get mmap offsets: {e}")))
}

impl TxQueue for XskSocket {
    fn queue_id(&self) -> u32 {
        self.queue_id
    }

    fn tx_ring(&mut self) -> &mut ProducerRing<XdpDesc> {
        &mut self.tx
    }

    fn wake(&mut self) -> Result<(), TransportError> {
        match self.socket.send_with_flags(&[], libc::MSG_DONTWAIT) {
            Ok(_) => Ok(()),
            Err(e) if is_transient_send_error(&e) => Ok(()),
            Err(source) => Err(TransportError::Wakeup {
                queue_id: self.queue_id,
                source,
            }),
        }
    }

    fn is_copy_mode(&self) -> bool {
        !self.zero_copy
    }

    fn stats_source(&self) -> Option<Arc<dyn DriverStatsSource>> {
        match self.socket.try_clone() {
            Ok(socket) => Some(Arc::new(XskStatsProbe { socket })),
            Err(e) => {
                debug!(error = %e, "cannot duplicate XSK fd for statistics");
                None
            }
        }
    }
}

/// Duplicated socket handle used to read `XDP_STATISTICS` from another thread.
struct XskStatsProbe {
    socket: Socket,
}

impl DriverStatsSource for XskStatsProbe {
    fn driver_stats(&self) -> Option<DriverStats> {
        driver_stats_of(self.socket.as_raw_fd())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::umem::UmemConfig;

    #[test]
    fn test_socket_config_validate() {
        assert!(SocketConfig::default().validate().is_ok());

        let config = SocketConfig {
            tx_ring_size: 1000,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SocketConfig {
            bind_flags: XDP_COPY | XDP_ZEROCOPY,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SocketConfig {
            bind_flags: XDP_SHARED_UMEM,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_interface() {
        let err = interface_index("pulsetx-nonexistent0").unwrap_err();
        assert!(matches!(err, TransportError::InvalidConfig(_)));
        assert!(interface_index("bad\0name").is_err());
    }

    #[test]
    fn test_owner_socket_on_loopback_interface() {
        let Ok(umem) = UmemConfig {
            frame_size: 2048,
            num_frames: 64,
            fill_ring_size: 64,
            comp_ring_size: 64,
            lock_pages: false,
            ..Default::default()
        }
        .create() else {
            eprintln!("Skipping XSK test: mmap failed");
            return;
        };

        let config = SocketConfig {
            tx_ring_size: 64,
            bind_flags: XDP_COPY,
            ..Default::default()
        };
        // Requires CAP_NET_RAW and AF_XDP support; skip otherwise
        let Ok((mut socket, completion)) = XskSocket::new_owner("lo", &umem, &config) else {
            eprintln!("Skipping XSK test: AF_XDP socket unavailable");
            return;
        };

        assert_eq!(socket.tx_ring().capacity(), 64);
        assert_eq!(completion.capacity(), 64);
        assert!(socket.is_copy_mode());
        assert!(socket.wake().is_ok());
    }
}
