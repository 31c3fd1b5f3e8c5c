//! The seam between the transmit scheduler and whatever drains its TX ring.

use crate::error::TransportError;
use crate::ring::{ProducerRing, XdpDesc};
use crate::sys::XdpStatistics;
use std::sync::Arc;

/// Driver-level socket counters (`XDP_STATISTICS`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStats {
    /// Received frames dropped for reasons other than invalid descriptors
    pub rx_dropped: u64,
    /// Invalid RX descriptors
    pub rx_invalid: u64,
    /// Invalid TX descriptors
    pub tx_invalid: u64,
    /// Times the RX ring was full
    pub rx_ring_full: u64,
    /// Times the fill ring was empty
    pub rx_fill_empty: u64,
    /// Times the TX ring was found empty by the driver
    pub tx_ring_empty: u64,
}

impl From<XdpStatistics> for DriverStats {
    fn from(s: XdpStatistics) -> Self {
        Self {
            rx_dropped: s.rx_dropped,
            rx_invalid: s.rx_invalid_descs,
            tx_invalid: s.tx_invalid_descs,
            rx_ring_full: s.rx_ring_full,
            rx_fill_empty: s.rx_fill_ring_empty_descs,
            tx_ring_empty: s.tx_ring_empty_descs,
        }
    }
}

/// Something that can be asked for [`DriverStats`] from any thread.
pub trait DriverStatsSource: Send + Sync {
    /// Current counters, or `None` when the driver cannot report them.
    fn driver_stats(&self) -> Option<DriverStats>;
}

/// A transmit queue: the producer end of a TX ring plus its wakeup signal.
///
/// Implemented by [`XskSocket`](crate::socket::XskSocket) for real interfaces
/// and by [`LoopbackQueue`](crate::loopback::LoopbackQueue) for in-process runs.
pub trait TxQueue: Send {
    /// Interface queue this socket is bound to
    fn queue_id(&self) -> u32;

    /// The TX ring (process is producer)
    fn tx_ring(&mut self) -> &mut ProducerRing<XdpDesc>;

    /// Non-blocking nudge to make the consumer drain the TX ring.
    ///
    /// Transient conditions (would-block, no buffers, busy, link down) are
    /// reported as `Ok`; anything else is fatal.
    fn wake(&mut self) -> Result<(), TransportError>;

    /// Whether packets are copied by the kernel rather than sent zero-copy
    fn is_copy_mode(&self) -> bool;

    /// Handle for querying driver statistics off the transmit thread
    fn stats_source(&self) -> Option<Arc<dyn DriverStatsSource>>;
}
