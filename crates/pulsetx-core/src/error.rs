//! Error types for the pulsetx engine.

use pulsetx_transport::TransportError;
use thiserror::Error;

/// Engine errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration rejected before any resource was created
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Resource setup or fatal I/O failure in the transport
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Configuration errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Frame size below the kernel minimum
    #[error("frame size {0} is below the minimum of 2048")]
    FrameTooSmall(u32),

    /// Frame size must be a power of two in aligned mode
    #[error("frame size {0} is not a power of two (enable unaligned chunks to allow it)")]
    FrameNotPowerOfTwo(u32),

    /// Ring size must be a non-zero power of two
    #[error("{ring} ring size {size} is not a power of two")]
    RingSize {
        /// Which ring
        ring: &'static str,
        /// Configured size
        size: u32,
    },

    /// Packet size outside the accepted range
    #[error("packet size {size} outside {min}..={max}")]
    PacketSize {
        /// Configured size
        size: u32,
        /// Minimum accepted
        min: u32,
        /// Maximum accepted
        max: u32,
    },

    /// Packet does not fit in one frame and multi-buffer is off
    #[error("packet of {packet} bytes does not fit a {frame}-byte frame without multi-buffer")]
    PacketExceedsFrame {
        /// Bytes on the wire (FCS excluded)
        packet: u32,
        /// Frame size
        frame: u32,
    },

    /// Batch size of zero
    #[error("batch size must be at least 1")]
    EmptyBatch,

    /// Batch needs more descriptors than the TX ring holds
    #[error("batch needs {needed} descriptors but the TX ring holds {capacity}")]
    BatchExceedsRing {
        /// Descriptors per batch
        needed: u32,
        /// TX ring capacity
        capacity: u32,
    },

    /// Frame pool too small for the double-buffered tables of all sockets
    #[error("{needed} frames needed but the pool has {available}")]
    PoolTooSmall {
        /// Frames required
        needed: u64,
        /// Frames configured
        available: u32,
    },

    /// Socket count of zero
    #[error("at least one socket is required")]
    NoSockets,

    /// Cycle period of zero
    #[error("cycle period must be non-zero")]
    ZeroPeriod,

    /// VLAN id outside 1..=4095
    #[error("VLAN id {0} outside 1..=4095")]
    VlanId(u16),

    /// VLAN priority above 7
    #[error("VLAN priority {0} above 7")]
    VlanPriority(u8),

    /// Malformed MAC address
    #[error("invalid MAC address: {0}")]
    InvalidMac(String),

    /// Unknown value for an enumerated option
    #[error("unknown {option} '{value}'")]
    UnknownPolicy {
        /// Option name
        option: &'static str,
        /// Value given
        value: String,
    },

    /// Interface name missing
    #[error("interface name is required")]
    MissingInterface,
}

/// Result alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;
