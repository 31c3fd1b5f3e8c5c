//! Transport error types.

use std::io;
use thiserror::Error;

/// Errors raised by the AF_XDP transport layer
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to create or register the UMEM
    #[error("Failed to create UMEM: {0}")]
    UmemCreation(String),

    /// Failed to create or configure an XSK socket
    #[error("Failed to create AF_XDP socket: {0}")]
    SocketCreation(String),

    /// Failed to bind the socket to the interface queue
    #[error("Failed to bind AF_XDP socket to {ifname} queue {queue_id}: {source}")]
    SocketBind {
        /// Interface name
        ifname: String,
        /// Queue id
        queue_id: u32,
        /// Underlying OS error
        source: io::Error,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Ring setup or mapping failed
    #[error("Ring operation failed: {0}")]
    Ring(String),

    /// Non-transient failure of the TX wakeup send
    #[error("TX wakeup failed on queue {queue_id}: {source}")]
    Wakeup {
        /// Queue id of the socket being kicked
        queue_id: u32,
        /// Underlying OS error
        source: io::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Returns true for send errors that only mean "try again later".
///
/// `EAGAIN`, `ENOBUFS` and `EBUSY` mean the kernel is still draining the ring;
/// `ENETDOWN` means the link is down and completions will resume with it.
pub fn is_transient_send_error(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::EAGAIN | libc::ENOBUFS | libc::EBUSY | libc::ENETDOWN)
    ) || err.kind() == io::ErrorKind::WouldBlock
}
