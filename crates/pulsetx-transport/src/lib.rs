//! # pulsetx transport
//!
//! AF_XDP transmit plumbing for the pulsetx generator.
//!
//! This crate provides:
//! - The UMEM frame pool
//! - Lock-free producer/consumer rings, kernel-mapped or in-process
//! - XSK socket setup, TX wakeups and driver statistics
//! - A loopback driver that plays the kernel's part for tests and dry runs

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod error;
pub mod irq;
pub mod loopback;
pub mod queue;
pub mod ring;
pub mod socket;
#[allow(missing_docs)]
pub mod sys;
pub mod umem;

pub use error::{TransportError, is_transient_send_error};
pub use irq::IrqCounter;
pub use loopback::{Loopback, LoopbackHandle, LoopbackOptions, LoopbackQueue, TxRecord};
pub use queue::{DriverStats, DriverStatsSource, TxQueue};
pub use ring::{ConsumerRing, ProducerRing, RingEntry, XdpDesc};
pub use socket::{BusyPollConfig, SocketConfig, XskSocket};
pub use umem::{Umem, UmemConfig, UmemRegion};
