//! # pulsetx core
//!
//! Cyclic batch transmit engine for the pulsetx generator.
//!
//! This crate provides:
//! - The generator configuration and its validation
//! - The packet template with RFC 1071 / RFC 1624 checksums
//! - The double-buffered cycle scheduler
//! - Statistics sampling with deltas and rates
//! - The [`Engine`] tying a frame pool, sockets and scheduler together

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cancel;
pub mod checksum;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod packet;
pub mod scheduler;
pub mod stats;

pub use cancel::CancellationToken;
pub use config::{
    AttachMode, BindMode, BusyPoll, GeneratorConfig, MacAddr, TimestampClock, VlanTag,
};
pub use engine::{Engine, RunSummary};
pub use error::{ConfigError, Error, Result};
pub use packet::{PacketLayout, PacketTemplate, Stamp};
pub use scheduler::{CycleScheduler, CycleTable};
pub use stats::{
    CycleTiming, DriverRates, SocketCounters, SocketProbe, SocketRates, SocketReport,
    SocketSnapshot, StatsCollector, StatsReport, StatsSample, TimingSnapshot,
};
