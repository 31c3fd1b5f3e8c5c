//! Generator configuration.
//!
//! One [`GeneratorConfig`] value is built (from flags, a TOML file or code),
//! validated once, and then passed by reference to every component.

use crate::error::ConfigError;
use pulsetx_transport::sys::{XDP_COPY, XDP_USE_NEED_WAKEUP, XDP_USE_SG, XDP_ZEROCOPY};
use pulsetx_transport::umem::XDP_UMEM_MIN_CHUNK_SIZE;
use pulsetx_transport::{BusyPollConfig, SocketConfig, UmemConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;

/// Smallest packet accepted, FCS included
pub const MIN_PKT_SIZE: u32 = 64;
/// Largest packet accepted, FCS included
pub const MAX_PKT_SIZE: u32 = 9728;
/// Ethernet frame check sequence, counted in `packet_size` but not written
pub const ETH_FCS_SIZE: u32 = 4;

/// Ethernet header length
pub const ETH_HDR_LEN: u32 = 14;
/// 802.1Q-tagged Ethernet header length
pub const VLAN_ETH_HDR_LEN: u32 = 18;
/// IPv4 header length (no options)
pub const IPV4_HDR_LEN: u32 = 20;
/// UDP header length
pub const UDP_HDR_LEN: u32 = 8;
/// pktgen trailer record length
pub const PKTGEN_HDR_LEN: u32 = 16;

/// How the interface's XDP data path is driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttachMode {
    /// Driver (native) mode
    #[default]
    Native,
    /// Generic (skb) mode; implies copy binding
    Skb,
}

/// Zero-copy policy for the bind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BindMode {
    /// Let the kernel pick zero-copy when the driver supports it
    #[default]
    Auto,
    /// Require zero-copy
    ZeroCopy,
    /// Force copy mode
    Copy,
}

/// Clock used for trailer timestamps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimestampClock {
    /// `CLOCK_REALTIME`
    #[default]
    Realtime,
    /// `CLOCK_TAI`
    Tai,
    /// `CLOCK_BOOTTIME`
    Boottime,
    /// `CLOCK_MONOTONIC`
    Monotonic,
}

macro_rules! policy_from_str {
    ($ty:ty, $option:literal, { $($($name:literal)|+ => $variant:expr),+ $(,)? }) => {
        impl FromStr for $ty {
            type Err = ConfigError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_lowercase().as_str() {
                    $($($name)|+ => Ok($variant),)+
                    _ => Err(ConfigError::UnknownPolicy {
                        option: $option,
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

policy_from_str!(AttachMode, "attach mode", {
    "native" | "drv" => AttachMode::Native,
    "skb" | "generic" => AttachMode::Skb,
});

policy_from_str!(BindMode, "bind mode", {
    "auto" => BindMode::Auto,
    "zero-copy" | "zerocopy" | "zc" => BindMode::ZeroCopy,
    "copy" => BindMode::Copy,
});

policy_from_str!(TimestampClock, "clock", {
    "realtime" => TimestampClock::Realtime,
    "tai" => TimestampClock::Tai,
    "boottime" => TimestampClock::Boottime,
    "monotonic" => TimestampClock::Monotonic,
});

/// Ethernet MAC address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddr(pub [u8; 6]);

impl FromStr for MacAddr {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidMac(s.to_string());
        let mut bytes = [0u8; 6];
        let mut parts = s.split([':', '-']);
        for byte in &mut bytes {
            let part = parts.next().ok_or_else(invalid)?;
            if part.is_empty() || part.len() > 2 {
                return Err(invalid());
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for MacAddr {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddr> for String {
    fn from(mac: MacAddr) -> Self {
        mac.to_string()
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// 802.1Q tag settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlanTag {
    /// VLAN id (1..=4095)
    #[serde(default = "default_vlan_id")]
    pub id: u16,
    /// Priority code point (0..=7)
    #[serde(default)]
    pub priority: u8,
}

impl Default for VlanTag {
    fn default() -> Self {
        Self {
            id: default_vlan_id(),
            priority: 0,
        }
    }
}

impl VlanTag {
    /// Tag control information: 3-bit priority over a 12-bit id
    pub fn tci(&self) -> u16 {
        (self.id & 0x0fff) | ((u16::from(self.priority) << 13) & 0xe000)
    }
}

/// Busy-poll settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusyPoll {
    /// `SO_BUSY_POLL` timeout in microseconds
    #[serde(default = "default_busy_poll_timeout")]
    pub timeout_us: u32,
    /// Packets per busy poll; the batch size when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<u32>,
}

impl Default for BusyPoll {
    fn default() -> Self {
        Self {
            timeout_us: default_busy_poll_timeout(),
            budget: None,
        }
    }
}

/// Complete generator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Network interface to transmit on
    #[serde(default)]
    pub interface: String,
    /// Interface queue
    #[serde(default)]
    pub queue_id: u32,
    /// XDP attach mode
    #[serde(default)]
    pub attach_mode: AttachMode,
    /// Zero-copy policy
    #[serde(default)]
    pub bind_mode: BindMode,
    /// Use the need-wakeup protocol (kick only when the driver asks)
    #[serde(default = "default_true")]
    pub need_wakeup: bool,
    /// Allow non power-of-two frames backed by huge pages
    #[serde(default)]
    pub unaligned_chunks: bool,
    /// Allow packets to span several frames
    #[serde(default)]
    pub multi_buffer: bool,

    /// Frame size in bytes
    #[serde(default = "default_frame_size")]
    pub frame_size: u32,
    /// Frames in the pool
    #[serde(default = "default_num_frames")]
    pub num_frames: u32,
    /// TX ring entries per socket
    #[serde(default = "default_ring_size")]
    pub tx_ring_size: u32,
    /// Completion ring entries
    #[serde(default = "default_ring_size")]
    pub comp_ring_size: u32,
    /// Fill ring entries
    #[serde(default = "default_fill_ring_size")]
    pub fill_ring_size: u32,

    /// Packets per cycle and socket
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Cycles to run; 0 runs until cancelled or the duration expires
    #[serde(default = "default_cycles")]
    pub cycles: u64,
    /// Wall-clock bound on the run, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,
    /// Cycle period in microseconds
    #[serde(default = "default_cycle_period_us")]
    pub cycle_period_us: u64,

    /// Packet size in bytes, FCS included
    #[serde(default = "default_packet_size")]
    pub packet_size: u32,
    /// 32-bit payload fill pattern
    #[serde(default = "default_fill_pattern")]
    pub fill_pattern: u32,
    /// Source MAC
    #[serde(default = "default_src_mac")]
    pub src_mac: MacAddr,
    /// Destination MAC
    #[serde(default = "default_dst_mac")]
    pub dst_mac: MacAddr,
    /// Source IPv4 address
    #[serde(default = "default_src_ip")]
    pub src_ip: Ipv4Addr,
    /// Destination IPv4 address
    #[serde(default = "default_dst_ip")]
    pub dst_ip: Ipv4Addr,
    /// UDP source port
    #[serde(default = "default_port")]
    pub src_port: u16,
    /// UDP destination port
    #[serde(default = "default_port")]
    pub dst_port: u16,
    /// Append a pktgen trailer {magic, seq, tv_sec, tv_usec}
    #[serde(default)]
    pub timestamp: bool,
    /// Clock for trailer timestamps
    #[serde(default)]
    pub timestamp_clock: TimestampClock,

    /// Kick the driver every cycle regardless of the need-wakeup flag
    #[serde(default)]
    pub always_kick: bool,
    /// Sockets sharing the pool
    #[serde(default = "default_sockets")]
    pub sockets: u32,

    /// Completion drain attempts at shutdown
    #[serde(default = "default_drain_retries")]
    pub drain_retries: u32,
    /// Wait between drain attempts, in milliseconds
    #[serde(default = "default_drain_interval_ms")]
    pub drain_interval_ms: u64,
    /// `/proc/interrupts` name to count IRQs for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub irq_name: Option<String>,

    // Tables last so the TOML form stays valid
    /// 802.1Q tag, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlan: Option<VlanTag>,
    /// Busy-poll tuning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub busy_poll: Option<BusyPoll>,
}

// Default values

fn default_true() -> bool {
    true
}

fn default_frame_size() -> u32 {
    4096
}

fn default_num_frames() -> u32 {
    4 * 1024
}

fn default_ring_size() -> u32 {
    2048
}

fn default_fill_ring_size() -> u32 {
    4096
}

fn default_batch_size() -> u32 {
    1
}

fn default_cycles() -> u64 {
    10
}

fn default_cycle_period_us() -> u64 {
    10_000 // 10 ms
}

fn default_packet_size() -> u32 {
    MIN_PKT_SIZE
}

fn default_fill_pattern() -> u32 {
    0x1234_5678
}

fn default_vlan_id() -> u16 {
    1
}

fn default_src_mac() -> MacAddr {
    MacAddr([0xec, 0xb1, 0xd7, 0x98, 0x3a, 0xc0])
}

fn default_dst_mac() -> MacAddr {
    MacAddr([0x00, 0x00, 0x00, 0xc9, 0xa0, 0x00])
}

fn default_src_ip() -> Ipv4Addr {
    Ipv4Addr::new(10, 10, 10, 16)
}

fn default_dst_ip() -> Ipv4Addr {
    Ipv4Addr::new(10, 10, 10, 32)
}

fn default_port() -> u16 {
    0x1000
}

fn default_sockets() -> u32 {
    1
}

fn default_busy_poll_timeout() -> u32 {
    20
}

fn default_drain_retries() -> u32 {
    3
}

fn default_drain_interval_ms() -> u64 {
    1000
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            interface: String::new(),
            queue_id: 0,
            attach_mode: AttachMode::default(),
            bind_mode: BindMode::default(),
            need_wakeup: true,
            unaligned_chunks: false,
            multi_buffer: false,
            frame_size: default_frame_size(),
            num_frames: default_num_frames(),
            tx_ring_size: default_ring_size(),
            comp_ring_size: default_ring_size(),
            fill_ring_size: default_fill_ring_size(),
            batch_size: default_batch_size(),
            cycles: default_cycles(),
            duration_secs: None,
            cycle_period_us: default_cycle_period_us(),
            packet_size: default_packet_size(),
            fill_pattern: default_fill_pattern(),
            vlan: None,
            src_mac: default_src_mac(),
            dst_mac: default_dst_mac(),
            src_ip: default_src_ip(),
            dst_ip: default_dst_ip(),
            src_port: default_port(),
            dst_port: default_port(),
            timestamp: false,
            timestamp_clock: TimestampClock::default(),
            always_kick: false,
            sockets: default_sockets(),
            busy_poll: None,
            drain_retries: default_drain_retries(),
            drain_interval_ms: default_drain_interval_ms(),
            irq_name: None,
        }
    }
}

impl GeneratorConfig {
    /// Check every field and cross-field constraint.
    ///
    /// Nothing is allocated or opened before this passes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_size < XDP_UMEM_MIN_CHUNK_SIZE {
            return Err(ConfigError::FrameTooSmall(self.frame_size));
        }
        if !self.unaligned_chunks && !self.frame_size.is_power_of_two() {
            return Err(ConfigError::FrameNotPowerOfTwo(self.frame_size));
        }

        for (ring, size) in [
            ("TX", self.tx_ring_size),
            ("completion", self.comp_ring_size),
            ("fill", self.fill_ring_size),
        ] {
            if !size.is_power_of_two() {
                return Err(ConfigError::RingSize { ring, size });
            }
        }

        let size = self.effective_packet_size();
        if !(MIN_PKT_SIZE..=MAX_PKT_SIZE).contains(&size) {
            return Err(ConfigError::PacketSize {
                size,
                min: MIN_PKT_SIZE,
                max: MAX_PKT_SIZE,
            });
        }
        if !self.multi_buffer && self.wire_len() > self.frame_size {
            return Err(ConfigError::PacketExceedsFrame {
                packet: self.wire_len(),
                frame: self.frame_size,
            });
        }

        if let Some(vlan) = &self.vlan {
            if !(1..=4095).contains(&vlan.id) {
                return Err(ConfigError::VlanId(vlan.id));
            }
            if vlan.priority > 7 {
                return Err(ConfigError::VlanPriority(vlan.priority));
            }
        }

        if self.batch_size == 0 {
            return Err(ConfigError::EmptyBatch);
        }
        let needed = self.descriptors_per_batch();
        if needed > u64::from(self.tx_ring_size) {
            return Err(ConfigError::BatchExceedsRing {
                needed: u32::try_from(needed).unwrap_or(u32::MAX),
                capacity: self.tx_ring_size,
            });
        }

        if self.sockets == 0 {
            return Err(ConfigError::NoSockets);
        }
        let frames = needed * 2 * u64::from(self.sockets);
        if frames > u64::from(self.num_frames) {
            return Err(ConfigError::PoolTooSmall {
                needed: frames,
                available: self.num_frames,
            });
        }

        if self.cycle_period_us == 0 {
            return Err(ConfigError::ZeroPeriod);
        }

        Ok(())
    }

    /// Link-layer header length
    pub fn l2_len(&self) -> u32 {
        if self.vlan.is_some() {
            VLAN_ETH_HDR_LEN
        } else {
            ETH_HDR_LEN
        }
    }

    /// Configured packet size, raised to fit the trailer when timestamping
    pub fn effective_packet_size(&self) -> u32 {
        if self.timestamp {
            let min = self.l2_len() + IPV4_HDR_LEN + UDP_HDR_LEN + PKTGEN_HDR_LEN + ETH_FCS_SIZE;
            self.packet_size.max(min)
        } else {
            self.packet_size
        }
    }

    /// Bytes written per packet (FCS excluded)
    pub fn wire_len(&self) -> u32 {
        self.effective_packet_size().saturating_sub(ETH_FCS_SIZE)
    }

    /// Frames (and descriptors) each packet occupies
    pub fn frames_per_packet(&self) -> u32 {
        self.wire_len().div_ceil(self.frame_size).max(1)
    }

    /// TX descriptors submitted per socket each cycle
    pub fn descriptors_per_batch(&self) -> u64 {
        u64::from(self.batch_size) * u64::from(self.frames_per_packet())
    }

    /// Kick the driver every cycle, not only on need-wakeup
    pub fn kicks_every_cycle(&self) -> bool {
        self.always_kick || !self.need_wakeup
    }

    /// Cycle period
    pub fn cycle_period(&self) -> Duration {
        Duration::from_micros(self.cycle_period_us)
    }

    /// Run-time bound, if any
    pub fn duration(&self) -> Option<Duration> {
        self.duration_secs.map(Duration::from_secs)
    }

    /// Interval between shutdown drain attempts
    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }

    /// XDP bind flags for the UMEM-owning socket
    pub fn bind_flags(&self) -> u16 {
        let mut flags = match (self.bind_mode, self.attach_mode) {
            (BindMode::ZeroCopy, _) => XDP_ZEROCOPY,
            (BindMode::Copy, _) | (BindMode::Auto, AttachMode::Skb) => XDP_COPY,
            (BindMode::Auto, AttachMode::Native) => 0,
        };
        if self.need_wakeup {
            flags |= XDP_USE_NEED_WAKEUP;
        }
        if self.multi_buffer {
            flags |= XDP_USE_SG;
        }
        flags
    }

    /// UMEM settings derived from this configuration
    pub fn umem_config(&self) -> UmemConfig {
        UmemConfig {
            frame_size: self.frame_size,
            num_frames: self.num_frames,
            headroom: 0,
            fill_ring_size: self.fill_ring_size,
            comp_ring_size: self.comp_ring_size,
            unaligned_chunks: self.unaligned_chunks,
            lock_pages: true,
        }
    }

    /// Socket settings derived from this configuration
    pub fn socket_config(&self) -> SocketConfig {
        SocketConfig {
            queue_id: self.queue_id,
            tx_ring_size: self.tx_ring_size,
            bind_flags: self.bind_flags(),
            busy_poll: self.busy_poll.map(|bp| BusyPollConfig {
                timeout_us: bp.timeout_us,
                budget: bp.budget.unwrap_or(self.batch_size),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GeneratorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.wire_len(), 60);
        assert_eq!(config.frames_per_packet(), 1);
        assert_eq!(config.cycle_period(), Duration::from_millis(10));
        assert_eq!(config.bind_flags(), XDP_USE_NEED_WAKEUP);
        assert!(!config.kicks_every_cycle());
    }

    #[test]
    fn test_config_validation() {
        let bad = |f: fn(&mut GeneratorConfig)| {
            let mut config = GeneratorConfig::default();
            f(&mut config);
            config.validate().unwrap_err()
        };

        assert_eq!(bad(|c| c.frame_size = 3000), ConfigError::FrameNotPowerOfTwo(3000));
        assert_eq!(bad(|c| c.frame_size = 1024), ConfigError::FrameTooSmall(1024));
        assert!(matches!(bad(|c| c.packet_size = 63), ConfigError::PacketSize { .. }));
        assert!(matches!(bad(|c| c.packet_size = 9729), ConfigError::PacketSize { .. }));
        assert!(matches!(
            bad(|c| c.packet_size = 5000),
            ConfigError::PacketExceedsFrame { .. }
        ));
        assert_eq!(bad(|c| c.batch_size = 0), ConfigError::EmptyBatch);
        assert!(matches!(
            bad(|c| c.batch_size = 4096),
            ConfigError::BatchExceedsRing { .. }
        ));
        assert!(matches!(
            bad(|c| {
                c.batch_size = 1024;
                c.sockets = 4;
            }),
            ConfigError::PoolTooSmall { .. }
        ));
        assert_eq!(bad(|c| c.sockets = 0), ConfigError::NoSockets);
        assert_eq!(bad(|c| c.cycle_period_us = 0), ConfigError::ZeroPeriod);
        assert_eq!(
            bad(|c| c.vlan = Some(VlanTag { id: 0, priority: 0 })),
            ConfigError::VlanId(0)
        );
        assert_eq!(
            bad(|c| c.vlan = Some(VlanTag { id: 5, priority: 8 })),
            ConfigError::VlanPriority(8)
        );
        assert!(matches!(
            bad(|c| c.tx_ring_size = 1000),
            ConfigError::RingSize { ring: "TX", .. }
        ));
    }

    #[test]
    fn test_unaligned_allows_odd_frames() {
        let config = GeneratorConfig {
            frame_size: 3000,
            unaligned_chunks: true,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_multi_buffer_frames_per_packet() {
        let config = GeneratorConfig {
            packet_size: 9000,
            multi_buffer: true,
            batch_size: 8,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.wire_len(), 8996);
        assert_eq!(config.frames_per_packet(), 3);
        assert_eq!(config.descriptors_per_batch(), 24);
        assert_ne!(config.bind_flags() & XDP_USE_SG, 0);
    }

    #[test]
    fn test_timestamp_bumps_packet_size() {
        let config = GeneratorConfig {
            timestamp: true,
            vlan: Some(VlanTag::default()),
            ..Default::default()
        };
        // 18 + 20 + 8 + 16 + 4
        assert_eq!(config.effective_packet_size(), 66);

        let config = GeneratorConfig {
            timestamp: true,
            ..Default::default()
        };
        assert_eq!(config.effective_packet_size(), 64);
    }

    #[test]
    fn test_bind_flags() {
        let config = GeneratorConfig {
            attach_mode: AttachMode::Skb,
            need_wakeup: false,
            ..Default::default()
        };
        assert_eq!(config.bind_flags(), XDP_COPY);
        assert!(config.kicks_every_cycle());

        let config = GeneratorConfig {
            bind_mode: BindMode::ZeroCopy,
            ..Default::default()
        };
        assert_eq!(config.bind_flags(), XDP_ZEROCOPY | XDP_USE_NEED_WAKEUP);
    }

    #[test]
    fn test_busy_poll_budget_defaults_to_batch() {
        let config = GeneratorConfig {
            batch_size: 32,
            busy_poll: Some(BusyPoll::default()),
            ..Default::default()
        };
        let busy = config.socket_config().busy_poll.unwrap();
        assert_eq!(busy.timeout_us, 20);
        assert_eq!(busy.budget, 32);
    }

    #[test]
    fn test_mac_parse_and_display() {
        let mac: MacAddr = "EC:B1:d7:98:3a:c0".parse().unwrap();
        assert_eq!(mac.0, [0xec, 0xb1, 0xd7, 0x98, 0x3a, 0xc0]);
        assert_eq!(mac.to_string(), "ec:b1:d7:98:3a:c0");
        assert_eq!("00-11-22-33-44-55".parse::<MacAddr>().unwrap().0[5], 0x55);

        for bad in ["", "00:11:22:33:44", "00:11:22:33:44:55:66", "0g:11:22:33:44:55", "000:1:2:3:4:5"] {
            assert!(bad.parse::<MacAddr>().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("SKB".parse::<AttachMode>().unwrap(), AttachMode::Skb);
        assert_eq!("zc".parse::<BindMode>().unwrap(), BindMode::ZeroCopy);
        assert_eq!("tai".parse::<TimestampClock>().unwrap(), TimestampClock::Tai);
        assert!(matches!(
            "fast".parse::<BindMode>(),
            Err(ConfigError::UnknownPolicy { option: "bind mode", .. })
        ));
    }

    #[test]
    fn test_vlan_tci() {
        let tag = VlanTag { id: 100, priority: 5 };
        assert_eq!(tag.tci(), (5 << 13) | 100);
    }

    #[test]
    fn test_toml_serialization() {
        let config = GeneratorConfig {
            interface: "eth0".into(),
            vlan: Some(VlanTag { id: 7, priority: 3 }),
            busy_poll: Some(BusyPoll::default()),
            ..Default::default()
        };
        let text = toml::to_string(&config).unwrap();
        let parsed: GeneratorConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);

        // Missing fields fall back to defaults
        let parsed: GeneratorConfig = toml::from_str(
            r#"
            interface = "enp1s0"
            batch_size = 4
            dst_mac = "aa:bb:cc:dd:ee:ff"
            bind_mode = "zero-copy"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.batch_size, 4);
        assert_eq!(parsed.frame_size, 4096);
        assert_eq!(parsed.bind_mode, BindMode::ZeroCopy);
        assert_eq!(parsed.dst_mac.0, [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);

        assert!(toml::from_str::<GeneratorConfig>(r#"src_mac = "nope""#).is_err());
    }
}
