//! Configuration loading for the pulsetx CLI.
//!
//! A TOML file (if given) supplies the base [`GeneratorConfig`]; command-line
//! flags override individual fields on top of it.

use anyhow::Context;
use clap::Args;
use pulsetx_core::{
    AttachMode, BindMode, BusyPoll, GeneratorConfig, MacAddr, TimestampClock, VlanTag,
};
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;

/// Generator settings given on the command line.
///
/// Every field is optional; unset fields keep the file or default value.
#[derive(Debug, Clone, Default, Args)]
pub struct Overrides {
    /// Network interface to transmit on
    #[arg(short, long)]
    pub interface: Option<String>,

    /// Interface queue
    #[arg(short = 'Q', long = "queue")]
    pub queue_id: Option<u32>,

    /// XDP attach mode: native or skb
    #[arg(long)]
    pub attach_mode: Option<AttachMode>,

    /// Zero-copy policy: auto, zero-copy or copy
    #[arg(long)]
    pub bind_mode: Option<BindMode>,

    /// Disable the need-wakeup protocol (kick the driver every cycle)
    #[arg(long)]
    pub no_need_wakeup: bool,

    /// Kick the driver every cycle even with need-wakeup
    #[arg(long)]
    pub always_kick: bool,

    /// Allow non power-of-two frames backed by huge pages
    #[arg(long)]
    pub unaligned: bool,

    /// Allow packets to span several frames
    #[arg(long)]
    pub multi_buffer: bool,

    /// Frame size in bytes
    #[arg(long)]
    pub frame_size: Option<u32>,

    /// Frames in the pool
    #[arg(long)]
    pub num_frames: Option<u32>,

    /// TX ring entries per socket
    #[arg(long)]
    pub tx_ring_size: Option<u32>,

    /// Completion ring entries
    #[arg(long)]
    pub comp_ring_size: Option<u32>,

    /// Fill ring entries
    #[arg(long)]
    pub fill_ring_size: Option<u32>,

    /// Packets per cycle and socket
    #[arg(short, long = "batch")]
    pub batch_size: Option<u32>,

    /// Cycles to run (0 = until interrupted)
    #[arg(short = 'n', long)]
    pub cycles: Option<u64>,

    /// Stop after this many seconds
    #[arg(short, long = "duration")]
    pub duration_secs: Option<u64>,

    /// Cycle period in microseconds
    #[arg(short = 'p', long = "period-us")]
    pub cycle_period_us: Option<u64>,

    /// Packet size in bytes, FCS included
    #[arg(short = 's', long)]
    pub packet_size: Option<u32>,

    /// 32-bit payload fill pattern (decimal or 0x-prefixed hex)
    #[arg(long, value_parser = parse_u32)]
    pub fill_pattern: Option<u32>,

    /// Source MAC address
    #[arg(long)]
    pub src_mac: Option<MacAddr>,

    /// Destination MAC address
    #[arg(long)]
    pub dst_mac: Option<MacAddr>,

    /// Source IPv4 address
    #[arg(long)]
    pub src_ip: Option<Ipv4Addr>,

    /// Destination IPv4 address
    #[arg(long)]
    pub dst_ip: Option<Ipv4Addr>,

    /// UDP source port
    #[arg(long, value_parser = parse_u16)]
    pub src_port: Option<u16>,

    /// UDP destination port
    #[arg(long, value_parser = parse_u16)]
    pub dst_port: Option<u16>,

    /// Tag packets with 802.1Q (id 1, priority 0 unless given)
    #[arg(long)]
    pub vlan: bool,

    /// VLAN id; implies --vlan
    #[arg(long)]
    pub vlan_id: Option<u16>,

    /// VLAN priority; implies --vlan
    #[arg(long)]
    pub vlan_priority: Option<u8>,

    /// Append a pktgen timestamp trailer
    #[arg(short, long)]
    pub timestamp: bool,

    /// Clock for trailer timestamps: realtime, tai, boottime or monotonic
    #[arg(long)]
    pub clock: Option<TimestampClock>,

    /// Sockets sharing the frame pool
    #[arg(long)]
    pub sockets: Option<u32>,

    /// Busy-poll timeout in microseconds; enables busy polling
    #[arg(long)]
    pub busy_poll_us: Option<u32>,

    /// Packets per busy poll (defaults to the batch size); enables busy polling
    #[arg(long)]
    pub busy_poll_budget: Option<u32>,

    /// Completion drain attempts at shutdown
    #[arg(long)]
    pub drain_retries: Option<u32>,

    /// Wait between drain attempts, in milliseconds
    #[arg(long)]
    pub drain_interval_ms: Option<u64>,

    /// Count interrupts of /proc/interrupts lines containing this name
    #[arg(long)]
    pub irq_name: Option<String>,
}

fn parse_u32(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{s}': {e}"))
}

fn parse_u16(s: &str) -> Result<u16, String> {
    let value = parse_u32(s)?;
    u16::try_from(value).map_err(|_| format!("{s} does not fit in 16 bits"))
}

impl Overrides {
    /// Apply every set field to `config`
    pub fn apply(self, config: &mut GeneratorConfig) {
        macro_rules! set {
            ($($field:ident => $target:ident),+ $(,)?) => {
                $(if let Some(value) = self.$field {
                    config.$target = value;
                })+
            };
        }
        set!(
            interface => interface,
            queue_id => queue_id,
            attach_mode => attach_mode,
            bind_mode => bind_mode,
            frame_size => frame_size,
            num_frames => num_frames,
            tx_ring_size => tx_ring_size,
            comp_ring_size => comp_ring_size,
            fill_ring_size => fill_ring_size,
            batch_size => batch_size,
            cycles => cycles,
            cycle_period_us => cycle_period_us,
            packet_size => packet_size,
            fill_pattern => fill_pattern,
            src_mac => src_mac,
            dst_mac => dst_mac,
            src_ip => src_ip,
            dst_ip => dst_ip,
            src_port => src_port,
            dst_port => dst_port,
            clock => timestamp_clock,
            sockets => sockets,
            drain_retries => drain_retries,
            drain_interval_ms => drain_interval_ms,
        );

        if self.duration_secs.is_some() {
            config.duration_secs = self.duration_secs;
        }
        if self.irq_name.is_some() {
            config.irq_name = self.irq_name;
        }
        if self.no_need_wakeup {
            config.need_wakeup = false;
        }
        config.always_kick |= self.always_kick;
        config.unaligned_chunks |= self.unaligned;
        config.multi_buffer |= self.multi_buffer;
        config.timestamp |= self.timestamp;

        if self.vlan || self.vlan_id.is_some() || self.vlan_priority.is_some() {
            let vlan = config.vlan.get_or_insert_with(VlanTag::default);
            if let Some(id) = self.vlan_id {
                vlan.id = id;
            }
            if let Some(priority) = self.vlan_priority {
                vlan.priority = priority;
            }
        }

        if self.busy_poll_us.is_some() || self.busy_poll_budget.is_some() {
            let busy = config.busy_poll.get_or_insert_with(BusyPoll::default);
            if let Some(timeout) = self.busy_poll_us {
                busy.timeout_us = timeout;
            }
            if self.busy_poll_budget.is_some() {
                busy.budget = self.busy_poll_budget;
            }
        }
    }
}

/// Load a generator configuration from a TOML file
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load(path: &Path) -> anyhow::Result<GeneratorConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("cannot read config file {}", path.display()))?;
    let config = toml::from_str(&contents)
        .with_context(|| format!("cannot parse config file {}", path.display()))?;
    Ok(config)
}

/// Write `config` as TOML to `path`
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn save(config: &GeneratorConfig, path: &Path) -> anyhow::Result<()> {
    let contents = toml::to_string_pretty(config)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    Ok(())
}

/// Build the effective configuration: file (or defaults), then flags.
///
/// The result is validated before it is returned.
///
/// # Errors
///
/// Returns an error if the file cannot be loaded or the merged configuration
/// is invalid.
pub fn resolve(file: Option<&Path>, overrides: Overrides) -> anyhow::Result<GeneratorConfig> {
    let mut config = match file {
        Some(path) => load(path)?,
        None => GeneratorConfig::default(),
    };
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}
