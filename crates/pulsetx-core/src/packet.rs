//! Packet template: Ethernet (optionally 802.1Q) / IPv4 / UDP with an
//! optional pktgen trailer and a patterned payload.
//!
//! The template is built once and copied into every packet slot of the frame
//! pool. After that only the stamp region changes (trailer fields, or the
//! cycle marker at the start of the payload) and the UDP checksum is patched
//! incrementally, so headers are never rewritten.

use crate::checksum::{self, IPPROTO_UDP};
use crate::config::{GeneratorConfig, IPV4_HDR_LEN, PKTGEN_HDR_LEN, UDP_HDR_LEN};
use pulsetx_transport::sys::XDP_PKT_CONTD;
use pulsetx_transport::{Umem, XdpDesc};

/// pktgen trailer magic
pub const PKTGEN_MAGIC: u32 = 0xbe9b_e955;

const ETH_P_IP: u16 = 0x0800;
const ETH_P_8021Q: u16 = 0x8100;
const IPVERSION_IHL: u8 = 0x45;
const IPDEFTTL: u8 = 64;
const MARKER_LEN: usize = 8;

/// Byte offsets and sizes of one generated packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketLayout {
    /// Start of the IPv4 header (= link-layer header length)
    pub ip_offset: usize,
    /// Start of the UDP header
    pub udp_offset: usize,
    /// Start of the pktgen trailer, if present
    pub trailer_offset: Option<usize>,
    /// Start of the patterned payload
    pub payload_offset: usize,
    /// Bytes on the wire (FCS excluded)
    pub len: usize,
    /// Frame size of the pool
    pub frame_size: u32,
    /// Frames each packet spans
    pub frames_per_packet: u32,
}

impl PacketLayout {
    /// Layout implied by a (validated) configuration
    pub fn new(config: &GeneratorConfig) -> Self {
        let ip_offset = config.l2_len() as usize;
        let udp_offset = ip_offset + IPV4_HDR_LEN as usize;
        let trailer_start = udp_offset + UDP_HDR_LEN as usize;
        let (trailer_offset, payload_offset) = if config.timestamp {
            (Some(trailer_start), trailer_start + PKTGEN_HDR_LEN as usize)
        } else {
            (None, trailer_start)
        };
        Self {
            ip_offset,
            udp_offset,
            trailer_offset,
            payload_offset,
            len: config.wire_len() as usize,
            frame_size: config.frame_size,
            frames_per_packet: config.frames_per_packet(),
        }
    }

    /// UDP length field: header, trailer and payload
    pub fn udp_len(&self) -> usize {
        self.len - self.udp_offset
    }

    /// Where per-cycle stamps are written, and how many bytes
    pub fn stamp_region(&self) -> (usize, usize) {
        match self.trailer_offset {
            // seq, tv_sec, tv_usec after the magic
            Some(trailer) => (trailer + 4, 12),
            None => (self.payload_offset, MARKER_LEN.min(self.len - self.payload_offset)),
        }
    }

    /// TX descriptors for the packet whose first frame is `first_frame`.
    ///
    /// All fragments but the last carry `XDP_PKT_CONTD`.
    pub fn descriptors(&self, first_frame: u32) -> impl Iterator<Item = XdpDesc> + '_ {
        let frame = self.frame_size as usize;
        (0..self.frames_per_packet).map(move |i| {
            let start = i as usize * frame;
            let len = (self.len - start).min(frame);
            let last = i + 1 == self.frames_per_packet;
            XdpDesc {
                addr: u64::from(first_frame + i) * u64::from(self.frame_size),
                len: len as u32,
                options: if last { 0 } else { XDP_PKT_CONTD },
            }
        })
    }
}

/// Per-cycle contents of the stamp region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stamp {
    /// pktgen trailer fields
    Trailer {
        /// Sequence number
        seq: u32,
        /// Seconds
        sec: u32,
        /// Microseconds
        usec: u32,
    },
    /// Cycle marker at the start of the payload
    Marker {
        /// Cycle number
        cycle: u32,
        /// Frame index the packet lives in
        frame: u32,
    },
}

impl Stamp {
    fn encode(&self) -> [u8; 12] {
        let mut out = [0u8; 12];
        match *self {
            Stamp::Trailer { seq, sec, usec } => {
                out[0..4].copy_from_slice(&seq.to_be_bytes());
                out[4..8].copy_from_slice(&sec.to_be_bytes());
                out[8..12].copy_from_slice(&usec.to_be_bytes());
            }
            Stamp::Marker { cycle, frame } => {
                out[0..4].copy_from_slice(&cycle.to_be_bytes());
                out[4..8].copy_from_slice(&frame.to_be_bytes());
            }
        }
        out
    }
}

/// The canonical packet
#[derive(Debug, Clone)]
pub struct PacketTemplate {
    layout: PacketLayout,
    bytes: Vec<u8>,
}

impl PacketTemplate {
    /// Build the packet described by `config`
    pub fn new(config: &GeneratorConfig) -> Self {
        let layout = PacketLayout::new(config);
        let mut pkt = vec![0u8; layout.len];

        // Ethernet / 802.1Q
        pkt[0..6].copy_from_slice(&config.dst_mac.0);
        pkt[6..12].copy_from_slice(&config.src_mac.0);
        match &config.vlan {
            Some(vlan) => {
                pkt[12..14].copy_from_slice(&ETH_P_8021Q.to_be_bytes());
                pkt[14..16].copy_from_slice(&vlan.tci().to_be_bytes());
                pkt[16..18].copy_from_slice(&ETH_P_IP.to_be_bytes());
            }
            None => pkt[12..14].copy_from_slice(&ETH_P_IP.to_be_bytes()),
        }

        // IPv4
        let ip_len = (layout.len - layout.ip_offset) as u16;
        let ip = &mut pkt[layout.ip_offset..layout.udp_offset];
        ip[0] = IPVERSION_IHL;
        ip[2..4].copy_from_slice(&ip_len.to_be_bytes());
        ip[8] = IPDEFTTL;
        ip[9] = IPPROTO_UDP;
        ip[12..16].copy_from_slice(&config.src_ip.octets());
        ip[16..20].copy_from_slice(&config.dst_ip.octets());
        let ip_check = checksum::internet_checksum(ip);
        ip[10..12].copy_from_slice(&ip_check.to_be_bytes());

        // UDP
        let udp = layout.udp_offset;
        pkt[udp..udp + 2].copy_from_slice(&config.src_port.to_be_bytes());
        pkt[udp + 2..udp + 4].copy_from_slice(&config.dst_port.to_be_bytes());
        pkt[udp + 4..udp + 6].copy_from_slice(&(layout.udp_len() as u16).to_be_bytes());

        if let Some(trailer) = layout.trailer_offset {
            pkt[trailer..trailer + 4].copy_from_slice(&PKTGEN_MAGIC.to_be_bytes());
        }

        let pattern = config.fill_pattern.to_be_bytes();
        for (i, byte) in pkt[layout.payload_offset..].iter_mut().enumerate() {
            *byte = pattern[i % 4];
        }

        let udp_check = checksum::udp_checksum(config.src_ip, config.dst_ip, &pkt[udp..]);
        pkt[udp + 6..udp + 8].copy_from_slice(&udp_check.to_be_bytes());

        Self { layout, bytes: pkt }
    }

    /// Offsets and sizes
    pub fn layout(&self) -> &PacketLayout {
        &self.layout
    }

    /// The packet bytes
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Copy the template into every packet slot of the pool.
    ///
    /// Returns the number of packet slots written.
    pub fn stamp_all(&self, umem: &mut Umem) -> u32 {
        let fpp = self.layout.frames_per_packet;
        let slots = umem.num_frames() / fpp;
        for slot in 0..slots {
            if let Some(frames) = umem.frames_mut(slot * fpp, fpp) {
                frames[..self.bytes.len()].copy_from_slice(&self.bytes);
            }
        }
        slots
    }

    /// Write `stamp` into a packet previously stamped from this template and
    /// patch its UDP checksum.
    pub fn refresh(&self, packet: &mut [u8], stamp: Stamp) {
        let (offset, len) = self.layout.stamp_region();
        let encoded = stamp.encode();
        let new = &encoded[..len];
        if packet[offset..offset + len] == *new {
            return;
        }

        let check_at = self.layout.udp_offset + 6;
        let check = u16::from_be_bytes([packet[check_at], packet[check_at + 1]]);
        let even = len & !1;
        let mut updated = checksum::update_checksum(
            check,
            &packet[offset..offset + even],
            &new[..even],
        );
        if even != len {
            // Odd tail byte: pad both sides on the right
            let old_tail = [packet[offset + even], 0];
            let new_tail = [new[even], 0];
            updated = checksum::update_checksum(updated, &old_tail, &new_tail);
        }
        if updated == 0 {
            updated = 0xffff;
        }

        packet[offset..offset + len].copy_from_slice(new);
        packet[check_at..check_at + 2].copy_from_slice(&updated.to_be_bytes());
    }
}

/// Check the IPv4 header checksum and the UDP checksum of a generated packet
pub fn checksums_valid(layout: &PacketLayout, packet: &[u8]) -> bool {
    let Some(bytes) = packet.get(..layout.len) else {
        return false;
    };
    let ip = &bytes[layout.ip_offset..layout.udp_offset];
    if !checksum::verify_checksum(ip) {
        return false;
    }

    let src = std::net::Ipv4Addr::new(ip[12], ip[13], ip[14], ip[15]);
    let dst = std::net::Ipv4Addr::new(ip[16], ip[17], ip[18], ip[19]);
    let segment = &bytes[layout.udp_offset..];
    let pseudo = checksum::pseudo_header_sum(src, dst, IPPROTO_UDP, segment.len() as u16);
    checksum::finalize_checksum(checksum::partial_checksum(segment, pseudo)) == 0
}
