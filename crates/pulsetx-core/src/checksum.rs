//! Internet checksum (RFC 1071) and incremental update (RFC 1624).
//!
//! All sums are taken over big-endian 16-bit words. An odd trailing byte is
//! padded with zero on the right.

use std::net::Ipv4Addr;

/// IP protocol number for UDP
pub const IPPROTO_UDP: u8 = 17;

/// Add `data` to a running one's-complement sum.
///
/// The returned value is already folded to 16 bits, so partial sums can be
/// chained freely. Only the last chunk of a chain may have odd length.
pub fn partial_checksum(data: &[u8], initial: u32) -> u32 {
    let mut sum = u64::from(initial);
    let mut words = data.chunks_exact(2);
    for word in words.by_ref() {
        sum += u64::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = words.remainder() {
        sum += u64::from(*last) << 8;
    }
    fold(sum)
}

fn fold(mut sum: u64) -> u32 {
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    sum as u32
}

/// Finalize a partial checksum
pub fn finalize_checksum(sum: u32) -> u16 {
    !(fold(u64::from(sum)) as u16)
}

/// Calculate the Internet checksum of `data`
pub fn internet_checksum(data: &[u8]) -> u16 {
    finalize_checksum(partial_checksum(data, 0))
}

/// Verify a block whose checksum field is included in `data`
///
/// The sum over a correctly checksummed block is all ones, so the checksum
/// recomputed over it is zero.
pub fn verify_checksum(data: &[u8]) -> bool {
    internet_checksum(data) == 0
}

/// Sum of the IPv4 pseudo-header used by UDP and TCP
pub fn pseudo_header_sum(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, len: u16) -> u32 {
    let mut header = [0u8; 12];
    header[0..4].copy_from_slice(&src.octets());
    header[4..8].copy_from_slice(&dst.octets());
    header[9] = protocol;
    header[10..12].copy_from_slice(&len.to_be_bytes());
    partial_checksum(&header, 0)
}

/// UDP checksum over `segment` (header + data, checksum field zeroed).
///
/// A computed value of zero is sent as `0xffff`, since zero means "no
/// checksum" in UDP.
pub fn udp_checksum(src: Ipv4Addr, dst: Ipv4Addr, segment: &[u8]) -> u16 {
    let len = u16::try_from(segment.len()).unwrap_or(u16::MAX);
    let sum = pseudo_header_sum(src, dst, IPPROTO_UDP, len);
    match finalize_checksum(partial_checksum(segment, sum)) {
        0 => 0xffff,
        check => check,
    }
}

/// Adjust `check` for a region that changed from `old` to `new` (RFC 1624 eqn. 3).
///
/// Both slices must have the same even length and start on a 16-bit boundary
/// of the checksummed block.
pub fn update_checksum(check: u16, old: &[u8], new: &[u8]) -> u16 {
    debug_assert_eq!(old.len(), new.len());
    debug_assert_eq!(old.len() % 2, 0);

    let mut sum = u64::from(!check);
    for (o, n) in old.chunks_exact(2).zip(new.chunks_exact(2)) {
        sum += u64::from(!u16::from_be_bytes([o[0], o[1]]));
        sum += u64::from(u16::from_be_bytes([n[0], n[1]]));
    }
    !(fold(sum) as u16)
}
