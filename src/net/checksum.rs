//! Internet checksum (RFC 1071)
//!
//! Shared by the IPv4 header, ICMP messages and the UDP pseudo-header sum.

use core::net::Ipv4Addr;

/// One's-complement sum of big-endian 16-bit words, not yet folded
fn sum_words(data: &[u8], mut sum: u32) -> u32 {
    for chunk in data.chunks(2) {
        let word = if chunk.len() == 2 {
            u16::from_be_bytes([chunk[0], chunk[1]])
        } else {
            // Odd length: pad with 0
            u16::from_be_bytes([chunk[0], 0])
        };
        sum += word as u32;
    }
    sum
}

fn fold(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !sum as u16
}

/// Calculate the 16-bit internet checksum of `data`
///
/// The checksum field inside `data` must be zeroed by the caller.
pub fn internet_checksum(data: &[u8]) -> u16 {
    fold(sum_words(data, 0))
}

/// Calculate a transport checksum over the IPv4 pseudo-header and `segment`
///
/// Pseudo-header: `[src (4)][dst (4)][zero (1)][protocol (1)][length (2)]`,
/// where length is the segment length.
pub fn transport_checksum(protocol: u8, segment: &[u8], src: Ipv4Addr, dst: Ipv4Addr) -> u16 {
    let mut pseudo = [0u8; 12];
    pseudo[0..4].copy_from_slice(&src.octets());
    pseudo[4..8].copy_from_slice(&dst.octets());
    pseudo[9] = protocol;
    pseudo[10..12].copy_from_slice(&(segment.len() as u16).to_be_bytes());

    let sum = sum_words(&pseudo, 0);
    fold(sum_words(segment, sum))
}
