//! IPv4 Protocol Implementation
//!
//! Validates and dispatches incoming datagrams, and builds outgoing ones,
//! fragmenting payloads that do not fit in the link MTU. Reassembly is not
//! performed: fragments are handed upward one by one like any other datagram.
//!
//! # References
//! - RFC 791: Internet Protocol (IPv4)
//! - RFC 1071: Computing the Internet Checksum

use core::fmt;
use core::net::Ipv4Addr;
use log::{debug, trace, warn};

use crate::net::arp;
use crate::net::buffer::{BufferError, PacketBuf};
use crate::net::checksum::internet_checksum;
use crate::net::ethernet::MacAddress;
use crate::net::icmp::{self, UnreachableCode};
use crate::net::stack::NetStack;

/// IPv4 Protocol Numbers (IANA assigned)
pub mod protocol {
    pub const ICMP: u8 = 1;
    pub const TCP: u8 = 6;
    pub const UDP: u8 = 17;
}

/// IPv4 Header Flags, as they sit in the flags/fragment-offset word
pub mod flags {
    pub const DONT_FRAGMENT: u16 = 0x4000;
    pub const MORE_FRAGMENTS: u16 = 0x2000;
    pub(super) const MASK: u16 = 0xE000;
}

/// Fragment offset field mask (13 bits, 8-byte units)
const FRAGMENT_OFFSET_MASK: u16 = 0x1FFF;

/// Fragment offsets count in blocks of this many bytes
pub const FRAGMENT_UNIT: usize = 8;

/// Default TTL (Time To Live) value
pub const DEFAULT_TTL: u8 = 64;

/// IPv4 header size; options are not supported
pub const HEADER_SIZE: usize = 20;

const CHECKSUM_OFFSET: usize = 10;

/// Errors that can occur while accepting a datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ipv4Error {
    /// Packet is shorter than the fixed header
    PacketTooShort,
    /// Version field is not 4
    InvalidVersion(u8),
    /// Header carries options (IHL other than 5)
    UnsupportedOptions(u8),
    /// Declared total length exceeds the received bytes or is shorter than the header
    InvalidLength,
    /// Header checksum verification failed
    ChecksumMismatch,
    /// Destination is not the local address
    NotForUs(Ipv4Addr),
    /// Buffer manipulation failed
    Buffer(BufferError),
}

impl fmt::Display for Ipv4Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ipv4Error::PacketTooShort => write!(f, "Packet too short"),
            Ipv4Error::InvalidVersion(v) => write!(f, "Invalid IP version: {}", v),
            Ipv4Error::UnsupportedOptions(ihl) => write!(f, "Unsupported header length: {} words", ihl),
            Ipv4Error::InvalidLength => write!(f, "Invalid total length"),
            Ipv4Error::ChecksumMismatch => write!(f, "Header checksum mismatch"),
            Ipv4Error::NotForUs(ip) => write!(f, "Not addressed to us ({})", ip),
            Ipv4Error::Buffer(e) => write!(f, "Buffer error: {}", e),
        }
    }
}

impl From<BufferError> for Ipv4Error {
    fn from(e: BufferError) -> Self {
        Ipv4Error::Buffer(e)
    }
}

/// IPv4 Header Structure
///
/// ```text
/// 0                   1                   2                   3
/// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |Version|  IHL  |Type of Service|          Total Length         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |         Identification        |Flags|      Fragment Offset    |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  Time to Live |    Protocol   |         Header Checksum       |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                       Source Address                          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                    Destination Address                        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// `parse` and `write` are the only places that know the wire layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    /// IP version (always 4 when sent)
    pub version: u8,
    /// Internet Header Length in 32-bit words
    pub ihl: u8,
    pub tos: u8,
    /// Total datagram length (header + data) in bytes
    pub total_length: u16,
    /// Identification shared by all fragments of one datagram
    pub identification: u16,
    /// Flag bits (`flags::*`), still in their wire position
    pub flags: u16,
    /// Fragment offset in 8-byte blocks
    pub fragment_offset: u16,
    pub ttl: u8,
    /// Protocol number (ICMP=1, TCP=6, UDP=17)
    pub protocol: u8,
    pub checksum: u16,
    pub src_ip: Ipv4Addr,
    pub dest_ip: Ipv4Addr,
}

impl Ipv4Header {
    /// Create a new IPv4 header with common defaults
    ///
    /// # Arguments
    /// * `src_ip` - Source IP address
    /// * `dest_ip` - Destination IP address
    /// * `protocol` - Protocol number (use `protocol::*` constants)
    /// * `payload_len` - Length of the payload data
    ///
    /// # Returns
    /// A header with IHL 5, TTL `DEFAULT_TTL`, no flags and a zero id and checksum
    pub fn new(src_ip: Ipv4Addr, dest_ip: Ipv4Addr, protocol: u8, payload_len: u16) -> Self {
        Self {
            version: 4,
            ihl: 5,
            tos: 0,
            total_length: (HEADER_SIZE as u16).saturating_add(payload_len),
            identification: 0,
            flags: 0,
            fragment_offset: 0,
            ttl: DEFAULT_TTL,
            protocol,
            checksum: 0,
            src_ip,
            dest_ip,
        }
    }

    /// Decode the fixed 20-byte header
    ///
    /// No field is validated here; that is the receive path's job.
    pub fn parse(data: &[u8]) -> Result<Self, Ipv4Error> {
        if data.len() < HEADER_SIZE {
            return Err(Ipv4Error::PacketTooShort);
        }

        let flags_frag = u16::from_be_bytes([data[6], data[7]]);

        Ok(Self {
            version: data[0] >> 4,
            ihl: data[0] & 0x0F,
            tos: data[1],
            total_length: u16::from_be_bytes([data[2], data[3]]),
            identification: u16::from_be_bytes([data[4], data[5]]),
            flags: flags_frag & flags::MASK,
            fragment_offset: flags_frag & FRAGMENT_OFFSET_MASK,
            ttl: data[8],
            protocol: data[9],
            checksum: u16::from_be_bytes([data[10], data[11]]),
            src_ip: Ipv4Addr::new(data[12], data[13], data[14], data[15]),
            dest_ip: Ipv4Addr::new(data[16], data[17], data[18], data[19]),
        })
    }

    /// Encode into the first 20 bytes of `out`, computing the checksum
    ///
    /// The `checksum` field of `self` is ignored.
    pub fn write(&self, out: &mut [u8]) -> Result<(), Ipv4Error> {
        let out: &mut [u8; HEADER_SIZE] = out
            .get_mut(..HEADER_SIZE)
            .and_then(|head| <&mut [u8; HEADER_SIZE]>::try_from(head).ok())
            .ok_or(Ipv4Error::PacketTooShort)?;
        self.fill(out);
        Ok(())
    }

    /// Serialize into a fresh array with a valid checksum
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        self.fill(&mut bytes);
        bytes
    }

    fn fill(&self, out: &mut [u8; HEADER_SIZE]) {
        out[0] = (self.version << 4) | (self.ihl & 0x0F);
        out[1] = self.tos;
        out[2..4].copy_from_slice(&self.total_length.to_be_bytes());
        out[4..6].copy_from_slice(&self.identification.to_be_bytes());
        let flags_frag = (self.flags & flags::MASK) | (self.fragment_offset & FRAGMENT_OFFSET_MASK);
        out[6..8].copy_from_slice(&flags_frag.to_be_bytes());
        out[8] = self.ttl;
        out[9] = self.protocol;
        out[10..12].copy_from_slice(&[0, 0]);
        out[12..16].copy_from_slice(&self.src_ip.octets());
        out[16..20].copy_from_slice(&self.dest_ip.octets());

        let checksum = internet_checksum(&out[..]);
        write_checksum(&mut out[..], checksum);
    }

    pub fn more_fragments(&self) -> bool {
        self.flags & flags::MORE_FRAGMENTS != 0
    }

    /// Check if this datagram is a fragment of a larger one
    pub fn is_fragmented(&self) -> bool {
        self.more_fragments() || self.fragment_offset != 0
    }

    /// Get the header length in bytes
    pub fn header_length(&self) -> usize {
        (self.ihl as usize) * 4
    }
}

fn read_checksum(header: &[u8]) -> u16 {
    u16::from_be_bytes([header[CHECKSUM_OFFSET], header[CHECKSUM_OFFSET + 1]])
}

fn write_checksum(header: &mut [u8], checksum: u16) {
    header[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&checksum.to_be_bytes());
}

/// Accept a datagram from the link layer and hand its payload upward
///
/// Link padding past the declared total length is trimmed before dispatch.
/// A datagram for an unregistered protocol is answered with ICMP
/// protocol-unreachable. Fragments are delivered as they arrive.
///
/// # Returns
/// - `Ok(())` - Datagram was dispatched or answered
/// - `Err(Ipv4Error)` - Datagram was dropped
pub fn receive(stack: &NetStack, mut buf: PacketBuf, src_mac: MacAddress) -> Result<(), Ipv4Error> {
    let header = Ipv4Header::parse(buf.as_slice())?;

    if header.version != 4 {
        return Err(Ipv4Error::InvalidVersion(header.version));
    }
    if header.ihl != 5 {
        return Err(Ipv4Error::UnsupportedOptions(header.ihl));
    }

    let total_length = header.total_length as usize;
    if total_length > buf.len() || total_length < HEADER_SIZE {
        return Err(Ipv4Error::InvalidLength);
    }

    // Verify with the checksum field zeroed, then put the computed value back
    {
        let raw = &mut buf.as_mut_slice()[..HEADER_SIZE];
        let saved = read_checksum(raw);
        write_checksum(raw, 0);
        let computed = internet_checksum(raw);
        if computed != saved {
            return Err(Ipv4Error::ChecksumMismatch);
        }
        write_checksum(raw, computed);
    }

    if header.dest_ip != stack.config().ip_addr {
        return Err(Ipv4Error::NotForUs(header.dest_ip));
    }

    buf.truncate(total_length)?;

    trace!(
        "IPv4: {} -> {} proto {} len {} from {}",
        header.src_ip, header.dest_ip, header.protocol, total_length, src_mac
    );

    buf.remove_header(HEADER_SIZE)?;

    match stack.ip_protocol(header.protocol) {
        Some(handler) => stack.dispatch_ip(handler, &mut buf, header.src_ip),
        None => {
            debug!("IPv4: no handler for protocol {} from {}", header.protocol, header.src_ip);
            buf.add_header(HEADER_SIZE)?;
            icmp::send_unreachable(stack, buf.as_slice(), header.src_ip, UnreachableCode::Protocol);
        }
    }

    Ok(())
}

/// Send `buf` to `dst` as the payload of one datagram, fragmenting if needed
///
/// Payloads up to `mtu - 20` bytes go out as a single datagram. Larger ones
/// are cut into `mtu - 20` byte pieces (rounded down to a multiple of 8) that
/// share one identification value. Every call consumes exactly one id.
pub fn send(stack: &NetStack, buf: PacketBuf, dst: Ipv4Addr, protocol: u8) {
    let id = stack.next_datagram_id();
    let max_payload = stack.config().mtu.saturating_sub(HEADER_SIZE);

    if buf.len() <= max_payload {
        fragment_send(stack, buf, dst, protocol, id, 0, false);
        return;
    }

    let chunk_size = max_payload - max_payload % FRAGMENT_UNIT;
    if chunk_size == 0 {
        warn!("IPv4: MTU {} too small to fragment, dropping datagram", stack.config().mtu);
        return;
    }

    let data = buf.as_slice();
    trace!("IPv4: fragmenting {} bytes to {} into {}-byte pieces", data.len(), dst, chunk_size);

    let mut offset = 0;
    for piece in data.chunks(chunk_size) {
        let more = offset + piece.len() < data.len();
        match PacketBuf::from_slice(piece) {
            Ok(fragment) => {
                let offset_units = (offset / FRAGMENT_UNIT) as u16;
                fragment_send(stack, fragment, dst, protocol, id, offset_units, more);
            }
            Err(e) => {
                warn!("IPv4: cannot allocate fragment: {}", e);
                return;
            }
        }
        offset += piece.len();
    }
}

/// Prepend a header to `buf` and pass it to ARP for delivery
///
/// # Arguments
/// * `id` - Identification shared by all fragments of the datagram
/// * `offset_units` - Offset of this piece in 8-byte units
/// * `more_fragments` - Whether further pieces follow
pub fn fragment_send(
    stack: &NetStack,
    mut buf: PacketBuf,
    dst: Ipv4Addr,
    protocol: u8,
    id: u16,
    offset_units: u16,
    more_fragments: bool,
) {
    let config = stack.config();

    if let Err(e) = buf.add_header(HEADER_SIZE) {
        warn!("IPv4: cannot prepend header: {}", e);
        return;
    }

    let payload_len = buf.len() - HEADER_SIZE;
    let Ok(payload_len) = u16::try_from(payload_len) else {
        warn!("IPv4: payload of {} bytes does not fit one datagram", payload_len);
        return;
    };

    let mut header = Ipv4Header::new(config.ip_addr, dst, protocol, payload_len);
    header.identification = id;
    header.ttl = config.ttl;
    header.fragment_offset = offset_units;
    if more_fragments {
        header.flags = flags::MORE_FRAGMENTS;
    }

    if let Err(e) = header.write(buf.as_mut_slice()) {
        warn!("IPv4: cannot write header: {}", e);
        return;
    }

    arp::enqueue_for_resolution(stack, buf, dst);
}
