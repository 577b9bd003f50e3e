//! ICMP (Internet Control Message Protocol) Implementation
//! RFC 792 - https://www.rfc-editor.org/rfc/rfc792
//!
//! Answers echo requests and reports undeliverable datagrams back to their
//! sender. Incoming checksums are not verified.

use core::fmt;
use core::net::Ipv4Addr;
use log::{debug, trace, warn};

use crate::net::buffer::{BufferError, PacketBuf};
use crate::net::checksum::internet_checksum;
use crate::net::ipv4::{self, protocol};
use crate::net::stack::NetStack;

/// ICMP header size (type, code, checksum and 4 bytes of type-specific data)
pub const HEADER_SIZE: usize = 8;

/// How much of an offending datagram a destination-unreachable message quotes
pub const UNREACHABLE_QUOTE_LEN: usize = ipv4::HEADER_SIZE + 8;

/// ICMP message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpType {
    /// Echo Reply (Type 0)
    EchoReply,
    /// Destination Unreachable (Type 3)
    DestinationUnreachable,
    /// Echo Request (Type 8)
    EchoRequest,
    /// Time Exceeded (Type 11)
    TimeExceeded,
    Unknown(u8),
}

impl From<u8> for IcmpType {
    fn from(value: u8) -> Self {
        match value {
            0 => IcmpType::EchoReply,
            3 => IcmpType::DestinationUnreachable,
            8 => IcmpType::EchoRequest,
            11 => IcmpType::TimeExceeded,
            other => IcmpType::Unknown(other),
        }
    }
}

impl From<IcmpType> for u8 {
    fn from(icmp_type: IcmpType) -> Self {
        match icmp_type {
            IcmpType::EchoReply => 0,
            IcmpType::DestinationUnreachable => 3,
            IcmpType::EchoRequest => 8,
            IcmpType::TimeExceeded => 11,
            IcmpType::Unknown(val) => val,
        }
    }
}

impl fmt::Display for IcmpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IcmpType::EchoReply => write!(f, "Echo Reply"),
            IcmpType::DestinationUnreachable => write!(f, "Destination Unreachable"),
            IcmpType::EchoRequest => write!(f, "Echo Request"),
            IcmpType::TimeExceeded => write!(f, "Time Exceeded"),
            IcmpType::Unknown(val) => write!(f, "Unknown({})", val),
        }
    }
}

/// Destination-unreachable codes this stack generates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnreachableCode {
    /// No handler for the IP protocol number
    Protocol,
    /// No UDP handler bound to the port
    Port,
}

impl From<UnreachableCode> for u8 {
    fn from(code: UnreachableCode) -> Self {
        match code {
            UnreachableCode::Protocol => 2,
            UnreachableCode::Port => 3,
        }
    }
}

/// ICMP parsing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpError {
    /// Packet too short (minimum 8 bytes)
    PacketTooShort,
    Buffer(BufferError),
}

impl fmt::Display for IcmpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IcmpError::PacketTooShort => write!(f, "ICMP packet too short"),
            IcmpError::Buffer(e) => write!(f, "Buffer error: {}", e),
        }
    }
}

impl From<BufferError> for IcmpError {
    fn from(e: BufferError) -> Self {
        IcmpError::Buffer(e)
    }
}

/// ICMP header
///
/// Format:
/// ```text
/// [Type (1)][Code (1)][Checksum (2)]
/// [Identifier (2)][Sequence (2)][Data (variable)]
/// ```
///
/// Identifier and sequence are only meaningful for echo messages; other
/// types carry zeros there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcmpHeader {
    pub icmp_type: IcmpType,
    pub code: u8,
    pub checksum: u16,
    pub identifier: u16,
    pub sequence: u16,
}

impl IcmpHeader {
    pub fn new(icmp_type: IcmpType, code: u8) -> Self {
        Self {
            icmp_type,
            code,
            checksum: 0,
            identifier: 0,
            sequence: 0,
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self, IcmpError> {
        if data.len() < HEADER_SIZE {
            return Err(IcmpError::PacketTooShort);
        }

        Ok(Self {
            icmp_type: IcmpType::from(data[0]),
            code: data[1],
            checksum: u16::from_be_bytes([data[2], data[3]]),
            identifier: u16::from_be_bytes([data[4], data[5]]),
            sequence: u16::from_be_bytes([data[6], data[7]]),
        })
    }

    /// Write the header over the start of `message` and checksum the whole message
    pub fn write(&self, message: &mut [u8]) -> Result<(), IcmpError> {
        if message.len() < HEADER_SIZE {
            return Err(IcmpError::PacketTooShort);
        }

        message[0] = self.icmp_type.into();
        message[1] = self.code;
        message[2..4].copy_from_slice(&[0, 0]);
        message[4..6].copy_from_slice(&self.identifier.to_be_bytes());
        message[6..8].copy_from_slice(&self.sequence.to_be_bytes());

        let checksum = internet_checksum(message);
        message[2..4].copy_from_slice(&checksum.to_be_bytes());
        Ok(())
    }
}

/// Handle an ICMP message addressed to us
///
/// Echo requests are answered with an echo reply carrying the same
/// identifier, sequence and data. Everything else is only logged.
pub fn receive(stack: &NetStack, buf: &mut PacketBuf, src_ip: Ipv4Addr) -> Result<(), IcmpError> {
    let header = IcmpHeader::parse(buf.as_slice())?;

    match header.icmp_type {
        IcmpType::EchoRequest if header.code == 0 => {
            trace!("ICMP: echo request from {} id={} seq={}", src_ip, header.identifier, header.sequence);
            let mut reply = PacketBuf::from_slice(buf.as_slice())?;
            let mut reply_header = header;
            reply_header.icmp_type = IcmpType::EchoReply;
            reply_header.code = 0;
            reply_header.write(reply.as_mut_slice())?;
            ipv4::send(stack, reply, src_ip, protocol::ICMP);
        }
        IcmpType::EchoReply => {
            trace!("ICMP: echo reply from {} id={} seq={}", src_ip, header.identifier, header.sequence);
        }
        other => {
            debug!("ICMP: ignoring {} (code {}) from {}", other, header.code, src_ip);
        }
    }

    Ok(())
}

/// Send an echo request (ping) to `dst`
pub fn send_echo_request(stack: &NetStack, dst: Ipv4Addr, identifier: u16, sequence: u16, data: &[u8]) {
    let mut message = match PacketBuf::new(HEADER_SIZE + data.len()) {
        Ok(buf) => buf,
        Err(e) => {
            warn!("ICMP: cannot build echo request: {}", e);
            return;
        }
    };
    message.as_mut_slice()[HEADER_SIZE..].copy_from_slice(data);

    let mut header = IcmpHeader::new(IcmpType::EchoRequest, 0);
    header.identifier = identifier;
    header.sequence = sequence;
    if let Err(e) = header.write(message.as_mut_slice()) {
        warn!("ICMP: cannot write echo request: {}", e);
        return;
    }

    trace!("ICMP: echo request to {} id={} seq={}", dst, identifier, sequence);
    ipv4::send(stack, message, dst, protocol::ICMP);
}

/// Tell `dst` that a datagram it sent could not be delivered
///
/// `original` is the offending datagram starting at its IP header; at most
/// its first 28 bytes are quoted.
pub fn send_unreachable(stack: &NetStack, original: &[u8], dst: Ipv4Addr, code: UnreachableCode) {
    let quoted = &original[..original.len().min(UNREACHABLE_QUOTE_LEN)];

    let mut message = match PacketBuf::new(HEADER_SIZE + quoted.len()) {
        Ok(buf) => buf,
        Err(e) => {
            warn!("ICMP: cannot build unreachable message: {}", e);
            return;
        }
    };
    message.as_mut_slice()[HEADER_SIZE..].copy_from_slice(quoted);

    let header = IcmpHeader::new(IcmpType::DestinationUnreachable, code.into());
    if let Err(e) = header.write(message.as_mut_slice()) {
        warn!("ICMP: cannot write unreachable message: {}", e);
        return;
    }

    trace!("ICMP: {:?} unreachable to {}", code, dst);
    ipv4::send(stack, message, dst, protocol::ICMP);
}
