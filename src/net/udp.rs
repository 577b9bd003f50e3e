//! UDP Protocol Implementation (RFC 768)
//!
//! Demultiplexes datagrams to handlers bound per destination port. A datagram
//! for an unbound port is answered with ICMP port-unreachable.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::net::Ipv4Addr;
use log::{debug, trace, warn};
use spin::Mutex;

use crate::net::aging::AgingMap;
use crate::net::buffer::{BufferError, PacketBuf};
use crate::net::checksum::transport_checksum;
use crate::net::icmp::{self, UnreachableCode};
use crate::net::ipv4::{self, protocol};
use crate::net::stack::NetStack;

/// UDP header size (8 bytes)
pub const HEADER_SIZE: usize = 8;

const CHECKSUM_OFFSET: usize = 6;

/// Application callback for datagrams arriving on a bound port
///
/// Called as `handler(stack, payload, src_ip, src_port)`. The stack is passed
/// in so the handler can answer right away.
pub type UdpHandler = Arc<dyn Fn(&NetStack, &[u8], Ipv4Addr, u16) + Send + Sync>;

/// Errors that can occur during UDP operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UdpError {
    /// Packet is too short to contain a valid UDP header
    PacketTooShort,
    /// Length field doesn't match actual packet size
    InvalidLength,
    /// Checksum verification failed
    ChecksumMismatch,
    /// No room left in the port table
    TableFull,
    Buffer(BufferError),
}

impl fmt::Display for UdpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UdpError::PacketTooShort => write!(f, "UDP packet too short"),
            UdpError::InvalidLength => write!(f, "Invalid UDP length"),
            UdpError::ChecksumMismatch => write!(f, "UDP checksum mismatch"),
            UdpError::TableFull => write!(f, "UDP port table full"),
            UdpError::Buffer(e) => write!(f, "Buffer error: {}", e),
        }
    }
}

impl From<BufferError> for UdpError {
    fn from(e: BufferError) -> Self {
        UdpError::Buffer(e)
    }
}

/// UDP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpHeader {
    pub src_port: u16,
    pub dest_port: u16,
    /// Length of UDP header + data (minimum 8 bytes)
    pub length: u16,
    /// Checksum (optional for IPv4, 0 when not supplied)
    pub checksum: u16,
}

impl UdpHeader {
    pub fn parse(data: &[u8]) -> Result<Self, UdpError> {
        if data.len() < HEADER_SIZE {
            return Err(UdpError::PacketTooShort);
        }

        Ok(Self {
            src_port: u16::from_be_bytes([data[0], data[1]]),
            dest_port: u16::from_be_bytes([data[2], data[3]]),
            length: u16::from_be_bytes([data[4], data[5]]),
            checksum: u16::from_be_bytes([data[6], data[7]]),
        })
    }

    /// Encode into the first 8 bytes of `out`, checksum field included
    pub fn write(&self, out: &mut [u8]) -> Result<(), UdpError> {
        if out.len() < HEADER_SIZE {
            return Err(UdpError::PacketTooShort);
        }

        out[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        out[2..4].copy_from_slice(&self.dest_port.to_be_bytes());
        out[4..6].copy_from_slice(&self.length.to_be_bytes());
        write_checksum(out, self.checksum);
        Ok(())
    }
}

fn write_checksum(datagram: &mut [u8], checksum: u16) {
    datagram[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&checksum.to_be_bytes());
}

/// A received checksum matches if it equals the computed one; on the wire
/// 0xFFFF also stands for a computed zero
fn checksum_matches(received: u16, computed: u16) -> bool {
    received == computed || (received == 0xFFFF && computed == 0)
}

/// Port -> handler bindings
pub struct UdpTable {
    handlers: Mutex<AgingMap<u16, UdpHandler>>,
}

impl UdpTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            handlers: Mutex::new(AgingMap::new(None, Some(capacity))),
        }
    }

    /// Bind `handler` to `port`, replacing any previous binding
    pub fn open(&self, port: u16, handler: UdpHandler) -> Result<(), UdpError> {
        self.handlers
            .lock()
            .set(port, handler, 0)
            .map_err(|_| UdpError::TableFull)
    }

    /// Returns whether a binding was removed
    pub fn close(&self, port: u16) -> bool {
        self.handlers.lock().remove(&port).is_some()
    }

    /// Clone the handler out so it can run without the table locked
    pub fn lookup(&self, port: u16) -> Option<UdpHandler> {
        self.handlers.lock().get(&port, 0).cloned()
    }

    pub fn is_bound(&self, port: u16) -> bool {
        self.handlers.lock().contains(&port, 0)
    }

    pub fn ports(&self) -> Vec<u16> {
        self.handlers.lock().iter(0).map(|(port, _, _)| *port).collect()
    }
}

/// Handle a UDP datagram addressed to us
///
/// `buf` starts at the UDP header; the IP header sits just in front of it in
/// the headroom so it can be quoted in a port-unreachable reply.
pub fn receive(stack: &NetStack, buf: &mut PacketBuf, src_ip: Ipv4Addr) -> Result<(), UdpError> {
    let header = UdpHeader::parse(buf.as_slice())?;

    let length = header.length as usize;
    if length > buf.len() || length < HEADER_SIZE {
        return Err(UdpError::InvalidLength);
    }
    buf.truncate(length)?;

    if header.checksum != 0 {
        let raw = buf.as_mut_slice();
        write_checksum(raw, 0);
        let computed = transport_checksum(protocol::UDP, raw, src_ip, stack.config().ip_addr);
        write_checksum(raw, header.checksum);
        if !checksum_matches(header.checksum, computed) {
            return Err(UdpError::ChecksumMismatch);
        }
    }

    let Some(handler) = stack.udp.lookup(header.dest_port) else {
        debug!("UDP: port {} unreachable (from {}:{})", header.dest_port, src_ip, header.src_port);
        buf.add_header(ipv4::HEADER_SIZE)?;
        icmp::send_unreachable(stack, buf.as_slice(), src_ip, UnreachableCode::Port);
        return Ok(());
    };

    buf.remove_header(HEADER_SIZE)?;
    trace!(
        "UDP: {} bytes {}:{} -> port {}",
        buf.len(), src_ip, header.src_port, header.dest_port
    );
    handler(stack, buf.as_slice(), src_ip, header.src_port);
    Ok(())
}

/// Prepend a UDP header to `buf` and send it to `dst_ip:dst_port`
pub fn send(stack: &NetStack, mut buf: PacketBuf, src_port: u16, dst_ip: Ipv4Addr, dst_port: u16) {
    if let Err(e) = buf.add_header(HEADER_SIZE) {
        warn!("UDP: cannot prepend header: {}", e);
        return;
    }

    let Ok(length) = u16::try_from(buf.len()) else {
        warn!("UDP: {} byte datagram exceeds the length field", buf.len());
        return;
    };

    let header = UdpHeader {
        src_port,
        dest_port: dst_port,
        length,
        checksum: 0,
    };
    if let Err(e) = header.write(buf.as_mut_slice()) {
        warn!("UDP: cannot write header: {}", e);
        return;
    }

    let computed = transport_checksum(protocol::UDP, buf.as_slice(), stack.config().ip_addr, dst_ip);
    // Zero means "no checksum" on the wire
    let checksum = if computed == 0 { 0xFFFF } else { computed };
    write_checksum(buf.as_mut_slice(), checksum);

    trace!("UDP: {} bytes port {} -> {}:{}", length, src_port, dst_ip, dst_port);
    ipv4::send(stack, buf, dst_ip, protocol::UDP);
}

/// Copy `data` into a fresh buffer and send it
pub fn send_bytes(stack: &NetStack, data: &[u8], src_port: u16, dst_ip: Ipv4Addr, dst_port: u16) {
    match PacketBuf::from_slice(data) {
        Ok(buf) => send(stack, buf, src_port, dst_ip, dst_port),
        Err(e) => warn!("UDP: cannot send {} bytes: {}", data.len(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = UdpHeader {
            src_port: 12345,
            dest_port: 53,
            length: 20,
            checksum: 0xABCD,
        };
        let mut out = [0u8; 8];
        header.write(&mut out).unwrap();

        assert_eq!(out, [0x30, 0x39, 0x00, 0x35, 0x00, 0x14, 0xAB, 0xCD]);
        assert_eq!(UdpHeader::parse(&out).unwrap(), header);
    }

    #[test]
    fn test_packet_too_short() {
        assert_eq!(UdpHeader::parse(&[0u8; 7]), Err(UdpError::PacketTooShort));
    }

    #[test]
    fn test_all_ones_matches_zero() {
        assert!(checksum_matches(0x1234, 0x1234));
        assert!(checksum_matches(0xFFFF, 0x0000));
        assert!(!checksum_matches(0x1234, 0x1235));
    }

    fn ignore(_: &NetStack, _: &[u8], _: Ipv4Addr, _: u16) {}

    #[test]
    fn test_table_overwrite_and_capacity() {
        let table = UdpTable::new(1);
        let first: UdpHandler = Arc::new(ignore);
        let second: UdpHandler = Arc::new(ignore);

        table.open(7, first).unwrap();
        table.open(7, second.clone()).unwrap();
        assert!(Arc::ptr_eq(&table.lookup(7).unwrap(), &second));

        assert_eq!(table.open(8, second), Err(UdpError::TableFull));
        assert_eq!(table.ports(), alloc::vec![7]);

        assert!(table.close(7));
        assert!(!table.is_bound(7));
        assert!(!table.close(7));
    }
}
