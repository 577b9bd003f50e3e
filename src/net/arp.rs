//! ARP (Address Resolution Protocol) - RFC 826
//!
//! Maps IPv4 addresses to MAC addresses on local networks.
//! Packet format: [HW Type (2)][Proto Type (2)][HW Len (1)][Proto Len (1)]
//!                [Operation (2)][Sender MAC (6)][Sender IP (4)]
//!                [Target MAC (6)][Target IP (4)]
//!
//! Outbound datagrams whose next hop is not yet resolved wait in a single
//! pending slot per destination. The slot lives for the configured minimum
//! request interval; while it is occupied no further request goes out for that
//! address, and a newer datagram simply takes the slot over.

use alloc::vec::Vec;
use core::fmt;
use core::net::Ipv4Addr;
use log::{debug, trace};
use spin::Mutex;

use crate::net::aging::AgingMap;
use crate::net::buffer::PacketBuf;
use crate::net::config::NetworkConfig;
use crate::net::ethernet::{MacAddress, ETHERTYPE_ARP, ETHERTYPE_IPV4, MAC_LEN};
use crate::net::stack::NetStack;

/// ARP hardware type for Ethernet
pub const HW_TYPE_ETHERNET: u16 = 1;

/// ARP protocol type for IPv4
pub const PROTO_TYPE_IPV4: u16 = 0x0800;

/// ARP operation codes
pub const ARP_REQUEST: u16 = 1;
pub const ARP_REPLY: u16 = 2;

/// ARP packet size (fixed at 28 bytes)
pub const ARP_PACKET_SIZE: usize = 28;

/// Errors that can occur during ARP operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpError {
    /// Packet is too short to be valid
    PacketTooShort,
    /// Invalid hardware type (not Ethernet)
    InvalidHardwareType,
    /// Invalid protocol type (not IPv4)
    InvalidProtocolType,
    /// Invalid hardware address length
    InvalidHardwareLength,
    /// Invalid protocol address length
    InvalidProtocolLength,
    /// Unknown operation code
    UnknownOperation,
}

impl fmt::Display for ArpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArpError::PacketTooShort => write!(f, "ARP packet too short"),
            ArpError::InvalidHardwareType => write!(f, "Invalid hardware type"),
            ArpError::InvalidProtocolType => write!(f, "Invalid protocol type"),
            ArpError::InvalidHardwareLength => write!(f, "Invalid hardware address length"),
            ArpError::InvalidProtocolLength => write!(f, "Invalid protocol address length"),
            ArpError::UnknownOperation => write!(f, "Unknown ARP operation"),
        }
    }
}

/// ARP packet structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArpPacket {
    /// Operation (1 = request, 2 = reply)
    pub operation: u16,
    pub sender_mac: MacAddress,
    pub sender_ip: Ipv4Addr,
    pub target_mac: MacAddress,
    pub target_ip: Ipv4Addr,
}

impl ArpPacket {
    /// Create a new ARP request packet; the target MAC is unknown and left zeroed
    pub fn new_request(sender_mac: MacAddress, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Self {
        Self {
            operation: ARP_REQUEST,
            sender_mac,
            sender_ip,
            target_mac: MacAddress::ZERO,
            target_ip,
        }
    }

    /// Create a new ARP reply packet
    pub fn new_reply(
        sender_mac: MacAddress,
        sender_ip: Ipv4Addr,
        target_mac: MacAddress,
        target_ip: Ipv4Addr,
    ) -> Self {
        Self {
            operation: ARP_REPLY,
            sender_mac,
            sender_ip,
            target_mac,
            target_ip,
        }
    }

    /// Parse an ARP packet from raw bytes
    ///
    /// Only Ethernet/IPv4 requests and replies are accepted. Bytes past the
    /// first 28 (link padding) are ignored.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ArpError> {
        if data.len() < ARP_PACKET_SIZE {
            return Err(ArpError::PacketTooShort);
        }

        let hw_type = u16::from_be_bytes([data[0], data[1]]);
        if hw_type != HW_TYPE_ETHERNET {
            return Err(ArpError::InvalidHardwareType);
        }

        let proto_type = u16::from_be_bytes([data[2], data[3]]);
        if proto_type != PROTO_TYPE_IPV4 {
            return Err(ArpError::InvalidProtocolType);
        }

        if data[4] as usize != MAC_LEN {
            return Err(ArpError::InvalidHardwareLength);
        }
        if data[5] != 4 {
            return Err(ArpError::InvalidProtocolLength);
        }

        let operation = u16::from_be_bytes([data[6], data[7]]);
        if operation != ARP_REQUEST && operation != ARP_REPLY {
            return Err(ArpError::UnknownOperation);
        }

        let mut sender_mac = [0u8; MAC_LEN];
        sender_mac.copy_from_slice(&data[8..14]);
        let sender_ip = Ipv4Addr::new(data[14], data[15], data[16], data[17]);

        let mut target_mac = [0u8; MAC_LEN];
        target_mac.copy_from_slice(&data[18..24]);
        let target_ip = Ipv4Addr::new(data[24], data[25], data[26], data[27]);

        Ok(Self {
            operation,
            sender_mac: MacAddress(sender_mac),
            sender_ip,
            target_mac: MacAddress(target_mac),
            target_ip,
        })
    }

    /// Serialize into the 28-byte wire format
    pub fn to_bytes(&self) -> [u8; ARP_PACKET_SIZE] {
        let mut bytes = [0u8; ARP_PACKET_SIZE];
        bytes[0..2].copy_from_slice(&HW_TYPE_ETHERNET.to_be_bytes());
        bytes[2..4].copy_from_slice(&PROTO_TYPE_IPV4.to_be_bytes());
        bytes[4] = MAC_LEN as u8;
        bytes[5] = 4;
        bytes[6..8].copy_from_slice(&self.operation.to_be_bytes());
        bytes[8..14].copy_from_slice(&self.sender_mac.octets());
        bytes[14..18].copy_from_slice(&self.sender_ip.octets());
        bytes[18..24].copy_from_slice(&self.target_mac.octets());
        bytes[24..28].copy_from_slice(&self.target_ip.octets());
        bytes
    }

    pub fn is_request(&self) -> bool {
        self.operation == ARP_REQUEST
    }

    pub fn is_reply(&self) -> bool {
        self.operation == ARP_REPLY
    }
}

/// Resolved-address cache plus the pending-packet slots
pub struct ArpTables {
    cache: Mutex<AgingMap<Ipv4Addr, MacAddress>>,
    pending: Mutex<AgingMap<Ipv4Addr, PacketBuf>>,
}

impl ArpTables {
    pub fn new(config: &NetworkConfig) -> Self {
        Self {
            cache: Mutex::new(AgingMap::new(Some(config.arp_timeout_secs), None)),
            pending: Mutex::new(AgingMap::new(Some(config.arp_min_interval_secs), None)),
        }
    }

    pub fn lookup(&self, ip: Ipv4Addr, now: u64) -> Option<MacAddress> {
        self.cache.lock().get(&ip, now).copied()
    }

    /// Add or refresh a cache entry
    pub fn learn(&self, ip: Ipv4Addr, mac: MacAddress, now: u64) {
        if let Err(e) = self.cache.lock().set(ip, mac, now) {
            debug!("ARP: cannot cache {} -> {}: {}", ip, mac, e);
        }
    }

    /// Live cache entries as `(ip, mac, learned_at)`
    pub fn entries(&self, now: u64) -> Vec<(Ipv4Addr, MacAddress, u64)> {
        self.cache
            .lock()
            .iter(now)
            .map(|(ip, mac, learned_at)| (*ip, *mac, learned_at))
            .collect()
    }

    /// Number of destinations with a packet waiting for resolution
    pub fn pending_count(&self, now: u64) -> usize {
        self.pending.lock().iter(now).count()
    }
}

/// Look up the MAC address for `ip`; absent or expired entries resolve to `None`
pub fn resolve(stack: &NetStack, ip: Ipv4Addr) -> Option<MacAddress> {
    stack.arp.lookup(ip, stack.now())
}

/// Broadcast a request asking who owns `target_ip`
pub fn send_request(stack: &NetStack, target_ip: Ipv4Addr) {
    let config = stack.config();
    let packet = ArpPacket::new_request(config.mac_addr, config.ip_addr, target_ip);

    trace!("ARP: who-has {} tell {}", target_ip, config.ip_addr);
    match PacketBuf::from_slice(&packet.to_bytes()) {
        Ok(buf) => stack.transmit(buf, MacAddress::BROADCAST, ETHERTYPE_ARP),
        Err(e) => debug!("ARP: cannot build request: {}", e),
    }
}

/// Tell `target_ip` at `target_mac` that the local IP lives at the local MAC
pub fn send_reply(stack: &NetStack, target_ip: Ipv4Addr, target_mac: MacAddress) {
    let config = stack.config();
    let packet = ArpPacket::new_reply(config.mac_addr, config.ip_addr, target_mac, target_ip);

    trace!("ARP: {} is-at {} (to {})", config.ip_addr, config.mac_addr, target_ip);
    match PacketBuf::from_slice(&packet.to_bytes()) {
        Ok(buf) => stack.transmit(buf, target_mac, ETHERTYPE_ARP),
        Err(e) => debug!("ARP: cannot build reply: {}", e),
    }
}

/// Handle an incoming ARP packet
///
/// Every valid request or reply refreshes the cache with the sender's
/// binding. A packet waiting for the sender is flushed; otherwise a request
/// for the local address is answered.
pub fn on_frame_received(stack: &NetStack, frame: &PacketBuf, src_mac: MacAddress) -> Result<(), ArpError> {
    let packet = ArpPacket::from_bytes(frame.as_slice())?;
    let now = stack.now();

    stack.arp.learn(packet.sender_ip, src_mac, now);

    let waiting = stack.arp.pending.lock().take(&packet.sender_ip, now);
    if let Some(buf) = waiting {
        trace!("ARP: {} resolved, flushing pending packet", packet.sender_ip);
        stack.transmit(buf, packet.sender_mac, ETHERTYPE_IPV4);
        return Ok(());
    }

    if packet.is_request() && packet.target_ip == stack.config().ip_addr {
        send_reply(stack, packet.sender_ip, packet.sender_mac);
    }

    Ok(())
}

/// Transmit `buf` to `ip` once its MAC is known
///
/// On a cache miss the packet takes the pending slot for `ip`. Only the
/// first miss inside a throttle interval sends a request; later ones just
/// replace the waiting packet.
pub fn enqueue_for_resolution(stack: &NetStack, buf: PacketBuf, ip: Ipv4Addr) {
    if let Some(mac) = resolve(stack, ip) {
        stack.transmit(buf, mac, ETHERTYPE_IPV4);
        return;
    }

    let now = stack.now();
    let needs_request = {
        let mut pending = stack.arp.pending.lock();
        match pending.replace(&ip, buf, now) {
            Ok(_) => {
                trace!("ARP: request for {} in flight, replaced pending packet", ip);
                false
            }
            Err(buf) => match pending.set(ip, buf, now) {
                Ok(()) => true,
                Err(e) => {
                    debug!("ARP: dropping packet for {}: {}", ip, e);
                    false
                }
            },
        }
    };

    if needs_request {
        send_request(stack, ip);
    }
}
