//! Network configuration

use core::net::Ipv4Addr;

use crate::net::ethernet::{MacAddress, MAX_PAYLOAD_SIZE};
use crate::net::ipv4::DEFAULT_TTL;

/// Default ARP cache entry TTL (300 seconds = 5 minutes)
pub const ARP_CACHE_TTL_SECS: u64 = 300;

/// Minimum interval between two ARP requests for the same address
pub const ARP_MIN_INTERVAL_SECS: u64 = 1;

/// Default size of the UDP port table
pub const DEFAULT_UDP_CAPACITY: usize = 64;

/// Interface configuration shared by every layer of a [`NetStack`](crate::net::stack::NetStack)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Local IP address
    pub ip_addr: Ipv4Addr,
    /// Local link address
    pub mac_addr: MacAddress,
    /// Link MTU (largest IP datagram the link carries)
    pub mtu: usize,
    /// TTL written into every outgoing datagram
    pub ttl: u8,
    /// Lifetime of a resolved ARP entry
    pub arp_timeout_secs: u64,
    /// Lifetime of a pending-resolution slot; also the ARP re-request throttle
    pub arp_min_interval_secs: u64,
    /// Maximum bound UDP ports
    pub udp_capacity: usize,
}

impl NetworkConfig {
    /// Create a configuration with default timing and sizes
    pub fn new(ip_addr: Ipv4Addr, mac_addr: MacAddress) -> Self {
        Self {
            ip_addr,
            mac_addr,
            mtu: MAX_PAYLOAD_SIZE,
            ttl: DEFAULT_TTL,
            arp_timeout_secs: ARP_CACHE_TTL_SECS,
            arp_min_interval_secs: ARP_MIN_INTERVAL_SECS,
            udp_capacity: DEFAULT_UDP_CAPACITY,
        }
    }

    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn with_ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_arp_timeouts(mut self, timeout_secs: u64, min_interval_secs: u64) -> Self {
        self.arp_timeout_secs = timeout_secs;
        self.arp_min_interval_secs = min_interval_secs;
        self
    }

    pub fn with_udp_capacity(mut self, udp_capacity: usize) -> Self {
        self.udp_capacity = udp_capacity;
        self
    }

    /// Check if configuration is usable (IP is not 0.0.0.0 and the MTU fits
    /// at least a header plus one 8-byte fragment block)
    pub fn is_valid(&self) -> bool {
        self.ip_addr != Ipv4Addr::UNSPECIFIED
            && self.mtu >= crate::net::ipv4::HEADER_SIZE + 8
    }
}
