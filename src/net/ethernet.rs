//Ethernet link interface
//
//Framing and the wire itself live outside this crate. The stack only needs
//link addresses, EtherType numbers and something to hand finished packets to.

use core::fmt;

use crate::net::buffer::PacketBuf;

/// EtherType constants
pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;

/// Maximum Ethernet payload size (MTU)
pub const MAX_PAYLOAD_SIZE: usize = 1500;

/// MAC address length in bytes
pub const MAC_LEN: usize = 6;

/// 48-bit link-layer address
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MacAddress(pub [u8; MAC_LEN]);

impl MacAddress {
    /// Broadcast MAC address (FF:FF:FF:FF:FF:FF)
    pub const BROADCAST: MacAddress = MacAddress([0xFF; MAC_LEN]);

    /// All-zero address, used for the unknown target of an ARP request
    pub const ZERO: MacAddress = MacAddress([0; MAC_LEN]);

    pub const fn new(octets: [u8; MAC_LEN]) -> Self {
        MacAddress(octets)
    }

    pub const fn octets(&self) -> [u8; MAC_LEN] {
        self.0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl From<[u8; MAC_LEN]> for MacAddress {
    fn from(octets: [u8; MAC_LEN]) -> Self {
        MacAddress(octets)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

impl fmt::Debug for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Errors that can occur during packet transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitError {
    /// Packet too large for the device
    PacketTooLarge,
    /// TX buffer is full, try again later
    BufferFull,
}

impl fmt::Display for TransmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransmitError::PacketTooLarge => write!(f, "Packet too large for link"),
            TransmitError::BufferFull => write!(f, "Transmit buffer full"),
        }
    }
}

/// Outbound side of the link layer
///
/// Implementations add their own framing around `packet` and put it on the
/// wire addressed to `dest`. The call must not block.
pub trait LinkLayer: Send + Sync {
    fn transmit(&self, packet: PacketBuf, dest: MacAddress, ethertype: u16) -> Result<(), TransmitError>;
}
