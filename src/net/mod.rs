//! Network stack implementation

pub mod buffer;
pub mod aging;
pub mod checksum;
pub mod config;
pub mod ethernet;
pub mod arp;
pub mod ipv4;
pub mod icmp;
pub mod udp;
pub mod stack;
pub mod loopback;
