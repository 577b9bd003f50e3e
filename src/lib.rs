#![cfg_attr(not(test), no_std)]

//! Minimal IPv4 network-layer core: ARP, IPv4 with send-side fragmentation,
//! ICMP echo / destination-unreachable and UDP port demultiplexing.
//!
//! The crate does no I/O of its own. Frames leave through a [`net::ethernet::LinkLayer`]
//! and enter through [`net::stack::NetStack::on_frame`].

extern crate alloc;

pub mod net;

pub use net::config::NetworkConfig;
pub use net::ethernet::{LinkLayer, MacAddress};
pub use net::stack::{Clock, ManualClock, NetStack};
