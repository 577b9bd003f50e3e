//! Network Stack Integration
//!
//! [`NetStack`] owns every table the protocol layers share (ARP cache, pending
//! packets, UDP ports, datagram id) together with the link and the clock.
//! Frames come in through [`NetStack::on_frame`]; applications bind ports and
//! send through the `udp_*` methods.
//!
//! All entry points take `&self`. No lock is held while a frame is handed to
//! the link or a UDP handler runs, so handlers may call back into the stack.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::net::Ipv4Addr;
use core::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use log::{debug, info, trace, warn};
use spin::Mutex;

use crate::net::arp::{self, ArpTables};
use crate::net::buffer::PacketBuf;
use crate::net::config::NetworkConfig;
use crate::net::ethernet::{LinkLayer, MacAddress, ETHERTYPE_ARP, ETHERTYPE_IPV4};
use crate::net::icmp;
use crate::net::ipv4::{self, protocol};
use crate::net::udp::{self, UdpError, UdpHandler, UdpTable};

/// Monotonic time source in whole seconds
pub trait Clock: Send + Sync {
    fn now_secs(&self) -> u64;
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    secs: AtomicU64,
}

impl ManualClock {
    pub fn new(start_secs: u64) -> Self {
        Self {
            secs: AtomicU64::new(start_secs),
        }
    }

    pub fn set(&self, secs: u64) {
        self.secs.store(secs, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.secs.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> u64 {
        self.secs.load(Ordering::SeqCst)
    }
}

/// Handlers selectable by EtherType
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkProtocol {
    Arp,
    Ipv4,
}

/// Handlers selectable by IP protocol number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpProtocol {
    Icmp,
    Udp,
}

/// An IPv4 host on a single link
pub struct NetStack {
    config: NetworkConfig,
    link: Arc<dyn LinkLayer>,
    clock: Arc<dyn Clock>,
    pub(crate) arp: ArpTables,
    pub(crate) udp: UdpTable,
    next_id: AtomicU16,
    link_protocols: Mutex<BTreeMap<u16, LinkProtocol>>,
    ip_protocols: Mutex<BTreeMap<u8, IpProtocol>>,
}

impl NetStack {
    /// Create a stack and announce the local address on the link
    ///
    /// ARP and IPv4 are registered by EtherType, ICMP and UDP by protocol
    /// number. An ARP request for the local address is broadcast right away.
    pub fn new(config: NetworkConfig, link: Arc<dyn LinkLayer>, clock: Arc<dyn Clock>) -> Self {
        if !config.is_valid() {
            warn!("NET: configuration for {} mtu {} is not usable", config.ip_addr, config.mtu);
        }

        let mut link_protocols = BTreeMap::new();
        link_protocols.insert(ETHERTYPE_ARP, LinkProtocol::Arp);
        link_protocols.insert(ETHERTYPE_IPV4, LinkProtocol::Ipv4);

        let mut ip_protocols = BTreeMap::new();
        ip_protocols.insert(protocol::ICMP, IpProtocol::Icmp);
        ip_protocols.insert(protocol::UDP, IpProtocol::Udp);

        let stack = Self {
            arp: ArpTables::new(&config),
            udp: UdpTable::new(config.udp_capacity),
            config,
            link,
            clock,
            next_id: AtomicU16::new(0),
            link_protocols: Mutex::new(link_protocols),
            ip_protocols: Mutex::new(ip_protocols),
        };

        info!("NET: interface up, ip={} mac={} mtu={}", config.ip_addr, config.mac_addr, config.mtu);
        arp::send_request(&stack, config.ip_addr);
        stack
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Current time according to the stack's clock
    pub fn now(&self) -> u64 {
        self.clock.now_secs()
    }

    /// Route `protocol` numbers to `handler`, replacing any previous entry
    pub fn register_protocol(&self, number: u8, handler: IpProtocol) {
        self.ip_protocols.lock().insert(number, handler);
    }

    pub fn unregister_protocol(&self, number: u8) -> Option<IpProtocol> {
        self.ip_protocols.lock().remove(&number)
    }

    pub(crate) fn ip_protocol(&self, number: u8) -> Option<IpProtocol> {
        self.ip_protocols.lock().get(&number).copied()
    }

    /// Accept a frame payload from the link layer
    pub fn on_frame(&self, buf: PacketBuf, ethertype: u16, src_mac: MacAddress) {
        let handler = self.link_protocols.lock().get(&ethertype).copied();
        match handler {
            Some(LinkProtocol::Arp) => self.on_arp_frame(buf, src_mac),
            Some(LinkProtocol::Ipv4) => self.on_ip_datagram(buf, src_mac),
            None => debug!("NET: unknown EtherType 0x{:04X} from {}", ethertype, src_mac),
        }
    }

    pub fn on_arp_frame(&self, buf: PacketBuf, src_mac: MacAddress) {
        if let Err(e) = arp::on_frame_received(self, &buf, src_mac) {
            debug!("ARP: dropped frame from {}: {}", src_mac, e);
        }
    }

    pub fn on_ip_datagram(&self, buf: PacketBuf, src_mac: MacAddress) {
        if let Err(e) = ipv4::receive(self, buf, src_mac) {
            debug!("IPv4: dropped datagram from {}: {}", src_mac, e);
        }
    }

    /// Pass a datagram payload to the layer selected by its protocol number
    pub(crate) fn dispatch_ip(&self, handler: IpProtocol, buf: &mut PacketBuf, src_ip: Ipv4Addr) {
        match handler {
            IpProtocol::Icmp => {
                if let Err(e) = icmp::receive(self, buf, src_ip) {
                    debug!("ICMP: dropped message from {}: {}", src_ip, e);
                }
            }
            IpProtocol::Udp => {
                if let Err(e) = udp::receive(self, buf, src_ip) {
                    debug!("UDP: dropped datagram from {}: {}", src_ip, e);
                }
            }
        }
    }

    /// Bind `handler` to `port`; an existing binding is replaced
    pub fn udp_open<F>(&self, port: u16, handler: F) -> Result<(), UdpError>
    where
        F: Fn(&NetStack, &[u8], Ipv4Addr, u16) + Send + Sync + 'static,
    {
        let handler: UdpHandler = Arc::new(handler);
        self.udp.open(port, handler)?;
        trace!("UDP: bound port {}", port);
        Ok(())
    }

    pub fn udp_close(&self, port: u16) {
        if self.udp.close(port) {
            trace!("UDP: unbound port {}", port);
        }
    }

    pub fn udp_bound_ports(&self) -> Vec<u16> {
        self.udp.ports()
    }

    pub fn udp_send(&self, buf: PacketBuf, src_port: u16, dst_ip: Ipv4Addr, dst_port: u16) {
        udp::send(self, buf, src_port, dst_ip, dst_port);
    }

    pub fn udp_send_bytes(&self, data: &[u8], src_port: u16, dst_ip: Ipv4Addr, dst_port: u16) {
        udp::send_bytes(self, data, src_port, dst_ip, dst_port);
    }

    /// Send `buf` as the payload of an IP datagram carrying `protocol`
    pub fn ip_send(&self, buf: PacketBuf, dst: Ipv4Addr, protocol: u8) {
        ipv4::send(self, buf, dst, protocol);
    }

    /// Send an ICMP echo request
    pub fn ping(&self, dst: Ipv4Addr, identifier: u16, sequence: u16, data: &[u8]) {
        icmp::send_echo_request(self, dst, identifier, sequence, data);
    }

    pub fn resolve(&self, ip: Ipv4Addr) -> Option<MacAddress> {
        arp::resolve(self, ip)
    }

    /// Live ARP cache rows as `(ip, mac, learned_at)`
    pub fn arp_entries(&self) -> Vec<(Ipv4Addr, MacAddress, u64)> {
        self.arp.entries(self.now())
    }

    /// Destinations with a datagram waiting for ARP
    pub fn pending_resolutions(&self) -> usize {
        self.arp.pending_count(self.now())
    }

    /// Id the next sent datagram will carry
    pub fn peek_datagram_id(&self) -> u16 {
        self.next_id.load(Ordering::Relaxed)
    }

    /// Reserve the id for one outgoing datagram (all of its fragments)
    pub(crate) fn next_datagram_id(&self) -> u16 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Hand a packet to the link; failures are logged and the packet dropped
    pub(crate) fn transmit(&self, buf: PacketBuf, dest: MacAddress, ethertype: u16) {
        let len = buf.len();
        match self.link.transmit(buf, dest, ethertype) {
            Ok(()) => trace!("NET: sent {} bytes to {} type 0x{:04X}", len, dest, ethertype),
            Err(e) => warn!("NET: transmit of {} bytes to {} failed: {}", len, dest, e),
        }
    }
}
