#![allow(dead_code)]

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use rustrial_net::net::arp::{ArpPacket, ARP_REPLY};
use rustrial_net::net::buffer::PacketBuf;
use rustrial_net::net::checksum::transport_checksum;
use rustrial_net::net::ethernet::{MacAddress, ETHERTYPE_ARP, ETHERTYPE_IPV4};
use rustrial_net::net::icmp::{IcmpHeader, IcmpType};
use rustrial_net::net::ipv4::{protocol, Ipv4Header, HEADER_SIZE};
use rustrial_net::net::loopback::{Frame, LoopbackLink};
use rustrial_net::net::udp::UdpHeader;
use rustrial_net::{ManualClock, NetStack, NetworkConfig};

pub const LOCAL_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
pub const LOCAL_MAC: MacAddress = MacAddress::new([0x02, 0, 0, 0, 0, 0x01]);
pub const PEER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
pub const PEER_MAC: MacAddress = MacAddress::new([0x02, 0, 0, 0, 0, 0x02]);

pub const START_SECS: u64 = 1000;

/// A stack on a loopback link with a hand-driven clock
pub struct Harness {
    pub stack: NetStack,
    pub link: Arc<LoopbackLink>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    /// Fresh stack with the startup announcement already drained
    pub fn new() -> Self {
        Self::with_config(NetworkConfig::new(LOCAL_IP, LOCAL_MAC))
    }

    pub fn with_config(config: NetworkConfig) -> Self {
        let link = Arc::new(LoopbackLink::new(256));
        let clock = Arc::new(ManualClock::new(START_SECS));
        let stack = NetStack::new(config, link.clone(), clock.clone());
        link.drain();
        Self { stack, link, clock }
    }

    /// Teach the stack the peer's MAC with an unsolicited ARP reply
    pub fn learn_peer(&self) {
        let reply = arp_frame(ARP_REPLY, PEER_MAC, PEER_IP, LOCAL_MAC, LOCAL_IP);
        self.stack.on_frame(reply, ETHERTYPE_ARP, PEER_MAC);
        self.link.drain();
    }

    /// Feed a raw IPv4 datagram as if the peer had sent it
    pub fn deliver_ip(&self, datagram: &[u8]) {
        let buf = PacketBuf::from_slice(datagram).unwrap();
        self.stack.on_frame(buf, ETHERTYPE_IPV4, PEER_MAC);
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.link.drain()
    }
}

pub fn arp_frame(
    operation: u16,
    sender_mac: MacAddress,
    sender_ip: Ipv4Addr,
    target_mac: MacAddress,
    target_ip: Ipv4Addr,
) -> PacketBuf {
    let packet = ArpPacket {
        operation,
        sender_mac,
        sender_ip,
        target_mac,
        target_ip,
    };
    PacketBuf::from_slice(&packet.to_bytes()).unwrap()
}

pub fn ip_datagram(src: Ipv4Addr, dst: Ipv4Addr, proto: u8, payload: &[u8]) -> Vec<u8> {
    let mut header = Ipv4Header::new(src, dst, proto, payload.len() as u16);
    header.identification = 0x0101;
    let mut bytes = header.to_bytes().to_vec();
    bytes.extend_from_slice(payload);
    bytes
}

pub fn udp_segment(src_ip: Ipv4Addr, dst_ip: Ipv4Addr, src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let mut segment = vec![0u8; 8];
    segment.extend_from_slice(payload);

    let header = UdpHeader {
        src_port,
        dest_port: dst_port,
        length: segment.len() as u16,
        checksum: 0,
    };
    header.write(&mut segment).unwrap();

    let checksum = match transport_checksum(protocol::UDP, &segment, src_ip, dst_ip) {
        0 => 0xFFFF,
        c => c,
    };
    segment[6..8].copy_from_slice(&checksum.to_be_bytes());
    segment
}

/// UDP datagram from the peer to the local stack
pub fn udp_datagram(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let segment = udp_segment(PEER_IP, LOCAL_IP, src_port, dst_port, payload);
    ip_datagram(PEER_IP, LOCAL_IP, protocol::UDP, &segment)
}

pub fn echo_request(identifier: u16, sequence: u16, data: &[u8]) -> Vec<u8> {
    let mut message = vec![0u8; 8];
    message.extend_from_slice(data);

    let mut header = IcmpHeader::new(IcmpType::EchoRequest, 0);
    header.identifier = identifier;
    header.sequence = sequence;
    header.write(&mut message).unwrap();
    message
}

/// Split a transmitted IPv4 frame into its header and payload
pub fn parse_ip(frame: &Frame) -> (Ipv4Header, Vec<u8>) {
    assert_eq!(frame.ethertype, ETHERTYPE_IPV4);
    let bytes = frame.payload.as_slice();
    let header = Ipv4Header::parse(bytes).unwrap();
    (header, bytes[HEADER_SIZE..].to_vec())
}

pub type Received = Arc<Mutex<Vec<(Vec<u8>, Ipv4Addr, u16)>>>;

/// Bind `port` to a handler that records every datagram it sees
pub fn record_port(stack: &NetStack, port: u16) -> Received {
    let received: Received = Arc::default();
    let sink = received.clone();
    stack
        .udp_open(port, move |_stack, payload, src_ip, src_port| {
            sink.lock().unwrap().push((payload.to_vec(), src_ip, src_port));
        })
        .unwrap();
    received
}
