mod common;

use std::net::Ipv4Addr;
use std::sync::Arc;

use common::*;
use rustrial_net::net::arp::{ArpPacket, ARP_REPLY, ARP_REQUEST};
use rustrial_net::net::buffer::PacketBuf;
use rustrial_net::net::ethernet::{MacAddress, ETHERTYPE_ARP, ETHERTYPE_IPV4};
use rustrial_net::net::loopback::LoopbackLink;
use rustrial_net::{ManualClock, NetStack, NetworkConfig};

fn parse_arp(payload: &PacketBuf) -> ArpPacket {
    ArpPacket::from_bytes(payload.as_slice()).unwrap()
}

#[test]
fn test_startup_announces_local_address() {
    let link = Arc::new(LoopbackLink::new(8));
    let config = NetworkConfig::new(LOCAL_IP, LOCAL_MAC);
    let _stack = NetStack::new(config, link.clone(), Arc::new(ManualClock::new(0)));

    let frames = link.drain();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].dest, MacAddress::BROADCAST);
    assert_eq!(frames[0].ethertype, ETHERTYPE_ARP);

    let packet = parse_arp(&frames[0].payload);
    assert_eq!(packet.operation, ARP_REQUEST);
    assert_eq!(packet.sender_mac, LOCAL_MAC);
    assert_eq!(packet.sender_ip, LOCAL_IP);
    assert_eq!(packet.target_mac, MacAddress::ZERO);
    assert_eq!(packet.target_ip, LOCAL_IP);
}

#[test]
fn test_request_for_local_address_is_answered() {
    let h = Harness::new();
    let request = arp_frame(ARP_REQUEST, PEER_MAC, PEER_IP, MacAddress::ZERO, LOCAL_IP);
    h.stack.on_frame(request, ETHERTYPE_ARP, PEER_MAC);

    let frames = h.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].dest, PEER_MAC);
    assert_eq!(frames[0].ethertype, ETHERTYPE_ARP);

    let reply = parse_arp(&frames[0].payload);
    assert_eq!(reply.operation, ARP_REPLY);
    assert_eq!(reply.sender_mac, LOCAL_MAC);
    assert_eq!(reply.sender_ip, LOCAL_IP);
    assert_eq!(reply.target_mac, PEER_MAC);
    assert_eq!(reply.target_ip, PEER_IP);

    // The requester's binding was learned on the way
    assert_eq!(h.stack.resolve(PEER_IP), Some(PEER_MAC));
}

#[test]
fn test_request_for_other_address_only_learns() {
    let h = Harness::new();
    let request = arp_frame(
        ARP_REQUEST,
        PEER_MAC,
        PEER_IP,
        MacAddress::ZERO,
        Ipv4Addr::new(10, 0, 0, 99),
    );
    h.stack.on_frame(request, ETHERTYPE_ARP, PEER_MAC);

    assert!(h.frames().is_empty());
    assert_eq!(h.stack.resolve(PEER_IP), Some(PEER_MAC));
}

#[test]
fn test_cache_records_link_source_address() {
    let h = Harness::new();
    let link_src = MacAddress::new([0x02, 0, 0, 0, 0, 0x77]);
    let reply = arp_frame(ARP_REPLY, PEER_MAC, PEER_IP, LOCAL_MAC, LOCAL_IP);
    h.stack.on_frame(reply, ETHERTYPE_ARP, link_src);

    assert_eq!(h.stack.resolve(PEER_IP), Some(link_src));
}

#[test]
fn test_padded_frame_accepted() {
    let h = Harness::new();
    let mut bytes = ArpPacket::new_reply(PEER_MAC, PEER_IP, LOCAL_MAC, LOCAL_IP)
        .to_bytes()
        .to_vec();
    bytes.resize(46, 0);
    h.stack.on_frame(PacketBuf::from_slice(&bytes).unwrap(), ETHERTYPE_ARP, PEER_MAC);

    assert_eq!(h.stack.resolve(PEER_IP), Some(PEER_MAC));
}

#[test]
fn test_malformed_frames_dropped() {
    let h = Harness::new();
    let good = ArpPacket::new_request(PEER_MAC, PEER_IP, LOCAL_IP).to_bytes();

    let mut wrong_hw = good;
    wrong_hw[1] = 6;
    let mut wrong_op = good;
    wrong_op[7] = 9;

    for bytes in [&good[..27], &wrong_hw[..], &wrong_op[..]] {
        h.stack.on_frame(PacketBuf::from_slice(bytes).unwrap(), ETHERTYPE_ARP, PEER_MAC);
    }

    assert!(h.frames().is_empty());
    assert_eq!(h.stack.resolve(PEER_IP), None);
}

#[test]
fn test_resolve_then_flush() {
    let h = Harness::new();
    h.stack.udp_send_bytes(b"queued", 4000, PEER_IP, 9);

    let frames = h.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].dest, MacAddress::BROADCAST);
    let request = parse_arp(&frames[0].payload);
    assert!(request.is_request());
    assert_eq!(request.target_ip, PEER_IP);
    assert_eq!(h.stack.pending_resolutions(), 1);

    let reply = arp_frame(ARP_REPLY, PEER_MAC, PEER_IP, LOCAL_MAC, LOCAL_IP);
    h.stack.on_frame(reply, ETHERTYPE_ARP, PEER_MAC);

    let frames = h.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].dest, PEER_MAC);
    assert_eq!(frames[0].ethertype, ETHERTYPE_IPV4);
    let (header, payload) = parse_ip(&frames[0]);
    assert_eq!(header.dest_ip, PEER_IP);
    assert!(payload.ends_with(b"queued"));

    assert_eq!(h.stack.pending_resolutions(), 0);
    assert_eq!(h.stack.resolve(PEER_IP), Some(PEER_MAC));
}

#[test]
fn test_flush_takes_precedence_over_reply() {
    let h = Harness::new();
    h.stack.udp_send_bytes(b"x", 4000, PEER_IP, 9);
    h.frames();

    // A request for our address from the awaited host flushes the queue only
    let request = arp_frame(ARP_REQUEST, PEER_MAC, PEER_IP, MacAddress::ZERO, LOCAL_IP);
    h.stack.on_frame(request, ETHERTYPE_ARP, PEER_MAC);

    let frames = h.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].ethertype, ETHERTYPE_IPV4);
}

#[test]
fn test_duplicate_enqueue_overwrites() {
    let h = Harness::new();
    h.stack.udp_send_bytes(b"first", 4000, PEER_IP, 9);
    h.stack.udp_send_bytes(b"second", 4000, PEER_IP, 9);

    // Only one request goes out for both packets
    let frames = h.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].ethertype, ETHERTYPE_ARP);
    assert_eq!(h.stack.pending_resolutions(), 1);

    let reply = arp_frame(ARP_REPLY, PEER_MAC, PEER_IP, LOCAL_MAC, LOCAL_IP);
    h.stack.on_frame(reply, ETHERTYPE_ARP, PEER_MAC);

    let frames = h.frames();
    assert_eq!(frames.len(), 1);
    let (_, payload) = parse_ip(&frames[0]);
    assert!(payload.ends_with(b"second"));
}

#[test]
fn test_overwrite_does_not_extend_throttle_window() {
    let config = NetworkConfig::new(LOCAL_IP, LOCAL_MAC).with_arp_timeouts(300, 5);
    let h = Harness::with_config(config);
    h.stack.udp_send_bytes(b"a", 4000, PEER_IP, 9);
    assert_eq!(h.frames().len(), 1);

    // Replacing the waiting packet keeps the original deadline
    h.clock.advance(3);
    h.stack.udp_send_bytes(b"b", 4000, PEER_IP, 9);
    assert!(h.frames().is_empty());
    assert_eq!(h.stack.pending_resolutions(), 1);

    h.clock.advance(2);
    assert_eq!(h.stack.pending_resolutions(), 0);
}

#[test]
fn test_pending_expiry_allows_new_request() {
    let h = Harness::new();
    h.stack.udp_send_bytes(b"lost", 4000, PEER_IP, 9);
    assert_eq!(h.frames().len(), 1);

    h.clock.advance(1);
    assert_eq!(h.stack.pending_resolutions(), 0);

    h.stack.udp_send_bytes(b"retry", 4000, PEER_IP, 9);
    let frames = h.frames();
    assert_eq!(frames.len(), 1);
    assert!(parse_arp(&frames[0].payload).is_request());

    // The expired packet is gone; only the retry is flushed
    let reply = arp_frame(ARP_REPLY, PEER_MAC, PEER_IP, LOCAL_MAC, LOCAL_IP);
    h.stack.on_frame(reply, ETHERTYPE_ARP, PEER_MAC);
    let frames = h.frames();
    assert_eq!(frames.len(), 1);
    let (_, payload) = parse_ip(&frames[0]);
    assert!(payload.ends_with(b"retry"));
}

#[test]
fn test_cache_entry_expires() {
    let h = Harness::new();
    h.learn_peer();
    assert_eq!(
        h.stack.arp_entries(),
        vec![(PEER_IP, PEER_MAC, START_SECS)]
    );

    h.clock.advance(299);
    assert_eq!(h.stack.resolve(PEER_IP), Some(PEER_MAC));

    h.clock.advance(1);
    assert_eq!(h.stack.resolve(PEER_IP), None);
    assert!(h.stack.arp_entries().is_empty());

    // Sending now needs a fresh resolution
    h.stack.udp_send_bytes(b"x", 4000, PEER_IP, 9);
    let frames = h.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].ethertype, ETHERTYPE_ARP);
}

#[test]
fn test_resolved_destination_sent_directly() {
    let h = Harness::new();
    h.learn_peer();
    h.stack.udp_send_bytes(b"direct", 4000, PEER_IP, 9);

    let frames = h.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].dest, PEER_MAC);
    assert_eq!(frames[0].ethertype, ETHERTYPE_IPV4);
    assert_eq!(h.stack.pending_resolutions(), 0);
}

fn neighbour(i: u8) -> (Ipv4Addr, MacAddress) {
    (Ipv4Addr::new(10, 0, 1, i), MacAddress::new([0x02, 0, 0, 0, 0x01, i]))
}

#[test]
fn test_cache_learns_every_sender() {
    let h = Harness::new();

    for i in 1..=100 {
        let (ip, mac) = neighbour(i);
        let reply = arp_frame(ARP_REPLY, mac, ip, LOCAL_MAC, LOCAL_IP);
        h.stack.on_frame(reply, ETHERTYPE_ARP, mac);
    }

    assert_eq!(h.stack.arp_entries().len(), 100);
    for i in [1, 64, 65, 100] {
        let (ip, mac) = neighbour(i);
        assert_eq!(h.stack.resolve(ip), Some(mac));
    }
    assert!(h.frames().is_empty());
}

#[test]
fn test_every_unresolved_destination_requested() {
    let h = Harness::new();

    for i in 1..=100 {
        h.stack.udp_send_bytes(b"hello", 4000, neighbour(i).0, 9);
    }

    let targets: Vec<Ipv4Addr> = h
        .frames()
        .iter()
        .map(|frame| {
            assert_eq!(frame.ethertype, ETHERTYPE_ARP);
            parse_arp(&frame.payload).target_ip
        })
        .collect();
    let expected: Vec<Ipv4Addr> = (1..=100).map(|i| neighbour(i).0).collect();
    assert_eq!(targets, expected);
    assert_eq!(h.stack.pending_resolutions(), 100);

    // A late reply still finds its packet waiting
    let (ip, mac) = neighbour(100);
    h.stack.on_frame(arp_frame(ARP_REPLY, mac, ip, LOCAL_MAC, LOCAL_IP), ETHERTYPE_ARP, mac);
    let frames = h.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].dest, mac);
    assert_eq!(frames[0].ethertype, ETHERTYPE_IPV4);
}
