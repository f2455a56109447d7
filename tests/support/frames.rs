//! Hand-built Ethernet/IPv4 frames for driving links without a real stack.

use netem::Frame;
use pnet_base::MacAddr;
use pnet_packet::ethernet::{EtherTypes, EthernetPacket, MutableEthernetPacket};
use pnet_packet::ip::IpNextHeaderProtocols;
use pnet_packet::ipv4::{self, Ipv4Packet, MutableIpv4Packet};
use pnet_packet::tcp::{self, MutableTcpPacket, TcpPacket};
use pnet_packet::udp::{self, MutableUdpPacket, UdpPacket};
use std::net::Ipv4Addr;

pub const CLIENT_MAC: MacAddr = MacAddr(0x02, 0, 0, 0, 0, 0x01);
pub const SERVER_MAC: MacAddr = MacAddr(0x02, 0, 0, 0, 0, 0x02);
pub const CLIENT_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
pub const SERVER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);

fn wrap_ipv4(
    source: Ipv4Addr,
    destination: Ipv4Addr,
    protocol: pnet_packet::ip::IpNextHeaderProtocol,
    transport: &[u8],
) -> Frame {
    let ip_len = Ipv4Packet::minimum_packet_size() + transport.len();
    let mut ip_buffer = vec![0u8; ip_len];
    let mut ip_writer = MutableIpv4Packet::new(&mut ip_buffer).unwrap();
    ip_writer.set_version(4);
    ip_writer.set_header_length(5);
    ip_writer.set_total_length(ip_len as u16);
    ip_writer.set_flags(0b010);
    ip_writer.set_ttl(64);
    ip_writer.set_next_level_protocol(protocol);
    ip_writer.set_source(source);
    ip_writer.set_destination(destination);
    ip_writer.set_payload(transport);
    let checksum = ipv4::checksum(&ip_writer.to_immutable());
    ip_writer.set_checksum(checksum);
    drop(ip_writer);

    let mut frame_buffer = vec![0u8; EthernetPacket::minimum_packet_size() + ip_len];
    let mut ethernet_writer = MutableEthernetPacket::new(&mut frame_buffer).unwrap();
    ethernet_writer.set_source(CLIENT_MAC);
    ethernet_writer.set_destination(SERVER_MAC);
    ethernet_writer.set_ethertype(EtherTypes::Ipv4);
    ethernet_writer.set_payload(&ip_buffer);
    drop(ethernet_writer);

    Frame::new(frame_buffer)
}

pub fn tcp_frame(
    source: (Ipv4Addr, u16),
    destination: (Ipv4Addr, u16),
    flags: u8,
    sequence: u32,
    acknowledgement: u32,
    payload: &[u8],
) -> Frame {
    let tcp_len = TcpPacket::minimum_packet_size() + payload.len();
    let mut tcp_buffer = vec![0u8; tcp_len];
    let mut tcp_writer = MutableTcpPacket::new(&mut tcp_buffer).unwrap();
    tcp_writer.set_source(source.1);
    tcp_writer.set_destination(destination.1);
    tcp_writer.set_sequence(sequence);
    tcp_writer.set_acknowledgement(acknowledgement);
    tcp_writer.set_data_offset(5);
    tcp_writer.set_flags(flags);
    tcp_writer.set_window(65535);
    tcp_writer.set_payload(payload);
    let checksum = tcp::ipv4_checksum(&tcp_writer.to_immutable(), &source.0, &destination.0);
    tcp_writer.set_checksum(checksum);
    drop(tcp_writer);

    wrap_ipv4(source.0, destination.0, IpNextHeaderProtocols::Tcp, &tcp_buffer)
}

pub fn udp_frame(source: (Ipv4Addr, u16), destination: (Ipv4Addr, u16), payload: &[u8]) -> Frame {
    let udp_len = UdpPacket::minimum_packet_size() + payload.len();
    let mut udp_buffer = vec![0u8; udp_len];
    let mut udp_writer = MutableUdpPacket::new(&mut udp_buffer).unwrap();
    udp_writer.set_source(source.1);
    udp_writer.set_destination(destination.1);
    udp_writer.set_length(udp_len as u16);
    udp_writer.set_payload(payload);
    let checksum = udp::ipv4_checksum(&udp_writer.to_immutable(), &source.0, &destination.0);
    udp_writer.set_checksum(checksum);
    drop(udp_writer);

    wrap_ipv4(source.0, destination.0, IpNextHeaderProtocols::Udp, &udp_buffer)
}

/// A minimal TLS ClientHello record carrying a single server_name extension.
pub fn client_hello(server_name: &str) -> Vec<u8> {
    let name = server_name.as_bytes();
    let mut hello = Vec::new();
    hello.extend_from_slice(&[0x03, 0x03]); // client_version
    hello.extend_from_slice(&[0u8; 32]); // random
    hello.push(0); // session_id
    hello.extend_from_slice(&[0x00, 0x02, 0x13, 0x01]); // cipher_suites
    hello.extend_from_slice(&[0x01, 0x00]); // compression_methods

    let mut extension = Vec::new();
    extension.extend_from_slice(&[0x00, 0x00]); // server_name
    extension.extend_from_slice(&((name.len() + 5) as u16).to_be_bytes());
    extension.extend_from_slice(&((name.len() + 3) as u16).to_be_bytes());
    extension.push(0x00); // host_name
    extension.extend_from_slice(&(name.len() as u16).to_be_bytes());
    extension.extend_from_slice(name);

    hello.extend_from_slice(&(extension.len() as u16).to_be_bytes());
    hello.extend_from_slice(&extension);

    let mut handshake = vec![0x01];
    handshake.extend_from_slice(&(hello.len() as u32).to_be_bytes()[1..]);
    handshake.extend_from_slice(&hello);

    let mut record = vec![0x16, 0x03, 0x01];
    record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
    record.extend_from_slice(&handshake);
    record
}

/// ClientHello for `server_name` wrapped in a TCP segment from client to
/// server.
pub fn client_hello_frame(server_name: &str, client_port: u16) -> Frame {
    tcp_frame(
        (CLIENT_IP, client_port),
        (SERVER_IP, 443),
        pnet_packet::tcp::TcpFlags::PSH | pnet_packet::tcp::TcpFlags::ACK,
        1000,
        2000,
        &client_hello(server_name),
    )
}
