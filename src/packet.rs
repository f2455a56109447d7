use crate::frame::Frame;
use pnet_base::MacAddr;
use pnet_packet::ethernet::{EtherTypes, EthernetPacket, MutableEthernetPacket};
use pnet_packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet_packet::ipv4::{self, Ipv4Packet, MutableIpv4Packet};
use pnet_packet::tcp::{self, MutableTcpPacket, TcpFlags, TcpPacket};
use pnet_packet::udp::UdpPacket;
use pnet_packet::Packet;
use std::net::Ipv4Addr;

/// The 5-tuple identifying one direction of a transport flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub protocol: IpNextHeaderProtocol,
    pub source_address: Ipv4Addr,
    pub source_port: u16,
    pub destination_address: Ipv4Addr,
    pub destination_port: u16,
}

impl FlowKey {
    /// The same flow seen from the opposite direction.
    pub fn reversed(self) -> Self {
        Self {
            protocol: self.protocol,
            source_address: self.destination_address,
            source_port: self.destination_port,
            destination_address: self.source_address,
            destination_port: self.source_port,
        }
    }
}

enum Transport<'a> {
    Tcp(TcpPacket<'a>),
    Udp(UdpPacket<'a>),
}

/// Parsed view over an Ethernet/IPv4/{TCP,UDP} frame.
///
/// Valid only as long as the backing frame bytes. Frames that do not dissect
/// bypass DPI and flow through links as opaque bytes.
pub struct DissectedPacket<'a> {
    ethernet: EthernetPacket<'a>,
    ipv4: Ipv4Packet<'a>,
    transport: Transport<'a>,
}

impl<'a> DissectedPacket<'a> {
    /// Parses a frame, returning `None` on anything that is not a complete
    /// IPv4 TCP or UDP packet.
    pub fn parse(buffer: &'a [u8]) -> Option<Self> {
        let ethernet = EthernetPacket::new(buffer)?;
        if ethernet.get_ethertype() != EtherTypes::Ipv4 {
            return None;
        }

        let ip_buffer = buffer.get(EthernetPacket::minimum_packet_size()..)?;
        let ipv4 = Ipv4Packet::new(ip_buffer)?;
        if ipv4.get_version() != 4 {
            return None;
        }
        let header_len = usize::from(ipv4.get_header_length()) * 4;
        let total_len = usize::from(ipv4.get_total_length());
        if header_len < Ipv4Packet::minimum_packet_size()
            || total_len < header_len
            || total_len > ip_buffer.len()
        {
            return None;
        }

        // Slice to total_length so link-layer padding is not mistaken for
        // transport payload.
        let transport_buffer = &ip_buffer[header_len..total_len];
        let transport = match ipv4.get_next_level_protocol() {
            IpNextHeaderProtocols::Tcp => {
                let tcp = TcpPacket::new(transport_buffer)?;
                let data_offset = usize::from(tcp.get_data_offset()) * 4;
                if data_offset < TcpPacket::minimum_packet_size()
                    || data_offset > transport_buffer.len()
                {
                    return None;
                }
                Transport::Tcp(tcp)
            }
            IpNextHeaderProtocols::Udp => Transport::Udp(UdpPacket::new(transport_buffer)?),
            _ => return None,
        };

        Some(Self {
            ethernet,
            ipv4,
            transport,
        })
    }

    pub fn source_mac(&self) -> MacAddr {
        self.ethernet.get_source()
    }

    pub fn destination_mac(&self) -> MacAddr {
        self.ethernet.get_destination()
    }

    pub fn ip_version(&self) -> u8 {
        self.ipv4.get_version()
    }

    pub fn source_address(&self) -> Ipv4Addr {
        self.ipv4.get_source()
    }

    pub fn destination_address(&self) -> Ipv4Addr {
        self.ipv4.get_destination()
    }

    pub fn transport_protocol(&self) -> IpNextHeaderProtocol {
        self.ipv4.get_next_level_protocol()
    }

    pub fn source_port(&self) -> u16 {
        match &self.transport {
            Transport::Tcp(tcp) => tcp.get_source(),
            Transport::Udp(udp) => udp.get_source(),
        }
    }

    pub fn destination_port(&self) -> u16 {
        match &self.transport {
            Transport::Tcp(tcp) => tcp.get_destination(),
            Transport::Udp(udp) => udp.get_destination(),
        }
    }

    /// TCP flag bits; zero for UDP packets.
    pub fn tcp_flags(&self) -> u8 {
        match &self.transport {
            Transport::Tcp(tcp) => tcp.get_flags(),
            Transport::Udp(_) => 0,
        }
    }

    pub fn is_syn(&self) -> bool {
        self.tcp_flags() & TcpFlags::SYN != 0
    }

    pub fn is_ack(&self) -> bool {
        self.tcp_flags() & TcpFlags::ACK != 0
    }

    pub fn is_fin(&self) -> bool {
        self.tcp_flags() & TcpFlags::FIN != 0
    }

    pub fn is_rst(&self) -> bool {
        self.tcp_flags() & TcpFlags::RST != 0
    }

    pub fn is_psh(&self) -> bool {
        self.tcp_flags() & TcpFlags::PSH != 0
    }

    /// TCP sequence number; zero for UDP packets.
    pub fn tcp_sequence(&self) -> u32 {
        match &self.transport {
            Transport::Tcp(tcp) => tcp.get_sequence(),
            Transport::Udp(_) => 0,
        }
    }

    /// TCP acknowledgment number; zero for UDP packets.
    pub fn tcp_acknowledgement(&self) -> u32 {
        match &self.transport {
            Transport::Tcp(tcp) => tcp.get_acknowledgement(),
            Transport::Udp(_) => 0,
        }
    }

    pub fn transport_payload(&self) -> &[u8] {
        match &self.transport {
            Transport::Tcp(tcp) => tcp.payload(),
            Transport::Udp(udp) => udp.payload(),
        }
    }

    pub fn flow_key(&self) -> FlowKey {
        FlowKey {
            protocol: self.transport_protocol(),
            source_address: self.source_address(),
            source_port: self.source_port(),
            destination_address: self.destination_address(),
            destination_port: self.destination_port(),
        }
    }

    /// The `server_name` carried by a TLS ClientHello in the transport
    /// payload, when present.
    ///
    /// Only the first TLS record is examined; ClientHellos segmented across
    /// records (or TCP segments) read as absent. Any length field pointing
    /// past the buffer reads as absent too.
    pub fn tls_server_name(&self) -> Option<String> {
        match &self.transport {
            Transport::Tcp(_) => parse_tls_server_name(self.transport_payload()),
            Transport::Udp(_) => None,
        }
    }
}

const TLS_CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
const TLS_HANDSHAKE_TYPE_CLIENT_HELLO: u8 = 0x01;
const TLS_EXTENSION_SERVER_NAME: u16 = 0x0000;
const TLS_SERVER_NAME_TYPE_HOST: u8 = 0x00;

fn parse_tls_server_name(payload: &[u8]) -> Option<String> {
    // record: type(1) version(2) length(2)
    let mut record = Reader::new(payload);
    if record.read_u8()? != TLS_CONTENT_TYPE_HANDSHAKE {
        return None;
    }
    record.skip(2)?;
    let record_len = record.read_u16()?;
    let mut handshake = Reader::new(record.take(usize::from(record_len))?);

    // handshake: type(1) length(3)
    if handshake.read_u8()? != TLS_HANDSHAKE_TYPE_CLIENT_HELLO {
        return None;
    }
    let body_len = handshake.read_u24()?;
    let mut hello = Reader::new(handshake.take(body_len)?);

    // client_version(2) random(32) session_id cipher_suites compression
    hello.skip(2 + 32)?;
    let session_id_len = hello.read_u8()?;
    hello.skip(usize::from(session_id_len))?;
    let cipher_suites_len = hello.read_u16()?;
    hello.skip(usize::from(cipher_suites_len))?;
    let compression_len = hello.read_u8()?;
    hello.skip(usize::from(compression_len))?;

    let extensions_len = hello.read_u16()?;
    let mut extensions = Reader::new(hello.take(usize::from(extensions_len))?);
    while !extensions.is_empty() {
        let extension_type = extensions.read_u16()?;
        let extension_len = extensions.read_u16()?;
        let data = extensions.take(usize::from(extension_len))?;
        if extension_type != TLS_EXTENSION_SERVER_NAME {
            continue;
        }

        let mut names = Reader::new(data);
        let list_len = names.read_u16()?;
        let mut list = Reader::new(names.take(usize::from(list_len))?);
        while !list.is_empty() {
            let name_type = list.read_u8()?;
            let name_len = list.read_u16()?;
            let name = list.take(usize::from(name_len))?;
            if name_type == TLS_SERVER_NAME_TYPE_HOST {
                return String::from_utf8(name.to_vec()).ok();
            }
        }
        return None;
    }
    None
}

/// Bounds-checked cursor over a byte slice.
struct Reader<'a> {
    buffer: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buffer: &'a [u8]) -> Self {
        Self { buffer }
    }

    fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    fn take(&mut self, count: usize) -> Option<&'a [u8]> {
        if count > self.buffer.len() {
            return None;
        }
        let (taken, rest) = self.buffer.split_at(count);
        self.buffer = rest;
        Some(taken)
    }

    fn skip(&mut self, count: usize) -> Option<()> {
        self.take(count).map(|_| ())
    }

    fn read_u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn read_u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u24(&mut self) -> Option<usize> {
        self.take(3)
            .map(|b| usize::from(b[0]) << 16 | usize::from(b[1]) << 8 | usize::from(b[2]))
    }
}

/// Destination IPv4 address of a frame, if it is an IPv4 frame at all.
///
/// Cheaper than full dissection; the router forwards any IPv4 payload.
pub(crate) fn destination_ip(buffer: &[u8]) -> Option<Ipv4Addr> {
    let ethernet = EthernetPacket::new(buffer)?;
    if ethernet.get_ethertype() != EtherTypes::Ipv4 {
        return None;
    }
    let ipv4 = Ipv4Packet::new(buffer.get(EthernetPacket::minimum_packet_size()..)?)?;
    Some(ipv4.get_destination())
}

/// Builds a checksummed Ethernet/IPv4/TCP frame carrying `payload`.
pub(crate) fn build_tcp_frame(
    source_mac: MacAddr,
    destination_mac: MacAddr,
    source_address: Ipv4Addr,
    destination_address: Ipv4Addr,
    source_port: u16,
    destination_port: u16,
    flags: u8,
    sequence: u32,
    acknowledgement: u32,
    payload: &[u8],
) -> Frame {
    // TCP segment
    let tcp_len = TcpPacket::minimum_packet_size() + payload.len();
    let mut tcp_buffer = vec![0u8; tcp_len];
    let mut tcp_writer = MutableTcpPacket::new(&mut tcp_buffer).unwrap();
    tcp_writer.set_source(source_port);
    tcp_writer.set_destination(destination_port);
    tcp_writer.set_sequence(sequence);
    tcp_writer.set_acknowledgement(acknowledgement);
    tcp_writer.set_data_offset(5);
    tcp_writer.set_flags(flags);
    tcp_writer.set_window(if flags & TcpFlags::RST != 0 { 0 } else { 65535 });
    tcp_writer.set_payload(payload);
    let checksum = tcp::ipv4_checksum(
        &tcp_writer.to_immutable(),
        &source_address,
        &destination_address,
    );
    tcp_writer.set_checksum(checksum);
    drop(tcp_writer);

    // IPv4 packet around it
    let ip_len = Ipv4Packet::minimum_packet_size() + tcp_len;
    let mut ip_buffer = vec![0u8; ip_len];
    let mut ip_writer = MutableIpv4Packet::new(&mut ip_buffer).unwrap();
    ip_writer.set_version(4);
    ip_writer.set_header_length(5);
    ip_writer.set_total_length(ip_len as u16);
    ip_writer.set_identification(0);
    ip_writer.set_flags(0b010); // don't fragment
    ip_writer.set_ttl(64);
    ip_writer.set_next_level_protocol(IpNextHeaderProtocols::Tcp);
    ip_writer.set_source(source_address);
    ip_writer.set_destination(destination_address);
    ip_writer.set_payload(&tcp_buffer);
    let checksum = ipv4::checksum(&ip_writer.to_immutable());
    ip_writer.set_checksum(checksum);
    drop(ip_writer);

    // Ethernet frame around that
    let mut frame_buffer = vec![0u8; EthernetPacket::minimum_packet_size() + ip_len];
    let mut ethernet_writer = MutableEthernetPacket::new(&mut frame_buffer).unwrap();
    ethernet_writer.set_source(source_mac);
    ethernet_writer.set_destination(destination_mac);
    ethernet_writer.set_ethertype(EtherTypes::Ipv4);
    ethernet_writer.set_payload(&ip_buffer);
    drop(ethernet_writer);

    Frame::new(frame_buffer)
}

/// Builds the RST segment a censoring middlebox injects in response to the
/// given TCP packet.
///
/// `toward_source` selects the victim: `true` spoofs the packet's destination
/// and targets its sender; `false` spoofs the sender and targets the
/// destination. Sequence and acknowledgment numbers are consistent with the
/// observed segment so both stacks accept the reset.
pub(crate) fn synthesize_rst(packet: &DissectedPacket<'_>, toward_source: bool) -> Option<Frame> {
    let Transport::Tcp(tcp) = &packet.transport else {
        return None;
    };

    let mut segment_len = packet.transport_payload().len() as u32;
    if packet.is_syn() || packet.is_fin() {
        segment_len = segment_len.wrapping_add(1);
    }
    let next_sequence = tcp.get_sequence().wrapping_add(segment_len);

    let frame = if toward_source {
        build_tcp_frame(
            packet.destination_mac(),
            packet.source_mac(),
            packet.destination_address(),
            packet.source_address(),
            tcp.get_destination(),
            tcp.get_source(),
            TcpFlags::RST | TcpFlags::ACK,
            tcp.get_acknowledgement(),
            next_sequence,
            &[],
        )
    } else {
        build_tcp_frame(
            packet.source_mac(),
            packet.destination_mac(),
            packet.source_address(),
            packet.destination_address(),
            tcp.get_source(),
            tcp.get_destination(),
            TcpFlags::RST,
            next_sequence,
            0,
            &[],
        )
    };
    Some(frame)
}
