use super::{DpiDirection, DpiFlags, DpiPolicy, DpiRule};
use crate::packet::DissectedPacket;
use pnet_packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::info;

/// Returns the SNI when the packet is a client-to-server TCP segment whose
/// ClientHello names `sni`.
fn match_client_hello(
    direction: DpiDirection,
    packet: &DissectedPacket<'_>,
    sni: &str,
) -> Option<String> {
    // short circuit for the return path
    if direction != DpiDirection::ClientToServer {
        return None;
    }
    if packet.transport_protocol() != IpNextHeaderProtocols::Tcp {
        return None;
    }
    let name = packet.tls_server_name()?;
    (name == sni).then_some(name)
}

/// Throttles flows whose TLS ClientHello carries the offending SNI by adding
/// loss to every subsequent packet of the flow.
pub struct ThrottleTrafficForTlsSni {
    /// Offending server name.
    pub sni: String,
    /// Extra packet loss rate applied to the flow.
    pub plr: f64,
}

impl DpiRule for ThrottleTrafficForTlsSni {
    fn filter(&self, direction: DpiDirection, packet: &DissectedPacket<'_>) -> Option<DpiPolicy> {
        let sni = match_client_hello(direction, packet, &self.sni)?;
        info!(
            source = %packet.source_address(),
            source_port = packet.source_port(),
            destination = %packet.destination_address(),
            destination_port = packet.destination_port(),
            sni,
            "dpi: throttling flow"
        );
        Some(DpiPolicy {
            delay: Duration::ZERO,
            plr: self.plr,
            flags: DpiFlags::None,
        })
    }
}

/// Resets flows whose TLS ClientHello carries the offending SNI: the original
/// segment is suppressed and spoofed RSTs are injected toward both endpoints.
pub struct ResetTrafficForTlsSni {
    /// Offending server name.
    pub sni: String,
}

impl DpiRule for ResetTrafficForTlsSni {
    fn filter(&self, direction: DpiDirection, packet: &DissectedPacket<'_>) -> Option<DpiPolicy> {
        let sni = match_client_hello(direction, packet, &self.sni)?;
        info!(
            source = %packet.source_address(),
            source_port = packet.source_port(),
            destination = %packet.destination_address(),
            destination_port = packet.destination_port(),
            sni,
            "dpi: resetting flow"
        );
        Some(DpiPolicy {
            flags: DpiFlags::SpoofRst,
            ..Default::default()
        })
    }
}

/// Silently blackholes flows whose TLS ClientHello carries the offending SNI.
pub struct DropTrafficForTlsSni {
    /// Offending server name.
    pub sni: String,
}

impl DpiRule for DropTrafficForTlsSni {
    fn filter(&self, direction: DpiDirection, packet: &DissectedPacket<'_>) -> Option<DpiPolicy> {
        let sni = match_client_hello(direction, packet, &self.sni)?;
        info!(
            source = %packet.source_address(),
            source_port = packet.source_port(),
            destination = %packet.destination_address(),
            destination_port = packet.destination_port(),
            sni,
            "dpi: dropping flow"
        );
        Some(DpiPolicy {
            flags: DpiFlags::Drop,
            ..Default::default()
        })
    }
}

/// Drops every packet addressed to a specific server endpoint, regardless of
/// payload content. Matches from the first packet of the flow.
pub struct DropTrafficForServerEndpoint {
    pub server_address: Ipv4Addr,
    pub server_port: u16,
    pub server_protocol: IpNextHeaderProtocol,
}

impl DpiRule for DropTrafficForServerEndpoint {
    fn filter(&self, _direction: DpiDirection, packet: &DissectedPacket<'_>) -> Option<DpiPolicy> {
        if packet.transport_protocol() != self.server_protocol
            || packet.destination_address() != self.server_address
            || packet.destination_port() != self.server_port
        {
            return None;
        }
        info!(
            source = %packet.source_address(),
            source_port = packet.source_port(),
            destination = %packet.destination_address(),
            destination_port = packet.destination_port(),
            "dpi: dropping traffic for endpoint"
        );
        Some(DpiPolicy {
            flags: DpiFlags::Drop,
            ..Default::default()
        })
    }
}
