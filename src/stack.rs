use crate::context::Context;
use crate::errors::Result;
use crate::nic::NetworkInterface;
use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Byte-stream connection handed out by a stack.
pub trait Conn: AsyncRead + AsyncWrite + Send + Unpin + std::fmt::Debug {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + std::fmt::Debug> Conn for T {}

/// Boxed connection object, the unit the facade and the stacks exchange.
pub type BoxConn = Box<dyn Conn>;

/// Accepting side of a TCP-like socket.
#[async_trait]
pub trait Listener: Send + Sync {
    /// Waits for the next inbound connection and its peer address.
    async fn accept(&self) -> Result<(BoxConn, SocketAddr)>;

    fn local_addr(&self) -> SocketAddr;

    fn close(&self);
}

/// Connectionless UDP-like socket.
#[async_trait]
pub trait UdpConn: Send + Sync {
    async fn recv_from(&self, buffer: &mut [u8]) -> Result<(usize, SocketAddr)>;

    async fn send_to(&self, buffer: &[u8], target: SocketAddr) -> Result<usize>;

    fn local_addr(&self) -> SocketAddr;

    fn close(&self);
}

/// The userspace TCP/IP stack the emulator drives: BSD-style socket
/// operations above, Ethernet frames below.
///
/// The stack itself is an external collaborator; the emulator only consumes
/// this surface and the [`NetworkInterface`] it exposes toward links.
#[async_trait]
pub trait UnderlyingStack: Send + Sync {
    /// Connects to `endpoint` over `network` ("tcp" or "udp").
    async fn dial_context(
        &self,
        ctx: &Context,
        network: &str,
        endpoint: SocketAddr,
    ) -> Result<BoxConn>;

    async fn listen_tcp(&self, network: &str, address: SocketAddr) -> Result<Box<dyn Listener>>;

    async fn listen_udp(&self, network: &str, address: SocketAddr) -> Result<Box<dyn UdpConn>>;

    /// Single resolver round trip returning both the addresses and the
    /// canonical name for `domain`.
    async fn getaddrinfo_lookup_any(
        &self,
        ctx: &Context,
        domain: &str,
    ) -> Result<(Vec<Ipv4Addr>, String)>;

    /// Root CAs the stack trusts when dialing TLS.
    fn default_cert_pool(&self) -> Arc<rustls::RootCertStore>;

    /// The frame-level interface this stack attaches to a link with.
    fn nic(&self) -> Arc<dyn NetworkInterface>;

    fn close(&self);
}

/// Creates the stacks a topology wires together.
#[async_trait]
pub trait StackBuilder: Send + Sync {
    /// Builds a stack bound to `address` routing via `gateway`.
    async fn new_stack(
        &self,
        address: Ipv4Addr,
        gateway: Ipv4Addr,
    ) -> Result<Arc<dyn UnderlyingStack>>;
}
