use crate::context::Context;
use crate::errors::{ErrDial, Error, Result};
use crate::stack::{BoxConn, Listener, UdpConn, UnderlyingStack};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ServerConfig};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// Ceiling on the server-side handshake of accepted TLS connections, so a
/// stalled client cannot wedge the accept loop.
const TLS_ACCEPT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Drop-in replacement for the OS sockets surface, backed by a virtual
/// stack. Application code talks to [`Net`]; packets transit the emulated
/// network underneath.
pub struct Net {
    stack: Arc<dyn UnderlyingStack>,
}

impl Net {
    pub fn new(stack: Arc<dyn UnderlyingStack>) -> Self {
        Self { stack }
    }

    /// Splits `address` into host and port, resolves the host unless it is a
    /// literal IP, and tries each candidate address in order, returning the
    /// first established connection.
    ///
    /// When every attempt fails, the returned [`ErrDial`] carries one
    /// endpoint-annotated error per attempt. Cancellation is honoured both
    /// between and during attempts.
    pub async fn dial_context(
        &self,
        ctx: &Context,
        network: &str,
        address: &str,
    ) -> Result<BoxConn> {
        let (host, port) = split_host_port(address)?;
        let addresses = match host.parse::<Ipv4Addr>() {
            Ok(ip) => vec![ip],
            Err(_) => {
                let addresses = self.lookup_host(ctx, &host).await?;
                if addresses.is_empty() {
                    return Err(Error::Resolution(host));
                }
                addresses
            }
        };

        if ctx.is_done() {
            return Err(ctx.error());
        }

        let mut failed = ErrDial::default();
        for ip in addresses {
            if ctx.is_done() {
                return Err(ctx.error());
            }
            let endpoint = SocketAddr::new(ip.into(), port);
            let attempt = tokio::select! {
                _ = ctx.done() => return Err(ctx.error()),
                attempt = self.stack.dial_context(ctx, network, endpoint) => attempt,
            };
            match attempt {
                Ok(conn) => return Ok(conn),
                Err(error) => failed.push(endpoint.to_string(), error),
            }
        }
        Err(Error::Dial(failed))
    }

    /// Like [`Net::dial_context`] followed by a TLS client handshake against
    /// the stack's root-CA set, with the pre-resolution hostname as the
    /// server name.
    ///
    /// The handshake honours the context's deadline and cancellation; on
    /// either, the underlying connection is torn down so no half-open TLS
    /// dial leaks.
    pub async fn dial_tls_context(
        &self,
        ctx: &Context,
        network: &str,
        address: &str,
    ) -> Result<BoxConn> {
        let (hostname, _) = split_host_port(address)?;
        let conn = self.dial_context(ctx, network, address).await?;

        let config = ClientConfig::builder()
            .with_root_certificates(self.stack.default_cert_pool())
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(config));
        let server_name = ServerName::try_from(hostname.clone())
            .map_err(|_| Error::AddressParse(hostname.clone()))?;

        // Dropping the handshake future closes the connection, so the
        // cancelled path cannot leave the peer with a half-open handshake.
        let handshake = connector.connect(server_name, conn);
        let stream = tokio::select! {
            _ = ctx.done() => return Err(ctx.error()),
            result = handshake => {
                result.map_err(|error| Error::TlsHandshake(error.to_string()))?
            }
        };
        Ok(Box::new(stream))
    }

    /// Resolves `domain` to its IPv4 addresses.
    pub async fn lookup_host(&self, ctx: &Context, domain: &str) -> Result<Vec<Ipv4Addr>> {
        let (addresses, _) = self.stack.getaddrinfo_lookup_any(ctx, domain).await?;
        Ok(addresses)
    }

    /// Resolves `domain` to its canonical name.
    pub async fn lookup_cname(&self, ctx: &Context, domain: &str) -> Result<String> {
        let (_, cname) = self.stack.getaddrinfo_lookup_any(ctx, domain).await?;
        Ok(cname)
    }

    pub async fn listen_tcp(&self, network: &str, address: SocketAddr) -> Result<Box<dyn Listener>> {
        self.stack.listen_tcp(network, address).await
    }

    pub async fn listen_udp(&self, network: &str, address: SocketAddr) -> Result<Box<dyn UdpConn>> {
        self.stack.listen_udp(network, address).await
    }

    /// TCP listener whose accepted connections complete a server-side TLS
    /// handshake before being surfaced.
    pub async fn listen_tls(
        &self,
        network: &str,
        address: SocketAddr,
        config: Arc<ServerConfig>,
    ) -> Result<TlsListener> {
        let listener = self.listen_tcp(network, address).await?;
        Ok(TlsListener {
            listener,
            acceptor: TlsAcceptor::from(config),
        })
    }
}

/// Accept loop wrapper performing one server-side TLS handshake per accepted
/// connection, bounded by a fixed timeout.
pub struct TlsListener {
    listener: Box<dyn Listener>,
    acceptor: TlsAcceptor,
}

impl TlsListener {
    pub async fn accept(&self) -> Result<(BoxConn, SocketAddr)> {
        let (conn, peer) = self.listener.accept().await?;
        let handshake = self.acceptor.accept(conn);
        match tokio::time::timeout(TLS_ACCEPT_HANDSHAKE_TIMEOUT, handshake).await {
            Ok(Ok(stream)) => Ok((Box::new(stream), peer)),
            Ok(Err(error)) => Err(Error::TlsHandshake(error.to_string())),
            Err(_) => Err(Error::DeadlineExceeded),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    pub fn close(&self) {
        self.listener.close();
    }
}

fn split_host_port(address: &str) -> Result<(String, u16)> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| Error::AddressParse(address.to_string()))?;
    if host.is_empty() {
        return Err(Error::AddressParse(address.to_string()));
    }
    let port: u16 = port
        .parse()
        .map_err(|_| Error::AddressParse(address.to_string()))?;
    Ok((host.to_string(), port))
}
