#![allow(dead_code)]

pub mod frames;

use async_trait::async_trait;
use netem::{BoxConn, Context, Error, Frame, Listener, NetworkInterface, StackBuilder, UdpConn, UnderlyingStack};
use parking_lot::Mutex;
use rustls::RootCertStore;
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        use tracing_subscriber::fmt::Subscriber;
        use tracing_subscriber::EnvFilter;
        Subscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .with_ansi(false)
            .without_time()
            .try_init()
            .ok();
    });
}

/// Channel-backed NIC standing in for a stack's frame boundary.
///
/// The "stack side" of the NIC is driven by the test: [`TestNic::emit`]
/// queues a frame for the link to read, [`TestNic::next_delivered`] yields
/// frames the link wrote toward the stack.
pub struct TestNic {
    address: Ipv4Addr,
    egress_tx: mpsc::UnboundedSender<Frame>,
    egress_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Frame>>,
    ingress_tx: mpsc::UnboundedSender<Frame>,
    ingress_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Frame>>,
    cancel: CancellationToken,
}

impl TestNic {
    pub fn new(address: Ipv4Addr) -> Arc<Self> {
        let (egress_tx, egress_rx) = mpsc::unbounded_channel();
        let (ingress_tx, ingress_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            address,
            egress_tx,
            egress_rx: tokio::sync::Mutex::new(egress_rx),
            ingress_tx,
            ingress_rx: tokio::sync::Mutex::new(ingress_rx),
            cancel: CancellationToken::new(),
        })
    }

    /// Queues a frame as if the stack had emitted it.
    pub fn emit(&self, frame: Frame) {
        let _ = self.egress_tx.send(frame);
    }

    /// Next frame the link delivered to this NIC.
    pub async fn next_delivered(&self) -> Option<Frame> {
        self.ingress_rx.lock().await.recv().await
    }

    /// Like [`TestNic::next_delivered`] but gives up after `timeout`.
    pub async fn delivered_within(&self, timeout: Duration) -> Option<Frame> {
        tokio::time::timeout(timeout, self.next_delivered())
            .await
            .ok()
            .flatten()
    }

    /// Drains everything delivered until `idle` elapses with no new frame.
    pub async fn drain_delivered(&self, idle: Duration) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = self.delivered_within(idle).await {
            frames.push(frame);
        }
        frames
    }
}

#[async_trait]
impl NetworkInterface for TestNic {
    async fn read_frame(&self) -> netem::Result<Frame> {
        let mut egress = self.egress_rx.lock().await;
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::ClosedLink),
            frame = egress.recv() => frame.ok_or(Error::ClosedLink),
        }
    }

    fn write_frame(&self, frame: Frame) -> netem::Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::ClosedLink);
        }
        self.ingress_tx.send(frame).map_err(|_| Error::ClosedLink)
    }

    fn ip_address(&self) -> Ipv4Addr {
        self.address
    }

    fn close(&self) {
        self.cancel.cancel();
    }
}

/// Socket-level plumbing shared by the sockets of one [`TestStack`].
#[derive(Default)]
struct Registry {
    listeners: Mutex<HashMap<SocketAddr, mpsc::UnboundedSender<BoxConn>>>,
    udp_sockets: Mutex<HashMap<SocketAddr, mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>>>,
}

/// In-memory [`UnderlyingStack`] good enough to exercise every facade path
/// without the real TCP/IP stack: dials hand out paired duplex streams,
/// DNS answers come from a fixture table.
pub struct TestStack {
    address: Ipv4Addr,
    nic: Arc<TestNic>,
    registry: Arc<Registry>,
    dns: Mutex<HashMap<String, (Vec<Ipv4Addr>, String)>>,
    roots: Mutex<Arc<RootCertStore>>,
    dial_attempts: AtomicUsize,
}

impl TestStack {
    pub fn new(address: Ipv4Addr) -> Arc<Self> {
        Arc::new(Self {
            address,
            nic: TestNic::new(address),
            registry: Arc::new(Registry::default()),
            dns: Mutex::new(HashMap::new()),
            roots: Mutex::new(Arc::new(RootCertStore::empty())),
            dial_attempts: AtomicUsize::new(0),
        })
    }

    pub fn test_nic(&self) -> Arc<TestNic> {
        self.nic.clone()
    }

    pub fn add_dns_record(&self, domain: &str, cname: &str, addresses: Vec<Ipv4Addr>) {
        self.dns
            .lock()
            .insert(domain.to_string(), (addresses, cname.to_string()));
    }

    pub fn set_cert_pool(&self, roots: Arc<RootCertStore>) {
        *self.roots.lock() = roots;
    }

    pub fn dial_attempts(&self) -> usize {
        self.dial_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UnderlyingStack for TestStack {
    async fn dial_context(
        &self,
        ctx: &Context,
        _network: &str,
        endpoint: SocketAddr,
    ) -> netem::Result<BoxConn> {
        self.dial_attempts.fetch_add(1, Ordering::SeqCst);
        if ctx.is_done() {
            return Err(ctx.error());
        }
        let listener = self.registry.listeners.lock().get(&endpoint).cloned();
        match listener {
            Some(sender) => {
                let (client, server) = tokio::io::duplex(65536);
                sender
                    .send(Box::new(server))
                    .map_err(|_| Error::ConnectionRefused)?;
                Ok(Box::new(client))
            }
            None => Err(Error::ConnectionRefused),
        }
    }

    async fn listen_tcp(
        &self,
        _network: &str,
        address: SocketAddr,
    ) -> netem::Result<Box<dyn Listener>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.registry.listeners.lock().insert(address, tx);
        Ok(Box::new(TestListener {
            address,
            rx: tokio::sync::Mutex::new(rx),
            cancel: CancellationToken::new(),
        }))
    }

    async fn listen_udp(
        &self,
        _network: &str,
        address: SocketAddr,
    ) -> netem::Result<Box<dyn UdpConn>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.registry.udp_sockets.lock().insert(address, tx);
        Ok(Box::new(TestUdpConn {
            address,
            registry: self.registry.clone(),
            rx: tokio::sync::Mutex::new(rx),
            cancel: CancellationToken::new(),
        }))
    }

    async fn getaddrinfo_lookup_any(
        &self,
        ctx: &Context,
        domain: &str,
    ) -> netem::Result<(Vec<Ipv4Addr>, String)> {
        if ctx.is_done() {
            return Err(ctx.error());
        }
        self.dns
            .lock()
            .get(domain)
            .cloned()
            .ok_or_else(|| Error::Resolution(domain.to_string()))
    }

    fn default_cert_pool(&self) -> Arc<RootCertStore> {
        self.roots.lock().clone()
    }

    fn nic(&self) -> Arc<dyn NetworkInterface> {
        self.nic.clone()
    }

    fn close(&self) {
        self.nic.close();
    }
}

struct TestListener {
    address: SocketAddr,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<BoxConn>>,
    cancel: CancellationToken,
}

#[async_trait]
impl Listener for TestListener {
    async fn accept(&self) -> netem::Result<(BoxConn, SocketAddr)> {
        let mut rx = self.rx.lock().await;
        let conn = tokio::select! {
            _ = self.cancel.cancelled() => None,
            conn = rx.recv() => conn,
        };
        let conn = conn.ok_or(Error::ClosedLink)?;
        // The fake registry does not track peer addresses.
        let peer = SocketAddr::new(Ipv4Addr::new(10, 0, 0, 2).into(), 49152);
        Ok((conn, peer))
    }

    fn local_addr(&self) -> SocketAddr {
        self.address
    }

    fn close(&self) {
        self.cancel.cancel();
    }
}

struct TestUdpConn {
    address: SocketAddr,
    registry: Arc<Registry>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>>,
    cancel: CancellationToken,
}

#[async_trait]
impl UdpConn for TestUdpConn {
    async fn recv_from(&self, buffer: &mut [u8]) -> netem::Result<(usize, SocketAddr)> {
        let mut rx = self.rx.lock().await;
        let received = tokio::select! {
            _ = self.cancel.cancelled() => None,
            datagram = rx.recv() => datagram,
        };
        let (datagram, from) = received.ok_or(Error::ClosedLink)?;
        let len = datagram.len().min(buffer.len());
        buffer[..len].copy_from_slice(&datagram[..len]);
        Ok((len, from))
    }

    async fn send_to(&self, buffer: &[u8], target: SocketAddr) -> netem::Result<usize> {
        let socket = self.registry.udp_sockets.lock().get(&target).cloned();
        match socket {
            Some(sender) => {
                let _ = sender.send((buffer.to_vec(), self.address));
                Ok(buffer.len())
            }
            None => Err(Error::ConnectionRefused),
        }
    }

    fn local_addr(&self) -> SocketAddr {
        self.address
    }

    fn close(&self) {
        self.cancel.cancel();
    }
}

/// Builder handing out [`TestStack`]s and remembering them so tests can
/// reach the stack-side NIC helpers afterwards.
#[derive(Default)]
pub struct TestStackBuilder {
    created: Mutex<Vec<Arc<TestStack>>>,
}

impl TestStackBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The previously built stack bound to `address`.
    pub fn stack(&self, address: Ipv4Addr) -> Arc<TestStack> {
        self.created
            .lock()
            .iter()
            .find(|stack| stack.address == address)
            .cloned()
            .expect("no stack built for address")
    }
}

#[async_trait]
impl StackBuilder for TestStackBuilder {
    async fn new_stack(
        &self,
        address: Ipv4Addr,
        _gateway: Ipv4Addr,
    ) -> netem::Result<Arc<dyn UnderlyingStack>> {
        let stack = TestStack::new(address);
        self.created.lock().push(stack.clone());
        Ok(stack)
    }
}
