use crate::errors::{Error, Result};
use crate::frame::Frame;
use crate::nic::NetworkInterface;
use crate::packet::destination_ip;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Destination-IP forwarding hub for star topologies.
///
/// Starts with an empty table; [`Router::add_host`] registers an exact-match
/// route and hands back the router-side NIC the host's link attaches to.
/// Frames whose destination has no entry are silently dropped. The table is
/// written only while the topology is being built, before any traffic flows.
pub struct Router {
    core: Arc<RouterCore>,
}

struct RouterCore {
    table: RwLock<HashMap<Ipv4Addr, mpsc::UnboundedSender<Frame>>>,
}

impl Router {
    pub fn new() -> Self {
        Self {
            core: Arc::new(RouterCore {
                table: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Registers a forwarding entry for `address` and returns the port to
    /// wire into the host's link. Duplicate registrations overwrite the
    /// previous entry.
    pub fn add_host(&self, address: Ipv4Addr) -> Arc<RouterPort> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        if self
            .core
            .table
            .write()
            .insert(address, outbound_tx)
            .is_some()
        {
            warn!(%address, "router: overwriting existing forwarding entry");
        }
        Arc::new(RouterPort {
            address,
            core: self.core.clone(),
            outbound: tokio::sync::Mutex::new(outbound_rx),
            cancel: CancellationToken::new(),
        })
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterCore {
    /// Forwards one frame toward the port owning its destination address.
    /// Non-IPv4 frames and unknown destinations are dropped.
    fn forward(&self, frame: Frame) {
        let Some(destination) = destination_ip(frame.as_ref()) else {
            debug!("router: dropping non-IPv4 frame");
            return;
        };
        match self.table.read().get(&destination) {
            Some(outbound) => {
                // A closed receiver means the destination host is gone;
                // the frame is dropped like any other unreachable one.
                let _ = outbound.send(frame);
            }
            None => debug!(%destination, "router: no route, dropping frame"),
        }
    }
}

/// Router-side endpoint of one star link.
///
/// Frames written by the link are forwarded through the router's table;
/// frames routed toward this port's host are read back by the link.
pub struct RouterPort {
    address: Ipv4Addr,
    core: Arc<RouterCore>,
    outbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Frame>>,
    cancel: CancellationToken,
}

#[async_trait]
impl NetworkInterface for RouterPort {
    async fn read_frame(&self) -> Result<Frame> {
        let mut outbound = self.outbound.lock().await;
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::ClosedLink),
            frame = outbound.recv() => frame.ok_or(Error::ClosedLink),
        }
    }

    fn write_frame(&self, frame: Frame) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::ClosedLink);
        }
        self.core.forward(frame);
        Ok(())
    }

    fn ip_address(&self) -> Ipv4Addr {
        self.address
    }

    fn close(&self) {
        self.cancel.cancel();
    }
}
