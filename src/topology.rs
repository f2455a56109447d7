use crate::errors::{Error, Result};
use crate::link::{Link, LinkConfig};
use crate::nic::NetworkInterface;
use crate::router::{Router, RouterPort};
use crate::stack::{StackBuilder, UnderlyingStack};
use parking_lot::Mutex;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Two stacks connected back to back by a single impaired link.
///
/// The left/client side of the link is the `client` stack; each stack's
/// default gateway is its peer.
pub struct PppTopology {
    pub client: Arc<dyn UnderlyingStack>,
    pub server: Arc<dyn UnderlyingStack>,
    link: Link,
    closed: AtomicBool,
}

impl PppTopology {
    /// Builds both stacks, wires the link between them, and starts it.
    pub async fn new(
        client_address: Ipv4Addr,
        server_address: Ipv4Addr,
        builder: &dyn StackBuilder,
        config: LinkConfig,
    ) -> Result<Self> {
        let client = builder.new_stack(client_address, server_address).await?;
        let server = builder.new_stack(server_address, client_address).await?;
        let link = Link::new(client.nic(), server.nic(), config)?;
        link.start()?;
        Ok(Self {
            client,
            server,
            link,
            closed: AtomicBool::new(false),
        })
    }

    /// Stops the link scheduler, drains and closes its NIC wrappers, then
    /// releases both stacks. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.link.close().await;
        self.client.close();
        self.server.close();
    }
}

struct StarHost {
    stack: Arc<dyn UnderlyingStack>,
    port: Arc<RouterPort>,
    link: Arc<Link>,
}

/// A central router with any number of stacks attached, each over its own
/// link with its own [`LinkConfig`].
pub struct StarTopology {
    builder: Arc<dyn StackBuilder>,
    router: Router,
    hosts: Mutex<Vec<StarHost>>,
    closed: AtomicBool,
}

impl StarTopology {
    pub fn new(builder: Arc<dyn StackBuilder>) -> Self {
        Self {
            builder,
            router: Router::new(),
            hosts: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Builds a stack for `address`, registers it with the router, and wires
    /// it up over a link configured by `config`. Returns the stack handle.
    pub async fn add_host(
        &self,
        address: Ipv4Addr,
        gateway: Ipv4Addr,
        config: LinkConfig,
    ) -> Result<Arc<dyn UnderlyingStack>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ClosedTopology);
        }
        let stack = self.builder.new_stack(address, gateway).await?;
        let port = self.router.add_host(address);
        let link = Arc::new(Link::new(stack.nic(), port.clone(), config)?);
        link.start()?;
        self.hosts.lock().push(StarHost {
            stack: stack.clone(),
            port,
            link,
        });
        Ok(stack)
    }

    /// Tears down every link, then every stack; the router goes last.
    /// Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let hosts: Vec<StarHost> = self.hosts.lock().drain(..).collect();
        for host in &hosts {
            host.link.close().await;
        }
        for host in &hosts {
            host.port.close();
            host.stack.close();
        }
    }
}
