//! Userspace network emulation for testing protocol clients and servers
//! under controlled, reproducible impairment.
//!
//! Multiple virtual hosts, each with its own IP address and protocol stack,
//! are wired together by virtual [`Link`]s and [`Router`]s inside a single
//! process. Application code talks to the [`Net`] facade, an equivalent of
//! the OS sockets API, while packets transit simulated links whose delay,
//! loss, and content-sensitive [`dpi`] policies are fully controlled by the
//! test harness.
//!
//! The embedded TCP/IP stack is an external collaborator consumed through
//! the [`UnderlyingStack`] and [`NetworkInterface`] traits; links, DPI,
//! routing, topologies, and PCAP capture live here. There is no process-wide
//! state: topologies are fully isolated from one another.

mod context;
pub mod dpi;
mod errors;
mod frame;
mod link;
mod net;
mod nic;
mod packet;
mod pcap;
mod router;
mod stack;
mod topology;

pub use context::{CancelHandle, Context};
pub use errors::{ErrDial, Error, Result};
pub use frame::Frame;
pub use link::{Link, LinkConfig};
pub use net::{Net, TlsListener};
pub use nic::{NetworkInterface, NicWrapper};
pub use packet::{DissectedPacket, FlowKey};
pub use pcap::PcapDumper;
pub use router::{Router, RouterPort};
pub use stack::{BoxConn, Conn, Listener, StackBuilder, UdpConn, UnderlyingStack};
pub use topology::{PppTopology, StarTopology};
