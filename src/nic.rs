use crate::errors::Result;
use crate::frame::Frame;
use async_trait::async_trait;
use std::net::Ipv4Addr;

/// Frame-level boundary between a userspace network stack and the link it is
/// attached to.
///
/// NICs are created and owned by their stack; links and routers borrow the
/// read/write operations for the lifetime of the topology.
#[async_trait]
pub trait NetworkInterface: Send + Sync {
    /// Blocks until the stack emits the next outgoing frame. Returns
    /// [`Error::ClosedLink`](crate::Error::ClosedLink) once the NIC has been
    /// closed.
    ///
    /// Implementations must be cancellation-safe: dropping the returned
    /// future before completion must not lose a frame.
    async fn read_frame(&self) -> Result<Frame>;

    /// Hands an incoming frame to the stack. Must not block.
    fn write_frame(&self, frame: Frame) -> Result<()>;

    fn ip_address(&self) -> Ipv4Addr;

    fn close(&self);
}

/// Observer installed on one endpoint of a link.
///
/// Sees every frame that passes through the wrapped NIC, in either direction.
#[async_trait]
pub trait NicWrapper: Send + Sync {
    /// Called with each passing frame; must not block the link worker.
    fn observe_frame(&self, frame: &Frame);

    /// Flushes the sink. Called once during link teardown.
    async fn close(&self);
}
