//! Transport Ports (Driven Ports / SPI)
//!
//! What a session needs from the network layer.

use crate::errors::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_LINK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of one side of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub u64);

impl LinkId {
    /// Allocate a fresh id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_LINK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

/// Something that happened on a link's receive side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A frame from the remote side.
    Frame(Bytes),
    /// The remote side went away. Always the last event.
    Closed,
}

/// Receive handler, invoked on the link's receive task in arrival order.
pub type ReceiveCallback = Arc<dyn Fn(LinkEvent) + Send + Sync + 'static>;

/// Called by a listener with the accepted side of each new link.
pub type AcceptCallback = Arc<dyn Fn(Arc<dyn Transport>) + Send + Sync + 'static>;

/// A point-to-point link delivering opaque frames.
///
/// Frames handed to `send` by one caller arrive at the remote side in call
/// order.
pub trait Transport: Send + Sync {
    /// Local identifier of this link.
    fn id(&self) -> LinkId;

    /// The endpoint this link was opened on.
    fn endpoint(&self) -> &str;

    /// Queue a frame for the remote side.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] once either side closed the link.
    fn send(&self, frame: Bytes) -> Result<(), TransportError>;

    /// Install the receive handler and start delivering frames.
    ///
    /// Frames that arrived before the handler was installed are delivered
    /// first.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ReceiverInstalled`] on a second call.
    fn on_receive(&self, callback: ReceiveCallback) -> Result<(), TransportError>;

    /// Close the link. Idempotent. No receive events follow.
    fn close(&self);

    /// Whether this side has been closed.
    fn is_closed(&self) -> bool;
}

/// Handle keeping an endpoint open for incoming links.
pub trait Listener: Send + Sync {
    /// Endpoint being listened on.
    fn endpoint(&self) -> &str;

    /// Stop accepting links. Idempotent; links already accepted stay up.
    fn close(&self);
}

/// Opens outgoing links and accepts incoming ones.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a link to `endpoint`.
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn Transport>, TransportError>;

    /// Accept links on `endpoint`, handing each to `on_accept`.
    async fn listen(
        &self,
        endpoint: &str,
        on_accept: AcceptCallback,
    ) -> Result<Box<dyn Listener>, TransportError>;
}
