//! # In-Process Memory Transport
//!
//! Links between sessions in the same process, addressed as `mem/<name>`.
//! Each link is a pair of unbounded channels; each side runs one receive
//! task, so frames arrive in send order.

use crate::errors::TransportError;
use crate::ports::{
    AcceptCallback, Connector, LinkEvent, LinkId, Listener, ReceiveCallback, Transport,
};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Endpoint scheme handled by [`MemoryConnector`].
pub const MEMORY_SCHEME: &str = "mem";

/// Extract the listener name from a `mem/<name>` endpoint.
fn listener_name(endpoint: &str) -> Result<&str, TransportError> {
    let invalid = |reason: &str| TransportError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: reason.to_string(),
    };

    let (scheme, name) = endpoint
        .split_once('/')
        .ok_or_else(|| invalid("expected '<scheme>/<name>'"))?;
    if scheme != MEMORY_SCHEME {
        return Err(invalid("only the 'mem' scheme is supported"));
    }
    if name.is_empty() {
        return Err(invalid("empty listener name"));
    }
    Ok(name)
}

// =============================================================================
// TRANSPORT
// =============================================================================

/// One side of an in-memory link.
pub struct MemoryTransport {
    id: LinkId,
    endpoint: String,
    outbound: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
    receive_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl MemoryTransport {
    /// Create both sides of a link on `endpoint`.
    #[must_use]
    pub fn pair(endpoint: &str) -> (Arc<Self>, Arc<Self>) {
        let (to_b, b_inbox) = mpsc::unbounded_channel();
        let (to_a, a_inbox) = mpsc::unbounded_channel();
        let a = Arc::new(Self::new(endpoint, to_b, a_inbox));
        let b = Arc::new(Self::new(endpoint, to_a, b_inbox));
        (a, b)
    }

    fn new(
        endpoint: &str,
        outbound: mpsc::UnboundedSender<Bytes>,
        inbox: mpsc::UnboundedReceiver<Bytes>,
    ) -> Self {
        Self {
            id: LinkId::next(),
            endpoint: endpoint.to_string(),
            outbound: Mutex::new(Some(outbound)),
            inbox: Mutex::new(Some(inbox)),
            receive_task: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }
}

impl Transport for MemoryTransport {
    fn id(&self) -> LinkId {
        self.id
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        let closed = TransportError::Closed { link: self.id };
        if self.is_closed() {
            return Err(closed);
        }
        match self.outbound.lock().as_ref() {
            Some(tx) => tx.send(frame).map_err(|_| closed),
            None => Err(closed),
        }
    }

    fn on_receive(&self, callback: ReceiveCallback) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed { link: self.id });
        }
        let mut inbox = self
            .inbox
            .lock()
            .take()
            .ok_or(TransportError::ReceiverInstalled { link: self.id })?;

        let link = self.id;
        let handle = tokio::spawn(async move {
            while let Some(frame) = inbox.recv().await {
                callback(LinkEvent::Frame(frame));
            }
            trace!(link = %link, "Remote side closed");
            callback(LinkEvent::Closed);
        });

        *self.receive_task.lock() = Some(handle);
        // close() may have raced past the task slot.
        if self.is_closed() {
            if let Some(handle) = self.receive_task.lock().take() {
                handle.abort();
            }
        }
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.outbound.lock().take();
        self.inbox.lock().take();
        if let Some(handle) = self.receive_task.lock().take() {
            handle.abort();
        }
        debug!(link = %self.id, endpoint = %self.endpoint, "Memory link closed");
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// CONNECTOR
// =============================================================================

struct Registration {
    token: u64,
    on_accept: AcceptCallback,
}

/// Connector for `mem/<name>` endpoints.
///
/// Clones share the same listener table. [`MemoryConnector::global`] is the
/// process-wide instance sessions use by default.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    listeners: Arc<DashMap<String, Registration>>,
    next_token: Arc<AtomicU64>,
}

impl MemoryConnector {
    /// A connector with its own, empty listener table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide connector.
    #[must_use]
    pub fn global() -> Self {
        static GLOBAL: OnceLock<MemoryConnector> = OnceLock::new();
        GLOBAL.get_or_init(MemoryConnector::new).clone()
    }

    /// Whether something listens on `endpoint`.
    #[must_use]
    pub fn is_listening(&self, endpoint: &str) -> bool {
        listener_name(endpoint).is_ok_and(|name| self.listeners.contains_key(name))
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn Transport>, TransportError> {
        let name = listener_name(endpoint)?;
        // Clone out so the map guard is released before the callback runs.
        let on_accept = self
            .listeners
            .get(name)
            .map(|r| r.on_accept.clone())
            .ok_or_else(|| TransportError::ConnectionRefused {
                endpoint: endpoint.to_string(),
            })?;

        let (local, remote) = MemoryTransport::pair(endpoint);
        debug!(
            endpoint,
            local = %local.id(),
            remote = %remote.id(),
            "Memory link established"
        );
        let remote: Arc<dyn Transport> = remote;
        on_accept(remote);
        let local: Arc<dyn Transport> = local;
        Ok(local)
    }

    async fn listen(
        &self,
        endpoint: &str,
        on_accept: AcceptCallback,
    ) -> Result<Box<dyn Listener>, TransportError> {
        let name = listener_name(endpoint)?;
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);

        match self.listeners.entry(name.to_string()) {
            Entry::Occupied(_) => {
                return Err(TransportError::AddressInUse {
                    endpoint: endpoint.to_string(),
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(Registration { token, on_accept });
            }
        }

        debug!(endpoint, "Memory listener bound");
        Ok(Box::new(MemoryListener {
            endpoint: endpoint.to_string(),
            name: name.to_string(),
            token,
            listeners: self.listeners.clone(),
        }))
    }
}

struct MemoryListener {
    endpoint: String,
    name: String,
    token: u64,
    listeners: Arc<DashMap<String, Registration>>,
}

impl Listener for MemoryListener {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn close(&self) {
        // A later listener may have reused the name; only remove our own.
        if self
            .listeners
            .remove_if(&self.name, |_, r| r.token == self.token)
            .is_some()
        {
            debug!(endpoint = %self.endpoint, "Memory listener closed");
        }
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    /// Receive handler forwarding events into a channel.
    fn collect() -> (ReceiveCallback, mpsc::UnboundedReceiver<LinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cb: ReceiveCallback = Arc::new(move |event| {
            let _ = tx.send(event);
        });
        (cb, rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<LinkEvent>) -> LinkEvent {
        timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("no event")
            .expect("channel closed")
    }

    #[test]
    fn test_endpoint_parsing() {
        assert_eq!(listener_name("mem/alpha").unwrap(), "alpha");
        assert_eq!(listener_name("mem/a/b").unwrap(), "a/b");
        assert!(matches!(
            listener_name("tcp/127.0.0.1:7447"),
            Err(TransportError::InvalidEndpoint { .. })
        ));
        assert!(listener_name("mem/").is_err());
        assert!(listener_name("alpha").is_err());
    }

    #[tokio::test]
    async fn test_frames_flow_in_order() {
        let (a, b) = MemoryTransport::pair("mem/test");
        let (cb, mut rx) = collect();
        b.on_receive(cb).unwrap();

        for i in 0..10u8 {
            a.send(Bytes::from(vec![i])).unwrap();
        }
        for i in 0..10u8 {
            assert_eq!(next(&mut rx).await, LinkEvent::Frame(Bytes::from(vec![i])));
        }
    }

    #[tokio::test]
    async fn test_frames_before_handler_are_kept() {
        let (a, b) = MemoryTransport::pair("mem/test");
        a.send(Bytes::from_static(b"early")).unwrap();

        let (cb, mut rx) = collect();
        b.on_receive(cb).unwrap();
        assert_eq!(next(&mut rx).await, LinkEvent::Frame(Bytes::from_static(b"early")));
    }

    #[tokio::test]
    async fn test_second_handler_rejected() {
        let (_a, b) = MemoryTransport::pair("mem/test");
        let (cb, _rx) = collect();
        b.on_receive(cb.clone()).unwrap();
        assert_eq!(
            b.on_receive(cb),
            Err(TransportError::ReceiverInstalled { link: b.id() })
        );
    }

    #[tokio::test]
    async fn test_close_notifies_peer() {
        let (a, b) = MemoryTransport::pair("mem/test");
        let (cb, mut rx) = collect();
        b.on_receive(cb).unwrap();

        a.close();
        a.close();
        assert!(a.is_closed());
        assert_eq!(next(&mut rx).await, LinkEvent::Closed);
        assert!(matches!(
            a.send(Bytes::new()),
            Err(TransportError::Closed { .. })
        ));
    }

    #[tokio::test]
    async fn test_send_to_closed_peer_fails() {
        let (a, b) = MemoryTransport::pair("mem/test");
        b.close();
        assert_eq!(
            a.send(Bytes::from_static(b"x")),
            Err(TransportError::Closed { link: a.id() })
        );
    }

    #[tokio::test]
    async fn test_connect_without_listener_refused() {
        let connector = MemoryConnector::new();
        let err = connector.connect("mem/nobody").await.err().unwrap();
        assert_eq!(
            err,
            TransportError::ConnectionRefused {
                endpoint: "mem/nobody".into()
            }
        );
    }

    #[tokio::test]
    async fn test_listen_accept_and_exchange() {
        let connector = MemoryConnector::new();
        let (accepted_tx, mut accepted_rx) = mpsc::unbounded_channel();
        let on_accept: AcceptCallback = Arc::new(move |link| {
            let _ = accepted_tx.send(link);
        });
        let listener = connector.listen("mem/server", on_accept).await.unwrap();
        assert_eq!(listener.endpoint(), "mem/server");
        assert!(connector.is_listening("mem/server"));

        let client = connector.connect("mem/server").await.unwrap();
        let server = accepted_rx.recv().await.unwrap();
        assert_eq!(server.endpoint(), "mem/server");

        let (cb, mut rx) = collect();
        server.on_receive(cb).unwrap();
        client.send(Bytes::from_static(b"hello")).unwrap();
        assert_eq!(next(&mut rx).await, LinkEvent::Frame(Bytes::from_static(b"hello")));
    }

    #[tokio::test]
    async fn test_address_in_use_until_listener_dropped() {
        let connector = MemoryConnector::new();
        let noop: AcceptCallback = Arc::new(|_| {});

        let listener = connector.listen("mem/busy", noop.clone()).await.unwrap();
        assert!(matches!(
            connector.listen("mem/busy", noop.clone()).await,
            Err(TransportError::AddressInUse { .. })
        ));

        drop(listener);
        assert!(!connector.is_listening("mem/busy"));
        assert!(connector.listen("mem/busy", noop).await.is_ok());
    }

    #[tokio::test]
    async fn test_stale_listener_close_keeps_new_registration() {
        let connector = MemoryConnector::new();
        let noop: AcceptCallback = Arc::new(|_| {});

        let first = connector.listen("mem/reuse", noop.clone()).await.unwrap();
        first.close();
        let _second = connector.listen("mem/reuse", noop).await.unwrap();
        drop(first);
        assert!(connector.is_listening("mem/reuse"));
    }
}
