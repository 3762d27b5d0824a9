//! Shared setup for integration flows.

use mb_session::{Config, Sample, Session, SessionError};
use mb_transport::MemoryConnector;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Time for declarations to cross a link.
pub const SETTLE: Duration = Duration::from_millis(100);

/// Wait for in-flight declarations and frames to land.
pub async fn settle() {
    tokio::time::sleep(SETTLE).await;
}

/// A private in-memory network.
pub struct Mesh {
    connector: Arc<MemoryConnector>,
}

impl Default for Mesh {
    fn default() -> Self {
        Self::new()
    }
}

impl Mesh {
    pub fn new() -> Self {
        Self {
            connector: Arc::new(MemoryConnector::new()),
        }
    }

    /// Open a session with an arbitrary configuration on this mesh.
    pub async fn open(&self, config: Config) -> Result<Session, SessionError> {
        Session::open_with_connector(config, self.connector.clone()).await
    }

    /// A peer listening on `endpoint`.
    pub async fn listener(&self, endpoint: &str) -> Session {
        let mut config = Config::new();
        config
            .insert("listen.endpoints", json!([endpoint]))
            .expect("valid path");
        self.open(config).await.expect("listener opens")
    }

    /// A session in `mode` connecting to `endpoint`.
    pub async fn dialer(&self, endpoint: &str, mode: &str) -> Session {
        let mut config = Config::new();
        config.insert("mode", mode).expect("valid path");
        config
            .insert("connect.endpoints", json!([endpoint]))
            .expect("valid path");
        self.open(config).await.expect("dialer opens")
    }

    pub fn is_listening(&self, endpoint: &str) -> bool {
        self.connector.is_listening(endpoint)
    }
}

/// A subscriber callback feeding a channel.
pub fn collector() -> (
    impl Fn(Sample) + Send + Sync + 'static,
    mpsc::UnboundedReceiver<Sample>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        move |sample: Sample| {
            let _ = tx.send(sample);
        },
        rx,
    )
}

/// Everything received until the channel stays quiet for `quiet`.
pub async fn drain(rx: &mut mpsc::UnboundedReceiver<Sample>, quiet: Duration) -> Vec<Sample> {
    let mut samples = Vec::new();
    while let Ok(Some(sample)) = timeout(quiet, rx.recv()).await {
        samples.push(sample);
    }
    samples
}

/// Payload as text.
pub fn text(sample: &Sample) -> String {
    sample.payload.try_to_string().expect("utf-8 payload")
}
