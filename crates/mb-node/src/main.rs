//! # Meshbus Node
//!
//! Runs a single Meshbus session until Ctrl+C.
//!
//! ## Startup Sequence
//!
//! 1. Initialize logging from `MB_*` environment variables
//! 2. Register metrics
//! 3. Load configuration: JSON file from the first argument or `MB_CONFIG`,
//!    then `MB_MODE`, `MB_LISTEN` and `MB_CONNECT` overrides
//! 4. Open the session
//! 5. Subscribe to `**` and serve metrics on `meshbus/<id>/metrics`
//!
//! ## Example
//!
//! ```text
//! MB_LISTEN=mem/a mb-node
//! MB_CONNECT=mem/a MB_LOG_LEVEL=debug mb-node node.json
//! ```

use anyhow::{Context, Result};
use mb_session::{Config, KeyExpr, Query, Sample, Session, SessionError};
use mb_telemetry::{gather_text, init_logging, register_metrics, TelemetryConfig};
use serde_json::Value;
use std::path::Path;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

/// Environment variable naming the configuration file.
const CONFIG_ENV: &str = "MB_CONFIG";

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = TelemetryConfig::from_env().with_service_name("mb-node");
    init_logging(&telemetry).context("Failed to initialize logging")?;
    let _metrics = register_metrics().context("Failed to register metrics")?;

    let path = std::env::args().nth(1).or_else(|| std::env::var(CONFIG_ENV).ok());
    let mut config = match path {
        Some(path) => load_config_file(Path::new(&path))?,
        None => Config::new(),
    };
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;

    let session = Session::open(config).await.context("Failed to open session")?;
    info!("===========================================");
    info!("  Meshbus Node v{}", env!("CARGO_PKG_VERSION"));
    info!("  Peer: {}", session.id());
    info!("  Mode: {}", session.settings().mode);
    info!("===========================================");

    let _tap = session.declare_subscriber("**", log_sample)?;
    let metrics_key = KeyExpr::new(format!("meshbus/{}/metrics", session.id()))?;
    let _metrics_queryable =
        session.declare_queryable(metrics_key.clone(), serve_metrics(metrics_key.clone()))?;
    info!(key_expr = %metrics_key, "Serving metrics");

    let mut routing_errors = session.routing_errors();
    let watcher = tokio::spawn(async move {
        loop {
            match routing_errors.recv().await {
                Ok(err) => debug!(error = %err, "Routing error observed"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Routing error feed lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    info!("Node is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    info!("Initiating shutdown...");
    session.close();
    watcher.abort();
    info!(peers = session.peers().len(), "Shutdown complete");
    Ok(())
}

fn log_sample(sample: Sample) {
    info!(
        key_expr = %sample.key_expr,
        kind = ?sample.kind,
        source = ?sample.source.map(|p| p.to_string()),
        payload = ?sample.payload,
        "Sample"
    );
}

/// Queryable callback answering with the metrics text on `key_expr`.
///
/// Replies always carry the concrete key, never the query's selector, which
/// may be a wildcard such as `meshbus/**`.
fn serve_metrics(key_expr: KeyExpr) -> impl Fn(Query) + Send + Sync + 'static {
    move |query: Query| {
        let text = match gather_text() {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "Failed to gather metrics");
                if let Err(e) = query.reply_err(e.to_string()) {
                    warn!(error = %e, "Failed to answer metrics query");
                }
                return;
            }
        };
        if let Err(e) = query.reply(key_expr.clone(), text) {
            warn!(error = %e, "Failed to answer metrics query");
        }
    }
}

/// Read a JSON configuration file.
fn load_config_file(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config = Config::from_json_str(&text)
        .with_context(|| format!("Invalid config file {}", path.display()))?;
    info!(path = %path.display(), "Loaded configuration");
    Ok(config)
}

/// Apply `MB_MODE`, `MB_LISTEN` and `MB_CONNECT` on top of `config`.
///
/// Endpoint lists are comma separated.
fn apply_env_overrides(
    config: &mut Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), SessionError> {
    if let Some(mode) = lookup("MB_MODE") {
        config.insert("mode", mode)?;
    }
    for (var, key) in [("MB_LISTEN", "listen.endpoints"), ("MB_CONNECT", "connect.endpoints")] {
        if let Some(list) = lookup(var) {
            let endpoints: Vec<Value> = list
                .split(',')
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(|e| Value::String(e.to_string()))
                .collect();
            config.insert(key, Value::Array(endpoints))?;
        }
    }
    Ok(())
}
