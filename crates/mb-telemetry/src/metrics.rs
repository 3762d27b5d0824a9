//! Prometheus metrics for Meshbus sessions.
//!
//! All metrics follow the naming convention: `mb_<area>_<metric>_<unit>`

use lazy_static::lazy_static;
use prometheus::{Counter, CounterVec, Encoder, Gauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // PUB/SUB
    // =========================================================================

    /// Publications accepted by `publish`/`delete`
    pub static ref SAMPLES_PUBLISHED: Counter = Counter::new(
        "mb_pubsub_samples_published_total",
        "Total samples published by local callers"
    ).expect("metric creation failed");

    /// Samples queued to a subscriber
    pub static ref SAMPLES_DELIVERED: Counter = Counter::new(
        "mb_pubsub_samples_delivered_total",
        "Total samples queued for delivery to subscribers"
    ).expect("metric creation failed");

    /// Samples dropped on a full subscriber queue
    pub static ref SAMPLES_DROPPED: Counter = Counter::new(
        "mb_pubsub_samples_dropped_total",
        "Total samples dropped because a subscriber queue was full"
    ).expect("metric creation failed");

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Queries issued by `get`
    pub static ref QUERIES_ISSUED: Counter = Counter::new(
        "mb_query_issued_total",
        "Total queries issued"
    ).expect("metric creation failed");

    /// Queries resolved, by final status
    pub static ref QUERIES_RESOLVED: CounterVec = CounterVec::new(
        Opts::new("mb_query_resolved_total", "Total queries resolved"),
        &["outcome"]  // completed/timed_out/cancelled
    ).expect("metric creation failed");

    // =========================================================================
    // ROUTING
    // =========================================================================

    /// Frames that no transport accepted
    pub static ref ROUTING_ERRORS: Counter = Counter::new(
        "mb_routing_errors_total",
        "Total frames that could not be sent to a linked peer"
    ).expect("metric creation failed");

    /// Currently open links
    pub static ref LINKS_ACTIVE: Gauge = Gauge::new(
        "mb_routing_links_active",
        "Number of open transport links"
    ).expect("metric creation failed");
}

/// Handle to the registered metrics
pub struct MetricsHandle {
    _registry: Arc<Registry>,
}

/// Register all metrics with the global registry.
///
/// Safe to call more than once.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(SAMPLES_PUBLISHED.clone()),
        Box::new(SAMPLES_DELIVERED.clone()),
        Box::new(SAMPLES_DROPPED.clone()),
        Box::new(QUERIES_ISSUED.clone()),
        Box::new(QUERIES_RESOLVED.clone()),
        Box::new(ROUTING_ERRORS.clone()),
        Box::new(LINKS_ACTIVE.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(MetricsHandle {
        _registry: Arc::new(REGISTRY.clone()),
    })
}

/// Encode all registered metrics as Prometheus text format.
pub fn gather_text() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
