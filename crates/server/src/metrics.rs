//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the parley server:
//! - HTTP request metrics (latency, counts, in flight)
//! - Queue and worker pool status (collected dynamically)
//! - Everything registered by `parley_core::metrics`

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "parley_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("parley_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "parley_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Pipeline Status Metrics
// =============================================================================

/// Tasks waiting in the queue.
pub static QUEUE_READY: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("parley_queue_ready", "Tasks waiting to be delivered").unwrap()
});

/// Tasks leased to a worker.
pub static QUEUE_LEASED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("parley_queue_leased", "Tasks currently leased to a worker").unwrap()
});

/// Tasks removed after exhausting their attempts.
pub static QUEUE_DEAD_LETTERED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("parley_queue_dead_lettered", "Dead-lettered tasks").unwrap()
});

/// Worker threads alive.
pub static WORKERS_LIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("parley_workers_live", "Number of live worker threads").unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // Pipeline
    registry.register(Box::new(QUEUE_READY.clone())).unwrap();
    registry.register(Box::new(QUEUE_LEASED.clone())).unwrap();
    registry
        .register(Box::new(QUEUE_DEAD_LETTERED.clone()))
        .unwrap();
    registry.register(Box::new(WORKERS_LIVE.clone())).unwrap();

    // Core metrics (ingestion, admission, workers)
    for metric in parley_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Collect dynamic metrics from current application state.
///
/// Called before encoding so the gauges reflect the queue and worker pool
/// at scrape time.
pub async fn collect_dynamic_metrics(state: &crate::state::AppState) {
    match state.pipeline().status().await {
        Ok(status) => {
            QUEUE_READY.set(status.queue.ready as i64);
            QUEUE_LEASED.set(status.queue.leased as i64);
            QUEUE_DEAD_LETTERED.set(status.queue.dead_lettered as i64);
            WORKERS_LIVE.set(status.workers.live_workers as i64);
        }
        Err(e) => tracing::warn!("Failed to collect pipeline status: {}", e),
    }
}
