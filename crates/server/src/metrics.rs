//! Prometheus metrics for the refract server.
//!
//! Exposed at `/prometheus/metrics`. The endpoint is unauthenticated so
//! scrapers can reach it; restrict it at the network layer in deployments.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Requests served, labelled by file extension and outcome.
pub static REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("requests_total", "Total number of media requests handled.")
            .namespace("refract"),
        &["extension", "status"],
    )
    .expect("metric creation failed")
});

/// Processor wall time. Recorded only when a processor actually runs.
pub static PROCESSING_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "processing_duration_seconds",
            "Histogram of processor durations in seconds.",
        )
        .namespace("refract")
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["extension"],
    )
    .expect("metric creation failed")
});

/// Current cache directory size per project.
pub static CACHE_SIZE_BYTES: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        Opts::new("cache_size_bytes", "Current cache size in bytes.").namespace("refract"),
        &["project"],
    )
    .expect("metric creation failed")
});

/// Files removed by eviction per project.
pub static CACHE_EVICTED_FILES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "cache_evicted_files_total",
            "Total number of cache files evicted.",
        )
        .namespace("refract"),
        &["project"],
    )
    .expect("metric creation failed")
});

/// Bytes freed by eviction per project.
pub static CACHE_EVICTED_BYTES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "cache_evicted_bytes_total",
            "Total number of cache bytes evicted.",
        )
        .namespace("refract"),
        &["project"],
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry. Idempotent, so embedding
/// multiple routers in tests is safe.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(REQUESTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(PROCESSING_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CACHE_SIZE_BYTES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CACHE_EVICTED_FILES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CACHE_EVICTED_BYTES.clone()))
            .expect("metric registration failed");
    });
}

/// GET /prometheus/metrics - text exposition.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_cleanly() {
        register_metrics();
        register_metrics();
    }
}
