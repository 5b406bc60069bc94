//! Prometheus metrics for the proxy's request path.

use prometheus::{Encoder, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::LazyLock;

/// Global metrics registry
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Total requests processed
pub static REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("certgate_requests_total", "Total number of HTTP requests"),
        &["status", "host"]
    ).expect("metric can be created")
});

/// Request latency in seconds
pub static REQUEST_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "certgate_request_duration_seconds",
            "Request duration in seconds"
        ),
        &["status", "host"]
    ).expect("metric can be created")
});

/// Count of 404s returned for frontends whose service is unregistered.
pub static UNKNOWN_SERVICE_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("certgate_unknown_service_total", "Requests routed to an unregistered service"),
        &["host"]
    ).expect("metric can be created")
});

/// Initialize metrics
pub fn init() {
    let _ = REGISTRY.register(Box::new(REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(UNKNOWN_SERVICE_TOTAL.clone()));
}

/// Gather metrics in Prometheus text format
pub fn gather() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}
