//! Prometheus Metrics Module
//!
//! Provides application-wide metrics collection using Prometheus.
//!
//! # Metrics Collected
//! - HTTP request counts and latency for the ops surface
//! - Live connections, online users, rooms and timers of the gateway
//! - Admissions, rejections and disconnects by reason
//! - Inbound events by name and outcome
//! - Message-store call latency

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

const NAMESPACE: &str = "realtime_gateway";

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// HTTP request counter by method, path and status code
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("http_requests_total", "Total number of HTTP requests").namespace(NAMESPACE),
        &["method", "path", "status"],
    )
    .expect("Failed to create HTTP_REQUESTS_TOTAL metric")
});

/// HTTP request latency histogram in seconds
pub static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let buckets = vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];
    HistogramVec::new(
        HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request latency in seconds",
        )
        .namespace(NAMESPACE)
        .buckets(buckets),
        &["method", "path"],
    )
    .expect("Failed to create HTTP_REQUEST_DURATION_SECONDS metric")
});

/// Gateway registry sizes, refreshed on every admission, removal and sweep
pub static GATEWAY_REGISTRY_SIZE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("gateway_registry_size", "Entries held by the gateway registries")
            .namespace(NAMESPACE),
        // "connections", "online_users", "rooms", "typing_timers", "idle_timers", "rate_windows"
        &["registry"],
    )
    .expect("Failed to create GATEWAY_REGISTRY_SIZE metric")
});

/// Admission outcomes
pub static GATEWAY_ADMISSIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("gateway_admissions_total", "Connection admission attempts")
            .namespace(NAMESPACE),
        &["outcome"],
    )
    .expect("Failed to create GATEWAY_ADMISSIONS_TOTAL metric")
});

/// Removals by reason
pub static GATEWAY_DISCONNECTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("gateway_disconnects_total", "Connections removed from the gateway")
            .namespace(NAMESPACE),
        &["reason"],
    )
    .expect("Failed to create GATEWAY_DISCONNECTS_TOTAL metric")
});

/// Inbound events by name and outcome
pub static GATEWAY_EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("gateway_events_total", "Inbound client events").namespace(NAMESPACE),
        &["event", "outcome"],
    )
    .expect("Failed to create GATEWAY_EVENTS_TOTAL metric")
});

/// Message-store call duration histogram
pub static STORE_CALL_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let buckets = vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5];
    HistogramVec::new(
        HistogramOpts::new(
            "store_call_duration_seconds",
            "Message store call latency in seconds",
        )
        .namespace(NAMESPACE)
        .buckets(buckets),
        &["operation"],
    )
    .expect("Failed to create STORE_CALL_DURATION_SECONDS metric")
});

/// Register all metrics with the registry
fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .expect("Failed to register HTTP_REQUESTS_TOTAL");
    registry
        .register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()))
        .expect("Failed to register HTTP_REQUEST_DURATION_SECONDS");
    registry
        .register(Box::new(GATEWAY_REGISTRY_SIZE.clone()))
        .expect("Failed to register GATEWAY_REGISTRY_SIZE");
    registry
        .register(Box::new(GATEWAY_ADMISSIONS_TOTAL.clone()))
        .expect("Failed to register GATEWAY_ADMISSIONS_TOTAL");
    registry
        .register(Box::new(GATEWAY_DISCONNECTS_TOTAL.clone()))
        .expect("Failed to register GATEWAY_DISCONNECTS_TOTAL");
    registry
        .register(Box::new(GATEWAY_EVENTS_TOTAL.clone()))
        .expect("Failed to register GATEWAY_EVENTS_TOTAL");
    registry
        .register(Box::new(STORE_CALL_DURATION_SECONDS.clone()))
        .expect("Failed to register STORE_CALL_DURATION_SECONDS");
}

/// Collect and encode all metrics as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Helper to record HTTP request metrics
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let status = status.to_string();
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, status.as_str()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration_secs);
}

/// Snapshot of the gateway registries for the size gauges
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistrySizes {
    pub connections: usize,
    pub online_users: usize,
    pub rooms: usize,
    pub typing_timers: usize,
    pub idle_timers: usize,
    pub rate_windows: usize,
}

/// Helper to update the gateway registry gauges
pub fn set_registry_sizes(sizes: RegistrySizes) {
    let values = [
        ("connections", sizes.connections),
        ("online_users", sizes.online_users),
        ("rooms", sizes.rooms),
        ("typing_timers", sizes.typing_timers),
        ("idle_timers", sizes.idle_timers),
        ("rate_windows", sizes.rate_windows),
    ];
    for (registry, value) in values {
        GATEWAY_REGISTRY_SIZE
            .with_label_values(&[registry])
            .set(value as i64);
    }
}

/// Helper to count an admission outcome ("admitted" or an error code)
pub fn record_admission(outcome: &str) {
    GATEWAY_ADMISSIONS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_disconnect(reason: &str) {
    GATEWAY_DISCONNECTS_TOTAL.with_label_values(&[reason]).inc();
}

pub fn record_event(event: &str, outcome: &str) {
    GATEWAY_EVENTS_TOTAL.with_label_values(&[event, outcome]).inc();
}

/// Helper to record message-store call latency
pub fn record_store_call(operation: &str, duration_secs: f64) {
    STORE_CALL_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(duration_secs);
}
