//! Prometheus metrics for ladder-proxy.
//!
//! Tracks exchange outcomes, abort causes, modifier activity and upstream latency.
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use tracing::warn;

lazy_static! {
    /// Exchanges processed, by response mode and outcome
    pub static ref EXCHANGES_TOTAL: CounterVec = register_counter_vec!(
        "ladder_exchanges_total",
        "Total number of proxy exchanges processed",
        &["mode", "outcome"]  // mode: raw|structured, outcome: complete|aborted
    )
    .unwrap();

    /// Aborted exchanges by error kind
    pub static ref ABORTS_TOTAL: CounterVec = register_counter_vec!(
        "ladder_aborts_total",
        "Total number of aborted exchanges",
        &["kind"]  // kind: resolution|modifier|dispatch|precondition
    )
    .unwrap();

    /// Modifiers executed per phase
    pub static ref MODIFIERS_EXECUTED_TOTAL: CounterVec = register_counter_vec!(
        "ladder_modifiers_executed_total",
        "Total number of modifiers executed",
        &["phase"]  // phase: request|response
    )
    .unwrap();

    /// Upstream round trip including full body download
    pub static ref UPSTREAM_REQUEST_DURATION_MS: HistogramVec = register_histogram_vec!(
        "ladder_upstream_request_duration_ms",
        "Duration of upstream requests including body download",
        &["method", "status"],
        vec![5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 15000.0]
    )
    .unwrap();
}

/// Collect and return all metrics in Prometheus text format
pub fn collect_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn record_exchange(mode: &str, outcome: &str) {
    EXCHANGES_TOTAL.with_label_values(&[mode, outcome]).inc();
}

pub fn record_abort(kind: &str) {
    ABORTS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_modifiers(phase: &str, count: usize) {
    if count > 0 {
        MODIFIERS_EXECUTED_TOTAL
            .with_label_values(&[phase])
            .inc_by(count as f64);
    }
}

pub fn record_upstream_duration(method: &str, status: u16, duration_ms: f64) {
    UPSTREAM_REQUEST_DURATION_MS
        .with_label_values(&[method, &status.to_string()])
        .observe(duration_ms);
}
