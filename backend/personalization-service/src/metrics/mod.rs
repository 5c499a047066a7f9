//! Personalization metrics
//!
//! Prometheus metrics for the feed path and the ETL job

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder, HistogramVec,
    IntCounter, IntCounterVec, TextEncoder,
};
use std::time::Duration;

static FEED_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "personalized_feed_requests_total",
        "Personalized feed requests by cache status",
        &["cache"]
    )
    .expect("Failed to register personalized feed requests metric")
});

static FEED_FALLBACKS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "personalized_feed_fallbacks_total",
        "Feeds that included trending fallback items, by cause",
        &["reason"]
    )
    .expect("Failed to register personalized feed fallbacks metric")
});

static FEED_LATENCY_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "personalized_feed_latency_seconds",
        "Personalized feed assembly latency",
        &["cache"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register personalized feed latency metric")
});

static ETL_ITEM_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "personalization_etl_item_errors_total",
        "ETL per-item failures by pass",
        &["pass"]
    )
    .expect("Failed to register ETL item errors metric")
});

static ETL_RUNS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("personalization_etl_runs_total", "Completed ETL runs")
        .expect("Failed to register ETL runs metric")
});

pub fn record_feed_request(cache: &str, latency: Duration) {
    FEED_REQUESTS_TOTAL.with_label_values(&[cache]).inc();
    FEED_LATENCY_SECONDS
        .with_label_values(&[cache])
        .observe(latency.as_secs_f64());
}

/// reason: ineligible, sparse, no_signal, degraded
pub fn record_feed_fallback(reason: &str) {
    FEED_FALLBACKS_TOTAL.with_label_values(&[reason]).inc();
}

/// pass: content, clusters, users, audit
pub fn record_etl_error(pass: &str) {
    ETL_ITEM_ERRORS_TOTAL.with_label_values(&[pass]).inc();
}

pub fn record_etl_run() {
    ETL_RUNS_TOTAL.inc();
}

/// Render the default registry in the Prometheus text format
pub fn render() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if encoder.encode(&prometheus::gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
