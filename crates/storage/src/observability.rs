use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

// Prometheus metrics (default registry)
pub static STORE_OPERATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tracker_store_operations_total",
        "Store operations by kind",
        &["op"]
    )
    .expect("register store_operations_total")
});

pub static CACHE_HITS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("tracker_store_cache_hits_total", "Reads served from the fresh cache")
        .expect("register cache_hits_total")
});

pub static CACHE_MISSES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("tracker_store_cache_misses_total", "Reads that went to the backend")
        .expect("register cache_misses_total")
});

pub static BACKEND_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tracker_store_backend_errors_total",
        "Backend calls that failed, timed out or were short-circuited",
        &["op"]
    )
    .expect("register backend_errors_total")
});

pub static DEGRADED_WRITES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "tracker_store_degraded_writes_total",
        "Writes and deletes kept in memory only because the backend failed"
    )
    .expect("register degraded_writes_total")
});

pub static MALFORMED_RECORDS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "tracker_store_malformed_records_total",
        "Stored values that failed to parse and were treated as missing"
    )
    .expect("register malformed_records_total")
});

pub static EXPIRED_RECORDS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "tracker_store_expired_records_total",
        "Records removed because their TTL passed"
    )
    .expect("register expired_records_total")
});

pub static PENDING_WRITES: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "tracker_store_pending_writes",
        "Degraded operations waiting to be replayed to the backend"
    )
    .expect("register pending_writes")
});

pub static BACKEND_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "tracker_store_backend_duration_seconds",
        "Backend call duration in seconds",
        &["op"],
        vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("register backend_duration")
});

pub fn encode_metrics() -> (axum::http::StatusCode, String) {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics encode error: {e}"),
        );
    }
    (
        axum::http::StatusCode::OK,
        String::from_utf8(buffer).unwrap_or_default(),
    )
}
