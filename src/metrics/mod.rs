//! Metrics module
//!
//! Prometheus counters and histograms for appends, leases and lock files.
//! There is no scrape endpoint; [`gather_text`] renders the default registry
//! in the text exposition format.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, register_histogram_vec, Counter,
    CounterVec, Encoder, Histogram, HistogramVec, TextEncoder,
};

lazy_static! {
    // Append metrics
    pub static ref APPENDS_TOTAL: CounterVec = register_counter_vec!(
        "kasane_appends_total",
        "Total number of append operations",
        &["container", "status"]
    ).unwrap();

    pub static ref APPEND_BYTES_TOTAL: Counter = register_counter!(
        "kasane_append_bytes_total",
        "Total bytes committed through append blocks"
    ).unwrap();

    pub static ref BLOCKS_APPENDED_TOTAL: Counter = register_counter!(
        "kasane_blocks_appended_total",
        "Total number of append blocks committed"
    ).unwrap();

    pub static ref BLOCK_SIZE_BYTES: Histogram = register_histogram!(
        "kasane_block_size_bytes",
        "Size of committed append blocks in bytes",
        vec![64.0, 1024.0, 16384.0, 65536.0, 262144.0, 1048576.0, 4194304.0]
    ).unwrap();

    pub static ref APPEND_DURATION: HistogramVec = register_histogram_vec!(
        "kasane_append_duration_seconds",
        "Append duration in seconds",
        &["container", "mode"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]
    ).unwrap();

    // Coordination metrics
    pub static ref LEASE_OPERATIONS: CounterVec = register_counter_vec!(
        "kasane_lease_operations_total",
        "Lease acquire/release calls",
        &["op", "status"]
    ).unwrap();

    pub static ref LOCK_FILE_OPERATIONS: CounterVec = register_counter_vec!(
        "kasane_lock_file_operations_total",
        "Lock file create/delete calls",
        &["op", "status"]
    ).unwrap();

    // Error metrics
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "kasane_errors_total",
        "Total errors by domain kind",
        &["kind"]
    ).unwrap();
}

/// Record a completed append
pub fn record_append_success(container: &str, bytes: u64) {
    APPENDS_TOTAL.with_label_values(&[container, "success"]).inc();
    APPEND_BYTES_TOTAL.inc_by(bytes as f64);
}

/// Record a failed append
pub fn record_append_failure(container: &str) {
    APPENDS_TOTAL.with_label_values(&[container, "failure"]).inc();
}

/// Record one committed block
pub fn record_block_appended(size: usize) {
    BLOCKS_APPENDED_TOTAL.inc();
    BLOCK_SIZE_BYTES.observe(size as f64);
}

/// Record append duration; `mode` is "append" or "truncate"
pub fn record_append_duration(container: &str, mode: &str, duration_secs: f64) {
    APPEND_DURATION
        .with_label_values(&[container, mode])
        .observe(duration_secs);
}

pub fn record_lease_operation(op: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    LEASE_OPERATIONS.with_label_values(&[op, status]).inc();
}

pub fn record_lock_file_operation(op: &str, outcome: &str) {
    LOCK_FILE_OPERATIONS.with_label_values(&[op, outcome]).inc();
}

/// Record an error
pub fn record_error(kind: &str) {
    ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

/// Render every registered metric in the Prometheus text format
pub fn gather_text() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;

    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
