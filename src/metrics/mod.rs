//! Metrics module
//!
//! Prometheus metrics for target issuance, transfers, reconciliation and
//! remote deletion.

pub mod server;

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec,
    HistogramVec,
};

lazy_static! {
    // Target issuance metrics
    pub static ref UPLOAD_TARGETS_TOTAL: CounterVec = register_counter_vec!(
        "stream_ingestr_upload_targets_total",
        "Upload targets requested",
        &["collection", "mode", "status"]
    ).unwrap();

    // Transfer metrics
    pub static ref TRANSFERS_TOTAL: CounterVec = register_counter_vec!(
        "stream_ingestr_transfers_total",
        "Completed transfers",
        &["mode", "status"]
    ).unwrap();

    pub static ref TRANSFER_BYTES_TOTAL: Counter = register_counter!(
        "stream_ingestr_transfer_bytes_total",
        "Total bytes acknowledged by the platform"
    ).unwrap();

    pub static ref TRANSFER_DURATION: HistogramVec = register_histogram_vec!(
        "stream_ingestr_transfer_duration_seconds",
        "Transfer duration in seconds",
        &["mode"],
        vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0, 3600.0]
    ).unwrap();

    pub static ref CHUNK_RETRIES_TOTAL: CounterVec = register_counter_vec!(
        "stream_ingestr_chunk_retries_total",
        "Resumable chunk retries by cause",
        &["cause"]  // "network" or "upstream"
    ).unwrap();

    // Reconciliation metrics
    pub static ref RECONCILE_POLLS_TOTAL: CounterVec = register_counter_vec!(
        "stream_ingestr_reconcile_polls_total",
        "Status polls by result",
        &["result"]
    ).unwrap();

    pub static ref RECONCILE_OUTCOMES_TOTAL: CounterVec = register_counter_vec!(
        "stream_ingestr_reconcile_outcomes_total",
        "Reconciliation outcomes",
        &["outcome"]
    ).unwrap();

    // Deletion metrics
    pub static ref REMOTE_DELETES_TOTAL: CounterVec = register_counter_vec!(
        "stream_ingestr_remote_deletes_total",
        "Remote delete calls by result",
        &["result"]
    ).unwrap();

    // Auth metrics
    pub static ref AUTH_ATTEMPTS: CounterVec = register_counter_vec!(
        "stream_ingestr_auth_attempts_total",
        "Authentication attempts",
        &["method", "status"]
    ).unwrap();

    // Error metrics
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "stream_ingestr_errors_total",
        "Total errors",
        &["type"]
    ).unwrap();
}

/// Record an upload target request
pub fn record_target_issued(collection: &str, mode: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    UPLOAD_TARGETS_TOTAL
        .with_label_values(&[collection, mode, status])
        .inc();
}

/// Record a successful transfer
pub fn record_transfer_success(mode: &str, bytes: u64, duration_secs: f64) {
    TRANSFERS_TOTAL.with_label_values(&[mode, "success"]).inc();
    TRANSFER_BYTES_TOTAL.inc_by(bytes as f64);
    TRANSFER_DURATION
        .with_label_values(&[mode])
        .observe(duration_secs);
}

/// Record a failed transfer
pub fn record_transfer_failure(mode: &str) {
    TRANSFERS_TOTAL.with_label_values(&[mode, "failure"]).inc();
}

/// Record a resumable chunk retry
pub fn record_chunk_retry(cause: &str) {
    CHUNK_RETRIES_TOTAL.with_label_values(&[cause]).inc();
}

/// Record one reconciliation tick
///
/// `result` is the mapped status (`processing`, `ready`, `error`) or
/// `query_failed` / `write_failed`.
pub fn record_reconcile_poll(result: &str) {
    RECONCILE_POLLS_TOTAL.with_label_values(&[result]).inc();
}

/// Record how a reconciliation ended
pub fn record_reconcile_outcome(outcome: &str) {
    RECONCILE_OUTCOMES_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record a remote delete
pub fn record_remote_delete(result: &str) {
    REMOTE_DELETES_TOTAL.with_label_values(&[result]).inc();
}

/// Record authentication attempt
pub fn record_auth_attempt(method: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    AUTH_ATTEMPTS.with_label_values(&[method, status]).inc();
}

/// Record an error
pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}
