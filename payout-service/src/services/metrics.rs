//! Prometheus metrics for payout-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Payment request lifecycle actions (submit, approve, reject, revert).
pub static REQUEST_ACTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "payout_request_actions_total",
        "Total number of payment request lifecycle actions",
        &["action"]
    )
    .expect("Failed to register request_actions_total")
});

/// Merge group operations.
pub static MERGE_GROUPS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "payout_merge_groups_total",
        "Total number of merge group operations",
        &["action"] // create, ungroup
    )
    .expect("Failed to register merge_groups_total")
});

/// Confirmation batches created or reverted.
pub static CONFIRMATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "payout_confirmations_total",
        "Total number of confirmation batches by action",
        &["action"] // create, revert
    )
    .expect("Failed to register confirmations_total")
});

/// Confirmed amount counter in integer currency units.
pub static CONFIRMED_AMOUNT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "payout_confirmed_amount_total",
        "Total confirmed amount in NTD",
        &["action"]
    )
    .expect("Failed to register confirmed_amount_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "payout_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "payout_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Record a failed operation for alerting.
pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&REQUEST_ACTIONS_TOTAL);
    Lazy::force(&MERGE_GROUPS_TOTAL);
    Lazy::force(&CONFIRMATIONS_TOTAL);
    Lazy::force(&CONFIRMED_AMOUNT_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
