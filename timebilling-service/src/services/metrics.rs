//! Prometheus metrics for timebilling-service.
//!
//! Domain metrics live in the default `prometheus` registry. HTTP request
//! metrics come from the shared middleware through the `metrics` facade and
//! are rendered by the installed exporter handle; `/metrics` serves both.

use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec,
    HistogramVec, TextEncoder,
};
use service_core::error::AppError;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Generation attempts by outcome.
pub static INVOICES_GENERATED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "timebilling_invoices_generated_total",
        "Draft invoices generated from time entries",
        &["outcome"]
    )
    .expect("Failed to register invoices_generated_total")
});

/// Time entries claimed by generated invoices.
pub static TIME_ENTRIES_BILLED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "timebilling_time_entries_billed_total",
        "Time entries claimed by an invoice"
    )
    .expect("Failed to register time_entries_billed_total")
});

/// Applied status transitions.
pub static STATUS_TRANSITIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "timebilling_status_transitions_total",
        "Invoice status transitions applied",
        &["from", "to"]
    )
    .expect("Failed to register status_transitions_total")
});

/// Generated drafts that lost the claim to a concurrent generation.
pub static CLAIM_CONFLICTS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "timebilling_claim_conflicts_total",
        "Draft generations rolled back because entries were already claimed"
    )
    .expect("Failed to register claim_conflicts_total")
});

/// Sum of generated invoice totals.
pub static INVOICED_AMOUNT_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "timebilling_invoiced_amount_total",
        "Sum of totals of generated draft invoices"
    )
    .expect("Failed to register invoiced_amount_total")
});

/// Engine operations by outcome.
pub static OPERATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "timebilling_operations_total",
        "Billing operations by operation and outcome",
        &["operation", "outcome"]
    )
    .expect("Failed to register operations_total")
});

pub static OPERATION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "timebilling_operation_duration_seconds",
        "Billing operation duration in seconds",
        &["operation"],
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register operation_duration")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "timebilling_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "timebilling_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

pub fn record_error(error: &AppError) {
    ERRORS_TOTAL.with_label_values(&[error.kind()]).inc();
}

/// Count an operation's outcome; failures are also counted by error kind.
pub fn record_operation<T>(operation: &str, result: &Result<T, AppError>) {
    match result {
        Ok(_) => OPERATIONS_TOTAL
            .with_label_values(&[operation, "success"])
            .inc(),
        Err(e) => {
            OPERATIONS_TOTAL.with_label_values(&[operation, e.kind()]).inc();
            record_error(e);
        }
    }
}

/// Register domain metrics and install the recorder for HTTP metrics.
/// Safe to call more than once.
pub fn init_metrics() {
    Lazy::force(&INVOICES_GENERATED_TOTAL);
    Lazy::force(&TIME_ENTRIES_BILLED_TOTAL);
    Lazy::force(&STATUS_TRANSITIONS_TOTAL);
    Lazy::force(&CLAIM_CONFLICTS_TOTAL);
    Lazy::force(&INVOICED_AMOUNT_TOTAL);
    Lazy::force(&OPERATIONS_TOTAL);
    Lazy::force(&OPERATION_DURATION);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);

    if METRICS_HANDLE.get().is_some() {
        return;
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = METRICS_HANDLE.set(handle);
        }
        Err(e) => tracing::warn!(error = %e, "Metrics recorder already installed"),
    }
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let mut output = METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_default();

    let encoder = TextEncoder::new();
    output.push_str(
        &encoder
            .encode_to_string(&prometheus::gather())
            .unwrap_or_default(),
    );
    output
}
