//! Prometheus metrics for membership-service.

use axum::{extract::Request, middleware::Next, response::Response};
use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_counter, register_histogram_vec, register_int_counter_vec,
    Counter, HistogramVec, IntCounterVec, TextEncoder,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::time::Instant;

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "membership_db_query_duration_seconds",
            "Database query duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Renewal evaluations by outcome (charged, not_due, unpriced, failed, ...).
pub static RENEWALS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "membership_renewals_total",
            "Renewal evaluations by outcome"
        ),
        &["outcome"]
    )
    .expect("Failed to register RENEWALS_TOTAL")
});

/// Total amount billed by automatic renewals.
pub static RENEWAL_AMOUNT_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(opts!(
        "membership_renewal_amount_total",
        "Total amount charged by automatic renewals"
    ))
    .expect("Failed to register RENEWAL_AMOUNT_TOTAL")
});

/// Billing runs by trigger and final status.
pub static BILLING_RUNS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("membership_billing_runs_total", "Billing runs by type and status"),
        &["run_type", "status"]
    )
    .expect("Failed to register BILLING_RUNS_TOTAL")
});

/// Billing run duration.
pub static BILLING_RUN_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "membership_billing_run_duration_seconds",
            "Billing run duration in seconds",
            vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
        ),
        &["run_type"]
    )
    .expect("Failed to register BILLING_RUN_DURATION")
});

/// HTTP requests by method and status.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("membership_http_requests_total", "Total HTTP requests"),
        &["method", "status"]
    )
    .expect("Failed to register HTTP_REQUESTS_TOTAL")
});

/// HTTP request duration.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "membership_http_request_duration_seconds",
            "HTTP request duration in seconds"
        ),
        &["method"]
    )
    .expect("Failed to register HTTP_REQUEST_DURATION")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("membership_errors_total", "Total errors by type"),
        &["error_type"]
    )
    .expect("Failed to register ERRORS_TOTAL")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&RENEWALS_TOTAL);
    Lazy::force(&RENEWAL_AMOUNT_TOTAL);
    Lazy::force(&BILLING_RUNS_TOTAL);
    Lazy::force(&BILLING_RUN_DURATION);
    Lazy::force(&HTTP_REQUESTS_TOTAL);
    Lazy::force(&HTTP_REQUEST_DURATION);
    Lazy::force(&ERRORS_TOTAL);
}

pub fn record_renewal_outcome(outcome: &str) {
    RENEWALS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_renewal_amount(amount: Decimal) {
    if let Some(value) = amount.to_f64() {
        RENEWAL_AMOUNT_TOTAL.inc_by(value);
    }
}

pub fn record_billing_run(run_type: &str, status: &str, duration_secs: f64) {
    BILLING_RUNS_TOTAL
        .with_label_values(&[run_type, status])
        .inc();
    BILLING_RUN_DURATION
        .with_label_values(&[run_type])
        .observe(duration_secs);
}

pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

/// Axum middleware counting requests and timing them.
pub async fn http_metrics_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &status])
        .inc();
    HTTP_REQUEST_DURATION
        .with_label_values(&[&method])
        .observe(start.elapsed().as_secs_f64());

    response
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
