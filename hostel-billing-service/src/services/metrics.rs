//! Prometheus metrics for hostel-billing-service.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec,
    IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Database query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "hostel_billing_db_query_duration_seconds",
            "Database query duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Deductions applied, by entity kind and deduction type
pub static DEDUCTIONS_APPLIED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Deducted money, by entity kind
pub static DEDUCTION_AMOUNT_TOTAL: OnceLock<prometheus::CounterVec> = OnceLock::new();

/// Billing generation outcomes per entity, by kind and outcome
pub static BILLING_RECORDS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Rule cache lookups, by result
pub static RULE_CACHE_LOOKUPS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Notification queue activity, by event and outcome
pub static NOTIFICATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// gRPC request counter
pub static GRPC_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// gRPC request duration histogram
pub static GRPC_REQUEST_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Error counter for alerting
pub static ERRORS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    DEDUCTIONS_APPLIED_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "hostel_billing_deductions_applied_total",
                "Total checkout deductions applied by entity kind and deduction type"
            ),
            &["entity_kind", "deduction_type"]
        )
        .expect("Failed to register DEDUCTIONS_APPLIED_TOTAL")
    });

    DEDUCTION_AMOUNT_TOTAL.get_or_init(|| {
        prometheus::register_counter_vec!(
            prometheus::opts!(
                "hostel_billing_deduction_amount_total",
                "Total deducted amount by entity kind"
            ),
            &["entity_kind"]
        )
        .expect("Failed to register DEDUCTION_AMOUNT_TOTAL")
    });

    BILLING_RECORDS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "hostel_billing_records_total",
                "Periodic billing outcomes by entity kind (created, skipped, failed)"
            ),
            &["entity_kind", "outcome"]
        )
        .expect("Failed to register BILLING_RECORDS_TOTAL")
    });

    RULE_CACHE_LOOKUPS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "hostel_billing_rule_cache_lookups_total",
                "Rule cache lookups by result"
            ),
            &["result"]
        )
        .expect("Failed to register RULE_CACHE_LOOKUPS_TOTAL")
    });

    NOTIFICATIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "hostel_billing_notifications_total",
                "Notification events by type and outcome (queued, dropped, sent, failed)"
            ),
            &["event", "outcome"]
        )
        .expect("Failed to register NOTIFICATIONS_TOTAL")
    });

    GRPC_REQUESTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("hostel_billing_grpc_requests_total", "Total gRPC requests"),
            &["method", "status"]
        )
        .expect("Failed to register GRPC_REQUESTS_TOTAL")
    });

    GRPC_REQUEST_DURATION.get_or_init(|| {
        register_histogram_vec!(
            histogram_opts!(
                "hostel_billing_grpc_request_duration_seconds",
                "gRPC request duration",
                vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
            ),
            &["method"]
        )
        .expect("Failed to register GRPC_REQUEST_DURATION")
    });

    ERRORS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "hostel_billing_errors_total",
                "Total errors by type for alerting"
            ),
            &["error_type", "method"]
        )
        .expect("Failed to register ERRORS_TOTAL")
    });

    // Force initialization of lazy statics
    let _ = &*DB_QUERY_DURATION;
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record an applied deduction.
pub fn record_deduction_applied(entity_kind: &str, deduction_type: &str, amount: f64) {
    if let Some(counter) = DEDUCTIONS_APPLIED_TOTAL.get() {
        counter
            .with_label_values(&[entity_kind, deduction_type])
            .inc();
    }
    if let Some(counter) = DEDUCTION_AMOUNT_TOTAL.get() {
        counter
            .with_label_values(&[entity_kind])
            .inc_by(amount.abs());
    }
}

/// Record one entity outcome of a generation run.
pub fn record_billing_outcome(entity_kind: &str, outcome: &str) {
    if let Some(counter) = BILLING_RECORDS_TOTAL.get() {
        counter.with_label_values(&[entity_kind, outcome]).inc();
    }
}

/// Record a rule cache hit or miss.
pub fn record_rule_cache_lookup(result: &str) {
    if let Some(counter) = RULE_CACHE_LOOKUPS_TOTAL.get() {
        counter.with_label_values(&[result]).inc();
    }
}

/// Record a notification queue outcome.
pub fn record_notification(event: &str, outcome: &str) {
    if let Some(counter) = NOTIFICATIONS_TOTAL.get() {
        counter.with_label_values(&[event, outcome]).inc();
    }
}

/// Record a gRPC request.
pub fn record_grpc_request(method: &str, status: &str) {
    if let Some(counter) = GRPC_REQUESTS_TOTAL.get() {
        counter.with_label_values(&[method, status]).inc();
    }
}

/// Record gRPC request duration.
pub fn record_grpc_request_duration(method: &str, duration_secs: f64) {
    if let Some(histogram) = GRPC_REQUEST_DURATION.get() {
        histogram
            .with_label_values(&[method])
            .observe(duration_secs);
    }
}

/// Record an error for alerting.
pub fn record_error(error_type: &str, method: &str) {
    if let Some(counter) = ERRORS_TOTAL.get() {
        counter.with_label_values(&[error_type, method]).inc();
    }
}
