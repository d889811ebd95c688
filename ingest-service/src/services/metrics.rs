//! Prometheus metrics for ingest-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

/// Upstream API requests by outcome.
pub static UPSTREAM_REQUESTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ingest_upstream_requests_total",
        "Total number of Up API requests",
        &["outcome"]
    )
    .expect("Failed to register UPSTREAM_REQUESTS")
});

/// Rows written by table.
pub static ROWS_UPSERTED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ingest_rows_upserted_total",
        "Total number of rows inserted or refreshed",
        &["table"]
    )
    .expect("Failed to register ROWS_UPSERTED")
});

/// Webhook deliveries by event type and outcome.
pub static WEBHOOK_EVENTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ingest_webhook_events_total",
        "Total number of webhook deliveries",
        &["event_type", "outcome"]
    )
    .expect("Failed to register WEBHOOK_EVENTS")
});

/// Reconciliation callbacks by kind and outcome.
pub static RECONCILIATION_OPERATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ingest_reconciliation_operations_total",
        "Total number of reconciliation operations",
        &["operation", "status"]
    )
    .expect("Failed to register RECONCILIATION_OPERATIONS")
});

/// Alerts raised by level.
pub static ALERTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ingest_alerts_total",
        "Total number of alerts raised",
        &["level"]
    )
    .expect("Failed to register ALERTS")
});

/// Database query duration.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "ingest_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Job runs by job and status.
pub static JOB_RUNS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ingest_job_runs_total",
        "Total number of processor and job runs",
        &["job", "status"]
    )
    .expect("Failed to register JOB_RUNS")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&UPSTREAM_REQUESTS);
    Lazy::force(&ROWS_UPSERTED);
    Lazy::force(&WEBHOOK_EVENTS);
    Lazy::force(&RECONCILIATION_OPERATIONS);
    Lazy::force(&ALERTS);
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&JOB_RUNS);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

pub fn record_upstream_request(outcome: &str) {
    UPSTREAM_REQUESTS.with_label_values(&[outcome]).inc();
}

pub fn record_rows_upserted(table: &str, rows: usize) {
    ROWS_UPSERTED.with_label_values(&[table]).inc_by(rows as f64);
}

pub fn record_webhook_event(event_type: &str, outcome: &str) {
    WEBHOOK_EVENTS
        .with_label_values(&[event_type, outcome])
        .inc();
}

pub fn record_reconciliation_operation(operation: &str, status: &str) {
    RECONCILIATION_OPERATIONS
        .with_label_values(&[operation, status])
        .inc();
}

pub fn record_alert(level: &str) {
    ALERTS.with_label_values(&[level]).inc();
}

pub fn record_job_run(job: &str, status: &str) {
    JOB_RUNS.with_label_values(&[job, status]).inc();
}
