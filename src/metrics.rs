use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Histogram, HistogramOpts, HistogramVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all service metrics
const PREFIX: &str = "caseknow";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Retrieval Metrics
    pub static ref SOURCE_FAILURES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            format!("{PREFIX}_source_failures_total"),
            "Retrieval source calls that failed or timed out"
        ),
        &["source", "reason"]
    ).expect("Failed to create source_failures_total metric");

    pub static ref FUSION_FALLBACK_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            format!("{PREFIX}_fusion_fallback_total"),
            "Searches answered by the plain-text fallback scan"
        ),
        &["outcome"]
    ).expect("Failed to create fusion_fallback_total metric");

    pub static ref RERANK_PROVIDER_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            format!("{PREFIX}_rerank_provider_total"),
            "Rerank attempts by provider and result"
        ),
        &["provider", "result"]
    ).expect("Failed to create rerank_provider_total metric");

    // Workflow Metrics
    pub static ref WORKFLOW_RUNS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_workflow_runs_total"), "Answer workflow runs by outcome"),
        &["outcome"]
    ).expect("Failed to create workflow_runs_total metric");

    pub static ref WORKFLOW_CYCLES: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            format!("{PREFIX}_workflow_cycles"),
            "Reformulation loop-backs per workflow run"
        )
        .buckets(vec![0.0, 1.0, 2.0, 3.0, 5.0, 10.0])
    ).expect("Failed to create workflow_cycles metric");

    // Indexing Metrics
    pub static ref INDEX_SYNC_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_index_sync_total"), "Case index sync attempts"),
        &["backend", "result"]
    ).expect("Failed to create index_sync_total metric");

    pub static ref INDEX_QUEUE_SIZE: IntGauge = IntGauge::new(
        format!("{PREFIX}_index_queue_size"),
        "Cases waiting in the index sync queue"
    ).expect("Failed to create index_queue_size metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(SOURCE_FAILURES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(FUSION_FALLBACK_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(RERANK_PROVIDER_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(WORKFLOW_RUNS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(WORKFLOW_CYCLES.clone()));
    let _ = REGISTRY.register(Box::new(INDEX_SYNC_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(INDEX_QUEUE_SIZE.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

/// Record a retrieval source that errored or timed out
pub fn record_source_failure(source: &str, reason: &str) {
    SOURCE_FAILURES_TOTAL
        .with_label_values(&[source, reason])
        .inc();
}

/// Record a fallback scan and whether it found anything
pub fn record_fallback(found: bool) {
    FUSION_FALLBACK_TOTAL
        .with_label_values(&[if found { "hit" } else { "empty" }])
        .inc();
}

/// Record a rerank attempt
pub fn record_rerank(provider: &str, result: &str) {
    RERANK_PROVIDER_TOTAL
        .with_label_values(&[provider, result])
        .inc();
}

/// Record a finished workflow run
pub fn record_workflow_run(outcome: &str, cycles: u32) {
    WORKFLOW_RUNS_TOTAL.with_label_values(&[outcome]).inc();
    WORKFLOW_CYCLES.observe(cycles as f64);
}

/// Record an index sync attempt against one backend
pub fn record_index_sync(backend: &str, success: bool) {
    INDEX_SYNC_TOTAL
        .with_label_values(&[backend, if success { "ok" } else { "error" }])
        .inc();
}

pub fn set_index_queue_size(size: usize) {
    INDEX_QUEUE_SIZE.set(size as i64);
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
