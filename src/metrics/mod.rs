use crate::circuit_breaker::CircuitState;
use crate::error::{Result, StoreError};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Metrics service for collecting and exposing Prometheus metrics
#[derive(Clone)]
pub struct MetricsService {
    handle: Arc<PrometheusHandle>,
}

impl MetricsService {
    /// Create a new metrics service
    pub fn new() -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            StoreError::Internal(format!("Failed to install metrics recorder: {}", e))
        })?;

        // Register all metrics with descriptions
        Self::register_metrics();

        info!("Metrics service initialized successfully");

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    /// Register all metrics with descriptions
    fn register_metrics() {
        // Store metrics
        describe_counter!(
            "store_operations_total",
            "Total number of operations against the durable store"
        );
        describe_counter!(
            "store_operation_errors_total",
            "Store operations that failed (absence is not counted)"
        );
        describe_histogram!(
            "store_operation_duration_seconds",
            "Store operation latencies in seconds"
        );

        // Cache metrics
        describe_counter!(
            "cache_operations_total",
            "Total number of operations against the cache"
        );
        describe_counter!(
            "cache_operation_errors_total",
            "Cache operations that failed (misses are not counted)"
        );
        describe_histogram!(
            "cache_operation_duration_seconds",
            "Cache operation latencies in seconds"
        );

        // Circuit breaker metrics
        describe_gauge!(
            "circuit_breaker_state",
            "Circuit breaker state (0 = closed, 1 = open, 2 = half-open)"
        );
        describe_counter!(
            "circuit_breaker_transitions_total",
            "Total number of circuit breaker state transitions"
        );
        describe_counter!(
            "circuit_breaker_rejections_total",
            "Calls rejected without execution because the circuit was open"
        );

        // Retry metrics
        describe_counter!(
            "retry_attempts_total",
            "Number of retries scheduled after a failed attempt"
        );

        debug!("All metrics registered with descriptions");
    }

    /// Get the Prometheus metrics handle
    pub fn handle(&self) -> Arc<PrometheusHandle> {
        self.handle.clone()
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Outcome label for an operation result; absence counts as a hit-less success
fn outcome_label(error: Option<&StoreError>) -> &'static str {
    match error {
        None => "ok",
        Some(err) if err.is_absence() => "absent",
        Some(err) if err.is_circuit_open() => "rejected",
        Some(_) => "error",
    }
}

/// Record a store operation metric
pub fn record_store_operation(operation: &str, duration: Duration, error: Option<&StoreError>) {
    let labels = [
        ("operation", operation.to_string()),
        ("outcome", outcome_label(error).to_string()),
    ];

    counter!("store_operations_total", &labels).increment(1);
    histogram!("store_operation_duration_seconds", &labels).record(duration.as_secs_f64());

    if outcome_label(error) == "error" {
        counter!("store_operation_errors_total", &labels).increment(1);
    }
}

/// Record a cache operation metric
pub fn record_cache_operation(operation: &str, duration: Duration, error: Option<&StoreError>) {
    let labels = [
        ("operation", operation.to_string()),
        ("outcome", outcome_label(error).to_string()),
    ];

    counter!("cache_operations_total", &labels).increment(1);
    histogram!("cache_operation_duration_seconds", &labels).record(duration.as_secs_f64());

    if outcome_label(error) == "error" {
        counter!("cache_operation_errors_total", &labels).increment(1);
    }
}

/// Record circuit breaker state
/// State: 0 = Closed, 1 = Open, 2 = HalfOpen
pub fn record_circuit_breaker_state(dependency: &str, state: CircuitState) {
    let labels = [("dependency", dependency.to_string())];
    gauge!("circuit_breaker_state", &labels).set(state.as_gauge() as f64);
}

/// Record circuit breaker transition
pub fn record_circuit_breaker_transition(dependency: &str, from: CircuitState, to: CircuitState) {
    let labels = [
        ("dependency", dependency.to_string()),
        ("from", from.to_string()),
        ("to", to.to_string()),
    ];
    counter!("circuit_breaker_transitions_total", &labels).increment(1);
}

/// Record a call rejected by an open circuit
pub fn record_circuit_breaker_rejection(dependency: &str) {
    let labels = [("dependency", dependency.to_string())];
    counter!("circuit_breaker_rejections_total", &labels).increment(1);
}

/// Record a scheduled retry
pub fn record_retry_attempt(operation: &str) {
    let labels = [("operation", operation.to_string())];
    counter!("retry_attempts_total", &labels).increment(1);
}
