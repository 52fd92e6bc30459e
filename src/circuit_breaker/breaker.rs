use super::types::{CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState};
use crate::error::{ErrorKind, Result, StoreError};
use crate::metrics;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker guarding a single dependency
///
/// Only admission decisions and result bookkeeping take the lock; the guarded
/// operation always runs outside of it, so calls to the dependency are never
/// serialized by the breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Dependency identifier
    name: String,
    failure_threshold: u32,
    reset_timeout: Duration,
    /// Error kinds that never count as failures
    ignored_errors: HashSet<ErrorKind>,
    state: RwLock<State>,
    counters: Counters,
}

#[derive(Debug)]
struct State {
    /// Current circuit state
    circuit_state: CircuitState,
    /// Number of consecutive failures in closed state
    failure_count: u32,
    /// Time of the last state transition
    last_state_change: Instant,
}

#[derive(Debug, Default)]
struct Counters {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    ignored_errors: AtomicU64,
    rejected_requests: AtomicU64,
    circuit_opened_count: AtomicU64,
    circuit_closed_count: AtomicU64,
    circuit_half_opened_count: AtomicU64,
}

enum Admission {
    Allowed,
    Probe,
    Rejected(Duration),
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    pub fn new(name: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        let name = name.into();
        info!(
            dependency = %name,
            failure_threshold = config.failure_threshold,
            reset_timeout_ms = config.reset_timeout_ms,
            ignored_errors = ?config.ignored_errors,
            "Creating circuit breaker"
        );
        metrics::record_circuit_breaker_state(&name, CircuitState::Closed);

        Self {
            failure_threshold: config.failure_threshold,
            reset_timeout: config.reset_timeout(),
            ignored_errors: config.ignored_errors.iter().copied().collect(),
            state: RwLock::new(State {
                circuit_state: CircuitState::Closed,
                failure_count: 0,
                last_state_change: Instant::now(),
            }),
            counters: Counters::default(),
            name,
        }
    }

    /// Dependency this breaker guards
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `f` unless the circuit is open, then record its outcome.
    ///
    /// Rejected calls return [`StoreError::CircuitOpen`] without invoking `f`.
    /// Errors of an ignored kind are returned unchanged and leave the state as is.
    pub async fn execute<T, F, Fut>(&self, operation: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.allow_request(operation).await {
            return Err(StoreError::CircuitOpen {
                dependency: self.name.clone(),
            });
        }

        let result = f().await;
        self.record_result(operation, result.as_ref().err()).await;
        result
    }

    /// Get current state
    pub async fn state(&self) -> CircuitState {
        self.state.read().await.circuit_state
    }

    /// Consecutive failures counted in closed state
    pub async fn failure_count(&self) -> u32 {
        self.state.read().await.failure_count
    }

    /// Get metrics
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let c = &self.counters;
        CircuitBreakerMetrics {
            total_requests: c.total_requests.load(Ordering::Relaxed),
            successful_requests: c.successful_requests.load(Ordering::Relaxed),
            failed_requests: c.failed_requests.load(Ordering::Relaxed),
            ignored_errors: c.ignored_errors.load(Ordering::Relaxed),
            rejected_requests: c.rejected_requests.load(Ordering::Relaxed),
            circuit_opened_count: c.circuit_opened_count.load(Ordering::Relaxed),
            circuit_closed_count: c.circuit_closed_count.load(Ordering::Relaxed),
            circuit_half_opened_count: c.circuit_half_opened_count.load(Ordering::Relaxed),
        }
    }

    /// Check if a call can proceed, moving Open to HalfOpen once the reset timeout elapsed
    async fn allow_request(&self, operation: &str) -> bool {
        let admission = {
            let state = self.state.read().await;
            match state.circuit_state {
                CircuitState::Closed | CircuitState::HalfOpen => Admission::Allowed,
                CircuitState::Open => {
                    let elapsed = state.last_state_change.elapsed();
                    if elapsed > self.reset_timeout {
                        Admission::Probe
                    } else {
                        Admission::Rejected(self.reset_timeout - elapsed)
                    }
                }
            }
        };

        match admission {
            Admission::Allowed => {}
            Admission::Probe => {
                let mut state = self.state.write().await;
                // Another caller may have won the race to half-open already
                if state.circuit_state == CircuitState::Open
                    && state.last_state_change.elapsed() > self.reset_timeout
                {
                    self.transition(&mut state, CircuitState::HalfOpen, operation);
                }
            }
            Admission::Rejected(time_remaining) => {
                self.counters.rejected_requests.fetch_add(1, Ordering::Relaxed);
                metrics::record_circuit_breaker_rejection(&self.name);
                warn!(
                    dependency = %self.name,
                    operation,
                    time_remaining = ?time_remaining,
                    "Circuit breaker open, rejecting call"
                );
                return false;
            }
        }

        self.counters.total_requests.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Record the outcome of an executed call
    async fn record_result(&self, operation: &str, error: Option<&StoreError>) {
        if let Some(err) = error {
            if self.ignored_errors.contains(&err.kind()) {
                self.counters.ignored_errors.fetch_add(1, Ordering::Relaxed);
                debug!(
                    dependency = %self.name,
                    operation,
                    error = %err,
                    "Ignoring error for circuit breaker"
                );
                return;
            }
        }

        let mut state = self.state.write().await;

        match error {
            Some(err) => {
                self.counters.failed_requests.fetch_add(1, Ordering::Relaxed);
                match state.circuit_state {
                    CircuitState::Closed => {
                        state.failure_count += 1;
                        debug!(
                            dependency = %self.name,
                            operation,
                            failure_count = state.failure_count,
                            threshold = self.failure_threshold,
                            error = %err,
                            "Call failed in closed state"
                        );
                        if state.failure_count >= self.failure_threshold {
                            self.transition(&mut state, CircuitState::Open, operation);
                        }
                    }
                    CircuitState::HalfOpen => {
                        warn!(
                            dependency = %self.name,
                            operation,
                            error = %err,
                            "Half-open probe failed, reopening circuit"
                        );
                        self.transition(&mut state, CircuitState::Open, operation);
                    }
                    CircuitState::Open => {
                        // Admitted before the circuit opened
                        debug!(dependency = %self.name, operation, "Recording failure in open state");
                    }
                }
            }
            None => {
                self.counters.successful_requests.fetch_add(1, Ordering::Relaxed);
                match state.circuit_state {
                    CircuitState::Closed => {
                        state.failure_count = 0;
                    }
                    CircuitState::HalfOpen => {
                        self.transition(&mut state, CircuitState::Closed, operation);
                    }
                    CircuitState::Open => {
                        debug!(dependency = %self.name, operation, "Recording success in open state");
                    }
                }
            }
        }
    }

    fn transition(&self, state: &mut State, to: CircuitState, operation: &str) {
        let from = state.circuit_state;

        match to {
            CircuitState::Open => {
                warn!(
                    dependency = %self.name,
                    operation,
                    failures = state.failure_count,
                    reset_timeout = ?self.reset_timeout,
                    "Circuit breaker opened"
                );
                self.counters.circuit_opened_count.fetch_add(1, Ordering::Relaxed);
            }
            CircuitState::HalfOpen => {
                info!(dependency = %self.name, operation, "Circuit breaker half-opened");
                self.counters
                    .circuit_half_opened_count
                    .fetch_add(1, Ordering::Relaxed);
            }
            CircuitState::Closed => {
                info!(dependency = %self.name, operation, "Circuit breaker closed");
                state.failure_count = 0;
                self.counters.circuit_closed_count.fetch_add(1, Ordering::Relaxed);
            }
        }

        state.circuit_state = to;
        state.last_state_change = Instant::now();

        metrics::record_circuit_breaker_transition(&self.name, from, to);
        metrics::record_circuit_breaker_state(&self.name, to);
    }
}
