use super::types::RetryConfig;
use crate::context::RequestContext;
use crate::error::{ErrorKind, Result, StoreError};
use crate::metrics;
use backoff::{backoff::Backoff, ExponentialBackoff, ExponentialBackoffBuilder};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Immutable retry settings for one call site
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_factor: f64,
    /// Fraction in `[0, 1]` of the backoff randomly added or removed
    pub jitter: f64,
    /// Error kinds worth retrying; empty means every error is retryable
    pub retryable: Vec<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
            backoff_factor: config.backoff_multiplier,
            jitter: config.jitter,
            retryable: Vec::new(),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Values outside `[0, 1]` are clamped; NaN disables jitter
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = if jitter.is_nan() { 0.0 } else { jitter.clamp(0.0, 1.0) };
        self
    }

    pub fn with_retryable(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retryable = kinds.into_iter().collect();
        self
    }

    /// Whether another attempt may be made after `err`.
    ///
    /// Cancellation and deadline errors are never retried.
    pub fn is_retryable(&self, err: &StoreError) -> bool {
        if err.is_cancellation() {
            return false;
        }
        self.retryable.is_empty() || self.retryable.contains(&err.kind())
    }

    /// Un-jittered exponential schedule: `initial * factor^n`, capped at `max_backoff`
    pub fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_backoff)
            .with_max_interval(self.max_backoff)
            .with_multiplier(self.backoff_factor)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None) // We handle max retries manually
            .build()
    }

    /// Apply jitter to a base delay, never exceeding `max_backoff`
    pub fn jittered(&self, base: Duration) -> Duration {
        // The field is public, so it may still hold NaN or an out of range value
        if self.jitter.is_nan() || self.jitter <= 0.0 {
            return base.min(self.max_backoff);
        }
        let jitter = self.jitter.min(1.0);
        let factor = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
        base.mul_f64(factor.max(0.0)).min(self.max_backoff)
    }
}

/// Retry executor with exponential backoff and jitter
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    /// Create a new retry executor
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute `f` up to `max_retries + 1` times.
    ///
    /// Waits between attempts race against `ctx`; if the context is done first,
    /// its cancellation error is returned and no further attempt is made. The
    /// last observed error is returned unchanged once attempts are exhausted.
    pub async fn execute<T, F, Fut>(
        &self,
        ctx: &RequestContext,
        operation: &str,
        mut f: F,
    ) -> Result<T>
    where
        F: FnMut(RequestContext) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut schedule = self.policy.schedule();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let err = match f(ctx.clone()).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(operation, attempt, "Operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if attempt > self.policy.max_retries {
                if self.policy.max_retries > 0 {
                    warn!(
                        operation,
                        attempts = attempt,
                        error = %err,
                        "All retry attempts failed"
                    );
                }
                return Err(err);
            }

            if !self.policy.is_retryable(&err) {
                debug!(operation, attempt, error = %err, "Error not retryable");
                return Err(err);
            }

            let base = schedule.next_backoff().unwrap_or(self.policy.max_backoff);
            let wait = self.policy.jittered(base);

            debug!(
                operation,
                attempt,
                wait_ms = wait.as_millis() as u64,
                error = %err,
                "Operation failed, retrying after backoff"
            );
            metrics::record_retry_attempt(operation);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                cancelled = ctx.done() => {
                    warn!(operation, attempt, error = %cancelled, "Context done during retry backoff");
                    return Err(cancelled);
                }
            }
        }
    }
}

/// Run `f` under `policy`; shorthand for a one-off [`RetryExecutor`]
pub async fn with_retry<T, F, Fut>(
    ctx: &RequestContext,
    operation: &str,
    policy: &RetryPolicy,
    f: F,
) -> Result<T>
where
    F: FnMut(RequestContext) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    RetryExecutor::new(policy.clone())
        .execute(ctx, operation, f)
        .await
}
