pub mod breaker;
pub mod retry;
pub mod types;

pub use breaker::CircuitBreaker;
pub use retry::{with_retry, RetryExecutor, RetryPolicy};
pub use types::{CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState, RetryConfig};
