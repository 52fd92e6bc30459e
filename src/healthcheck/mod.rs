use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState};
use crate::config::AppConfig;
use crate::context::RequestContext;
use crate::error::{ErrorKind, Result};
use crate::metrics;
use crate::store::HealthProbe;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const STORE: &str = "store";
const CACHE: &str = "cache";

/// Health of both dependencies as seen by their probes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub store: bool,
    pub cache: bool,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.store && self.cache
    }
}

/// Owns the store and cache circuit breakers for the lifetime of the process.
///
/// Decorators reach their dependency only through [`with_store_resilience`] and
/// [`with_cache_resilience`], so every call is gated and accounted for by the
/// matching breaker.
///
/// [`with_store_resilience`]: HealthMonitor::with_store_resilience
/// [`with_cache_resilience`]: HealthMonitor::with_cache_resilience
pub struct HealthMonitor {
    store_breaker: CircuitBreaker,
    cache_breaker: CircuitBreaker,
    store_probe: Arc<dyn HealthProbe>,
    cache_probe: Arc<dyn HealthProbe>,
    store_probe_timeout: Duration,
    cache_probe_timeout: Duration,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("store_breaker", &self.store_breaker)
            .field("cache_breaker", &self.cache_breaker)
            .field("store_probe_timeout", &self.store_probe_timeout)
            .field("cache_probe_timeout", &self.cache_probe_timeout)
            .finish()
    }
}

impl HealthMonitor {
    /// Create a monitor with one breaker per dependency.
    ///
    /// Absence kinds are always added to the ignored set so that "not found"
    /// and "cache miss" never count against either dependency.
    pub fn new(
        config: &CircuitBreakerConfig,
        store_probe: Arc<dyn HealthProbe>,
        cache_probe: Arc<dyn HealthProbe>,
    ) -> Self {
        let mut config = config.clone();
        for kind in [ErrorKind::NotFound, ErrorKind::CacheMiss] {
            if !config.ignored_errors.contains(&kind) {
                config.ignored_errors.push(kind);
            }
        }

        Self {
            store_breaker: CircuitBreaker::new(STORE, &config),
            cache_breaker: CircuitBreaker::new(CACHE, &config),
            store_probe,
            cache_probe,
            store_probe_timeout: Duration::from_secs(2),
            cache_probe_timeout: Duration::from_secs(1),
        }
    }

    /// Create a monitor from application config, including probe timeouts
    pub fn from_config(
        config: &AppConfig,
        store_probe: Arc<dyn HealthProbe>,
        cache_probe: Arc<dyn HealthProbe>,
    ) -> Self {
        Self::new(&config.circuit_breaker, store_probe, cache_probe)
            .with_probe_timeouts(config.store.health_timeout(), config.cache.health_timeout())
    }

    pub fn with_probe_timeouts(mut self, store: Duration, cache: Duration) -> Self {
        self.store_probe_timeout = store;
        self.cache_probe_timeout = cache;
        self
    }

    /// Ping the store through its breaker; true only if the ping ran and succeeded
    pub async fn is_store_healthy(&self, ctx: &RequestContext) -> bool {
        Self::probe(&self.store_breaker, self.store_probe.as_ref(), ctx, self.store_probe_timeout)
            .await
    }

    /// Ping the cache through its breaker; true only if the ping ran and succeeded
    pub async fn is_cache_healthy(&self, ctx: &RequestContext) -> bool {
        Self::probe(&self.cache_breaker, self.cache_probe.as_ref(), ctx, self.cache_probe_timeout)
            .await
    }

    /// Probe both dependencies concurrently
    pub async fn status(&self, ctx: &RequestContext) -> HealthStatus {
        let (store, cache) = tokio::join!(self.is_store_healthy(ctx), self.is_cache_healthy(ctx));
        HealthStatus { store, cache }
    }

    async fn probe(
        breaker: &CircuitBreaker,
        probe: &dyn HealthProbe,
        ctx: &RequestContext,
        timeout: Duration,
    ) -> bool {
        let ctx = ctx.with_timeout(timeout);
        let result = breaker
            .execute("ping", || async { ctx.run(probe.ping(&ctx)).await })
            .await;

        match result {
            Ok(()) => true,
            Err(err) => {
                warn!(dependency = breaker.name(), error = %err, "Health probe failed");
                false
            }
        }
    }

    /// Run a store operation through the store breaker.
    ///
    /// `f` receives the caller's context. Absence results are returned unchanged
    /// and logged at debug level.
    pub async fn with_store_resilience<T, F, Fut>(
        &self,
        ctx: &RequestContext,
        operation: &str,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(RequestContext) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        let result = Self::guarded(&self.store_breaker, ctx, operation, f).await;
        metrics::record_store_operation(operation, start.elapsed(), result.as_ref().err());
        result
    }

    /// Run a cache operation through the cache breaker.
    ///
    /// Same contract as [`with_store_resilience`](HealthMonitor::with_store_resilience).
    pub async fn with_cache_resilience<T, F, Fut>(
        &self,
        ctx: &RequestContext,
        operation: &str,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(RequestContext) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        let result = Self::guarded(&self.cache_breaker, ctx, operation, f).await;
        metrics::record_cache_operation(operation, start.elapsed(), result.as_ref().err());
        result
    }

    async fn guarded<T, F, Fut>(
        breaker: &CircuitBreaker,
        ctx: &RequestContext,
        operation: &str,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(RequestContext) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        // A context that is already done says nothing about the dependency
        if let Some(err) = ctx.err() {
            return Err(err);
        }

        let result = breaker.execute(operation, || f(ctx.clone())).await;

        if let Err(err) = &result {
            if err.is_absence() {
                debug!(dependency = breaker.name(), operation, error = %err, "Dependency reported absence");
            }
        }

        result
    }

    pub async fn store_state(&self) -> CircuitState {
        self.store_breaker.state().await
    }

    pub async fn cache_state(&self) -> CircuitState {
        self.cache_breaker.state().await
    }

    pub fn store_breaker(&self) -> &CircuitBreaker {
        &self.store_breaker
    }

    pub fn cache_breaker(&self) -> &CircuitBreaker {
        &self.cache_breaker
    }

    pub fn store_metrics(&self) -> CircuitBreakerMetrics {
        self.store_breaker.metrics()
    }

    pub fn cache_metrics(&self) -> CircuitBreakerMetrics {
        self.cache_breaker.metrics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    #[derive(Default)]
    struct FlakyProbe {
        down: AtomicBool,
        calls: AtomicU32,
    }

    #[async_trait]
    impl HealthProbe for FlakyProbe {
        async fn ping(&self, _ctx: &RequestContext) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.down.load(Ordering::SeqCst) {
                Err(StoreError::Transient("connection refused".to_string()))
            } else {
                Ok(())
            }
        }
    }

    struct HangingProbe;

    #[async_trait]
    impl HealthProbe for HangingProbe {
        async fn ping(&self, _ctx: &RequestContext) -> Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn config(threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            reset_timeout_ms: 60_000,
            ignored_errors: vec![],
        }
    }

    fn monitor(threshold: u32) -> (HealthMonitor, Arc<FlakyProbe>, Arc<FlakyProbe>) {
        let store = Arc::new(FlakyProbe::default());
        let cache = Arc::new(FlakyProbe::default());
        let monitor = HealthMonitor::new(&config(threshold), store.clone(), cache.clone());
        (monitor, store, cache)
    }

    #[tokio::test]
    async fn test_probes_report_health() {
        let (monitor, store, _cache) = monitor(5);
        let ctx = RequestContext::background();

        assert!(monitor.is_store_healthy(&ctx).await);
        assert!(monitor.is_cache_healthy(&ctx).await);

        store.down.store(true, Ordering::SeqCst);
        let status = monitor.status(&ctx).await;
        assert_eq!(status, HealthStatus { store: false, cache: true });
        assert!(!status.is_healthy());
    }

    #[tokio::test]
    async fn test_open_breaker_fails_probe_without_ping() {
        let (monitor, store, _cache) = monitor(2);
        let ctx = RequestContext::background();
        store.down.store(true, Ordering::SeqCst);

        assert!(!monitor.is_store_healthy(&ctx).await);
        assert!(!monitor.is_store_healthy(&ctx).await);
        assert_eq!(monitor.store_state().await, CircuitState::Open);

        store.down.store(false, Ordering::SeqCst);
        assert!(!monitor.is_store_healthy(&ctx).await);
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_times_out() {
        let monitor = HealthMonitor::new(
            &config(5),
            Arc::new(HangingProbe),
            Arc::new(FlakyProbe::default()),
        )
        .with_probe_timeouts(Duration::from_millis(50), Duration::from_millis(50));

        assert!(!monitor.is_store_healthy(&RequestContext::background()).await);
        assert_eq!(monitor.store_metrics().failed_requests, 1);
    }

    #[tokio::test]
    async fn test_absence_never_trips_breakers() {
        let (monitor, _store, _cache) = monitor(2);
        let ctx = RequestContext::background();

        for _ in 0..5 {
            let result: Result<()> = monitor
                .with_store_resilience(&ctx, "get_user_by_id", |_| async {
                    Err(StoreError::NotFound("user 7".to_string()))
                })
                .await;
            assert!(matches!(result, Err(StoreError::NotFound(_))));

            let result: Result<()> = monitor
                .with_cache_resilience(&ctx, "get_cache", |_| async {
                    Err(StoreError::CacheMiss("user:7:profile".to_string()))
                })
                .await;
            assert!(matches!(result, Err(StoreError::CacheMiss(_))));
        }

        assert_eq!(monitor.store_state().await, CircuitState::Closed);
        assert_eq!(monitor.cache_state().await, CircuitState::Closed);
        assert_eq!(monitor.store_metrics().ignored_errors, 5);
    }

    #[tokio::test]
    async fn test_breakers_are_independent() {
        let (monitor, _store, _cache) = monitor(2);
        let ctx = RequestContext::background();

        for _ in 0..2 {
            let _: Result<()> = monitor
                .with_cache_resilience(&ctx, "set_cache", |_| async {
                    Err(StoreError::Transient("timeout".to_string()))
                })
                .await;
        }

        assert_eq!(monitor.cache_state().await, CircuitState::Open);
        assert_eq!(monitor.store_state().await, CircuitState::Closed);

        let value = monitor
            .with_store_resilience(&ctx, "get_user_by_id", |_| async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);

        let rejected: Result<()> = monitor
            .with_cache_resilience(&ctx, "get_cache", |_| async { Ok(()) })
            .await;
        assert!(matches!(rejected, Err(StoreError::CircuitOpen { .. })));
    }

    #[tokio::test]
    async fn test_done_context_skips_breaker() {
        let (monitor, _store, _cache) = monitor(1);
        let ctx = RequestContext::background();
        ctx.cancel();

        let result: Result<()> = monitor
            .with_store_resilience(&ctx, "create_user", |_| async { Ok(()) })
            .await;

        assert!(matches!(result, Err(StoreError::Cancelled)));
        assert_eq!(monitor.store_state().await, CircuitState::Closed);
        assert_eq!(monitor.store_metrics().total_requests, 0);
    }
}
