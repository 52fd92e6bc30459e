use super::Cache;
use crate::circuit_breaker::{with_retry, RetryPolicy};
use crate::config::{AppConfig, CacheConfig};
use crate::context::RequestContext;
use crate::error::{Result, StoreError};
use crate::healthcheck::HealthMonitor;
use crate::store::HealthProbe;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Cache decorator that routes every call through the cache breaker.
///
/// Read errors, misses and rejections included, reach the caller so it can fall
/// back to the store. Write and delete errors are logged and swallowed.
pub struct ResilientCache {
    inner: Arc<dyn Cache>,
    monitor: Arc<HealthMonitor>,
    read_timeout: Duration,
    write_timeout: Duration,
    read_retry: RetryPolicy,
}

impl ResilientCache {
    pub fn new(inner: Arc<dyn Cache>, monitor: Arc<HealthMonitor>) -> Self {
        let config = CacheConfig::default();
        Self {
            inner,
            monitor,
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
            read_retry: config.read_retry_policy(),
        }
    }

    pub fn from_config(inner: Arc<dyn Cache>, monitor: Arc<HealthMonitor>, config: &AppConfig) -> Self {
        Self {
            inner,
            monitor,
            read_timeout: config.cache.read_timeout(),
            write_timeout: config.cache.write_timeout(),
            read_retry: config.cache.read_retry_policy(),
        }
    }

    pub fn with_timeouts(mut self, read: Duration, write: Duration) -> Self {
        self.read_timeout = read;
        self.write_timeout = write;
        self
    }

    pub fn with_read_retry(mut self, policy: RetryPolicy) -> Self {
        self.read_retry = policy;
        self
    }
}

#[async_trait]
impl HealthProbe for ResilientCache {
    async fn ping(&self, ctx: &RequestContext) -> Result<()> {
        if self.monitor.is_cache_healthy(ctx).await {
            Ok(())
        } else {
            Err(StoreError::Transient("cache health probe failed".to_string()))
        }
    }
}

#[async_trait]
impl Cache for ResilientCache {
    async fn get(&self, ctx: &RequestContext, key: &str) -> Result<Bytes> {
        let ctx = ctx.with_default_timeout(self.read_timeout);
        let inner = self.inner.as_ref();
        let policy = &self.read_retry;

        self.monitor
            .with_cache_resilience(&ctx, "get_cache", move |ctx| async move {
                with_retry(&ctx, "get_cache", policy, move |ctx| async move {
                    ctx.run(inner.get(&ctx, key)).await
                })
                .await
            })
            .await
    }

    async fn set(&self, ctx: &RequestContext, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        let ctx = ctx.with_default_timeout(self.write_timeout);
        let inner = self.inner.as_ref();

        let result = self
            .monitor
            .with_cache_resilience(&ctx, "set_cache", move |ctx| async move {
                ctx.run(inner.set(&ctx, key, value, ttl)).await
            })
            .await;

        if let Err(err) = result {
            warn!(key, error = %err, "Cache write failed, continuing without cache");
        }
        Ok(())
    }

    async fn delete(&self, ctx: &RequestContext, key: &str) -> Result<()> {
        let ctx = ctx.with_default_timeout(self.write_timeout);
        let inner = self.inner.as_ref();

        let result = self
            .monitor
            .with_cache_resilience(&ctx, "delete_cache", move |ctx| async move {
                ctx.run(inner.delete(&ctx, key)).await
            })
            .await;

        if let Err(err) = result {
            warn!(key, error = %err, "Cache delete failed, continuing without cache");
        }
        Ok(())
    }
}
