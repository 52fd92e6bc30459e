use super::{
    HealthProbe, NewUser, NotificationSettings, User, UserLocation, UserPreference, UserRepository,
    UserStats, UserWithPreferences,
};
use crate::circuit_breaker::{with_retry, RetryConfig, RetryPolicy};
use crate::config::{AppConfig, StoreConfig};
use crate::context::RequestContext;
use crate::error::{Result, StoreError};
use crate::healthcheck::HealthMonitor;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Repository decorator that routes every call through the store breaker.
///
/// Reads get a default deadline and a short inner retry for transient errors;
/// writes get a longer deadline and run exactly once.
pub struct ResilientUserRepository {
    inner: Arc<dyn UserRepository>,
    monitor: Arc<HealthMonitor>,
    read_timeout: Duration,
    write_timeout: Duration,
    read_retry: RetryPolicy,
}

impl ResilientUserRepository {
    pub fn new(inner: Arc<dyn UserRepository>, monitor: Arc<HealthMonitor>) -> Self {
        let store = StoreConfig::default();
        Self {
            inner,
            monitor,
            read_timeout: store.read_timeout(),
            write_timeout: store.write_timeout(),
            read_retry: store.read_retry_policy(&RetryConfig::default()),
        }
    }

    pub fn from_config(
        inner: Arc<dyn UserRepository>,
        monitor: Arc<HealthMonitor>,
        config: &AppConfig,
    ) -> Self {
        Self {
            inner,
            monitor,
            read_timeout: config.store.read_timeout(),
            write_timeout: config.store.write_timeout(),
            read_retry: config.store.read_retry_policy(&config.retry),
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

    async fn read<T, F, Fut>(&self, ctx: &RequestContext, operation: &str, f: F) -> Result<T>
    where
        F: FnMut(RequestContext) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let ctx = ctx.with_default_timeout(self.read_timeout);
        let policy = &self.read_retry;
        self.monitor
            .with_store_resilience(&ctx, operation, move |ctx| async move {
                with_retry(&ctx, operation, policy, f).await
            })
            .await
    }

    async fn write<T, F, Fut>(&self, ctx: &RequestContext, operation: &str, f: F) -> Result<T>
    where
        F: FnOnce(RequestContext) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let ctx = ctx.with_default_timeout(self.write_timeout);
        self.monitor.with_store_resilience(&ctx, operation, f).await
    }
}

#[async_trait]
impl HealthProbe for ResilientUserRepository {
    async fn ping(&self, ctx: &RequestContext) -> Result<()> {
        if self.monitor.is_store_healthy(ctx).await {
            Ok(())
        } else {
            Err(StoreError::Transient("store health probe failed".to_string()))
        }
    }
}

#[async_trait]
impl UserRepository for ResilientUserRepository {
    async fn create(&self, ctx: &RequestContext, user: NewUser) -> Result<User> {
        let inner = self.inner.as_ref();
        self.write(ctx, "create_user", move |ctx| async move {
            ctx.run(inner.create(&ctx, user)).await
        })
        .await
    }

    async fn get_by_id(&self, ctx: &RequestContext, id: u64) -> Result<User> {
        let inner = self.inner.as_ref();
        self.read(ctx, "get_user_by_id", move |ctx| async move {
            ctx.run(inner.get_by_id(&ctx, id)).await
        })
        .await
    }

    async fn get_by_telegram_id(&self, ctx: &RequestContext, telegram_id: i64) -> Result<User> {
        let inner = self.inner.as_ref();
        self.read(ctx, "get_user_by_telegram_id", move |ctx| async move {
            ctx.run(inner.get_by_telegram_id(&ctx, telegram_id)).await
        })
        .await
    }

    async fn update(&self, ctx: &RequestContext, user: &User) -> Result<()> {
        let inner = self.inner.as_ref();
        self.write(ctx, "update_user", move |ctx| async move {
            ctx.run(inner.update(&ctx, user)).await
        })
        .await
    }

    async fn update_rating(&self, ctx: &RequestContext, id: u64, change: f32) -> Result<User> {
        let inner = self.inner.as_ref();
        self.write(ctx, "update_user_rating", move |ctx| async move {
            ctx.run(inner.update_rating(&ctx, id, change)).await
        })
        .await
    }

    async fn update_last_active(&self, ctx: &RequestContext, id: u64) -> Result<()> {
        let inner = self.inner.as_ref();
        self.write(ctx, "update_last_active", move |ctx| async move {
            ctx.run(inner.update_last_active(&ctx, id)).await
        })
        .await
    }

    async fn delete(&self, ctx: &RequestContext, id: u64) -> Result<()> {
        let inner = self.inner.as_ref();
        self.write(ctx, "delete_user", move |ctx| async move {
            ctx.run(inner.delete(&ctx, id)).await
        })
        .await
    }

    async fn add_preference(&self, ctx: &RequestContext, preference: UserPreference) -> Result<()> {
        let inner = self.inner.as_ref();
        self.write(ctx, "add_preference", move |ctx| async move {
            ctx.run(inner.add_preference(&ctx, preference)).await
        })
        .await
    }

    async fn remove_preference(&self, ctx: &RequestContext, user_id: u64, tag_id: u64) -> Result<()> {
        let inner = self.inner.as_ref();
        self.write(ctx, "remove_preference", move |ctx| async move {
            ctx.run(inner.remove_preference(&ctx, user_id, tag_id)).await
        })
        .await
    }

    async fn get_preferences(&self, ctx: &RequestContext, user_id: u64) -> Result<Vec<UserPreference>> {
        let inner = self.inner.as_ref();
        self.read(ctx, "get_preferences", move |ctx| async move {
            ctx.run(inner.get_preferences(&ctx, user_id)).await
        })
        .await
    }

    async fn get_user_with_preferences(&self, ctx: &RequestContext, id: u64) -> Result<UserWithPreferences> {
        let inner = self.inner.as_ref();
        self.read(ctx, "get_user_with_preferences", move |ctx| async move {
            ctx.run(inner.get_user_with_preferences(&ctx, id)).await
        })
        .await
    }

    async fn get_stats(&self, ctx: &RequestContext, user_id: u64) -> Result<UserStats> {
        let inner = self.inner.as_ref();
        self.read(ctx, "get_stats", move |ctx| async move {
            ctx.run(inner.get_stats(&ctx, user_id)).await
        })
        .await
    }

    async fn update_stats(&self, ctx: &RequestContext, stats: &UserStats) -> Result<()> {
        let inner = self.inner.as_ref();
        self.write(ctx, "update_stats", move |ctx| async move {
            ctx.run(inner.update_stats(&ctx, stats)).await
        })
        .await
    }

    async fn get_location(&self, ctx: &RequestContext, user_id: u64) -> Result<UserLocation> {
        let inner = self.inner.as_ref();
        self.read(ctx, "get_location", move |ctx| async move {
            ctx.run(inner.get_location(&ctx, user_id)).await
        })
        .await
    }

    async fn update_location(&self, ctx: &RequestContext, location: UserLocation) -> Result<()> {
        let inner = self.inner.as_ref();
        self.write(ctx, "update_location", move |ctx| async move {
            ctx.run(inner.update_location(&ctx, location)).await
        })
        .await
    }

    async fn get_notification_settings(&self, ctx: &RequestContext, user_id: u64) -> Result<NotificationSettings> {
        let inner = self.inner.as_ref();
        self.read(ctx, "get_notification_settings", move |ctx| async move {
            ctx.run(inner.get_notification_settings(&ctx, user_id)).await
        })
        .await
    }

    async fn update_notification_settings(
        &self,
        ctx: &RequestContext,
        settings: NotificationSettings,
    ) -> Result<()> {
        let inner = self.inner.as_ref();
        self.write(ctx, "update_notification_settings", move |ctx| async move {
            ctx.run(inner.update_notification_settings(&ctx, settings)).await
        })
        .await
    }
}
