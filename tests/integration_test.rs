use async_trait::async_trait;
use bytes::Bytes;
use resilient_store::cache::{Cache, MemoryCache, ResilientCache};
use resilient_store::circuit_breaker::{CircuitBreakerConfig, CircuitState};
use resilient_store::config::AppConfig;
use resilient_store::context::RequestContext;
use resilient_store::error::{ErrorKind, Result, StoreError};
use resilient_store::healthcheck::HealthMonitor;
use resilient_store::service::{UserCache, UserService};
use resilient_store::store::{
    HealthProbe, InMemoryUserRepository, NewUser, NotificationSettings, ResilientUserRepository,
    User, UserLocation, UserPreference, UserRepository, UserStats, UserWithPreferences,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

/// Cache that always misses and remembers what was written to it
#[derive(Default)]
struct RecordingCache {
    writes: Mutex<HashMap<String, Bytes>>,
    failing: AtomicBool,
    calls: AtomicU32,
}

impl RecordingCache {
    fn written(&self, key: &str) -> Option<Bytes> {
        self.writes.lock().unwrap().get(key).cloned()
    }

    fn check(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Transient("cache unreachable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl HealthProbe for RecordingCache {
    async fn ping(&self, _ctx: &RequestContext) -> Result<()> {
        self.check()
    }
}

#[async_trait]
impl Cache for RecordingCache {
    async fn get(&self, _ctx: &RequestContext, key: &str) -> Result<Bytes> {
        self.check()?;
        Err(StoreError::CacheMiss(key.to_string()))
    }

    async fn set(&self, _ctx: &RequestContext, key: &str, value: Bytes, _ttl: Duration) -> Result<()> {
        self.check()?;
        self.writes.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, _ctx: &RequestContext, key: &str) -> Result<()> {
        self.check()?;
        self.writes.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Store that can be switched off
struct SwitchableStore {
    inner: InMemoryUserRepository,
    down: AtomicBool,
    calls: AtomicU32,
}

impl SwitchableStore {
    fn new(inner: InMemoryUserRepository) -> Self {
        Self {
            inner,
            down: AtomicBool::new(false),
            calls: AtomicU32::new(0),
        }
    }

    fn check(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            Err(StoreError::Transient("store unreachable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl HealthProbe for SwitchableStore {
    async fn ping(&self, _ctx: &RequestContext) -> Result<()> {
        self.check()
    }
}

#[async_trait]
impl UserRepository for SwitchableStore {
    async fn create(&self, ctx: &RequestContext, user: NewUser) -> Result<User> {
        self.check()?;
        self.inner.create(ctx, user).await
    }

    async fn get_by_id(&self, ctx: &RequestContext, id: u64) -> Result<User> {
        self.check()?;
        self.inner.get_by_id(ctx, id).await
    }

    async fn get_by_telegram_id(&self, ctx: &RequestContext, telegram_id: i64) -> Result<User> {
        self.check()?;
        self.inner.get_by_telegram_id(ctx, telegram_id).await
    }

    async fn update(&self, ctx: &RequestContext, user: &User) -> Result<()> {
        self.check()?;
        self.inner.update(ctx, user).await
    }

    async fn update_last_active(&self, ctx: &RequestContext, id: u64) -> Result<()> {
        self.check()?;
        self.inner.update_last_active(ctx, id).await
    }

    async fn delete(&self, ctx: &RequestContext, id: u64) -> Result<()> {
        self.check()?;
        self.inner.delete(ctx, id).await
    }

    async fn add_preference(&self, ctx: &RequestContext, preference: UserPreference) -> Result<()> {
        self.check()?;
        self.inner.add_preference(ctx, preference).await
    }

    async fn remove_preference(&self, ctx: &RequestContext, user_id: u64, tag_id: u64) -> Result<()> {
        self.check()?;
        self.inner.remove_preference(ctx, user_id, tag_id).await
    }

    async fn get_preferences(&self, ctx: &RequestContext, user_id: u64) -> Result<Vec<UserPreference>> {
        self.check()?;
        self.inner.get_preferences(ctx, user_id).await
    }

    async fn update_rating(&self, ctx: &RequestContext, id: u64, change: f32) -> Result<User> {
        self.check()?;
        self.inner.update_rating(ctx, id, change).await
    }

    async fn get_user_with_preferences(&self, ctx: &RequestContext, id: u64) -> Result<UserWithPreferences> {
        self.check()?;
        self.inner.get_user_with_preferences(ctx, id).await
    }

    async fn get_stats(&self, ctx: &RequestContext, user_id: u64) -> Result<UserStats> {
        self.check()?;
        self.inner.get_stats(ctx, user_id).await
    }

    async fn update_stats(&self, ctx: &RequestContext, stats: &UserStats) -> Result<()> {
        self.check()?;
        self.inner.update_stats(ctx, stats).await
    }

    async fn get_location(&self, ctx: &RequestContext, user_id: u64) -> Result<UserLocation> {
        self.check()?;
        self.inner.get_location(ctx, user_id).await
    }

    async fn update_location(&self, ctx: &RequestContext, location: UserLocation) -> Result<()> {
        self.check()?;
        self.inner.update_location(ctx, location).await
    }

    async fn get_notification_settings(&self, ctx: &RequestContext, user_id: u64) -> Result<NotificationSettings> {
        self.check()?;
        self.inner.get_notification_settings(ctx, user_id).await
    }

    async fn update_notification_settings(
        &self,
        ctx: &RequestContext,
        settings: NotificationSettings,
    ) -> Result<()> {
        self.check()?;
        self.inner.update_notification_settings(ctx, settings).await
    }
}

fn ada() -> User {
    User {
        id: 42,
        telegram_id: 1815,
        username: "Ada".to_string(),
        bio: String::new(),
        rating: 0.0,
        last_active_at: None,
    }
}

struct Harness {
    service: UserService,
    monitor: Arc<HealthMonitor>,
    store: Arc<SwitchableStore>,
    cache: Arc<RecordingCache>,
}

fn harness(threshold: u32) -> Harness {
    let seeded = InMemoryUserRepository::new();
    seeded.insert(ada());
    let store = Arc::new(SwitchableStore::new(seeded));
    let cache = Arc::new(RecordingCache::default());

    let monitor = Arc::new(HealthMonitor::new(
        &CircuitBreakerConfig {
            failure_threshold: threshold,
            reset_timeout_ms: 60_000,
            ignored_errors: vec![ErrorKind::NotFound, ErrorKind::CacheMiss],
        },
        store.clone(),
        cache.clone(),
    ));

    let repo = ResilientUserRepository::new(store.clone(), monitor.clone());
    let resilient_cache = ResilientCache::new(cache.clone(), monitor.clone());
    let service = UserService::new(
        Arc::new(repo),
        UserCache::new(Arc::new(resilient_cache)),
        monitor.clone(),
    );

    Harness {
        service,
        monitor,
        store,
        cache,
    }
}

#[tokio::test]
async fn test_cache_miss_falls_back_and_repopulates() {
    let h = harness(5);
    let ctx = RequestContext::background();

    let user = h.service.get_user(&ctx, 42).await.unwrap();
    assert_eq!(user.id, 42);
    assert_eq!(user.username, "Ada");

    let cached = h.cache.written("user:42:profile").expect("profile was cached");
    let cached: User = serde_json::from_slice(&cached).unwrap();
    assert_eq!(cached.id, 42);
    assert_eq!(cached.username, "Ada");
}

#[tokio::test]
async fn test_cache_writes_never_fail_the_caller() {
    let h = harness(2);
    let ctx = RequestContext::background();
    h.cache.failing.store(true, Ordering::SeqCst);

    let resilient = ResilientCache::new(h.cache.clone(), h.monitor.clone());
    for _ in 0..10 {
        assert_ok!(
            resilient
                .set(&ctx, "user:1:profile", Bytes::from_static(b"{}"), Duration::from_secs(60))
                .await
        );
        assert_ok!(resilient.delete(&ctx, "user:1:profile").await);
    }

    assert_eq!(h.monitor.cache_state().await, CircuitState::Open);
}

#[tokio::test]
async fn test_cache_outage_degrades_to_store() {
    let h = harness(2);
    let ctx = RequestContext::background();
    h.cache.failing.store(true, Ordering::SeqCst);

    for _ in 0..5 {
        let user = h.service.get_user(&ctx, 42).await.unwrap();
        assert_eq!(user.username, "Ada");
    }

    assert_eq!(h.monitor.cache_state().await, CircuitState::Open);
    assert_eq!(h.monitor.store_state().await, CircuitState::Closed);

    // Once open, the cache breaker stops traffic to the cache entirely
    let before = h.cache.calls.load(Ordering::SeqCst);
    h.service.get_user(&ctx, 42).await.unwrap();
    assert_eq!(h.cache.calls.load(Ordering::SeqCst), before);

    let health = h.service.health(&ctx).await;
    assert!(health.store);
    assert!(!health.cache);
}

#[tokio::test(start_paused = true)]
async fn test_store_outage_opens_breaker() {
    let h = harness(3);
    let ctx = RequestContext::background();
    h.store.down.store(true, Ordering::SeqCst);

    for _ in 0..3 {
        let err = h.service.get_user(&ctx, 42).await.unwrap_err();
        assert!(matches!(err, StoreError::Transient(_)));
    }
    assert_eq!(h.monitor.store_state().await, CircuitState::Open);

    let calls = h.store.calls.load(Ordering::SeqCst);
    let err = h.service.get_user(&ctx, 42).await.unwrap_err();
    assert!(matches!(err, StoreError::CircuitOpen { .. }));
    assert_eq!(h.store.calls.load(Ordering::SeqCst), calls);

    let err = assert_err!(
        h.service
            .create_user(
                &ctx,
                NewUser {
                    telegram_id: 7,
                    username: "grace".to_string(),
                    bio: String::new(),
                },
            )
            .await
    );
    assert!(err.is_circuit_open());
}

#[tokio::test]
async fn test_unknown_user_does_not_trip_store_breaker() {
    let h = harness(1);
    let ctx = RequestContext::background();

    for id in 100..110 {
        let err = h.service.get_user(&ctx, id).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    assert_eq!(h.monitor.store_state().await, CircuitState::Closed);
    assert_eq!(h.service.get_user(&ctx, 42).await.unwrap().username, "Ada");
}

#[tokio::test]
async fn test_profile_extras_survive_cache_outage() {
    let h = harness(2);
    let ctx = RequestContext::background();
    h.cache.failing.store(true, Ordering::SeqCst);

    let rated = h.service.update_rating(&ctx, 42, 4.0).await.unwrap();
    assert_eq!(rated.rating, 4.0);

    h.service
        .update_location(
            &ctx,
            UserLocation {
                user_id: 42,
                latitude: 51.51,
                longitude: -0.13,
                city: "London".to_string(),
                region: String::new(),
                country: "GB".to_string(),
                updated_at: chrono::Utc::now(),
            },
        )
        .await
        .unwrap();
    assert_eq!(h.service.get_location(&ctx, 42).await.unwrap().city, "London");

    // Ada was seeded without a settings row, so the defaults get written back
    let settings = h.service.get_notification_settings(&ctx, 42).await.unwrap();
    assert!(settings.new_event_notification);
    assert_eq!(h.store.inner.get_notification_settings(&ctx, 42).await.unwrap(), settings);

    let full = h.service.get_user_with_preferences(&ctx, 42).await.unwrap();
    assert_eq!(full.user.rating, 4.0);
    assert!(full.preferences.is_empty());

    assert_eq!(h.monitor.cache_state().await, CircuitState::Open);
    assert_eq!(h.monitor.store_state().await, CircuitState::Closed);
}

#[tokio::test]
async fn test_cache_miss_repopulates_notification_settings() {
    let h = harness(5);
    let ctx = RequestContext::background();
    h.store
        .inner
        .update_notification_settings(
            &ctx,
            NotificationSettings {
                user_id: 42,
                new_event_notification: false,
            },
        )
        .await
        .unwrap();

    let settings = h.service.get_notification_settings(&ctx, 42).await.unwrap();
    assert!(!settings.new_event_notification);

    let cached = h
        .cache
        .written("user:42:notifications")
        .expect("settings were cached");
    let cached: NotificationSettings = serde_json::from_slice(&cached).unwrap();
    assert_eq!(cached, settings);
}

#[tokio::test]
async fn test_default_app_wiring() {
    let app = resilient_store::init_app(&AppConfig::default()).await.unwrap();
    let ctx = RequestContext::background();

    let user = app
        .service
        .create_user(
            &ctx,
            NewUser {
                telegram_id: 99,
                username: "ada".to_string(),
                bio: String::new(),
            },
        )
        .await
        .unwrap();

    app.service.add_preference(&ctx, user.id, 3).await.unwrap();
    let preferences = app.service.get_preferences(&ctx, user.id).await.unwrap();
    assert_eq!(preferences.len(), 1);
    assert_eq!(app.service.get_stats(&ctx, user.id).await.unwrap().user_id, user.id);
    assert!(app.service.health(&ctx).await.is_healthy());
}

#[tokio::test]
async fn test_memory_cache_behind_decorator() {
    let raw = Arc::new(MemoryCache::new(100));
    let monitor = Arc::new(HealthMonitor::new(
        &CircuitBreakerConfig::default(),
        Arc::new(InMemoryUserRepository::new()),
        raw.clone(),
    ));
    let cache = ResilientCache::new(raw, monitor);
    let ctx = RequestContext::background();

    assert!(cache.get(&ctx, "k").await.unwrap_err().is_absence());
    cache
        .set(&ctx, "k", Bytes::from_static(b"v"), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(cache.get(&ctx, "k").await.unwrap(), Bytes::from_static(b"v"));
}
