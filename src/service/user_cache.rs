use crate::cache::Cache;
use crate::config::CacheConfig;
use crate::context::RequestContext;
use crate::error::Result;
use crate::store::{NotificationSettings, User, UserLocation, UserPreference, UserStats};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

pub fn profile_key(user_id: u64) -> String {
    format!("user:{}:profile", user_id)
}

pub fn preferences_key(user_id: u64) -> String {
    format!("user:{}:preferences", user_id)
}

pub fn stats_key(user_id: u64) -> String {
    format!("user:{}:stats", user_id)
}

pub fn location_key(user_id: u64) -> String {
    format!("user:{}:location", user_id)
}

pub fn notifications_key(user_id: u64) -> String {
    format!("user:{}:notifications", user_id)
}

/// Every key cached for one user
pub fn user_keys(user_id: u64) -> [String; 5] {
    [
        profile_key(user_id),
        preferences_key(user_id),
        stats_key(user_id),
        location_key(user_id),
        notifications_key(user_id),
    ]
}

/// Typed JSON view over a blob cache
#[derive(Clone)]
pub struct UserCache {
    cache: Arc<dyn Cache>,
    profile_ttl: Duration,
    preferences_ttl: Duration,
    stats_ttl: Duration,
    location_ttl: Duration,
    notifications_ttl: Duration,
}

impl UserCache {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self::from_config(cache, &CacheConfig::default())
    }

    pub fn from_config(cache: Arc<dyn Cache>, config: &CacheConfig) -> Self {
        Self {
            cache,
            profile_ttl: config.profile_ttl(),
            preferences_ttl: config.preferences_ttl(),
            stats_ttl: config.stats_ttl(),
            location_ttl: config.location_ttl(),
            notifications_ttl: config.notifications_ttl(),
        }
    }

    pub async fn get_user(&self, ctx: &RequestContext, user_id: u64) -> Result<User> {
        self.get_json(ctx, &profile_key(user_id)).await
    }

    pub async fn set_user(&self, ctx: &RequestContext, user: &User) -> Result<()> {
        self.set_json(ctx, &profile_key(user.id), user, self.profile_ttl)
            .await
    }

    pub async fn delete_user(&self, ctx: &RequestContext, user_id: u64) -> Result<()> {
        self.cache.delete(ctx, &profile_key(user_id)).await
    }

    pub async fn get_preferences(
        &self,
        ctx: &RequestContext,
        user_id: u64,
    ) -> Result<Vec<UserPreference>> {
        self.get_json(ctx, &preferences_key(user_id)).await
    }

    pub async fn set_preferences(
        &self,
        ctx: &RequestContext,
        user_id: u64,
        preferences: &[UserPreference],
    ) -> Result<()> {
        self.set_json(ctx, &preferences_key(user_id), preferences, self.preferences_ttl)
            .await
    }

    pub async fn get_stats(&self, ctx: &RequestContext, user_id: u64) -> Result<UserStats> {
        self.get_json(ctx, &stats_key(user_id)).await
    }

    pub async fn set_stats(&self, ctx: &RequestContext, stats: &UserStats) -> Result<()> {
        self.set_json(ctx, &stats_key(stats.user_id), stats, self.stats_ttl)
            .await
    }

    pub async fn get_location(&self, ctx: &RequestContext, user_id: u64) -> Result<UserLocation> {
        self.get_json(ctx, &location_key(user_id)).await
    }

    pub async fn set_location(&self, ctx: &RequestContext, location: &UserLocation) -> Result<()> {
        self.set_json(ctx, &location_key(location.user_id), location, self.location_ttl)
            .await
    }

    pub async fn get_notification_settings(
        &self,
        ctx: &RequestContext,
        user_id: u64,
    ) -> Result<NotificationSettings> {
        self.get_json(ctx, &notifications_key(user_id)).await
    }

    pub async fn set_notification_settings(
        &self,
        ctx: &RequestContext,
        settings: &NotificationSettings,
    ) -> Result<()> {
        self.set_json(
            ctx,
            &notifications_key(settings.user_id),
            settings,
            self.notifications_ttl,
        )
        .await
    }

    /// Drop every cached entry of one user.
    ///
    /// All keys are attempted; the first failure is returned.
    pub async fn clear_user(&self, ctx: &RequestContext, user_id: u64) -> Result<()> {
        let mut first_error = None;
        for key in user_keys(user_id) {
            if let Err(err) = self.cache.delete(ctx, &key).await {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn get_json<T: DeserializeOwned>(&self, ctx: &RequestContext, key: &str) -> Result<T> {
        let raw = self.cache.get(ctx, key).await?;
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn set_json<T: Serialize + ?Sized>(
        &self,
        ctx: &RequestContext,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<()> {
        let raw = serde_json::to_vec(value)?;
        self.cache.set(ctx, key, Bytes::from(raw), ttl).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::error::StoreError;
    use chrono::Utc;

    fn user(id: u64) -> User {
        User {
            id,
            telegram_id: 500 + id as i64,
            username: "ada".to_string(),
            bio: "analyst".to_string(),
            rating: 4.5,
            last_active_at: Some(Utc::now()),
        }
    }

    #[test]
    fn test_keys() {
        assert_eq!(profile_key(42), "user:42:profile");
        assert_eq!(preferences_key(42), "user:42:preferences");
        assert_eq!(stats_key(42), "user:42:stats");
        assert_eq!(location_key(42), "user:42:location");
        assert_eq!(notifications_key(42), "user:42:notifications");
    }

    #[tokio::test]
    async fn test_profile_roundtrip_and_clear() {
        let raw = Arc::new(MemoryCache::new(100));
        let cache = UserCache::new(raw.clone());
        let ctx = RequestContext::background();

        assert!(cache.get_user(&ctx, 1).await.unwrap_err().is_absence());

        let stored = user(1);
        cache.set_user(&ctx, &stored).await.unwrap();
        cache
            .set_preferences(
                &ctx,
                1,
                &[UserPreference {
                    user_id: 1,
                    tag_id: 9,
                    created_at: Utc::now(),
                }],
            )
            .await
            .unwrap();

        assert_eq!(cache.get_user(&ctx, 1).await.unwrap(), stored);
        assert_eq!(cache.get_preferences(&ctx, 1).await.unwrap()[0].tag_id, 9);

        cache.clear_user(&ctx, 1).await.unwrap();
        assert!(cache.get_user(&ctx, 1).await.is_err());
        assert!(cache.get_preferences(&ctx, 1).await.is_err());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_serialization_error() {
        let raw = Arc::new(MemoryCache::new(100));
        let cache = UserCache::new(raw.clone());
        let ctx = RequestContext::background();

        raw.set(&ctx, &profile_key(3), Bytes::from_static(b"not json"), Duration::from_secs(60))
            .await
            .unwrap();

        assert!(matches!(
            cache.get_user(&ctx, 3).await,
            Err(StoreError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_clear_user_drops_every_key() {
        let raw = Arc::new(MemoryCache::new(100));
        let cache = UserCache::new(raw.clone());
        let ctx = RequestContext::background();

        cache.set_user(&ctx, &user(2)).await.unwrap();
        cache
            .set_stats(&ctx, &UserStats::new(2, Utc::now()))
            .await
            .unwrap();
        cache
            .set_location(
                &ctx,
                &UserLocation {
                    user_id: 2,
                    latitude: 48.85,
                    longitude: 2.35,
                    city: "Paris".to_string(),
                    region: String::new(),
                    country: "FR".to_string(),
                    updated_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        cache
            .set_notification_settings(&ctx, &NotificationSettings::enabled(2))
            .await
            .unwrap();

        assert_eq!(cache.get_location(&ctx, 2).await.unwrap().city, "Paris");
        assert_eq!(cache.get_stats(&ctx, 2).await.unwrap().user_id, 2);
        assert!(cache
            .get_notification_settings(&ctx, 2)
            .await
            .unwrap()
            .new_event_notification);

        cache.clear_user(&ctx, 2).await.unwrap();
        for key in user_keys(2) {
            assert!(raw.get(&ctx, &key).await.unwrap_err().is_absence(), "{} survived", key);
        }
    }
}
