pub mod user_cache;

pub use user_cache::UserCache;

use crate::context::RequestContext;
use crate::error::{Result, StoreError};
use crate::healthcheck::{HealthMonitor, HealthStatus};
use crate::store::{
    NewUser, NotificationSettings, User, UserLocation, UserPreference, UserRepository, UserStats,
    UserWithPreferences,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// User operations over the store with cache-aside reads.
///
/// The store is the source of truth. Cache failures only cost latency: reads
/// fall back to the store and cache writes are best effort.
pub struct UserService {
    repo: Arc<dyn UserRepository>,
    cache: UserCache,
    monitor: Arc<HealthMonitor>,
}

fn log_failure(action: &str, user_id: Option<u64>, err: &StoreError) {
    if err.is_absence() {
        debug!(action, user_id, error = %err, "Requested data does not exist");
    } else {
        error!(action, user_id, error = %err, "User operation failed");
    }
}

impl UserService {
    pub fn new(repo: Arc<dyn UserRepository>, cache: UserCache, monitor: Arc<HealthMonitor>) -> Self {
        Self {
            repo,
            cache,
            monitor,
        }
    }

    pub async fn create_user(&self, ctx: &RequestContext, new_user: NewUser) -> Result<User> {
        let telegram_id = new_user.telegram_id;
        let user = self.repo.create(ctx, new_user).await.map_err(|err| {
            log_failure("create_user", None, &err);
            err
        })?;

        self.cache_user(ctx, &user).await;

        info!(user_id = user.id, telegram_id, "User created");
        Ok(user)
    }

    /// Cache first, then the store; a store hit refreshes the cache
    pub async fn get_user(&self, ctx: &RequestContext, user_id: u64) -> Result<User> {
        match self.cache.get_user(ctx, user_id).await {
            Ok(user) => {
                debug!(user_id, "User served from cache");
                return Ok(user);
            }
            Err(err) => debug!(user_id, error = %err, "Cache lookup failed, reading from store"),
        }

        let user = self.repo.get_by_id(ctx, user_id).await.map_err(|err| {
            log_failure("get_user", Some(user_id), &err);
            err
        })?;

        self.touch(ctx, user_id).await;
        self.cache_user(ctx, &user).await;
        Ok(user)
    }

    pub async fn get_user_by_telegram_id(&self, ctx: &RequestContext, telegram_id: i64) -> Result<User> {
        let user = self
            .repo
            .get_by_telegram_id(ctx, telegram_id)
            .await
            .map_err(|err| {
                log_failure("get_user_by_telegram_id", None, &err);
                err
            })?;

        self.touch(ctx, user.id).await;
        self.cache_user(ctx, &user).await;
        Ok(user)
    }

    pub async fn update_user(
        &self,
        ctx: &RequestContext,
        user_id: u64,
        username: String,
        bio: String,
    ) -> Result<User> {
        let mut user = self.repo.get_by_id(ctx, user_id).await.map_err(|err| {
            log_failure("update_user", Some(user_id), &err);
            err
        })?;

        user.username = username;
        user.bio = bio;

        self.repo.update(ctx, &user).await.map_err(|err| {
            log_failure("update_user", Some(user_id), &err);
            err
        })?;

        self.touch(ctx, user_id).await;
        self.clear_cache(ctx, user_id).await;
        self.cache_user(ctx, &user).await;

        info!(user_id, "User updated");
        Ok(user)
    }

    pub async fn add_preference(&self, ctx: &RequestContext, user_id: u64, tag_id: u64) -> Result<()> {
        let preference = UserPreference {
            user_id,
            tag_id,
            created_at: Utc::now(),
        };

        self.repo.add_preference(ctx, preference).await.map_err(|err| {
            log_failure("add_preference", Some(user_id), &err);
            err
        })?;

        self.after_preferences_changed(ctx, user_id).await;
        info!(user_id, tag_id, "Preference added");
        Ok(())
    }

    pub async fn remove_preference(&self, ctx: &RequestContext, user_id: u64, tag_id: u64) -> Result<()> {
        self.repo
            .remove_preference(ctx, user_id, tag_id)
            .await
            .map_err(|err| {
                log_failure("remove_preference", Some(user_id), &err);
                err
            })?;

        self.after_preferences_changed(ctx, user_id).await;
        info!(user_id, tag_id, "Preference removed");
        Ok(())
    }

    /// Cache first, then the store; a store hit refreshes the cache
    pub async fn get_preferences(&self, ctx: &RequestContext, user_id: u64) -> Result<Vec<UserPreference>> {
        match self.cache.get_preferences(ctx, user_id).await {
            Ok(preferences) => {
                debug!(user_id, "Preferences served from cache");
                return Ok(preferences);
            }
            Err(err) => debug!(user_id, error = %err, "Cache lookup failed, reading from store"),
        }

        let preferences = self.repo.get_preferences(ctx, user_id).await.map_err(|err| {
            log_failure("get_preferences", Some(user_id), &err);
            err
        })?;

        self.cache_preferences(ctx, user_id, &preferences).await;
        Ok(preferences)
    }

    /// Profile and preferences together; served from cache only when both are cached
    pub async fn get_user_with_preferences(
        &self,
        ctx: &RequestContext,
        user_id: u64,
    ) -> Result<UserWithPreferences> {
        let cached = async {
            let user = self.cache.get_user(ctx, user_id).await?;
            let preferences = self.cache.get_preferences(ctx, user_id).await?;
            Ok::<_, StoreError>(UserWithPreferences { user, preferences })
        };
        match cached.await {
            Ok(full) => {
                debug!(user_id, "User with preferences served from cache");
                return Ok(full);
            }
            Err(err) => debug!(user_id, error = %err, "Cache lookup failed, reading from store"),
        }

        let full = self
            .repo
            .get_user_with_preferences(ctx, user_id)
            .await
            .map_err(|err| {
                log_failure("get_user_with_preferences", Some(user_id), &err);
                err
            })?;

        self.cache_user(ctx, &full.user).await;
        self.cache_preferences(ctx, user_id, &full.preferences).await;
        Ok(full)
    }

    /// Add `change` to the rating; the cached profile is replaced with the new value
    pub async fn update_rating(&self, ctx: &RequestContext, user_id: u64, change: f32) -> Result<User> {
        let user = self
            .repo
            .update_rating(ctx, user_id, change)
            .await
            .map_err(|err| {
                log_failure("update_rating", Some(user_id), &err);
                err
            })?;

        self.clear_cache(ctx, user_id).await;
        self.cache_user(ctx, &user).await;

        info!(user_id, rating_change = change, new_rating = user.rating, "User rating updated");
        Ok(user)
    }

    pub async fn get_stats(&self, ctx: &RequestContext, user_id: u64) -> Result<UserStats> {
        match self.cache.get_stats(ctx, user_id).await {
            Ok(stats) => {
                debug!(user_id, "Stats served from cache");
                return Ok(stats);
            }
            Err(err) => debug!(user_id, error = %err, "Cache lookup failed, reading from store"),
        }

        let stats = self.repo.get_stats(ctx, user_id).await.map_err(|err| {
            log_failure("get_stats", Some(user_id), &err);
            err
        })?;

        if let Err(err) = self.cache.set_stats(ctx, &stats).await {
            warn!(user_id, error = %err, "Failed to cache user stats");
        }
        Ok(stats)
    }

    pub async fn update_location(&self, ctx: &RequestContext, location: UserLocation) -> Result<()> {
        let user_id = location.user_id;
        self.repo
            .update_location(ctx, location.clone())
            .await
            .map_err(|err| {
                log_failure("update_location", Some(user_id), &err);
                err
            })?;

        self.touch(ctx, user_id).await;
        if let Err(err) = self.cache.set_location(ctx, &location).await {
            warn!(user_id, error = %err, "Failed to cache location");
        }

        info!(
            user_id,
            lat = location.latitude,
            lon = location.longitude,
            "Location updated"
        );
        Ok(())
    }

    pub async fn get_location(&self, ctx: &RequestContext, user_id: u64) -> Result<UserLocation> {
        match self.cache.get_location(ctx, user_id).await {
            Ok(location) => {
                debug!(user_id, "Location served from cache");
                return Ok(location);
            }
            Err(err) => debug!(user_id, error = %err, "Cache lookup failed, reading from store"),
        }

        let location = self.repo.get_location(ctx, user_id).await.map_err(|err| {
            log_failure("get_location", Some(user_id), &err);
            err
        })?;

        if let Err(err) = self.cache.set_location(ctx, &location).await {
            warn!(user_id, error = %err, "Failed to cache location");
        }
        Ok(location)
    }

    /// Cache first, then the store; users without stored settings get the defaults written back
    pub async fn get_notification_settings(
        &self,
        ctx: &RequestContext,
        user_id: u64,
    ) -> Result<NotificationSettings> {
        match self.cache.get_notification_settings(ctx, user_id).await {
            Ok(settings) => {
                debug!(user_id, "Notification settings served from cache");
                return Ok(settings);
            }
            Err(err) => debug!(user_id, error = %err, "Cache lookup failed, reading from store"),
        }

        let settings = match self.repo.get_notification_settings(ctx, user_id).await {
            Ok(settings) => settings,
            Err(err) if err.is_absence() => {
                let defaults = NotificationSettings::enabled(user_id);
                self.repo
                    .update_notification_settings(ctx, defaults.clone())
                    .await
                    .map_err(|err| {
                        log_failure("create_notification_settings", Some(user_id), &err);
                        err
                    })?;
                defaults
            }
            Err(err) => {
                log_failure("get_notification_settings", Some(user_id), &err);
                return Err(err);
            }
        };

        self.cache_notification_settings(ctx, &settings).await;
        Ok(settings)
    }

    pub async fn update_notification_settings(
        &self,
        ctx: &RequestContext,
        user_id: u64,
        new_event_notification: bool,
    ) -> Result<NotificationSettings> {
        let settings = NotificationSettings {
            user_id,
            new_event_notification,
        };

        self.repo
            .update_notification_settings(ctx, settings.clone())
            .await
            .map_err(|err| {
                log_failure("update_notification_settings", Some(user_id), &err);
                err
            })?;

        self.touch(ctx, user_id).await;
        self.cache_notification_settings(ctx, &settings).await;

        info!(user_id, new_event_notification, "Notification settings updated");
        Ok(settings)
    }

    pub async fn health(&self, ctx: &RequestContext) -> HealthStatus {
        self.monitor.status(ctx).await
    }

    async fn after_preferences_changed(&self, ctx: &RequestContext, user_id: u64) {
        self.touch(ctx, user_id).await;
        self.clear_cache(ctx, user_id).await;

        match self.repo.get_preferences(ctx, user_id).await {
            Ok(preferences) => self.cache_preferences(ctx, user_id, &preferences).await,
            Err(err) => warn!(user_id, error = %err, "Failed to reload preferences"),
        }
    }

    async fn touch(&self, ctx: &RequestContext, user_id: u64) {
        if let Err(err) = self.repo.update_last_active(ctx, user_id).await {
            warn!(user_id, error = %err, "Failed to update last active time");
        }
    }

    async fn cache_user(&self, ctx: &RequestContext, user: &User) {
        if let Err(err) = self.cache.set_user(ctx, user).await {
            warn!(user_id = user.id, error = %err, "Failed to cache user");
        }
    }

    async fn cache_preferences(&self, ctx: &RequestContext, user_id: u64, preferences: &[UserPreference]) {
        if let Err(err) = self.cache.set_preferences(ctx, user_id, preferences).await {
            warn!(user_id, error = %err, "Failed to cache preferences");
        }
    }

    async fn cache_notification_settings(&self, ctx: &RequestContext, settings: &NotificationSettings) {
        if let Err(err) = self.cache.set_notification_settings(ctx, settings).await {
            warn!(user_id = settings.user_id, error = %err, "Failed to cache notification settings");
        }
    }

    async fn clear_cache(&self, ctx: &RequestContext, user_id: u64) {
        if let Err(err) = self.cache.clear_user(ctx, user_id).await {
            warn!(user_id, error = %err, "Failed to clear user cache");
        }
    }
}
