use super::{
    HealthProbe, NewUser, NotificationSettings, User, UserLocation, UserPreference, UserRepository,
    UserStats, UserWithPreferences,
};
use crate::context::RequestContext;
use crate::error::{Result, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// In-process user store backed by concurrent maps
#[derive(Debug)]
pub struct InMemoryUserRepository {
    users: DashMap<u64, User>,
    /// telegram id -> user id
    telegram_index: DashMap<i64, u64>,
    preferences: DashMap<u64, Vec<UserPreference>>,
    stats: DashMap<u64, UserStats>,
    locations: DashMap<u64, UserLocation>,
    notifications: DashMap<u64, NotificationSettings>,
    next_id: AtomicU64,
}

impl Default for InMemoryUserRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            telegram_index: DashMap::new(),
            preferences: DashMap::new(),
            stats: DashMap::new(),
            locations: DashMap::new(),
            notifications: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Insert a fully formed user, keeping its id.
    ///
    /// Unlike [`create`](UserRepository::create) no stats or settings rows are added.
    pub fn insert(&self, user: User) {
        self.next_id.fetch_max(user.id + 1, Ordering::SeqCst);
        self.telegram_index.insert(user.telegram_id, user.id);
        self.users.insert(user.id, user);
    }

    /// Rows every user owns besides the profile itself
    fn seed_companions(&self, user_id: u64) {
        self.stats
            .entry(user_id)
            .or_insert_with(|| UserStats::new(user_id, Utc::now()));
        self.notifications
            .entry(user_id)
            .or_insert_with(|| NotificationSettings::enabled(user_id));
    }

    fn ensure_user(&self, user_id: u64) -> Result<()> {
        if self.users.contains_key(&user_id) {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("user {}", user_id)))
        }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl HealthProbe for InMemoryUserRepository {
    async fn ping(&self, _ctx: &RequestContext) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn create(&self, _ctx: &RequestContext, user: NewUser) -> Result<User> {
        let id = match self.telegram_index.entry(user.telegram_id) {
            Entry::Occupied(_) => {
                return Err(StoreError::Conflict(format!(
                    "user with telegram id {} already exists",
                    user.telegram_id
                )));
            }
            Entry::Vacant(slot) => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                slot.insert(id);
                id
            }
        };

        let created = User {
            id,
            telegram_id: user.telegram_id,
            username: user.username,
            bio: user.bio,
            rating: 0.0,
            last_active_at: None,
        };
        self.seed_companions(id);
        self.users.insert(id, created.clone());

        debug!(user_id = id, "Stored new user");
        Ok(created)
    }

    async fn get_by_id(&self, _ctx: &RequestContext, id: u64) -> Result<User> {
        self.users
            .get(&id)
            .map(|user| user.clone())
            .ok_or_else(|| StoreError::NotFound(format!("user {}", id)))
    }

    async fn get_by_telegram_id(&self, ctx: &RequestContext, telegram_id: i64) -> Result<User> {
        let id = self
            .telegram_index
            .get(&telegram_id)
            .map(|id| *id)
            .ok_or_else(|| StoreError::NotFound(format!("user with telegram id {}", telegram_id)))?;
        self.get_by_id(ctx, id).await
    }

    async fn update(&self, _ctx: &RequestContext, user: &User) -> Result<()> {
        let mut existing = self
            .users
            .get_mut(&user.id)
            .ok_or_else(|| StoreError::NotFound(format!("user {}", user.id)))?;

        if existing.telegram_id != user.telegram_id {
            if let Some(owner) = self.telegram_index.get(&user.telegram_id) {
                if *owner != user.id {
                    return Err(StoreError::Conflict(format!(
                        "telegram id {} belongs to user {}",
                        user.telegram_id, *owner
                    )));
                }
            }
            self.telegram_index.remove(&existing.telegram_id);
            self.telegram_index.insert(user.telegram_id, user.id);
        }

        *existing = user.clone();
        Ok(())
    }

    async fn update_rating(&self, _ctx: &RequestContext, id: u64, change: f32) -> Result<User> {
        let mut user = self
            .users
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("user {}", id)))?;
        user.rating += change;
        Ok(user.clone())
    }

    async fn update_last_active(&self, _ctx: &RequestContext, id: u64) -> Result<()> {
        let now = Utc::now();
        {
            let mut user = self
                .users
                .get_mut(&id)
                .ok_or_else(|| StoreError::NotFound(format!("user {}", id)))?;
            user.last_active_at = Some(now);
        }
        if let Some(mut stats) = self.stats.get_mut(&id) {
            stats.last_active_at = Some(now);
            stats.updated_at = now;
        }
        Ok(())
    }

    async fn delete(&self, _ctx: &RequestContext, id: u64) -> Result<()> {
        let (_, user) = self
            .users
            .remove(&id)
            .ok_or_else(|| StoreError::NotFound(format!("user {}", id)))?;
        self.telegram_index.remove(&user.telegram_id);
        self.preferences.remove(&id);
        self.stats.remove(&id);
        self.locations.remove(&id);
        self.notifications.remove(&id);
        Ok(())
    }

    async fn add_preference(&self, _ctx: &RequestContext, preference: UserPreference) -> Result<()> {
        self.ensure_user(preference.user_id)?;

        let mut list = self.preferences.entry(preference.user_id).or_default();
        if list.iter().any(|p| p.tag_id == preference.tag_id) {
            return Err(StoreError::Conflict(format!(
                "user {} already has tag {}",
                preference.user_id, preference.tag_id
            )));
        }
        list.push(preference);
        Ok(())
    }

    async fn remove_preference(&self, _ctx: &RequestContext, user_id: u64, tag_id: u64) -> Result<()> {
        let mut list = self
            .preferences
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::NotFound(format!("preferences of user {}", user_id)))?;

        let before = list.len();
        list.retain(|p| p.tag_id != tag_id);
        if list.len() == before {
            return Err(StoreError::NotFound(format!(
                "tag {} for user {}",
                tag_id, user_id
            )));
        }
        Ok(())
    }

    async fn get_preferences(&self, _ctx: &RequestContext, user_id: u64) -> Result<Vec<UserPreference>> {
        self.ensure_user(user_id)?;
        Ok(self
            .preferences
            .get(&user_id)
            .map(|list| list.clone())
            .unwrap_or_default())
    }

    async fn get_user_with_preferences(&self, ctx: &RequestContext, id: u64) -> Result<UserWithPreferences> {
        let user = self.get_by_id(ctx, id).await?;
        let preferences = self.get_preferences(ctx, id).await?;
        Ok(UserWithPreferences { user, preferences })
    }

    async fn get_stats(&self, _ctx: &RequestContext, user_id: u64) -> Result<UserStats> {
        self.stats
            .get(&user_id)
            .map(|stats| stats.clone())
            .ok_or_else(|| StoreError::NotFound(format!("stats of user {}", user_id)))
    }

    async fn update_stats(&self, _ctx: &RequestContext, stats: &UserStats) -> Result<()> {
        self.ensure_user(stats.user_id)?;
        let mut stored = stats.clone();
        stored.updated_at = Utc::now();
        self.stats.insert(stats.user_id, stored);
        Ok(())
    }

    async fn get_location(&self, _ctx: &RequestContext, user_id: u64) -> Result<UserLocation> {
        self.locations
            .get(&user_id)
            .map(|location| location.clone())
            .ok_or_else(|| StoreError::NotFound(format!("location of user {}", user_id)))
    }

    async fn update_location(&self, _ctx: &RequestContext, location: UserLocation) -> Result<()> {
        self.ensure_user(location.user_id)?;
        debug!(user_id = location.user_id, "Stored user location");
        self.locations.insert(location.user_id, location);
        Ok(())
    }

    async fn get_notification_settings(&self, _ctx: &RequestContext, user_id: u64) -> Result<NotificationSettings> {
        self.notifications
            .get(&user_id)
            .map(|settings| settings.clone())
            .ok_or_else(|| StoreError::NotFound(format!("notification settings of user {}", user_id)))
    }

    async fn update_notification_settings(
        &self,
        _ctx: &RequestContext,
        settings: NotificationSettings,
    ) -> Result<()> {
        self.ensure_user(settings.user_id)?;
        self.notifications.insert(settings.user_id, settings);
        Ok(())
    }
}
