pub mod memory;
pub mod resilient;

pub use memory::InMemoryUserRepository;
pub use resilient::ResilientUserRepository;

use crate::context::RequestContext;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user profile as persisted by the durable store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub telegram_id: i64,
    pub username: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub rating: f32,
    #[serde(default)]
    pub last_active_at: Option<DateTime<Utc>>,
}

/// Fields supplied when creating a user; the store assigns the id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUser {
    pub telegram_id: i64,
    pub username: String,
    #[serde(default)]
    pub bio: String,
}

/// A tag the user is interested in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPreference {
    pub user_id: u64,
    pub tag_id: u64,
    pub created_at: DateTime<Utc>,
}

/// Activity counters kept alongside every user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    pub user_id: u64,
    #[serde(default)]
    pub events_created: u32,
    #[serde(default)]
    pub events_participated: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_active_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl UserStats {
    /// Fresh counters for a user created at `now`
    pub fn new(user_id: u64, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            events_created: 0,
            events_participated: 0,
            created_at: now,
            updated_at: now,
            last_active_at: None,
            is_active: true,
        }
    }
}

/// Last reported position of a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserLocation {
    pub user_id: u64,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub country: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationSettings {
    pub user_id: u64,
    pub new_event_notification: bool,
}

impl NotificationSettings {
    /// Settings a new user starts with: every notification enabled
    pub fn enabled(user_id: u64) -> Self {
        Self {
            user_id,
            new_event_notification: true,
        }
    }
}

/// A user together with their tag preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserWithPreferences {
    #[serde(flatten)]
    pub user: User,
    #[serde(default)]
    pub preferences: Vec<UserPreference>,
}

/// Minimal liveness check every dependency adapter provides
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Succeeds when the dependency answers a trivial request
    async fn ping(&self, ctx: &RequestContext) -> Result<()>;
}

/// Plain user repository over the durable store.
///
/// Lookups of missing rows fail with [`StoreError::NotFound`](crate::error::StoreError::NotFound).
#[async_trait]
pub trait UserRepository: HealthProbe {
    /// Persist a new user with default stats and notification settings
    async fn create(&self, ctx: &RequestContext, user: NewUser) -> Result<User>;

    async fn get_by_id(&self, ctx: &RequestContext, id: u64) -> Result<User>;

    async fn get_by_telegram_id(&self, ctx: &RequestContext, telegram_id: i64) -> Result<User>;

    /// Overwrite an existing user
    async fn update(&self, ctx: &RequestContext, user: &User) -> Result<()>;

    /// Add `change` to the user's rating and return the updated user
    async fn update_rating(&self, ctx: &RequestContext, id: u64, change: f32) -> Result<User>;

    async fn update_last_active(&self, ctx: &RequestContext, id: u64) -> Result<()>;

    async fn delete(&self, ctx: &RequestContext, id: u64) -> Result<()>;

    async fn add_preference(&self, ctx: &RequestContext, preference: UserPreference) -> Result<()>;

    async fn remove_preference(&self, ctx: &RequestContext, user_id: u64, tag_id: u64) -> Result<()>;

    async fn get_preferences(&self, ctx: &RequestContext, user_id: u64) -> Result<Vec<UserPreference>>;

    async fn get_user_with_preferences(&self, ctx: &RequestContext, id: u64) -> Result<UserWithPreferences>;

    async fn get_stats(&self, ctx: &RequestContext, user_id: u64) -> Result<UserStats>;

    async fn update_stats(&self, ctx: &RequestContext, stats: &UserStats) -> Result<()>;

    async fn get_location(&self, ctx: &RequestContext, user_id: u64) -> Result<UserLocation>;

    /// Insert or replace the user's location
    async fn update_location(&self, ctx: &RequestContext, location: UserLocation) -> Result<()>;

    async fn get_notification_settings(&self, ctx: &RequestContext, user_id: u64) -> Result<NotificationSettings>;

    /// Insert or replace the user's notification settings
    async fn update_notification_settings(&self, ctx: &RequestContext, settings: NotificationSettings) -> Result<()>;
}
