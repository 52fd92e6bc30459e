use crate::circuit_breaker::{CircuitBreakerConfig, RetryConfig, RetryPolicy};
use crate::error::{ErrorKind, Result, StoreError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Shared breaker settings for the store and cache breakers
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    /// Base retry settings; decorators narrow these per call site
    #[serde(default)]
    pub retry: RetryConfig,
    /// Durable store settings
    #[serde(default)]
    pub store: StoreConfig,
    /// Cache settings
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Durable store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Default deadline for reads in milliseconds
    #[serde(default = "default_store_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Default deadline for writes in milliseconds
    #[serde(default = "default_store_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// Deadline for the health probe in milliseconds
    #[serde(default = "default_store_health_timeout_ms")]
    pub health_timeout_ms: u64,
    /// Retries for idempotent reads
    #[serde(default = "default_store_read_retries")]
    pub read_retries: u32,
}

/// Cache backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Memory,
    Redis,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Default deadline for reads in milliseconds
    #[serde(default = "default_cache_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Default deadline for writes and deletes in milliseconds
    #[serde(default = "default_cache_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// Deadline for the health probe in milliseconds
    #[serde(default = "default_cache_health_timeout_ms")]
    pub health_timeout_ms: u64,
    /// Retries for reads
    #[serde(default = "default_cache_read_retries")]
    pub read_retries: u32,
    /// Fixed backoff between read retries in milliseconds
    #[serde(default = "default_cache_read_backoff_ms")]
    pub read_backoff_ms: u64,
    /// Which cache implementation to use
    #[serde(default = "default_cache_backend")]
    pub backend: CacheBackend,
    /// Redis connection URL, required for the redis backend
    #[serde(default)]
    pub redis_url: Option<String>,
    /// Maximum number of entries for the in-memory backend
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u64,
    /// TTL for cached user profiles in seconds
    #[serde(default = "default_profile_ttl_secs")]
    pub profile_ttl_secs: u64,
    /// TTL for cached user preferences in seconds
    #[serde(default = "default_preferences_ttl_secs")]
    pub preferences_ttl_secs: u64,
    #[serde(default = "default_stats_ttl_secs")]
    pub stats_ttl_secs: u64,
    #[serde(default = "default_location_ttl_secs")]
    pub location_ttl_secs: u64,
    /// TTL for cached notification settings in seconds
    #[serde(default = "default_notifications_ttl_secs")]
    pub notifications_ttl_secs: u64,
}

fn default_store_read_timeout_ms() -> u64 {
    3000
}

fn default_store_write_timeout_ms() -> u64 {
    5000
}

fn default_store_health_timeout_ms() -> u64 {
    2000
}

fn default_store_read_retries() -> u32 {
    2
}

fn default_cache_read_timeout_ms() -> u64 {
    200
}

fn default_cache_write_timeout_ms() -> u64 {
    1000
}

fn default_cache_health_timeout_ms() -> u64 {
    1000
}

fn default_cache_read_retries() -> u32 {
    1
}

fn default_cache_read_backoff_ms() -> u64 {
    50
}

fn default_cache_backend() -> CacheBackend {
    CacheBackend::Memory
}

fn default_max_capacity() -> u64 {
    10_000
}

fn default_profile_ttl_secs() -> u64 {
    1800 // 30 minutes
}

fn default_preferences_ttl_secs() -> u64 {
    3600
}

fn default_stats_ttl_secs() -> u64 {
    43200
}

fn default_location_ttl_secs() -> u64 {
    86400
}

fn default_notifications_ttl_secs() -> u64 {
    1800
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: default_store_read_timeout_ms(),
            write_timeout_ms: default_store_write_timeout_ms(),
            health_timeout_ms: default_store_health_timeout_ms(),
            read_retries: default_store_read_retries(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: default_cache_read_timeout_ms(),
            write_timeout_ms: default_cache_write_timeout_ms(),
            health_timeout_ms: default_cache_health_timeout_ms(),
            read_retries: default_cache_read_retries(),
            read_backoff_ms: default_cache_read_backoff_ms(),
            backend: default_cache_backend(),
            redis_url: None,
            max_capacity: default_max_capacity(),
            profile_ttl_secs: default_profile_ttl_secs(),
            preferences_ttl_secs: default_preferences_ttl_secs(),
            stats_ttl_secs: default_stats_ttl_secs(),
            location_ttl_secs: default_location_ttl_secs(),
            notifications_ttl_secs: default_notifications_ttl_secs(),
        }
    }
}

impl StoreConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    /// Retry policy for idempotent reads: transient errors only
    pub fn read_retry_policy(&self, base: &RetryConfig) -> RetryPolicy {
        RetryPolicy::from(base)
            .with_max_retries(self.read_retries)
            .with_retryable([ErrorKind::Transient])
    }
}

impl CacheConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    pub fn profile_ttl(&self) -> Duration {
        Duration::from_secs(self.profile_ttl_secs)
    }

    pub fn preferences_ttl(&self) -> Duration {
        Duration::from_secs(self.preferences_ttl_secs)
    }

    pub fn stats_ttl(&self) -> Duration {
        Duration::from_secs(self.stats_ttl_secs)
    }

    pub fn location_ttl(&self) -> Duration {
        Duration::from_secs(self.location_ttl_secs)
    }

    pub fn notifications_ttl(&self) -> Duration {
        Duration::from_secs(self.notifications_ttl_secs)
    }

    /// Retry policy for reads: one quick retry with a small fixed backoff
    pub fn read_retry_policy(&self) -> RetryPolicy {
        let backoff = Duration::from_millis(self.read_backoff_ms);
        RetryPolicy::default()
            .with_max_retries(self.read_retries)
            .with_backoff(backoff, backoff)
            .with_backoff_factor(1.0)
            .with_jitter(0.0)
            .with_retryable([ErrorKind::Transient])
    }
}

impl AppConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| StoreError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(StoreError::Config(
                "Circuit breaker failure_threshold must be > 0".to_string(),
            ));
        }
        if self.circuit_breaker.reset_timeout_ms == 0 {
            return Err(StoreError::Config(
                "Circuit breaker reset_timeout_ms must be > 0".to_string(),
            ));
        }

        let retry = &self.retry;
        if retry.backoff_multiplier < 1.0 {
            return Err(StoreError::Config(format!(
                "Retry backoff_multiplier must be >= 1.0, got {}",
                retry.backoff_multiplier
            )));
        }
        if !(0.0..=1.0).contains(&retry.jitter) {
            return Err(StoreError::Config(format!(
                "Retry jitter must be within [0, 1], got {}",
                retry.jitter
            )));
        }
        if retry.max_backoff_ms < retry.initial_backoff_ms {
            return Err(StoreError::Config(
                "Retry max_backoff_ms must be >= initial_backoff_ms".to_string(),
            ));
        }

        let timeouts = [
            ("store.read_timeout_ms", self.store.read_timeout_ms),
            ("store.write_timeout_ms", self.store.write_timeout_ms),
            ("store.health_timeout_ms", self.store.health_timeout_ms),
            ("cache.read_timeout_ms", self.cache.read_timeout_ms),
            ("cache.write_timeout_ms", self.cache.write_timeout_ms),
            ("cache.health_timeout_ms", self.cache.health_timeout_ms),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(StoreError::Config(format!("{} must be > 0", name)));
            }
        }

        if self.cache.backend == CacheBackend::Redis
            && self.cache.redis_url.as_deref().map_or(true, str::is_empty)
        {
            return Err(StoreError::Config(
                "cache.redis_url is required for the redis backend".to_string(),
            ));
        }

        Ok(())
    }
}
