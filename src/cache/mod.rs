pub mod memory;
pub mod redis;
pub mod resilient;

pub use self::memory::MemoryCache;
pub use self::redis::RedisCache;
pub use self::resilient::ResilientCache;

use crate::config::{CacheBackend, CacheConfig};
use crate::context::RequestContext;
use crate::error::{Result, StoreError};
use crate::store::HealthProbe;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tracing::info;

/// Keyed blob cache with a TTL per entry
#[async_trait]
pub trait Cache: HealthProbe {
    /// Fetch a value; an absent key fails with [`StoreError::CacheMiss`]
    async fn get(&self, ctx: &RequestContext, key: &str) -> Result<Bytes>;

    /// Store a value; a zero `ttl` keeps it until it is deleted or evicted
    async fn set(&self, ctx: &RequestContext, key: &str, value: Bytes, ttl: Duration) -> Result<()>;

    /// Remove a key; removing an absent key is not an error
    async fn delete(&self, ctx: &RequestContext, key: &str) -> Result<()>;
}

/// Plain cache client selected by configuration
#[derive(Clone)]
pub enum CacheClient {
    Memory(MemoryCache),
    Redis(RedisCache),
}

#[async_trait]
impl HealthProbe for CacheClient {
    async fn ping(&self, ctx: &RequestContext) -> Result<()> {
        match self {
            CacheClient::Memory(cache) => cache.ping(ctx).await,
            CacheClient::Redis(cache) => cache.ping(ctx).await,
        }
    }
}

#[async_trait]
impl Cache for CacheClient {
    async fn get(&self, ctx: &RequestContext, key: &str) -> Result<Bytes> {
        match self {
            CacheClient::Memory(cache) => cache.get(ctx, key).await,
            CacheClient::Redis(cache) => cache.get(ctx, key).await,
        }
    }

    async fn set(&self, ctx: &RequestContext, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        match self {
            CacheClient::Memory(cache) => cache.set(ctx, key, value, ttl).await,
            CacheClient::Redis(cache) => cache.set(ctx, key, value, ttl).await,
        }
    }

    async fn delete(&self, ctx: &RequestContext, key: &str) -> Result<()> {
        match self {
            CacheClient::Memory(cache) => cache.delete(ctx, key).await,
            CacheClient::Redis(cache) => cache.delete(ctx, key).await,
        }
    }
}

/// Build the plain cache client selected by `config.backend`
pub async fn connect(config: &CacheConfig) -> Result<CacheClient> {
    match config.backend {
        CacheBackend::Memory => {
            info!(max_capacity = config.max_capacity, "Using in-memory cache");
            Ok(CacheClient::Memory(MemoryCache::new(config.max_capacity)))
        }
        CacheBackend::Redis => {
            let url = config.redis_url.as_deref().ok_or_else(|| {
                StoreError::Config("cache.redis_url is required for the redis backend".to_string())
            })?;
            info!("Using redis cache");
            Ok(CacheClient::Redis(RedisCache::connect(url).await?))
        }
    }
}
