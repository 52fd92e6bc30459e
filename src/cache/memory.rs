use super::Cache;
use crate::context::RequestContext;
use crate::error::{Result, StoreError};
use crate::store::HealthProbe;
use async_trait::async_trait;
use bytes::Bytes;
use moka::future::Cache as MokaCache;
use moka::Expiry;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Clone, Debug)]
struct Entry {
    value: Bytes,
    ttl: Duration,
}

/// Expires every entry after the TTL it was written with; a zero TTL never expires
struct EntryTtl;

impl Entry {
    fn expiry(&self) -> Option<Duration> {
        (!self.ttl.is_zero()).then_some(self.ttl)
    }
}

impl Expiry<String, Entry> for EntryTtl {
    fn expire_after_create(&self, _key: &String, entry: &Entry, _created_at: Instant) -> Option<Duration> {
        entry.expiry()
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        entry.expiry()
    }
}

/// In-process cache backed by moka
#[derive(Clone)]
pub struct MemoryCache {
    entries: MokaCache<String, Entry>,
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("entry_count", &self.entries.entry_count())
            .finish()
    }
}

impl MemoryCache {
    pub fn new(max_capacity: u64) -> Self {
        let entries = MokaCache::builder()
            .max_capacity(max_capacity)
            .expire_after(EntryTtl)
            .build();

        Self { entries }
    }

    /// Approximate number of live entries
    pub fn entry_count(&self) -> u64 {
        self.entries.entry_count()
    }
}

#[async_trait]
impl HealthProbe for MemoryCache {
    async fn ping(&self, _ctx: &RequestContext) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, _ctx: &RequestContext, key: &str) -> Result<Bytes> {
        match self.entries.get(key).await {
            Some(entry) => Ok(entry.value),
            None => Err(StoreError::CacheMiss(key.to_string())),
        }
    }

    async fn set(&self, _ctx: &RequestContext, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        self.entries.insert(key.to_string(), Entry { value, ttl }).await;
        debug!(key, ttl_secs = ttl.as_secs(), "Cached value");
        Ok(())
    }

    async fn delete(&self, _ctx: &RequestContext, key: &str) -> Result<()> {
        self.entries.invalidate(key).await;
        Ok(())
    }
}
