use super::Cache;
use crate::context::RequestContext;
use crate::error::{Result, StoreError};
use crate::store::HealthProbe;
use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::{debug, info};

/// Cache client over a shared redis connection
#[derive(Clone)]
pub struct RedisCache {
    connection: ConnectionManager,
}

impl RedisCache {
    /// Open a managed connection to `redis_url`
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::Config(format!("Invalid redis URL: {}", e)))?;
        let connection = ConnectionManager::new(client).await?;

        info!("Connected to redis cache");
        Ok(Self { connection })
    }

    pub fn from_connection(connection: ConnectionManager) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl HealthProbe for RedisCache {
    async fn ping(&self, _ctx: &RequestContext) -> Result<()> {
        let mut conn = self.connection.clone();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, _ctx: &RequestContext, key: &str) -> Result<Bytes> {
        let mut conn = self.connection.clone();
        let value = redis::cmd("GET")
            .arg(key)
            .query_async::<_, Option<Vec<u8>>>(&mut conn)
            .await?;

        value
            .map(Bytes::from)
            .ok_or_else(|| StoreError::CacheMiss(key.to_string()))
    }

    async fn set(&self, _ctx: &RequestContext, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        let mut conn = self.connection.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value.as_ref());
        // A zero TTL stores the key without expiry
        if !ttl.is_zero() {
            cmd.arg("PX").arg((ttl.as_millis() as u64).max(1));
        }
        cmd.query_async::<_, ()>(&mut conn).await?;

        debug!(key, ttl_ms = ttl.as_millis() as u64, "Cached value in redis");
        Ok(())
    }

    async fn delete(&self, _ctx: &RequestContext, key: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        redis::cmd("DEL").arg(key).query_async::<_, i64>(&mut conn).await?;
        Ok(())
    }
}
