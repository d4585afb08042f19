//! Redis cache driver

use crate::driver::{CacheDriver, CacheError, CacheResult};
use anima_config::RedisConfig;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{debug, trace};

/// Redis-backed cache
#[derive(Clone)]
pub struct RedisCache {
    name: String,
    conn: ConnectionManager,
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache").field("name", &self.name).finish()
    }
}

impl RedisCache {
    /// Connect a named cache using the given redis settings.
    pub async fn connect(name: impl Into<String>, settings: &RedisConfig) -> CacheResult<Self> {
        let name = name.into();
        let client = redis::Client::open(settings.url())
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        debug!(cache = %name, address = %settings.address, "redis cache connected");

        Ok(Self { name, conn })
    }

    /// The configured cache name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl CacheDriver for RedisCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        trace!(cache = %self.name, key, "GET");
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        trace!(cache = %self.name, key, ttl_secs = ?ttl.map(|d| d.as_secs()), "SET");
        let mut conn = self.conn.clone();
        match ttl {
            Some(ttl) => conn.set_ex(key, value, ttl.as_secs()).await?,
            None => conn.set(key, value).await?,
        }
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        trace!(cache = %self.name, key, "SET NX EX");
        let mut conn = self.conn.clone();
        let acquired: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await?;
        Ok(acquired.is_some())
    }

    async fn has(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(key).await?)
    }

    async fn del(&self, keys: &[String]) -> CacheResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        Ok(conn.del(keys.to_vec()).await?)
    }

    async fn flush(&self) -> CacheResult<()> {
        debug!(cache = %self.name, "FLUSHDB");
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> CacheResult<i64> {
        let mut conn = self.conn.clone();
        Ok(conn.incr(key, 1).await?)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.expire(key, ttl.as_secs() as i64).await?)
    }
}
