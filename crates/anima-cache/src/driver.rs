//! Cache driver trait definition

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::time::Duration;

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Error types for cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// No cache was configured under the requested name
    #[error("no cache configured under name '{0}'")]
    Unconfigured(String),

    /// Backend connection error
    #[error("cache connection error: {0}")]
    Connection(String),

    /// The guard lock is already held
    #[error("acquiring lock failed: {0}")]
    Locked(String),

    /// Backend-specific error
    #[error("cache backend error: {0}")]
    Backend(#[from] ::redis::RedisError),
}

/// The value loader awaited by [`CacheDriver::get_via`] on a miss.
pub type CacheLoader = BoxFuture<'static, CacheResult<(String, Option<Duration>)>>;

/// The guarded section awaited by [`CacheDriver::guard`] once the lock is
/// held.
pub type CacheGuarded = BoxFuture<'static, CacheResult<()>>;

/// Cache driver trait
///
/// Defines the interface for pluggable cache backends. Values are strings;
/// applications serialize richer payloads themselves.
#[async_trait]
pub trait CacheDriver: Send + Sync {
    /// Get `key`, or `None` when absent.
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Set `key` to `value` with an optional expiration.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()>;

    /// Set `key` only if absent, with an expiration. Returns whether the
    /// key was set.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool>;

    /// Whether `key` exists.
    async fn has(&self, key: &str) -> CacheResult<bool>;

    /// Delete `keys`, returning how many existed.
    async fn del(&self, keys: &[String]) -> CacheResult<u64>;

    /// Discard every key in the backing store.
    async fn flush(&self) -> CacheResult<()>;

    /// Increment `key`, returning the new value.
    async fn incr(&self, key: &str) -> CacheResult<i64>;

    /// Set the expiration of `key`. Returns whether the key existed.
    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool>;

    /// Get `key` from the cache; on a miss, await `loader` for the value
    /// and store it with the expiration the loader chose.
    async fn get_via(&self, key: &str, loader: CacheLoader) -> CacheResult<String> {
        if let Some(value) = self.get(key).await? {
            return Ok(value);
        }

        let (value, ttl) = loader.await?;
        self.set(key, &value, ttl).await?;
        Ok(value)
    }

    /// Guard the execution of `handler` with a lock under `key`: when the
    /// key is absent it is set for `ttl` and `handler` runs; otherwise
    /// [`CacheError::Locked`] is returned. The lock is released afterwards
    /// regardless of the handler's outcome.
    async fn guard(&self, key: &str, ttl: Duration, handler: CacheGuarded) -> CacheResult<()> {
        if !self.set_nx(key, "guarded", ttl).await? {
            return Err(CacheError::Locked(key.to_string()));
        }

        let outcome = handler.await;
        self.del(&[key.to_string()]).await?;
        outcome
    }
}
