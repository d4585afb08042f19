//! Null cache driver
//!
//! Returned when an application asks for a cache name that was never
//! configured; every operation fails with the name so the mistake is
//! visible at the call site instead of a lookup panic.

use crate::driver::{CacheDriver, CacheError, CacheResult};
use async_trait::async_trait;
use std::time::Duration;

/// A cache driver for unconfigured names.
#[derive(Debug, Clone)]
pub struct NullCache {
    name: String,
}

impl NullCache {
    /// Create a null driver remembering the missing name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    fn unconfigured<T>(&self) -> CacheResult<T> {
        Err(CacheError::Unconfigured(self.name.clone()))
    }
}

#[async_trait]
impl CacheDriver for NullCache {
    async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
        self.unconfigured()
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> CacheResult<()> {
        self.unconfigured()
    }

    async fn set_nx(&self, _key: &str, _value: &str, _ttl: Duration) -> CacheResult<bool> {
        self.unconfigured()
    }

    async fn has(&self, _key: &str) -> CacheResult<bool> {
        self.unconfigured()
    }

    async fn del(&self, _keys: &[String]) -> CacheResult<u64> {
        self.unconfigured()
    }

    async fn flush(&self) -> CacheResult<()> {
        self.unconfigured()
    }

    async fn incr(&self, _key: &str) -> CacheResult<i64> {
        self.unconfigured()
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> CacheResult<bool> {
        self.unconfigured()
    }
}
