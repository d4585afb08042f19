//! # Anima Cache
//!
//! Named cache instances built from application settings. The redis driver
//! is the production backend; lookups of unconfigured names yield the null
//! driver so callers get a descriptive error instead of a panic.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod driver;
pub mod null;
pub mod redis;

pub use driver::{CacheDriver, CacheError, CacheGuarded, CacheLoader, CacheResult};
pub use null::NullCache;
pub use self::redis::RedisCache;
