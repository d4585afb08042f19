//! Configuration validation

use crate::Config;
use anima_core::{Error, Result};
use std::collections::HashSet;
use std::net::SocketAddr;

/// Validate a loaded configuration. Errors prevent boot.
pub fn validate_config(config: &Config) -> Result<()> {
    config
        .service
        .address
        .parse::<SocketAddr>()
        .map_err(|e| Error::Config(format!("invalid bind address '{}': {e}", config.service.address)))?;

    let mut cache_names = HashSet::new();
    for cache in &config.cache {
        if !cache_names.insert(cache.name.as_str()) {
            return Err(Error::Config(format!("duplicate cache name '{}'", cache.name)));
        }
        if cache.driver == "redis" && cache.redis.is_none() {
            return Err(Error::Config(format!(
                "cache '{}' uses the redis driver but has no redis settings",
                cache.name
            )));
        }
    }

    let mut queue_names = HashSet::new();
    for queue in &config.queue {
        if !queue_names.insert(queue.name.as_str()) {
            return Err(Error::Config(format!("duplicate queue name '{}'", queue.name)));
        }
        match queue.driver.as_str() {
            "redis" => {
                if queue.redis.is_none() {
                    return Err(Error::Config(format!(
                        "queue '{}' uses the redis driver but has no redis settings",
                        queue.name
                    )));
                }
            }
            "memory" => {}
            other => {
                return Err(Error::Config(format!(
                    "queue '{}' uses unknown driver '{other}'",
                    queue.name
                )));
            }
        }
        if queue.queues.is_empty() {
            return Err(Error::Config(format!(
                "queue '{}' declares no logical queues",
                queue.name
            )));
        }
    }

    Ok(())
}
