//! Configuration types

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Service configuration
    pub service: ServiceConfig,

    /// Named cache instances
    #[serde(default)]
    pub cache: Vec<CacheConfig>,

    /// Named queue drivers, each hosting one or more logical queues
    #[serde(default)]
    pub queue: Vec<QueueConfig>,
}

/// Which protocol runner serves the application
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// HTTP/JSON runner
    Http,
    /// Length-prefixed binary TCP runner
    Tcp,
    /// RPC-style framed runner
    Rpc,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Http => write!(f, "http"),
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Rpc => write!(f, "rpc"),
        }
    }
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    /// Protocol runner to use
    pub protocol: Protocol,

    /// Bind address for the runner
    pub address: String,

    /// HTTP/connection read timeout
    #[serde(default = "default_read_timeout", with = "humantime_serde")]
    pub read_timeout: Duration,

    /// HTTP/connection write timeout
    #[serde(default = "default_write_timeout", with = "humantime_serde")]
    pub write_timeout: Duration,

    /// HTTP keep-alive idle timeout
    #[serde(default = "default_idle_timeout", with = "humantime_serde")]
    pub idle_timeout: Duration,

    /// Graceful shutdown budget for in-flight requests
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_write_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(5)
}

/// A named cache instance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Cache name used for lookup
    pub name: String,

    /// Driver selection ("redis")
    pub driver: String,

    /// Redis connection parameters, required by the redis driver
    #[serde(default)]
    pub redis: Option<RedisConfig>,
}

/// A named queue driver hosting one or more logical queues
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueConfig {
    /// Driver name; logical queues are addressed as `<name>:<queue>`
    pub name: String,

    /// Driver selection ("redis" or "memory")
    pub driver: String,

    /// Logical queues served by this driver
    #[serde(default)]
    pub queues: Vec<String>,

    /// Redis connection parameters, required by the redis driver
    #[serde(default)]
    pub redis: Option<RedisConfig>,

    /// Worker pool size for queue worker runs (0 = number of cores)
    #[serde(default)]
    pub workers: usize,
}

/// Redis connection parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RedisConfig {
    /// host:port of the redis server
    pub address: String,

    /// Database index
    #[serde(default)]
    pub db: i64,

    /// Optional password
    #[serde(default)]
    pub password: Option<String>,

    /// Connect timeout
    #[serde(default = "default_redis_timeout", with = "humantime_serde")]
    pub dial_timeout: Duration,

    /// Read timeout; also bounds the blocking dequeue
    #[serde(default = "default_redis_timeout", with = "humantime_serde")]
    pub read_timeout: Duration,

    /// Write timeout
    #[serde(default = "default_redis_timeout", with = "humantime_serde")]
    pub write_timeout: Duration,
}

fn default_redis_timeout() -> Duration {
    Duration::from_secs(5)
}

impl RedisConfig {
    /// Render the connection URL understood by the redis client.
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!("redis://:{}@{}/{}", password, self.address, self.db),
            None => format!("redis://{}/{}", self.address, self.db),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_defaults() {
        let yaml = r#"
service:
  protocol: http
  address: "127.0.0.1:8080"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.service.read_timeout, Duration::from_secs(10));
        assert_eq!(config.service.write_timeout, Duration::from_secs(10));
        assert_eq!(config.service.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.service.shutdown_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_redis_url() {
        let mut redis = RedisConfig {
            address: "localhost:6379".to_string(),
            db: 2,
            password: None,
            dial_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
        };
        assert_eq!(redis.url(), "redis://localhost:6379/2");

        redis.password = Some("hunter2".to_string());
        assert_eq!(redis.url(), "redis://:hunter2@localhost:6379/2");
    }

    #[test]
    fn test_protocol_parsing() {
        let yaml = r#"
service:
  protocol: tcp
  address: "127.0.0.1:9000"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.service.protocol, Protocol::Tcp);
    }
}
