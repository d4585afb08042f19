//! Redis queue driver
//!
//! Key layout per logical queue `Q`:
//! - `Q:pending`  list of job ids awaiting processing (RPOP side)
//! - `Q:working`  list of job ids leased by a worker
//! - `Q:failure`  list of job ids in terminal failure
//! - `Q:delayed`  sorted set scored by unix second of eligibility
//! - `Q:backlog`  hash of job id to serialized blob
//!
//! Every transition touching two keys runs as one server-side script so
//! the pair is atomic with respect to concurrent workers.

use crate::driver::{QueueDriver, QueueError, QueueResult};
use crate::job::{unix_now, Job};
use crate::stats::QueueStats;
use anima_config::RedisConfig;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

const ENQUEUE: &str = r#"
redis.call('hset', KEYS[1], ARGV[1], ARGV[2])
return redis.call('lpush', KEYS[2], ARGV[1])
"#;

const SCHEDULE: &str = r#"
redis.call('hset', KEYS[1], ARGV[1], ARGV[2])
return redis.call('zadd', KEYS[2], ARGV[3], ARGV[1])
"#;

const REQUEUE: &str = r#"
redis.call('lrem', KEYS[1], 0, ARGV[1])
return redis.call('lpush', KEYS[2], ARGV[1])
"#;

const COMPLETE: &str = r#"
redis.call('lrem', KEYS[1], 0, ARGV[1])
return redis.call('hdel', KEYS[2], ARGV[1])
"#;

const DEFER: &str = r#"
redis.call('lrem', KEYS[1], 0, ARGV[1])
return redis.call('zadd', KEYS[2], ARGV[2], ARGV[1])
"#;

const FAIL: &str = r#"
redis.call('lrem', KEYS[1], 0, ARGV[1])
return redis.call('lpush', KEYS[2], ARGV[1])
"#;

const REQUEUE_ALL_FAILED: &str = r#"
local failed = redis.call('lrange', KEYS[1], 0, -1)
for k, v in pairs(failed) do
    redis.call('lpush', KEYS[2], v)
end
redis.call('del', KEYS[1])
return failed
"#;

const STATS: &str = r#"
local pending = redis.call('llen', KEYS[1])
local working = redis.call('llen', KEYS[2])
local failure = redis.call('llen', KEYS[3])
local backlog = redis.call('hlen', KEYS[4])
local delayed = redis.call('zcount', KEYS[5], '-inf', '+inf')
local waiting = redis.call('zcount', KEYS[5], '-inf', ARGV[1])

return {pending, working, failure, delayed, backlog, waiting}
"#;

const SCHEDULE_DEFERRED: &str = r#"
local ready = redis.call('zrangebyscore', KEYS[1], '-inf', ARGV[1])
local count = 0

for k, v in pairs(ready) do
    redis.call('zrem', KEYS[1], v)
    redis.call('lpush', KEYS[2], v)
    count = count + 1
end

return count
"#;

/// Redis-backed queue driver
#[derive(Clone)]
pub struct RedisDriver {
    conn: ConnectionManager,
    read_timeout: Duration,
}

impl std::fmt::Debug for RedisDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisDriver")
            .field("read_timeout", &self.read_timeout)
            .finish()
    }
}

impl RedisDriver {
    /// Connect a driver using the given redis settings. The read timeout
    /// bounds the blocking dequeue.
    pub async fn connect(settings: &RedisConfig) -> QueueResult<Self> {
        let client = redis::Client::open(settings.url())
            .map_err(|e| QueueError::Driver(format!("redis client: {e}")))?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::Driver(format!("redis connection: {e}")))?;

        debug!(address = %settings.address, db = settings.db, "redis queue driver connected");

        Ok(Self {
            conn,
            read_timeout: settings.read_timeout,
        })
    }

    fn key(&self, queue: &str, segment: &str) -> String {
        segment_key(queue, segment)
    }
}

fn segment_key(queue: &str, segment: &str) -> String {
    format!("{queue}:{segment}")
}

#[async_trait]
impl QueueDriver for RedisDriver {
    async fn enqueue(&self, queue: &str, job: &mut Job) -> QueueResult<()> {
        if job.trace_id.is_empty() {
            job.trace_id = anima_core::trace::generate();
        }

        let mut conn = self.conn.clone();
        let _: i64 = redis::Script::new(ENQUEUE)
            .key(self.key(queue, "backlog"))
            .key(self.key(queue, "pending"))
            .arg(&job.trace_id)
            .arg(job.serialize()?)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn schedule(&self, queue: &str, job: &mut Job, at: SystemTime) -> QueueResult<()> {
        if job.trace_id.is_empty() {
            job.trace_id = anima_core::trace::generate();
        }

        let score = at
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;

        let mut conn = self.conn.clone();
        let _: i64 = redis::Script::new(SCHEDULE)
            .key(self.key(queue, "backlog"))
            .key(self.key(queue, "delayed"))
            .arg(&job.trace_id)
            .arg(job.serialize()?)
            .arg(score)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn dequeue(&self, queue: &str) -> QueueResult<Job> {
        let mut conn = self.conn.clone();

        let id: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(self.key(queue, "pending"))
            .arg(self.key(queue, "working"))
            .arg(self.read_timeout.as_secs())
            .query_async(&mut conn)
            .await?;
        let id = id.ok_or(QueueError::Empty)?;

        let blob: Option<String> = redis::cmd("HGET")
            .arg(self.key(queue, "backlog"))
            .arg(&id)
            .query_async(&mut conn)
            .await?;
        // A missing backlog entry is a nil read, not a driver failure.
        let blob = blob.ok_or(QueueError::Empty)?;

        Job::unserialize(&blob)
    }

    async fn attempt(&self, queue: &str, job: &mut Job) -> QueueResult<()> {
        job.attempt();

        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("HSET")
            .arg(self.key(queue, "backlog"))
            .arg(&job.trace_id)
            .arg(job.serialize()?)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn requeue(&self, queue: &str, job: &Job) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::Script::new(REQUEUE)
            .key(self.key(queue, "working"))
            .key(self.key(queue, "pending"))
            .arg(&job.trace_id)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn complete(&self, queue: &str, job: &Job) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::Script::new(COMPLETE)
            .key(self.key(queue, "working"))
            .key(self.key(queue, "backlog"))
            .arg(&job.trace_id)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn defer(&self, queue: &str, job: &Job, after: Duration) -> QueueResult<()> {
        let score = unix_now() + after.as_secs() as i64;

        let mut conn = self.conn.clone();
        let _: i64 = redis::Script::new(DEFER)
            .key(self.key(queue, "working"))
            .key(self.key(queue, "delayed"))
            .arg(&job.trace_id)
            .arg(score)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn fail(&self, queue: &str, job: &Job) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::Script::new(FAIL)
            .key(self.key(queue, "working"))
            .key(self.key(queue, "failure"))
            .arg(&job.trace_id)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn requeue_all_failed(&self, queue: &str) -> QueueResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let drained: Vec<String> = redis::Script::new(REQUEUE_ALL_FAILED)
            .key(self.key(queue, "failure"))
            .key(self.key(queue, "pending"))
            .invoke_async(&mut conn)
            .await?;
        Ok(drained)
    }

    async fn truncate(&self, queue: &str) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(self.key(queue, "pending"))
            .arg(self.key(queue, "working"))
            .arg(self.key(queue, "failure"))
            .arg(self.key(queue, "backlog"))
            .arg(self.key(queue, "delayed"))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn stats(&self, queue: &str) -> QueueResult<QueueStats> {
        let mut conn = self.conn.clone();
        let counts: Vec<i64> = redis::Script::new(STATS)
            .key(self.key(queue, "pending"))
            .key(self.key(queue, "working"))
            .key(self.key(queue, "failure"))
            .key(self.key(queue, "backlog"))
            .key(self.key(queue, "delayed"))
            .arg(unix_now())
            .invoke_async(&mut conn)
            .await?;

        if counts.len() != 6 {
            return Err(QueueError::Driver(format!(
                "stats script returned {} counters",
                counts.len()
            )));
        }

        Ok(QueueStats {
            pending: counts[0],
            working: counts[1],
            failure: counts[2],
            delayed: counts[3],
            backlog: counts[4],
            waiting: counts[5],
        })
    }

    async fn schedule_deferred(&self, queue: &str) -> QueueResult<i64> {
        let mut conn = self.conn.clone();
        Ok(redis::Script::new(SCHEDULE_DEFERRED)
            .key(self.key(queue, "delayed"))
            .key(self.key(queue, "pending"))
            .arg(unix_now())
            .invoke_async(&mut conn)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(segment_key("mail", "pending"), "mail:pending");
        assert_eq!(segment_key("mail", "working"), "mail:working");
        assert_eq!(segment_key("mail", "failure"), "mail:failure");
        assert_eq!(segment_key("mail", "delayed"), "mail:delayed");
        assert_eq!(segment_key("mail", "backlog"), "mail:backlog");
    }

    #[test]
    fn test_scripts_touch_expected_segments() {
        assert!(ENQUEUE.contains("hset") && ENQUEUE.contains("lpush"));
        assert!(SCHEDULE.contains("zadd"));
        assert!(COMPLETE.contains("lrem") && COMPLETE.contains("hdel"));
        assert!(DEFER.contains("lrem") && DEFER.contains("zadd"));
        assert!(FAIL.contains("lrem") && FAIL.contains("lpush"));
        assert!(SCHEDULE_DEFERRED.contains("zrangebyscore"));
    }
}
