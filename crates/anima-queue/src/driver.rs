//! Queue driver trait definition

use crate::job::Job;
use crate::stats::QueueStats;
use async_trait::async_trait;
use std::time::{Duration, SystemTime};

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Error types for queue operations
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Nothing to dequeue within the driver's read timeout. Not logged by
    /// the worker runner.
    #[error("queue is empty")]
    Empty,

    /// Redis error
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Job blob (de)serialization error
    #[error("job serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Driver-specific error
    #[error("queue driver error: {0}")]
    Driver(String),
}

impl From<QueueError> for anima_core::Error {
    fn from(err: QueueError) -> Self {
        anima_core::Error::Queue(err.to_string())
    }
}

/// The five-segment queue state machine.
///
/// One driver instance may serve several logical queues; every operation is
/// scoped by the queue name. Multi-step transitions must be atomic with
/// respect to concurrent workers.
#[async_trait]
pub trait QueueDriver: Send + Sync {
    /// Put a job into the backlog and the pending list. Assigns a trace id
    /// when the job has none.
    async fn enqueue(&self, queue: &str, job: &mut Job) -> QueueResult<()>;

    /// Put a job into the backlog and the delayed set, eligible at `at`.
    /// Assigns a trace id when the job has none.
    async fn schedule(&self, queue: &str, job: &mut Job, at: SystemTime) -> QueueResult<()>;

    /// Lease the next pending job: blocks up to the driver's read timeout,
    /// then yields [`QueueError::Empty`].
    async fn dequeue(&self, queue: &str) -> QueueResult<Job>;

    /// Persist one attempt: bump the counter and the last-attempt stamp in
    /// the backlog blob.
    async fn attempt(&self, queue: &str, job: &mut Job) -> QueueResult<()>;

    /// Move a leased job straight back to pending.
    async fn requeue(&self, queue: &str, job: &Job) -> QueueResult<()>;

    /// Remove a finished job from working and the backlog.
    async fn complete(&self, queue: &str, job: &Job) -> QueueResult<()>;

    /// Move a leased job to the delayed set, eligible after `after`.
    async fn defer(&self, queue: &str, job: &Job, after: Duration) -> QueueResult<()>;

    /// Move a leased job to the terminal failure list.
    async fn fail(&self, queue: &str, job: &Job) -> QueueResult<()>;

    /// Drain the failure list back to pending; returns the drained ids.
    async fn requeue_all_failed(&self, queue: &str) -> QueueResult<Vec<String>>;

    /// Discard all five segments of the queue.
    async fn truncate(&self, queue: &str) -> QueueResult<()>;

    /// Snapshot the queue counters.
    async fn stats(&self, queue: &str) -> QueueResult<QueueStats>;

    /// Promote every delayed job whose eligibility time has passed into
    /// the pending list, in ascending eligibility order. Returns how many
    /// moved.
    async fn schedule_deferred(&self, queue: &str) -> QueueResult<i64>;
}
