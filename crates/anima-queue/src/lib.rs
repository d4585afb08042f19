//! # Anima Queue
//!
//! A persistent job queue with five structured segments per logical queue
//! (pending/working/failure/delayed/backlog), attempt tracking, exponential
//! backoff, and deferred scheduling. The redis driver executes every
//! multi-step transition as a single server-side script; the memory driver
//! implements the same state machine in process for tests and embedded
//! runs. The worker runner consumes a queue with a bounded pool and a
//! watcher that promotes ready deferred jobs.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod driver;
pub mod job;
pub mod memory;
pub mod queue;
pub mod redis;
pub mod stats;
pub mod worker;

pub use driver::{QueueDriver, QueueError, QueueResult};
pub use job::Job;
pub use memory::MemoryDriver;
pub use queue::Queue;
pub use self::redis::RedisDriver;
pub use stats::QueueStats;
pub use worker::{
    backoff, JobAction, JobError, QueueCallback, QueueProcessor, QueueWorkerRunner,
};
