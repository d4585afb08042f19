//! Logical queues

use crate::driver::{QueueDriver, QueueResult};
use crate::job::Job;
use crate::stats::QueueStats;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// A logical queue bound to a shared driver.
///
/// Several queues may share one underlying driver instance; the queue
/// object itself holds no mutable state, so it can be cloned freely across
/// workers.
#[derive(Clone)]
pub struct Queue {
    name: String,
    driver: Arc<dyn QueueDriver>,
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue").field("name", &self.name).finish()
    }
}

impl Queue {
    /// Bind `name` to `driver`.
    pub fn new(name: impl Into<String>, driver: Arc<dyn QueueDriver>) -> Self {
        Self {
            name: name.into(),
            driver,
        }
    }

    /// The logical queue name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The underlying driver.
    pub fn driver(&self) -> &Arc<dyn QueueDriver> {
        &self.driver
    }

    /// Send a job to the queue.
    pub async fn enqueue(&self, job: &mut Job) -> QueueResult<()> {
        self.driver.enqueue(&self.name, job).await
    }

    /// Schedule a job to run at a future time.
    pub async fn schedule(&self, job: &mut Job, at: SystemTime) -> QueueResult<()> {
        self.driver.schedule(&self.name, job, at).await
    }

    /// Retrieve a job from the queue.
    pub async fn dequeue(&self) -> QueueResult<Job> {
        self.driver.dequeue(&self.name).await
    }

    /// Persist one attempt on the job.
    pub async fn attempt(&self, job: &mut Job) -> QueueResult<()> {
        self.driver.attempt(&self.name, job).await
    }

    /// Put a leased job straight back on pending.
    pub async fn requeue(&self, job: &Job) -> QueueResult<()> {
        self.driver.requeue(&self.name, job).await
    }

    /// Mark a job completed and drop it from the queue.
    pub async fn complete(&self, job: &Job) -> QueueResult<()> {
        self.driver.complete(&self.name, job).await
    }

    /// Defer a job for later processing.
    pub async fn defer(&self, job: &Job, after: Duration) -> QueueResult<()> {
        self.driver.defer(&self.name, job, after).await
    }

    /// Move a job to the terminal failure list.
    pub async fn fail(&self, job: &Job) -> QueueResult<()> {
        self.driver.fail(&self.name, job).await
    }

    /// Drain the failure list back to pending.
    pub async fn requeue_all_failed(&self) -> QueueResult<Vec<String>> {
        self.driver.requeue_all_failed(&self.name).await
    }

    /// Discard the queue's entire state.
    pub async fn truncate(&self) -> QueueResult<()> {
        self.driver.truncate(&self.name).await
    }

    /// Snapshot the queue counters.
    pub async fn stats(&self) -> QueueResult<QueueStats> {
        self.driver.stats(&self.name).await
    }
}
