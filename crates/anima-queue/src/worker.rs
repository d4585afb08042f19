//! Queue worker runner and the deferred-job watcher

use crate::driver::QueueError;
use crate::job::Job;
use crate::queue::Queue;
use anima_core::engine::panic_message;
use anima_core::{Error, Result, Runner};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, trace, Instrument};

/// How long the runner waits for a worker token before giving up on the
/// current iteration.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(2);

/// Retry cap: a job that keeps failing is deferred this many times, then
/// moved to the failure list.
const MAX_ATTEMPTS: i64 = 10;

/// Error contract between a queue processor and the runner.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// The processor took custody of the job's lifecycle; the runner does
    /// nothing further with it.
    #[error("job lifecycle handled by its processor")]
    Handled,

    /// The job must be retried regardless of its attempt count.
    #[error("job must be retried regardless of attempt count")]
    MustRetry,

    /// Ordinary failure; retried with backoff up to the cap.
    #[error("{0}")]
    Failed(String),
}

/// The terminal action the runner took for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobAction {
    /// The processor handled the lifecycle itself.
    Ignore,
    /// The job completed and was removed.
    Complete,
    /// The job was deferred for a later retry.
    Defer,
    /// The job was moved to the failure list.
    Fail,
}

impl std::fmt::Display for JobAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobAction::Ignore => write!(f, "ignore"),
            JobAction::Complete => write!(f, "complete"),
            JobAction::Defer => write!(f, "defer"),
            JobAction::Fail => write!(f, "fail"),
        }
    }
}

/// A logic unit that processes jobs of one kind.
pub type QueueProcessor =
    Arc<dyn Fn(Arc<Queue>, Job) -> BoxFuture<'static, std::result::Result<(), JobError>> + Send + Sync>;

/// Invoked after the terminal transition with the action taken and the
/// final error, if any.
pub type QueueCallback = Arc<dyn Fn(Arc<Queue>, &Job, JobAction, Option<&JobError>) + Send + Sync>;

/// Exponential backoff: `backoff(n) = 2^n` seconds.
pub fn backoff(attempt: i64) -> Duration {
    let exp = attempt.clamp(0, 32) as u32;
    Duration::from_secs(1u64 << exp)
}

/// A bounded-concurrency consumer over one logical queue.
///
/// Worker tokens come from a semaphore of the configured size; each
/// dequeued job runs in its own task which returns its token on
/// completion, panic included. A single watcher task promotes ready
/// deferred jobs back to pending every second.
pub struct QueueWorkerRunner {
    queue: Arc<Queue>,
    processors: HashMap<i32, QueueProcessor>,
    callbacks: HashMap<i32, QueueCallback>,
    pool: Arc<Semaphore>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl std::fmt::Debug for QueueWorkerRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueWorkerRunner")
            .field("queue", &self.queue.name())
            .field("processors", &self.processors.len())
            .finish()
    }
}

impl QueueWorkerRunner {
    /// Create a runner over `queue` with `workers` tokens (0 = number of
    /// cores).
    pub fn new(queue: Arc<Queue>, workers: usize) -> Self {
        let workers = if workers == 0 {
            num_cpus::get()
        } else {
            workers
        };

        Self {
            queue,
            processors: HashMap::new(),
            callbacks: HashMap::new(),
            pool: Arc::new(Semaphore::new(workers)),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Register the processor for jobs of `kind`.
    pub fn job(mut self, kind: i32, processor: QueueProcessor) -> Self {
        self.processors.insert(kind, processor);
        self
    }

    /// Register a terminal-action callback for jobs of `kind`.
    pub fn job_callback(mut self, kind: i32, callback: QueueCallback) -> Self {
        self.callbacks.insert(kind, callback);
        self
    }

    async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        match tokio::time::timeout(ACQUIRE_TIMEOUT, self.pool.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Some(permit),
            Ok(Err(_)) | Err(_) => None,
        }
    }
}

#[async_trait::async_trait]
impl Runner for QueueWorkerRunner {
    async fn run(&self) -> Result<()> {
        debug!(queue = self.queue.name(), "queue worker runner starting");

        self.tracker
            .spawn(watch(Arc::clone(&self.queue), self.shutdown.clone()));

        while !self.shutdown.is_cancelled() {
            let Some(permit) = self.acquire().await else {
                trace!("no worker token available, retrying");
                continue;
            };

            let job = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = self.queue.dequeue() => match result {
                    Ok(job) => job,
                    Err(QueueError::Empty) => continue,
                    Err(e) => {
                        error!(queue = self.queue.name(), error = %e, "dequeue failed");
                        continue;
                    }
                },
            };

            let span = tracing::info_span!("job", trace_id = %job.trace_id, kind = job.kind);

            let Some(processor) = self.processors.get(&job.kind).cloned() else {
                error!(trace_id = %job.trace_id, kind = job.kind, "no processor for job kind");
                if let Err(e) = self.queue.fail(&job).await {
                    error!(trace_id = %job.trace_id, error = %e, "failed to fail unroutable job");
                }
                continue;
            };

            let callback = self.callbacks.get(&job.kind).cloned();
            let queue = Arc::clone(&self.queue);
            self.tracker
                .spawn(process(queue, job, processor, callback, permit).instrument(span));
        }

        self.tracker.close();
        debug!(queue = self.queue.name(), "queue worker runner stopped");
        Ok(())
    }

    async fn shutdown(&self, timeout: Duration) -> Result<()> {
        self.shutdown.cancel();
        self.tracker.close();

        tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .map_err(|_| Error::ShutdownTimeout)
    }
}

/// Run one job to its terminal transition. The worker token rides along
/// and is returned when the task ends, panic included.
async fn process(
    queue: Arc<Queue>,
    mut job: Job,
    processor: QueueProcessor,
    callback: Option<QueueCallback>,
    _permit: OwnedSemaphorePermit,
) {
    if let Err(e) = queue.attempt(&mut job).await {
        error!(error = %e, "failed to persist job attempt");
    }

    let outcome = AssertUnwindSafe(processor(Arc::clone(&queue), job.clone()))
        .catch_unwind()
        .await;

    let (action, err) = match outcome {
        Ok(Ok(())) => {
            if let Err(e) = queue.complete(&job).await {
                error!(error = %e, "failed to complete job");
            }
            (JobAction::Complete, None)
        }
        Ok(Err(JobError::Handled)) => (JobAction::Ignore, Some(JobError::Handled)),
        Ok(Err(JobError::MustRetry)) => {
            if let Err(e) = queue.defer(&job, backoff(job.attempts)).await {
                error!(error = %e, "failed to defer job");
            }
            (JobAction::Defer, Some(JobError::MustRetry))
        }
        Ok(Err(err)) => (retry_or_fail(&queue, &job).await, Some(err)),
        Err(panic) => {
            error!(panic = panic_message(panic.as_ref()), "job processor panicked");
            let err = JobError::Failed(format!(
                "job processor panicked: {}",
                panic_message(panic.as_ref())
            ));
            (retry_or_fail(&queue, &job).await, Some(err))
        }
    };

    if let Some(callback) = callback {
        callback(Arc::clone(&queue), &job, action, err.as_ref());
    }

    debug!(action = %action, attempts = job.attempts, "job processed");
}

/// Defer with exponential backoff while under the attempt cap; fail
/// terminally beyond it.
async fn retry_or_fail(queue: &Arc<Queue>, job: &Job) -> JobAction {
    if job.attempts <= MAX_ATTEMPTS {
        if let Err(e) = queue.defer(job, backoff(job.attempts)).await {
            error!(error = %e, "failed to defer job");
        }
        JobAction::Defer
    } else {
        if let Err(e) = queue.fail(job).await {
            error!(error = %e, "failed to fail job");
        }
        JobAction::Fail
    }
}

/// Promote ready deferred jobs once a second.
async fn watch(queue: Arc<Queue>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match queue.stats().await {
            Ok(stats) => {
                trace!(queue = queue.name(), %stats, "queue stats");
                if stats.waiting > 0 {
                    match queue.driver().schedule_deferred(queue.name()).await {
                        Ok(promoted) => {
                            debug!(queue = queue.name(), promoted, "promoted deferred jobs");
                        }
                        Err(e) => {
                            error!(queue = queue.name(), error = %e, "failed to promote deferred jobs");
                        }
                    }
                }
            }
            Err(e) => {
                error!(queue = queue.name(), error = %e, "failed to retrieve queue stats");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        assert_eq!(backoff(1), Duration::from_secs(2));
        for n in 2..=10 {
            assert_eq!(backoff(n), backoff(n - 1) * 2);
        }
    }

    #[test]
    fn test_backoff_is_clamped() {
        // Attempt counts far beyond the retry cap must not overflow.
        assert_eq!(backoff(500), Duration::from_secs(1 << 32));
        assert_eq!(backoff(-3), Duration::from_secs(1));
    }

    #[test]
    fn test_action_display() {
        assert_eq!(JobAction::Ignore.to_string(), "ignore");
        assert_eq!(JobAction::Complete.to_string(), "complete");
        assert_eq!(JobAction::Defer.to_string(), "defer");
        assert_eq!(JobAction::Fail.to_string(), "fail");
    }
}
