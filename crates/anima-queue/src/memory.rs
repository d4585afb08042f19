//! In-memory queue driver
//!
//! The same five-segment state machine as the redis driver, kept in
//! process. Used by worker and watcher tests and by embedded deployments
//! that have no redis at hand. Single-instance only; nothing survives a
//! restart.

use crate::driver::{QueueDriver, QueueError, QueueResult};
use crate::job::{unix_now, Job};
use crate::stats::QueueStats;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Segments {
    pending: VecDeque<String>,
    working: Vec<String>,
    failure: Vec<String>,
    delayed: Vec<(String, i64)>,
    backlog: HashMap<String, String>,
}

/// In-process queue driver
#[derive(Debug)]
pub struct MemoryDriver {
    state: Mutex<HashMap<String, Segments>>,
    notify: Notify,
    read_timeout: Duration,
}

impl MemoryDriver {
    /// Create a driver whose blocking dequeue waits up to `read_timeout`.
    pub fn new(read_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
            notify: Notify::new(),
            read_timeout,
        }
    }

    fn with_segments<T>(&self, queue: &str, f: impl FnOnce(&mut Segments) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(state.entry(queue.to_string()).or_default())
    }
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl QueueDriver for MemoryDriver {
    async fn enqueue(&self, queue: &str, job: &mut Job) -> QueueResult<()> {
        if job.trace_id.is_empty() {
            job.trace_id = anima_core::trace::generate();
        }

        let blob = job.serialize()?;
        self.with_segments(queue, |seg| {
            seg.backlog.insert(job.trace_id.clone(), blob);
            seg.pending.push_front(job.trace_id.clone());
        });
        self.notify.notify_one();
        Ok(())
    }

    async fn schedule(&self, queue: &str, job: &mut Job, at: SystemTime) -> QueueResult<()> {
        if job.trace_id.is_empty() {
            job.trace_id = anima_core::trace::generate();
        }

        let score = at.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64;
        let blob = job.serialize()?;
        self.with_segments(queue, |seg| {
            seg.backlog.insert(job.trace_id.clone(), blob);
            seg.delayed.retain(|(id, _)| id != &job.trace_id);
            seg.delayed.push((job.trace_id.clone(), score));
        });
        Ok(())
    }

    async fn dequeue(&self, queue: &str) -> QueueResult<Job> {
        let deadline = tokio::time::Instant::now() + self.read_timeout;

        loop {
            let notified = self.notify.notified();

            let leased = self.with_segments(queue, |seg| {
                seg.pending.pop_back().map(|id| {
                    seg.working.push(id.clone());
                    (id.clone(), seg.backlog.get(&id).cloned())
                })
            });

            if let Some((_, blob)) = leased {
                let blob = blob.ok_or(QueueError::Empty)?;
                return Job::unserialize(&blob);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(QueueError::Empty);
            }
        }
    }

    async fn attempt(&self, queue: &str, job: &mut Job) -> QueueResult<()> {
        job.attempt();
        let blob = job.serialize()?;
        self.with_segments(queue, |seg| {
            seg.backlog.insert(job.trace_id.clone(), blob);
        });
        Ok(())
    }

    async fn requeue(&self, queue: &str, job: &Job) -> QueueResult<()> {
        self.with_segments(queue, |seg| {
            seg.working.retain(|id| id != &job.trace_id);
            seg.pending.push_front(job.trace_id.clone());
        });
        self.notify.notify_one();
        Ok(())
    }

    async fn complete(&self, queue: &str, job: &Job) -> QueueResult<()> {
        self.with_segments(queue, |seg| {
            seg.working.retain(|id| id != &job.trace_id);
            seg.backlog.remove(&job.trace_id);
        });
        Ok(())
    }

    async fn defer(&self, queue: &str, job: &Job, after: Duration) -> QueueResult<()> {
        let score = unix_now() + after.as_secs() as i64;
        self.with_segments(queue, |seg| {
            seg.working.retain(|id| id != &job.trace_id);
            seg.delayed.retain(|(id, _)| id != &job.trace_id);
            seg.delayed.push((job.trace_id.clone(), score));
        });
        Ok(())
    }

    async fn fail(&self, queue: &str, job: &Job) -> QueueResult<()> {
        self.with_segments(queue, |seg| {
            seg.working.retain(|id| id != &job.trace_id);
            seg.failure.push(job.trace_id.clone());
        });
        Ok(())
    }

    async fn requeue_all_failed(&self, queue: &str) -> QueueResult<Vec<String>> {
        let drained = self.with_segments(queue, |seg| {
            let drained: Vec<String> = seg.failure.drain(..).collect();
            for id in &drained {
                seg.pending.push_front(id.clone());
            }
            drained
        });
        if !drained.is_empty() {
            self.notify.notify_one();
        }
        Ok(drained)
    }

    async fn truncate(&self, queue: &str) -> QueueResult<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.remove(queue);
        Ok(())
    }

    async fn stats(&self, queue: &str) -> QueueResult<QueueStats> {
        let now = unix_now();
        Ok(self.with_segments(queue, |seg| QueueStats {
            pending: seg.pending.len() as i64,
            working: seg.working.len() as i64,
            failure: seg.failure.len() as i64,
            delayed: seg.delayed.len() as i64,
            backlog: seg.backlog.len() as i64,
            waiting: seg.delayed.iter().filter(|(_, at)| *at <= now).count() as i64,
        }))
    }

    async fn schedule_deferred(&self, queue: &str) -> QueueResult<i64> {
        let now = unix_now();
        let moved = self.with_segments(queue, |seg| {
            let mut ready: Vec<(String, i64)> = Vec::new();
            seg.delayed.retain(|(id, at)| {
                if *at <= now {
                    ready.push((id.clone(), *at));
                    false
                } else {
                    true
                }
            });

            // Promote in ascending eligibility order.
            ready.sort_by_key(|(_, at)| *at);
            let count = ready.len() as i64;
            for (id, _) in ready {
                seg.pending.push_front(id);
            }
            count
        });

        if moved > 0 {
            self.notify.notify_one();
        }
        Ok(moved)
    }
}
