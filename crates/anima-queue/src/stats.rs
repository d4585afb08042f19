//! Queue statistics

/// A point-in-time snapshot of one logical queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Jobs ready to be consumed.
    pub pending: i64,
    /// Jobs currently leased by a worker.
    pub working: i64,
    /// Jobs in terminal failure.
    pub failure: i64,
    /// Jobs in the delayed set, ready or not.
    pub delayed: i64,
    /// Total jobs known to the queue (backlog hash size).
    pub backlog: i64,
    /// Delayed jobs whose eligibility time has passed and that are
    /// waiting to be promoted back to pending.
    pub waiting: i64,
}

impl std::fmt::Display for QueueStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "QueueStats (pending={}, working={}, failure={}, delayed={}, backlog={}, waiting={})",
            self.pending, self.working, self.failure, self.delayed, self.backlog, self.waiting
        )
    }
}
