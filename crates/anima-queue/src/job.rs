//! Jobs

use crate::driver::QueueResult;
use serde::{Deserialize, Serialize};

/// An asynchronous job that can be queued.
///
/// The trace id keys every set and list operation in the driver; it is
/// assigned on first enqueue or schedule when absent. The kind selects the
/// queue processor; the payload is opaque to the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Globally unique, sortable identifier.
    #[serde(default)]
    pub trace_id: String,

    /// The processor demultiplexing key.
    #[serde(rename = "type")]
    pub kind: i32,

    /// Opaque payload, serialized by the application.
    pub payload: String,

    /// How many times the job has been attempted. Monotonic.
    #[serde(default)]
    pub attempts: i64,

    /// Unix second of the most recent attempt.
    #[serde(default)]
    pub last_attempt: i64,
}

impl Job {
    /// Create a job of `kind` carrying `payload`.
    pub fn new(kind: i32, payload: impl Into<String>) -> Self {
        Self {
            trace_id: String::new(),
            kind,
            payload: payload.into(),
            attempts: 0,
            last_attempt: 0,
        }
    }

    /// Record one attempt: bump the counter and stamp the wall clock.
    pub fn attempt(&mut self) {
        self.attempts += 1;
        self.last_attempt = unix_now();
    }

    /// Serialize the job into its backlog blob.
    pub fn serialize(&self) -> QueueResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a job from its backlog blob.
    pub fn unserialize(blob: &str) -> QueueResult<Self> {
        Ok(serde_json::from_str(blob)?)
    }
}

impl std::fmt::Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Job(trace_id={}, type={}, attempts={})",
            self.trace_id, self.kind, self.attempts
        )
    }
}

pub(crate) fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
