//! The runner contract
//!
//! A runner defines how an application is run: the HTTP, TCP, and RPC
//! servers and the queue worker all implement it. Exactly one runner is
//! bound per application run.

use crate::error::Result;
use std::time::Duration;

/// How an application serves requests.
#[async_trait::async_trait]
pub trait Runner: Send + Sync {
    /// Serve until shut down.
    async fn run(&self) -> Result<()>;

    /// Stop accepting work and wait up to `timeout` for in-flight work to
    /// drain. Returns [`crate::Error::ShutdownTimeout`] when the budget
    /// elapses first.
    async fn shutdown(&self, timeout: Duration) -> Result<()>;
}
