//! Daemons
//!
//! A daemon is a named background worker the application starts before its
//! runner serves and cancels on shutdown. Cancellation is cooperative: the
//! worker receives a token and is expected to observe it in its select
//! loop. The done signal fires exactly once, on return or panic.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// The worker body of a daemon.
pub type DaemonWorker = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, ()> + Send>;

/// A named background worker with cancel and done signals.
pub struct Daemon {
    name: String,
    cancel: CancellationToken,
    done: CancellationToken,
    worker: Mutex<Option<DaemonWorker>>,
}

impl Daemon {
    /// Create a daemon; the worker runs when [`Daemon::start`] is called.
    pub fn new(name: impl Into<String>, worker: DaemonWorker) -> Self {
        Self {
            name: name.into(),
            cancel: CancellationToken::new(),
            done: CancellationToken::new(),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// The daemon name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Launch the worker in a background task with panic recovery.
    /// Starting twice is a no-op.
    pub fn start(&self) {
        let Some(worker) = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take() else {
            debug!(daemon = %self.name, "daemon already started");
            return;
        };

        let name = self.name.clone();
        let done = self.done.clone();
        let future = worker(self.cancel.clone());

        tokio::spawn(async move {
            if AssertUnwindSafe(future).catch_unwind().await.is_err() {
                error!(daemon = %name, "daemon panicked");
            }
            debug!(daemon = %name, "daemon finished");
            done.cancel();
        });
    }

    /// Signal the worker to stop. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait until the worker has returned.
    pub async fn wait(&self) {
        self.done.cancelled().await;
    }

    /// Whether the worker has returned.
    pub fn is_done(&self) -> bool {
        self.done.is_cancelled()
    }
}

impl fmt::Debug for Daemon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Daemon")
            .field("name", &self.name)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("done", &self.is_done())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ticker() -> Daemon {
        Daemon::new(
            "ticker",
            Box::new(|cancel| {
                Box::pin(async move {
                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(Duration::from_millis(10)) => {}
                        }
                    }
                })
            }),
        )
    }

    #[tokio::test]
    async fn test_cancel_stops_worker_and_fires_done() {
        let daemon = ticker();
        daemon.start();
        assert!(!daemon.is_done());

        daemon.cancel();
        tokio::time::timeout(Duration::from_secs(1), daemon.wait())
            .await
            .unwrap();
        assert!(daemon.is_done());
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let daemon = ticker();
        daemon.start();

        daemon.cancel();
        daemon.cancel();
        tokio::time::timeout(Duration::from_secs(1), daemon.wait())
            .await
            .unwrap();

        // Cancelling after the worker returned is a no-op.
        daemon.cancel();
        assert!(daemon.is_done());
    }

    #[tokio::test]
    async fn test_panicking_worker_still_fires_done() {
        let daemon = Daemon::new(
            "crasher",
            Box::new(|_| Box::pin(async { panic!("worker exploded") })),
        );
        daemon.start();

        tokio::time::timeout(Duration::from_secs(1), daemon.wait())
            .await
            .unwrap();
        assert!(daemon.is_done());
    }

    #[tokio::test]
    async fn test_double_start_is_noop() {
        let daemon = ticker();
        daemon.start();
        daemon.start();

        daemon.cancel();
        tokio::time::timeout(Duration::from_secs(1), daemon.wait())
            .await
            .unwrap();
    }
}
