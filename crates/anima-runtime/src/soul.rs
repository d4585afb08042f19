//! The soul: a zero-downtime process supervisor
//!
//! A soul owns one generation of applications. It adopts listeners whose
//! descriptors were inherited from the previous generation (`SERVER_FDS`),
//! translates signals into lifecycle events, and on reincarnation execs a
//! fresh binary that inherits every listener, so no connection is dropped
//! across a reload of the executable.

use crate::application::Application;
use anima_core::{Error, Result};
use std::net::TcpListener as StdTcpListener;
use std::os::unix::io::{FromRawFd, RawFd};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

/// Environment variable carrying inherited listener descriptors, one per
/// application in order.
pub const SERVER_FDS: &str = "SERVER_FDS";

/// Graceful-shutdown budget applied when the soul drains its applications.
const DRAIN_BUDGET: Duration = Duration::from_secs(5);

/// A process supervisor owning an ordered list of applications.
#[derive(Debug)]
pub struct Soul {
    apps: Vec<Arc<Application>>,
}

impl Soul {
    /// Create a soul serving `apps`.
    pub fn new(apps: Vec<Arc<Application>>) -> Self {
        Self { apps }
    }

    /// Boot every application (adopting inherited listeners), start their
    /// runs in background tasks, and block in the signal loop until the
    /// process is asked to stop.
    pub async fn serve(&self) -> Result<()> {
        let fds = load_descriptors();

        for (index, app) in self.apps.iter().enumerate() {
            app.boot().await?;

            if let Some(&fd) = fds.get(index) {
                // Ownership of the descriptor transfers from the previous
                // generation at exec; nothing else may close it.
                let listener = unsafe { StdTcpListener::from_raw_fd(fd) };
                app.set_listener(listener);
                info!(app = %app.name(), fd, "adopted inherited listener");
            }

            let app = Arc::clone(app);
            tokio::spawn(async move {
                if let Err(e) = app.run().await {
                    error!(app = %app.name(), error = %e, "application run failed");
                }
            });
        }

        info!(pid = std::process::id(), apps = self.apps.len(), "soul serving");

        self.listen().await
    }

    async fn listen(&self) -> Result<()> {
        let mut usr1 = signal(SignalKind::user_defined1())?;
        let mut usr2 = signal(SignalKind::user_defined2())?;
        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;

        loop {
            tokio::select! {
                _ = usr1.recv() => {
                    info!("SIGUSR1: reloading applications");
                    self.reload().await;
                }
                _ = usr2.recv() => {
                    info!("SIGUSR2: reincarnating");
                    if let Err(e) = self.reincarnate() {
                        error!(error = %e, "reincarnation failed");
                    }
                    self.drain().await;
                    return Ok(());
                }
                _ = interrupt.recv() => {
                    info!("SIGINT: shutting down");
                    self.drain().await;
                    return Ok(());
                }
                _ = terminate.recv() => {
                    info!("SIGTERM: shutting down");
                    self.drain().await;
                    return Ok(());
                }
            }
        }
    }

    /// Reload every application's configuration.
    pub async fn reload(&self) {
        for app in &self.apps {
            if let Err(e) = app.reload().await {
                error!(app = %app.name(), error = %e, "reload failed");
            }
        }
    }

    /// Spawn a fresh copy of the current binary that inherits every
    /// application listener, then leave the current generation to drain.
    pub fn reincarnate(&self) -> Result<()> {
        let mut fds: Vec<RawFd> = Vec::with_capacity(self.apps.len());
        for app in &self.apps {
            let fd = app.listener_fd().ok_or_else(|| {
                Error::Runtime(format!("application '{}' has no listener", app.name()))
            })?;
            clear_cloexec(fd)?;
            fds.push(fd);
        }

        save_descriptors(&fds);

        let binary = std::env::current_exe()?;
        let child = std::process::Command::new(binary)
            .args(std::env::args().skip(1))
            .current_dir(std::env::current_dir()?)
            .spawn()?;

        info!(pid = child.id(), "spawned next generation");
        Ok(())
    }

    /// Fan shutdown out to every application concurrently and await all.
    async fn drain(&self) {
        let shutdowns = self
            .apps
            .iter()
            .map(|app| {
                let app = Arc::clone(app);
                async move {
                    if let Err(e) = app.shutdown(DRAIN_BUDGET).await {
                        warn!(app = %app.name(), error = %e, "shutdown incomplete");
                    }
                }
            })
            .collect::<Vec<_>>();

        futures::future::join_all(shutdowns).await;
        info!("soul drained");
    }
}

/// Clear the close-on-exec flag so the descriptor survives the exec
/// handoff.
fn clear_cloexec(fd: RawFd) -> Result<()> {
    // Safety: plain fcntl on a descriptor we own.
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFD, 0) };
    if rc == -1 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}

fn save_descriptors(fds: &[RawFd]) {
    let value = fds
        .iter()
        .map(|fd| fd.to_string())
        .collect::<Vec<_>>()
        .join(",");
    std::env::set_var(SERVER_FDS, value);
}

/// Parse `SERVER_FDS`; unparseable entries are skipped, an absent variable
/// yields no descriptors and every application binds fresh.
fn load_descriptors() -> Vec<RawFd> {
    std::env::var(SERVER_FDS)
        .unwrap_or_default()
        .split(',')
        .filter_map(|v| v.parse::<RawFd>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::AsRawFd;
    use std::sync::Mutex;

    // The descriptor list lives in process environment; serialize the
    // tests that touch it.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_load_descriptors_parses_numeric_list() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var(SERVER_FDS, "3,4,nonsense,7");
        assert_eq!(load_descriptors(), vec![3, 4, 7]);
        std::env::remove_var(SERVER_FDS);
    }

    #[test]
    fn test_load_descriptors_empty_environment() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var(SERVER_FDS);
        assert!(load_descriptors().is_empty());
    }

    #[test]
    fn test_save_descriptors_roundtrip() {
        let _guard = ENV_LOCK.lock().unwrap();
        save_descriptors(&[5, 6]);
        assert_eq!(std::env::var(SERVER_FDS).unwrap(), "5,6");
        assert_eq!(load_descriptors(), vec![5, 6]);
        std::env::remove_var(SERVER_FDS);
    }

    #[test]
    fn test_clear_cloexec_flag() {
        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let fd = listener.as_raw_fd();

        clear_cloexec(fd).unwrap();

        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        assert_eq!(flags & libc::FD_CLOEXEC, 0);
    }
}
