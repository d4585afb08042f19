//! TCP runner over the hotline framing
//!
//! Accepts connections while alive and reads frames serially from each
//! one. Unknown kinds fire the route-not-found event and produce no
//! reply. Decode failures and chain panics are request-scope: the panic
//! handler runs and the reply object that exists is still written back.
//! The reply frame's kind is the status code the chain returned.

use crate::hotline::Hotline;
use anima_config::ServiceConfig;
use anima_core::context::Context;
use anima_core::engine::Engine;
use anima_core::processor::Processor;
use anima_core::{Error, Event, Exchange, Result, Runner};
use futures::FutureExt;
use std::any::Any;
use std::net::TcpListener as StdTcpListener;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, Instrument};

/// The built-in TCP runner.
pub struct TcpRunner {
    engine: Arc<Engine>,
    address: String,
    listener: Mutex<Option<StdTcpListener>>,
    timeout: Duration,
    alive: Arc<AtomicBool>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl std::fmt::Debug for TcpRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpRunner")
            .field("address", &self.address)
            .field("alive", &self.alive.load(Ordering::Relaxed))
            .finish()
    }
}

impl TcpRunner {
    /// Create a runner from the service configuration. An inherited
    /// listener takes precedence over binding the configured address.
    pub fn new(
        engine: Arc<Engine>,
        service: &ServiceConfig,
        listener: Option<StdTcpListener>,
    ) -> Self {
        Self {
            engine,
            address: service.address.clone(),
            listener: Mutex::new(listener),
            timeout: service.read_timeout,
            alive: Arc::new(AtomicBool::new(true)),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    fn take_listener(&self) -> Result<StdTcpListener> {
        let stored = self.listener.lock().unwrap_or_else(|e| e.into_inner()).take();
        match stored {
            Some(listener) => Ok(listener),
            None => Ok(StdTcpListener::bind(&self.address)?),
        }
    }
}

#[async_trait::async_trait]
impl Runner for TcpRunner {
    async fn run(&self) -> Result<()> {
        let std_listener = self.take_listener()?;
        std_listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(std_listener)?;

        info!(address = %listener.local_addr()?, "tcp runner listening");

        while self.alive.load(Ordering::SeqCst) {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, peer) = match result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                            continue;
                        }
                    };
                    tracing::trace!(%peer, "accepted connection");

                    self.tracker.spawn(worker(
                        Arc::clone(&self.engine),
                        stream,
                        self.timeout,
                        Arc::clone(&self.alive),
                    ));
                }
                _ = self.shutdown.cancelled() => break,
            }
        }

        self.tracker.close();
        info!("tcp runner stopped accepting");
        Ok(())
    }

    async fn shutdown(&self, timeout: Duration) -> Result<()> {
        // Accept loop and per-connection workers sense this on their next
        // iteration.
        self.alive.store(false, Ordering::SeqCst);
        self.shutdown.cancel();
        self.tracker.close();

        tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .map_err(|_| Error::ShutdownTimeout)
    }
}

/// Read frames serially from one connection until EOF, an error, or
/// shutdown.
async fn worker(engine: Arc<Engine>, stream: TcpStream, timeout: Duration, alive: Arc<AtomicBool>) {
    let peer = stream.peer_addr().ok();
    let mut line = Hotline::new(stream, timeout);

    while alive.load(Ordering::SeqCst) {
        let (kind, payload) = match line.read_frame().await {
            Ok(frame) => frame,
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => return,
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::TimedOut => {
                error!(?peer, error = %e, "hotline timed out");
                return;
            }
            Err(e) => {
                error!(?peer, error = %e, "failed to read from hotline");
                return;
            }
        };

        let Some((_route, processor)) = engine.find_kind(kind) else {
            engine.fire(Event::ROUTE_NOT_FOUND, &kind);
            continue;
        };

        let context = engine.new_context(&processor);
        let span = context.span().clone();

        if let Some((code, encoded)) = dispatch(&engine, processor, &payload, context)
            .instrument(span)
            .await
        {
            if let Err(e) = line.write_frame(code, &encoded).await {
                error!(?peer, error = %e, "failed to write to hotline");
            }
        }
    }
}

/// Decode, execute, and encode one frame. `None` means no reply is sent.
///
/// A decode failure or a chain panic runs the registered panic handler
/// and still replies from the current (possibly partially populated)
/// reply object; only an unencodable reply produces no frame.
async fn dispatch(
    engine: &Arc<Engine>,
    processor: Arc<Processor>,
    payload: &[u8],
    context: Context,
) -> Option<(u32, Vec<u8>)> {
    let mut exchange = Exchange::new(
        processor.request_template(),
        processor.reply_template(),
        context,
    );

    let status = if let Err(e) = exchange.request.decode(payload) {
        error!(error = %e, "failed to decode frame payload");
        let panic_payload: Box<dyn Any + Send> =
            Box::new(format!("failed to decode frame payload: {e}"));
        engine.panic(&mut exchange, panic_payload.as_ref());
        engine.fire(Event::PANIC, &exchange.context.trace_id().to_string());
        None
    } else {
        match AssertUnwindSafe(engine.execute(&processor, &mut exchange))
            .catch_unwind()
            .await
        {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                error!(error = %e, "processor chain failed");
                return None;
            }
            Err(panic) => {
                engine.panic(&mut exchange, panic.as_ref());
                engine.fire(Event::PANIC, &exchange.context.trace_id().to_string());
                None
            }
        }
    };

    // Without a status from the chain, fall back to one the application
    // put in the context bag, else zero.
    let code = status.map(|s| s as u32).unwrap_or_else(|| {
        exchange
            .context
            .status()
            .map(|s| u32::from(s.as_u16()))
            .unwrap_or(0)
    });

    match exchange.reply.encode() {
        Ok(encoded) => Some((code, encoded)),
        Err(e) => {
            error!(error = %e, "failed to encode reply");
            engine.fire(Event::PANIC, &exchange.context.trace_id().to_string());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runner_debug_reports_liveness() {
        // Construction only; serving is covered by the integration tests.
        let engine = Arc::new(Engine::builder().build().unwrap());
        let service: anima_config::ServiceConfig = serde_yaml_service();
        let runner = TcpRunner::new(engine, &service, None);
        assert!(format!("{runner:?}").contains("alive: true"));
    }

    fn serde_yaml_service() -> anima_config::ServiceConfig {
        anima_config::load_from_str(
            "service:\n  protocol: tcp\n  address: \"127.0.0.1:0\"\n",
            anima_config::ConfigFormat::Yaml,
        )
        .unwrap()
        .service
    }
}
