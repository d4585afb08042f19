//! RPC runner
//!
//! A framed request/response variant over the hotline wire format. Each
//! frame carries a JSON envelope with the caller's correlation trace id,
//! the message kind, and the body. Frames from one connection are
//! dispatched concurrently, so replies may interleave; callers correlate
//! them by trace id. A single writer task serializes the write side.

use crate::hotline::Hotline;
use anima_config::ServiceConfig;
use anima_core::context::Context;
use anima_core::engine::Engine;
use anima_core::processor::Processor;
use anima_core::{Error, Event, Exchange, Result, Runner};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::net::TcpListener as StdTcpListener;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, Instrument};

/// The envelope carried in every RPC frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Caller-chosen correlation id; echoed verbatim in the reply.
    pub trace_id: String,

    /// Message kind on requests; the chain's status code on replies.
    pub kind: u32,

    /// Encoded message body.
    #[serde(default)]
    pub body: serde_json::Value,

    /// Set instead of a body when the call failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The built-in RPC runner.
pub struct RpcRunner {
    engine: Arc<Engine>,
    address: String,
    listener: Mutex<Option<StdTcpListener>>,
    timeout: Duration,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl std::fmt::Debug for RpcRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcRunner")
            .field("address", &self.address)
            .finish()
    }
}

impl RpcRunner {
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
impl Runner for RpcRunner {
    async fn run(&self) -> Result<()> {
        let std_listener = self.take_listener()?;
        std_listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(std_listener)?;

        info!(address = %listener.local_addr()?, "rpc runner listening");

        loop {
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
                        self.shutdown.clone(),
                        self.tracker.clone(),
                    ));
                }
                _ = self.shutdown.cancelled() => break,
            }
        }

        self.tracker.close();
        info!("rpc runner stopped accepting");
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

/// Read envelopes from one connection and fan calls out; one writer task
/// owns the write half.
async fn worker(
    engine: Arc<Engine>,
    stream: TcpStream,
    timeout: Duration,
    shutdown: CancellationToken,
    tracker: TaskTracker,
) {
    let peer = stream.peer_addr().ok();
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = Hotline::new(read_half, timeout);

    let (replies, mut outbox) = mpsc::channel::<Envelope>(32);

    let writer = tokio::spawn(async move {
        let mut writer = Hotline::new(write_half, timeout);
        while let Some(envelope) = outbox.recv().await {
            let payload = match serde_json::to_vec(&envelope) {
                Ok(payload) => payload,
                Err(e) => {
                    error!(error = %e, "failed to encode reply envelope");
                    continue;
                }
            };
            if let Err(e) = writer.write_frame(envelope.kind, &payload).await {
                error!(error = %e, "failed to write reply frame");
                break;
            }
        }
    });

    while !shutdown.is_cancelled() {
        let (_, payload) = match reader.read_frame().await {
            Ok(frame) => frame,
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::TimedOut => {
                debug!(?peer, "rpc connection idle timeout");
                break;
            }
            Err(e) => {
                error!(?peer, error = %e, "failed to read rpc frame");
                break;
            }
        };

        let envelope: Envelope = match serde_json::from_slice(&payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(?peer, error = %e, "malformed rpc envelope");
                continue;
            }
        };

        let Some((_route, processor)) = engine.find_kind(envelope.kind) else {
            engine.fire(Event::ROUTE_NOT_FOUND, &envelope.kind);
            let _ = replies
                .send(Envelope {
                    trace_id: envelope.trace_id,
                    kind: 0,
                    body: serde_json::Value::Null,
                    error: Some(format!("unknown message kind {}", envelope.kind)),
                })
                .await;
            continue;
        };

        let context = engine.new_context(&processor);
        let span = context.span().clone();

        tracker.spawn(
            call(Arc::clone(&engine), processor, envelope, context, replies.clone())
                .instrument(span),
        );
    }

    drop(replies);
    let _ = writer.await;
}

/// Execute one call and push its reply envelope to the writer.
async fn call(
    engine: Arc<Engine>,
    processor: Arc<Processor>,
    envelope: Envelope,
    context: Context,
    replies: mpsc::Sender<Envelope>,
) {
    let trace_id = envelope.trace_id.clone();

    let mut exchange = Exchange::new(
        processor.request_template(),
        processor.reply_template(),
        context,
    );

    let failure = |message: String| Envelope {
        trace_id: trace_id.clone(),
        kind: 0,
        body: serde_json::Value::Null,
        error: Some(message),
    };

    if !envelope.body.is_null() {
        let raw = match serde_json::to_vec(&envelope.body) {
            Ok(raw) => raw,
            Err(e) => {
                let _ = replies.send(failure(format!("invalid body: {e}"))).await;
                return;
            }
        };
        if let Err(e) = exchange.request.decode(&raw) {
            error!(error = %e, "failed to decode rpc body");
            let panic_payload: Box<dyn Any + Send> =
                Box::new(format!("failed to decode rpc body: {e}"));
            engine.panic(&mut exchange, panic_payload.as_ref());
            engine.fire(Event::PANIC, &exchange.context.trace_id().to_string());
            let _ = replies.send(failure(format!("failed to decode body: {e}"))).await;
            return;
        }
    }

    let status = match AssertUnwindSafe(engine.execute(&processor, &mut exchange))
        .catch_unwind()
        .await
    {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            error!(error = %e, "processor chain failed");
            let _ = replies.send(failure(e.to_string())).await;
            return;
        }
        Err(panic) => {
            engine.panic(&mut exchange, panic.as_ref());
            engine.fire(Event::PANIC, &exchange.context.trace_id().to_string());
            let _ = replies.send(failure("call panicked".to_string())).await;
            return;
        }
    };

    let body = match exchange
        .reply
        .encode()
        .and_then(|raw| Ok(serde_json::from_slice(&raw)?))
    {
        Ok(body) => body,
        Err(e) => {
            error!(error = %e, "failed to encode rpc reply");
            engine.fire(Event::PANIC, &exchange.context.trace_id().to_string());
            let _ = replies.send(failure(format!("failed to encode reply: {e}"))).await;
            return;
        }
    };

    let _ = replies
        .send(Envelope {
            trace_id,
            kind: status as u32,
            body,
            error: None,
        })
        .await;
}
