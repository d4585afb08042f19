//! HTTP runner
//!
//! Serves the application's routes as an HTTP/JSON surface. Each request
//! gets a fresh trace id and logger span, cloned message templates, a
//! context built through the application factory, a JSON body decode, the
//! processor chain, and a JSON response assembled from the context bag
//! (prepared body, headers, status) or the encoded reply.

use anima_config::ServiceConfig;
use anima_core::context::Context;
use anima_core::engine::Engine;
use anima_core::processor::Processor;
use anima_core::{Error, Event, Exchange, Result, Runner};
use bytes::Bytes;
use futures::FutureExt;
use http::{header, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use std::any::Any;
use std::convert::Infallible;
use std::net::TcpListener as StdTcpListener;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, Instrument};

/// Body type alias
pub type Body = Full<Bytes>;

/// The raw request head, stored in the context bag for middleware and
/// handlers.
#[derive(Debug)]
pub struct RequestHead(pub http::request::Parts);

/// The raw request body bytes, stored in the context bag.
#[derive(Debug, Clone)]
pub struct RequestBody(pub Bytes);

/// The built-in HTTP runner.
pub struct HttpRunner {
    engine: Arc<Engine>,
    address: String,
    listener: Mutex<Option<StdTcpListener>>,
    read_timeout: Duration,
    write_timeout: Duration,
    idle_timeout: Duration,
    shutdown: CancellationToken,
    in_flight: Arc<AtomicUsize>,
}

impl std::fmt::Debug for HttpRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRunner")
            .field("address", &self.address)
            .field("in_flight", &self.in_flight.load(Ordering::Relaxed))
            .finish()
    }
}

impl HttpRunner {
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
            read_timeout: service.read_timeout,
            write_timeout: service.write_timeout,
            idle_timeout: service.idle_timeout,
            shutdown: CancellationToken::new(),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Requests currently being served.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
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
impl Runner for HttpRunner {
    async fn run(&self) -> Result<()> {
        let std_listener = self.take_listener()?;
        std_listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(std_listener)?;

        info!(address = %listener.local_addr()?, "http runner listening");

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

                    let engine = Arc::clone(&self.engine);
                    let in_flight = Arc::clone(&self.in_flight);
                    let read_timeout = self.read_timeout;
                    let write_timeout = self.write_timeout;
                    let idle_timeout = self.idle_timeout;

                    tokio::spawn(async move {
                        let service = service_fn(move |req: Request<Incoming>| {
                            let engine = Arc::clone(&engine);
                            let in_flight = Arc::clone(&in_flight);
                            async move {
                                in_flight.fetch_add(1, Ordering::SeqCst);
                                let response = serve(engine, req, read_timeout, write_timeout).await;
                                in_flight.fetch_sub(1, Ordering::SeqCst);
                                Ok::<_, Infallible>(response)
                            }
                        });

                        let io = TokioIo::new(stream);
                        let conn = hyper::server::conn::http1::Builder::new()
                            .timer(TokioTimer::new())
                            .header_read_timeout(idle_timeout)
                            .serve_connection(io, service);

                        if let Err(e) = conn.await {
                            debug!(error = %e, "http connection closed with error");
                        }
                    });
                }
                _ = self.shutdown.cancelled() => break,
            }
        }

        info!("http runner stopped accepting");
        Ok(())
    }

    async fn shutdown(&self, timeout: Duration) -> Result<()> {
        self.shutdown.cancel();

        let start = std::time::Instant::now();
        loop {
            let active = self.in_flight.load(Ordering::SeqCst);
            if active == 0 {
                return Ok(());
            }
            if start.elapsed() >= timeout {
                tracing::warn!(active, "shutdown budget elapsed with requests in flight");
                return Err(Error::ShutdownTimeout);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

/// Route and serve one request.
async fn serve(
    engine: Arc<Engine>,
    req: Request<Incoming>,
    read_timeout: Duration,
    write_timeout: Duration,
) -> Response<Body> {
    let (parts, body) = req.into_parts();

    let Some((_route, processor)) = engine.find_http(&parts.method, parts.uri.path()) else {
        engine.fire(Event::ROUTE_NOT_FOUND, &parts.uri.path().to_string());
        return status_response(StatusCode::NOT_FOUND);
    };

    let context = engine.new_context(&processor);
    let span = context.span().clone();

    let request = handle(engine.clone(), processor, parts, body, context, read_timeout);
    match tokio::time::timeout(write_timeout, request.instrument(span)).await {
        Ok(response) => response,
        Err(_) => {
            error!("request handling exceeded the write timeout");
            status_response(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

async fn handle(
    engine: Arc<Engine>,
    processor: Arc<Processor>,
    parts: http::request::Parts,
    body: Incoming,
    mut context: Context,
    read_timeout: Duration,
) -> Response<Body> {
    let body_bytes = match tokio::time::timeout(read_timeout, body.collect()).await {
        Ok(Ok(collected)) => collected.to_bytes(),
        Ok(Err(e)) => {
            error!(error = %e, "failed to read request body");
            return status_response(StatusCode::BAD_REQUEST);
        }
        Err(_) => {
            error!("timed out reading request body");
            return status_response(StatusCode::REQUEST_TIMEOUT);
        }
    };

    context.insert(RequestHead(parts));
    context.insert(RequestBody(body_bytes.clone()));

    let mut exchange = Exchange::new(
        processor.request_template(),
        processor.reply_template(),
        context,
    );

    if !body_bytes.is_empty() {
        if let Err(e) = exchange.request.decode(&body_bytes) {
            error!(error = %e, "failed to decode request body");
            let payload: Box<dyn Any + Send> =
                Box::new(format!("failed to decode request body: {e}"));
            engine.panic(&mut exchange, payload.as_ref());
            engine.fire(Event::PANIC, &exchange.context.trace_id().to_string());
            return respond(&exchange);
        }
    }

    match AssertUnwindSafe(engine.execute(&processor, &mut exchange))
        .catch_unwind()
        .await
    {
        Ok(Ok(_status)) => respond(&exchange),
        Ok(Err(e)) => {
            error!(error = %e, "processor chain failed");
            let mut response = respond(&exchange);
            if exchange.context.status().is_none() {
                *response.status_mut() = e.to_status_code();
            }
            response
        }
        Err(panic) => {
            engine.panic(&mut exchange, panic.as_ref());
            engine.fire(Event::PANIC, &exchange.context.trace_id().to_string());
            respond(&exchange)
        }
    }
}

/// Assemble the response: a prepared body from the context wins over
/// encoding the reply; headers from the context are merged on top of the
/// JSON content type; the context status applies, defaulting to 200.
fn respond(exchange: &Exchange) -> Response<Body> {
    let body = match exchange.context.response_body() {
        Some(prepared) => prepared.clone(),
        None => match exchange.reply.encode() {
            Ok(encoded) => Bytes::from(encoded),
            Err(e) => {
                error!(error = %e, "failed to encode reply");
                return status_response(StatusCode::INTERNAL_SERVER_ERROR);
            }
        },
    };

    let mut builder = Response::builder()
        .status(exchange.context.status().unwrap_or(StatusCode::OK))
        .header(header::CONTENT_TYPE, "application/json");

    for (name, value) in exchange.context.response_headers() {
        builder = builder.header(name.as_str(), value.as_str());
    }

    builder
        .body(Full::new(body))
        .unwrap_or_else(|e| {
            error!(error = %e, "failed to build response");
            status_response(StatusCode::INTERNAL_SERVER_ERROR)
        })
}

fn status_response(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}
