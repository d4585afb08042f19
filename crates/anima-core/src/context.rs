//! Per-request context bag and the exchange that travels the chain

use crate::message::Message;
use bytes::Bytes;
use http::StatusCode;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::Span;

/// Context attached to one in-flight request or job.
///
/// The bag carries the runtime-provided attributes (trace id, logger span,
/// wall-clock second, response plumbing) plus application-defined values
/// keyed by type. It is created per request and released when the response
/// is flushed; the application's context factory may augment it before the
/// chain runs.
pub struct Context {
    trace_id: String,
    timestamp: u64,
    span: Span,
    cancel: CancellationToken,
    status: Option<StatusCode>,
    response_body: Option<Bytes>,
    response_headers: Vec<(String, String)>,
    extensions: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Context {
    /// Create a new context for the given trace id and logger span.
    pub fn new(trace_id: impl Into<String>, span: Span) -> Self {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        Self {
            trace_id: trace_id.into(),
            timestamp,
            span,
            cancel: CancellationToken::new(),
            status: None,
            response_body: None,
            response_headers: Vec::new(),
            extensions: HashMap::new(),
        }
    }

    /// The trace id tagging this request.
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Wall-clock second at which the context was created.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// The logger span for this request.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// The cancellation token observed by the executor.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Derive a token that is cancelled together with this context.
    pub fn child_cancellation(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Whether the context has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// HTTP status supplied by the application, if any.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Supply the HTTP status for the response.
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    /// A prepared response body, used verbatim instead of encoding the
    /// reply message.
    pub fn response_body(&self) -> Option<&Bytes> {
        self.response_body.as_ref()
    }

    /// Supply a prepared response body.
    pub fn set_response_body(&mut self, body: impl Into<Bytes>) {
        self.response_body = Some(body.into());
    }

    /// Response headers supplied by the application.
    pub fn response_headers(&self) -> &[(String, String)] {
        &self.response_headers
    }

    /// Append a response header.
    pub fn insert_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.response_headers.push((name.into(), value.into()));
    }

    /// Get an application-defined value by type.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref())
    }

    /// Get a mutable application-defined value by type.
    pub fn get_mut<T: Any + Send + Sync>(&mut self) -> Option<&mut T> {
        self.extensions
            .get_mut(&TypeId::of::<T>())
            .and_then(|v| v.downcast_mut())
    }

    /// Insert an application-defined value, returning the previous one.
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) -> Option<T> {
        self.extensions
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|v| v.downcast().ok())
            .map(|v| *v)
    }

    /// Remove an application-defined value by type.
    pub fn remove<T: Any + Send + Sync>(&mut self) -> Option<T> {
        self.extensions
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast().ok())
            .map(|v| *v)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("trace_id", &self.trace_id)
            .field("timestamp", &self.timestamp)
            .field("status", &self.status)
            .field("extensions", &self.extensions.len())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// One in-flight request: the cloned request and reply templates plus the
/// context bag. Owned by the runner for the lifetime of the request and
/// threaded mutably through the middleware chain, so the runner can still
/// respond from the reply object after a panic.
#[derive(Debug)]
pub struct Exchange {
    /// Decoded request message.
    pub request: Box<dyn Message>,
    /// Reply message populated by the chain.
    pub reply: Box<dyn Message>,
    /// The context bag.
    pub context: Context,
}

impl Exchange {
    /// Create an exchange from cloned templates and a fresh context.
    pub fn new(request: Box<dyn Message>, reply: Box<dyn Message>, context: Context) -> Self {
        Self {
            request,
            reply,
            context,
        }
    }

    /// Downcast the request message.
    pub fn request_as<T: Any>(&self) -> Option<&T> {
        self.request.as_any().downcast_ref()
    }

    /// Downcast the reply message mutably.
    pub fn reply_as_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.reply.as_any_mut().downcast_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_extensions() {
        let mut ctx = Context::new("trace-1", Span::none());

        #[derive(Debug, PartialEq)]
        struct Tenant(String);

        assert!(ctx.get::<Tenant>().is_none());
        ctx.insert(Tenant("acme".to_string()));
        assert_eq!(ctx.get::<Tenant>(), Some(&Tenant("acme".to_string())));

        let removed = ctx.remove::<Tenant>().unwrap();
        assert_eq!(removed, Tenant("acme".to_string()));
        assert!(ctx.get::<Tenant>().is_none());
    }

    #[test]
    fn test_cancellation_propagates_to_children() {
        let ctx = Context::new("trace-2", Span::none());
        let child = ctx.child_cancellation();

        assert!(!child.is_cancelled());
        ctx.cancellation().cancel();
        assert!(child.is_cancelled());
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn test_response_plumbing() {
        let mut ctx = Context::new("trace-3", Span::none());
        ctx.set_status(StatusCode::CREATED);
        ctx.insert_header("X-Request-Id", "trace-3");
        ctx.set_response_body("prepared");

        assert_eq!(ctx.status(), Some(StatusCode::CREATED));
        assert_eq!(ctx.response_headers().len(), 1);
        assert_eq!(ctx.response_body().unwrap(), &Bytes::from("prepared"));
    }
}
