//! Processors: message templates, a terminal handler, and middleware

use crate::context::Exchange;
use crate::error::Result;
use crate::message::Message;
use crate::middleware::Middleware;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

/// Status code produced by a processor chain. Under TCP it becomes the
/// reply frame kind; under HTTP the response status comes from the context
/// bag instead.
pub type Status = i32;

/// The terminal of a middleware chain.
pub type Handler =
    Arc<dyn for<'a> Fn(&'a mut Exchange) -> BoxFuture<'a, Result<Status>> + Send + Sync>;

/// Wrap an async closure into a [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: for<'a> Fn(&'a mut Exchange) -> BoxFuture<'a, Result<Status>> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A processor is the unit of application logic addressed by a route: the
/// request and reply templates cloned per request, the terminal handler,
/// and the ordered middleware list wrapped around it. Immutable after
/// registration.
#[derive(Clone)]
pub struct Processor {
    request: Box<dyn Message>,
    reply: Box<dyn Message>,
    handler: Handler,
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl Processor {
    /// Create a new processor.
    pub fn new(
        request: Box<dyn Message>,
        reply: Box<dyn Message>,
        handler: Handler,
        middlewares: Vec<Arc<dyn Middleware>>,
    ) -> Self {
        Self {
            request,
            reply,
            handler,
            middlewares,
        }
    }

    /// Clone the request template for a fresh request.
    pub fn request_template(&self) -> Box<dyn Message> {
        self.request.clone_box()
    }

    /// Clone the reply template for a fresh request.
    pub fn reply_template(&self) -> Box<dyn Message> {
        self.reply.clone_box()
    }

    /// The terminal handler.
    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    /// The ordered middleware list.
    pub fn middlewares(&self) -> &[Arc<dyn Middleware>] {
        &self.middlewares
    }
}

impl fmt::Debug for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Processor")
            .field("request", &self.request)
            .field("reply", &self.reply)
            .field("middlewares", &self.middlewares.len())
            .finish()
    }
}
