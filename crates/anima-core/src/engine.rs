//! The engine: the application surface a protocol runner borrows
//!
//! Runners never own the application; they borrow this non-owning slice of
//! it: the route table, the context and logger factories, the panic
//! handler, and the event bus. Keeping the seam here lets every transport
//! live in its own crate without a back-reference cycle.

use crate::context::{Context, Exchange};
use crate::error::{Error, Result};
use crate::event::{Event, EventBus};
use crate::processor::{Processor, Status};
use crate::route::Route;
use crate::trace;
use http::Method;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::Span;

/// Augments the freshly built context bag before the chain runs.
pub type ContextFactory = Arc<dyn Fn(&mut Context, &Processor) + Send + Sync>;

/// Produces the logger span for one trace id.
pub type LoggerFactory = Arc<dyn Fn(&str) -> Span + Send + Sync>;

/// Invoked when a request panics; receives the exchange (with the possibly
/// partially populated reply) and the panic payload.
pub type PanicHandler = Arc<dyn Fn(&mut Exchange, &(dyn Any + Send)) + Send + Sync>;

/// Render a panic payload as a message for logging.
pub fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic payload"
    }
}

/// The executor surface shared by every runner of one application.
pub struct Engine {
    routes: Vec<(Route, Arc<Processor>)>,
    by_id: HashMap<u32, usize>,
    by_http: HashMap<(Method, String), usize>,
    context_factory: ContextFactory,
    logger_factory: LoggerFactory,
    panic_handler: PanicHandler,
    events: EventBus,
}

impl Engine {
    /// Start building an engine.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// All registered routes in registration order.
    pub fn routes(&self) -> &[(Route, Arc<Processor>)] {
        &self.routes
    }

    /// Look up a processor by message kind.
    pub fn find_kind(&self, kind: u32) -> Option<(&Route, Arc<Processor>)> {
        self.by_id
            .get(&kind)
            .map(|&i| (&self.routes[i].0, Arc::clone(&self.routes[i].1)))
    }

    /// Look up a processor by HTTP method and path.
    pub fn find_http(&self, method: &Method, path: &str) -> Option<(&Route, Arc<Processor>)> {
        self.by_http
            .get(&(method.clone(), path.to_string()))
            .map(|&i| (&self.routes[i].0, Arc::clone(&self.routes[i].1)))
    }

    /// Build the context bag for a fresh request: generate a trace id,
    /// derive the logger span, and let the application's context factory
    /// augment the result.
    pub fn new_context(&self, processor: &Processor) -> Context {
        let trace_id = trace::generate();
        let span = (self.logger_factory)(&trace_id);
        let mut context = Context::new(trace_id, span);
        (self.context_factory)(&mut context, processor);
        context
    }

    /// Execute a processor chain against the exchange.
    pub async fn execute(&self, processor: &Processor, exchange: &mut Exchange) -> Result<Status> {
        crate::middleware::execute(processor, exchange).await
    }

    /// Invoke the registered panic handler.
    pub fn panic(&self, exchange: &mut Exchange, payload: &(dyn Any + Send)) {
        (self.panic_handler)(exchange, payload);
    }

    /// The event bus of this application.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Fire an event on the bus.
    pub fn fire(&self, event: Event, payload: &dyn Any) {
        self.events.fire(event, payload);
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("routes", &self.routes.len())
            .finish()
    }
}

/// Builder for [`Engine`].
pub struct EngineBuilder {
    routes: Vec<(Route, Arc<Processor>)>,
    context_factory: ContextFactory,
    logger_factory: LoggerFactory,
    panic_handler: PanicHandler,
    events: EventBus,
}

impl EngineBuilder {
    fn new() -> Self {
        Self {
            routes: Vec::new(),
            context_factory: Arc::new(|_, _| {}),
            logger_factory: Arc::new(|trace_id| {
                tracing::info_span!("request", trace_id = %trace_id)
            }),
            panic_handler: Arc::new(|exchange, payload| {
                tracing::error!(
                    trace_id = %exchange.context.trace_id(),
                    panic = panic_message(payload),
                    "request panicked"
                );
            }),
            events: EventBus::new(),
        }
    }

    /// Register a route and its processor.
    pub fn route(mut self, route: Route, processor: Processor) -> Self {
        self.routes.push((route, Arc::new(processor)));
        self
    }

    /// Replace the context factory.
    pub fn context_factory(mut self, factory: ContextFactory) -> Self {
        self.context_factory = factory;
        self
    }

    /// Replace the logger factory.
    pub fn logger_factory(mut self, factory: LoggerFactory) -> Self {
        self.logger_factory = factory;
        self
    }

    /// Replace the panic handler.
    pub fn panic_handler(mut self, handler: PanicHandler) -> Self {
        self.panic_handler = handler;
        self
    }

    /// Register an event listener.
    pub fn on(self, event: Event, listener: crate::event::Listener) -> Self {
        self.events.on(event, listener);
        self
    }

    /// Build the engine, verifying route invariants.
    pub fn build(self) -> Result<Engine> {
        const METHODS: [Method; 5] = [
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
        ];

        let mut by_id = HashMap::new();
        let mut by_http = HashMap::new();

        for (index, (route, _)) in self.routes.iter().enumerate() {
            if by_id.insert(route.id(), index).is_some() {
                return Err(Error::DuplicateRoute(route.id()));
            }
            if !METHODS.contains(route.method()) {
                return Err(Error::Config(format!(
                    "unsupported HTTP method {} on route {}",
                    route.method(),
                    route.id()
                )));
            }
            by_http.insert((route.method().clone(), route.uri().to_string()), index);
        }

        Ok(Engine {
            routes: self.routes,
            by_id,
            by_http,
            context_factory: self.context_factory,
            logger_factory: self.logger_factory,
            panic_handler: self.panic_handler,
            events: self.events,
        })
    }
}

impl fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("routes", &self.routes.len())
            .finish()
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
