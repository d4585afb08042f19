//! # Anima Core
//!
//! Core types, traits, and the executor for the Anima runtime.
//!
//! This crate provides the foundational abstractions shared by every
//! protocol runner and by the queue worker:
//! - Message templates and the exchange they travel in
//! - The middleware chain and its executor
//! - Processors and routes
//! - The per-request context bag
//! - The synchronous event bus
//! - The engine surface runners borrow from an application

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod context;
pub mod engine;
pub mod error;
pub mod event;
pub mod message;
pub mod middleware;
pub mod processor;
pub mod route;
pub mod runner;
pub mod trace;

pub use context::{Context, Exchange};
pub use engine::{ContextFactory, Engine, EngineBuilder, LoggerFactory, PanicHandler};
pub use error::{Error, Result};
pub use event::{Event, EventBus, Listener};
pub use message::Message;
pub use middleware::{execute, Middleware, Next};
pub use processor::{handler, Handler, Processor, Status};
pub use route::Route;
pub use runner::Runner;

// Re-export commonly used HTTP types
pub use http::{Method, StatusCode};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::context::{Context, Exchange};
    pub use crate::engine::{Engine, EngineBuilder};
    pub use crate::error::{Error, Result};
    pub use crate::event::Event;
    pub use crate::message::Message;
    pub use crate::middleware::{Middleware, Next};
    pub use crate::processor::{handler, Processor, Status};
    pub use crate::route::Route;
    pub use crate::runner::Runner;
}
