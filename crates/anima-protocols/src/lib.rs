//! # Anima Protocols
//!
//! The pluggable protocol runners: HTTP/JSON, length-prefixed binary TCP
//! (the hotline framing), and a framed RPC variant with out-of-order
//! replies. Each runner borrows the application's [`anima_core::Engine`]
//! and implements [`anima_core::Runner`].

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod hotline;
pub mod http;
pub mod rpc;
pub mod tcp;

pub use hotline::Hotline;
pub use self::http::{HttpRunner, RequestBody, RequestHead};
pub use rpc::RpcRunner;
pub use tcp::TcpRunner;

use anima_config::{Protocol, ServiceConfig};
use anima_core::{Engine, Runner};
use std::net::TcpListener as StdTcpListener;
use std::sync::Arc;

/// Build the runner selected by the service configuration. A listener
/// inherited from the supervisor takes precedence over binding the
/// configured address.
pub fn new_runner(
    engine: Arc<Engine>,
    service: &ServiceConfig,
    listener: Option<StdTcpListener>,
) -> Arc<dyn Runner> {
    match service.protocol {
        Protocol::Http => Arc::new(HttpRunner::new(engine, service, listener)),
        Protocol::Tcp => Arc::new(TcpRunner::new(engine, service, listener)),
        Protocol::Rpc => Arc::new(RpcRunner::new(engine, service, listener)),
    }
}
