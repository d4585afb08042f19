//! Middleware chain and the executor
//!
//! Middlewares form an onion around a processor's handler: each may do work
//! before handing control to [`Next`], may consume `Next` at most once, and
//! may rewrite the status and context after the inner layers return.
//! Skipping `Next` short-circuits the rest of the chain, and the
//! short-circuiting middleware's return value becomes the pipeline result.

use crate::context::Exchange;
use crate::error::{Error, Result};
use crate::processor::{Handler, Processor, Status};
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

/// Middleware trait for request/reply processing.
#[async_trait::async_trait]
pub trait Middleware: Send + Sync + fmt::Debug {
    /// Process the exchange, optionally delegating to the rest of the
    /// chain via `next`.
    async fn call(&self, exchange: &mut Exchange, next: Next<'_>) -> Result<Status>;
}

/// The continuation of a middleware chain.
///
/// `Next` is consumed by [`Next::run`], which enforces at the type level
/// that a middleware invokes its continuation at most once.
pub struct Next<'a> {
    stack: &'a [Arc<dyn Middleware>],
    handler: &'a Handler,
}

impl<'a> Next<'a> {
    fn new(stack: &'a [Arc<dyn Middleware>], handler: &'a Handler) -> Self {
        Self { stack, handler }
    }

    /// Run the next middleware, or the terminal handler once the stack is
    /// exhausted. A cancelled context short-circuits every remaining stage.
    pub fn run<'b>(self, exchange: &'b mut Exchange) -> BoxFuture<'b, Result<Status>>
    where
        'a: 'b,
    {
        Box::pin(async move {
            if exchange.context.is_cancelled() {
                return Err(Error::Cancelled);
            }

            match self.stack.split_first() {
                Some((middleware, rest)) => {
                    let next = Next::new(rest, self.handler);
                    middleware.call(exchange, next).await
                }
                None => (self.handler)(exchange).await,
            }
        })
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.stack.len())
            .finish()
    }
}

/// Execute a processor: dispatch the exchange through the middleware list
/// in registration order down to the terminal handler, and unwind in
/// reverse order.
pub async fn execute(processor: &Processor, exchange: &mut Exchange) -> Result<Status> {
    Next::new(processor.middlewares(), processor.handler())
        .run(exchange)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::processor::handler;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing::Span;

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Trace {
        entries: Vec<String>,
    }

    #[derive(Debug)]
    struct Tag {
        name: &'static str,
        short_circuit: bool,
    }

    #[async_trait::async_trait]
    impl Middleware for Tag {
        async fn call(&self, exchange: &mut Exchange, next: Next<'_>) -> Result<Status> {
            exchange
                .reply_as_mut::<Trace>()
                .unwrap()
                .entries
                .push(format!("{}:pre", self.name));

            if self.short_circuit {
                return Ok(-1);
            }

            let status = next.run(exchange).await?;

            exchange
                .reply_as_mut::<Trace>()
                .unwrap()
                .entries
                .push(format!("{}:post", self.name));

            Ok(status)
        }
    }

    fn tracing_processor(middlewares: Vec<Arc<dyn Middleware>>, calls: Arc<AtomicUsize>) -> Processor {
        Processor::new(
            Box::new(Trace::default()),
            Box::new(Trace::default()),
            handler(move |ex: &mut Exchange| {
                let calls = calls.clone();
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    ex.reply_as_mut::<Trace>()
                        .unwrap()
                        .entries
                        .push("handler".to_string());
                    Ok(7)
                })
            }),
            middlewares,
        )
    }

    fn fresh_exchange(processor: &Processor) -> Exchange {
        Exchange::new(
            processor.request_template(),
            processor.reply_template(),
            Context::new("t", Span::none()),
        )
    }

    #[tokio::test]
    async fn test_onion_ordering() {
        let calls = Arc::new(AtomicUsize::new(0));
        let processor = tracing_processor(
            vec![
                Arc::new(Tag {
                    name: "outer",
                    short_circuit: false,
                }),
                Arc::new(Tag {
                    name: "inner",
                    short_circuit: false,
                }),
            ],
            calls.clone(),
        );

        let mut exchange = fresh_exchange(&processor);
        let status = execute(&processor, &mut exchange).await.unwrap();

        assert_eq!(status, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            exchange.reply_as_mut::<Trace>().unwrap().entries,
            vec!["outer:pre", "inner:pre", "handler", "inner:post", "outer:post"]
        );
    }

    #[tokio::test]
    async fn test_short_circuit_skips_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let processor = tracing_processor(
            vec![
                Arc::new(Tag {
                    name: "gate",
                    short_circuit: true,
                }),
                Arc::new(Tag {
                    name: "never",
                    short_circuit: false,
                }),
            ],
            calls.clone(),
        );

        let mut exchange = fresh_exchange(&processor);
        let status = execute(&processor, &mut exchange).await.unwrap();

        assert_eq!(status, -1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            exchange.reply_as_mut::<Trace>().unwrap().entries,
            vec!["gate:pre"]
        );
    }

    #[tokio::test]
    async fn test_empty_chain_calls_handler_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let processor = tracing_processor(Vec::new(), calls.clone());

        let mut exchange = fresh_exchange(&processor);
        execute(&processor, &mut exchange).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_context_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let processor = tracing_processor(Vec::new(), calls.clone());

        let mut exchange = fresh_exchange(&processor);
        exchange.context.cancellation().cancel();

        let err = execute(&processor, &mut exchange).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
