//! Shared fixtures for the runner integration tests

use anima_config::{Protocol, ServiceConfig};
use anima_core::prelude::*;
use anima_core::processor::handler;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Reply kind for the text processor.
pub const RESP_TEXT: i32 = 202;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReqText {
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RespText {
    pub text: String,
}

/// Middleware that uppercases the reply text after the handler runs.
#[derive(Debug)]
pub struct Uppercase;

#[async_trait::async_trait]
impl Middleware for Uppercase {
    async fn call(
        &self,
        exchange: &mut Exchange,
        next: Next<'_>,
    ) -> anima_core::Result<Status> {
        let status = next.run(exchange).await?;
        let reply = exchange.reply_as_mut::<RespText>().unwrap();
        reply.text = reply.text.to_uppercase();
        Ok(status)
    }
}

fn echo_handler(exchange: &mut Exchange) -> futures::future::BoxFuture<'_, anima_core::Result<Status>> {
    Box::pin(async move {
        let text = exchange.request_as::<ReqText>().unwrap().text.clone();
        if text == "slow" {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        exchange.reply_as_mut::<RespText>().unwrap().text = text;
        Ok(RESP_TEXT)
    })
}

/// An engine with one text-echo processor at route 102 / POST /v1/text,
/// wrapped in the uppercasing middleware.
pub fn text_engine() -> Arc<Engine> {
    let processor = Processor::new(
        Box::new(ReqText::default()),
        Box::new(RespText::default()),
        handler(echo_handler),
        vec![Arc::new(Uppercase)],
    );

    Arc::new(
        Engine::builder()
            .route(Route::new(102, http::Method::POST, "/v1/text", "text"), processor)
            .build()
            .unwrap(),
    )
}

/// Service settings for a runner test; the pre-bound listener supplies
/// the port.
pub fn service(protocol: Protocol) -> ServiceConfig {
    ServiceConfig {
        protocol,
        address: "127.0.0.1:0".to_string(),
        read_timeout: Duration::from_secs(2),
        write_timeout: Duration::from_secs(2),
        idle_timeout: Duration::from_secs(5),
        shutdown_timeout: Duration::from_secs(2),
    }
}
