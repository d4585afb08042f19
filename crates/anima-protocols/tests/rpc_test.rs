//! RPC runner integration tests

mod common;

use anima_config::Protocol;
use anima_core::Runner;
use anima_protocols::rpc::Envelope;
use anima_protocols::{Hotline, RpcRunner};
use common::{service, text_engine, RESP_TEXT};
use std::net::TcpListener as StdTcpListener;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

fn spawn_runner() -> (Arc<RpcRunner>, std::net::SocketAddr) {
    let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let runner = Arc::new(RpcRunner::new(
        text_engine(),
        &service(Protocol::Rpc),
        Some(listener),
    ));

    let background = runner.clone();
    tokio::spawn(async move { background.run().await });

    (runner, addr)
}

async fn send(line: &mut Hotline<TcpStream>, trace_id: &str, kind: u32, text: &str) {
    let envelope = Envelope {
        trace_id: trace_id.to_string(),
        kind,
        body: serde_json::json!({ "Text": text }),
        error: None,
    };
    line.write_frame(kind, &serde_json::to_vec(&envelope).unwrap())
        .await
        .unwrap();
}

async fn receive(line: &mut Hotline<TcpStream>) -> Envelope {
    let (_, payload) = line.read_frame().await.unwrap();
    serde_json::from_slice(&payload).unwrap()
}

#[tokio::test]
async fn test_call_and_reply() {
    let (runner, addr) = spawn_runner();

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut line = Hotline::new(stream, Duration::from_secs(2));

    send(&mut line, "call-1", 102, "hi").await;
    let reply = receive(&mut line).await;

    assert_eq!(reply.trace_id, "call-1");
    assert_eq!(reply.kind, RESP_TEXT as u32);
    assert_eq!(reply.body["Text"], "HI");
    assert!(reply.error.is_none());

    runner.shutdown(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test]
async fn test_concurrent_calls_correlate_by_trace_id() {
    let (runner, addr) = spawn_runner();

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut line = Hotline::new(stream, Duration::from_secs(2));

    // The slow call goes first but must not block the fast one.
    send(&mut line, "slow-call", 102, "slow").await;
    send(&mut line, "fast-call", 102, "fast").await;

    let first = receive(&mut line).await;
    let second = receive(&mut line).await;

    assert_eq!(first.trace_id, "fast-call");
    assert_eq!(first.body["Text"], "FAST");
    assert_eq!(second.trace_id, "slow-call");
    assert_eq!(second.body["Text"], "SLOW");

    runner.shutdown(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test]
async fn test_unknown_kind_yields_error_envelope() {
    let (runner, addr) = spawn_runner();

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut line = Hotline::new(stream, Duration::from_secs(2));

    send(&mut line, "missing", 999, "x").await;
    let reply = receive(&mut line).await;

    assert_eq!(reply.trace_id, "missing");
    assert!(reply.error.unwrap().contains("999"));

    runner.shutdown(Duration::from_secs(2)).await.unwrap();
}
