//! Application lifecycle integration tests

use anima_config::{Config, StaticSettings};
use anima_core::processor::handler;
use anima_core::{Event, Exchange, Method, Processor, Route};
use anima_queue::Job;
use anima_runtime::{Application, Daemon};
use serde::{Deserialize, Serialize};
use std::net::TcpListener as StdTcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Text {
    text: String,
}

fn config(protocol: &str) -> Config {
    anima_config::load_from_str(
        &format!(
            r#"
service:
  protocol: {protocol}
  address: "127.0.0.1:0"
  read_timeout: 2s
  write_timeout: 2s
queue:
  - name: jobs
    driver: memory
    queues: [default]
    workers: 2
"#
        ),
        anima_config::ConfigFormat::Yaml,
    )
    .unwrap()
}

fn echo_processor() -> Processor {
    Processor::new(
        Box::new(Text::default()),
        Box::new(Text::default()),
        handler(|ex: &mut Exchange| {
            Box::pin(async move {
                let text = ex.request_as::<Text>().unwrap().text.clone();
                ex.reply_as_mut::<Text>().unwrap().text = text.to_uppercase();
                Ok(200)
            })
        }),
        Vec::new(),
    )
}

#[tokio::test]
async fn test_boot_builds_queues_and_fires_event() {
    let booted = Arc::new(AtomicUsize::new(0));
    let booted_clone = booted.clone();

    let app = Application::builder("svc")
        .settings(StaticSettings::new(config("http")))
        .on(
            Event::BOOT,
            Arc::new(move |_| {
                booted_clone.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .build()
        .unwrap();

    app.boot().await.unwrap();

    assert_eq!(booted.load(Ordering::SeqCst), 1);
    assert!(app.queue("jobs:default").is_some());
    assert!(app.queue("jobs:missing").is_none());
    assert_eq!(app.config().unwrap().queue.len(), 1);
}

#[tokio::test]
async fn test_unconfigured_cache_yields_null_driver() {
    let app = Application::builder("svc")
        .settings(StaticSettings::new(config("http")))
        .build()
        .unwrap();
    app.boot().await.unwrap();

    let cache = app.cache("sessions");
    let err = cache.get("k").await.unwrap_err();
    assert!(err.to_string().contains("sessions"));
}

#[tokio::test]
async fn test_reload_fires_event_without_cancelling() {
    let reloaded = Arc::new(AtomicUsize::new(0));
    let reloaded_clone = reloaded.clone();

    let app = Application::builder("svc")
        .settings(StaticSettings::new(config("http")))
        .on(
            Event::RELOAD,
            Arc::new(move |_| {
                reloaded_clone.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .build()
        .unwrap();

    app.boot().await.unwrap();
    app.reload().await.unwrap();
    app.reload().await.unwrap();

    assert_eq!(reloaded.load(Ordering::SeqCst), 2);
    assert!(app.queue("jobs:default").is_some());
}

#[tokio::test]
async fn test_http_application_serves_requests() {
    let app = Application::builder("svc")
        .settings(StaticSettings::new(config("http")))
        .route(Route::new(102, Method::POST, "/v1/text", "text"), echo_processor())
        .build()
        .unwrap();

    app.boot().await.unwrap();

    // Pin the port before the runner takes a listener clone.
    let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    app.set_listener(listener);

    let background = Arc::clone(&app);
    tokio::spawn(async move { background.run().await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let body = r#"{"Text":"hello"}"#;
    let request = format!(
        "POST /v1/text HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len(),
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.contains(r#"{"Text":"HELLO"}"#), "{response}");

    app.shutdown(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test]
async fn test_queue_worker_application_processes_jobs() {
    let processed = Arc::new(AtomicUsize::new(0));
    let processed_clone = processed.clone();

    let terminated = Arc::new(AtomicUsize::new(0));
    let terminated_clone = terminated.clone();

    let app = Application::builder("worker")
        .settings(StaticSettings::new(config("http")))
        .job(
            7,
            Arc::new(move |_queue, _job| {
                let processed = processed_clone.clone();
                Box::pin(async move {
                    processed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        )
        .queue_worker("jobs:default", 0)
        .on(
            Event::TERMINATE,
            Arc::new(move |_| {
                terminated_clone.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .build()
        .unwrap();

    app.boot().await.unwrap();

    let queue = app.queue("jobs:default").unwrap();
    let mut job = Job::new(7, "payload");
    queue.enqueue(&mut job).await.unwrap();

    let background = Arc::clone(&app);
    tokio::spawn(async move { background.run().await });
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(processed.load(Ordering::SeqCst), 1);
    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.backlog, 0);

    app.shutdown(Duration::from_secs(2)).await.unwrap();
    assert_eq!(terminated.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_daemons_start_with_run_and_cancel_on_shutdown() {
    let ticks = Arc::new(AtomicUsize::new(0));
    let ticks_clone = ticks.clone();

    let daemon = Daemon::new(
        "ticker",
        Box::new(move |cancel| {
            Box::pin(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_millis(20)) => {
                            ticks_clone.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                }
            })
        }),
    );

    let app = Application::builder("svc")
        .settings(StaticSettings::new(config("http")))
        .daemon(daemon)
        .build()
        .unwrap();

    app.boot().await.unwrap();
    app.set_listener(StdTcpListener::bind("127.0.0.1:0").unwrap());

    let background = Arc::clone(&app);
    tokio::spawn(async move { background.run().await });
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(ticks.load(Ordering::SeqCst) > 0);

    app.shutdown(Duration::from_secs(2)).await.unwrap();
    let settled = ticks.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(ticks.load(Ordering::SeqCst), settled);
}
