//! Shared utilities for integration tests.

use axum::body::Bytes;
use axum::extract::{Path, Query};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::routing::any;
use axum::{Json, Router};
use backend_monitor::sink::MemorySink;
use backend_monitor::Monitor;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Monitor recording into a fresh in-memory sink.
#[allow(dead_code)]
pub fn monitor_with_sink() -> (Monitor, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    (Monitor::new(sink.clone()), sink)
}

/// Start a backend that echoes every request back as JSON.
///
/// `/status/{code}` answers with that status code instead of 200.
#[allow(dead_code)]
pub async fn start_echo_backend() -> SocketAddr {
    let app = Router::new()
        .route("/status/{code}", any(status))
        .fallback(echo);
    serve(app).await
}

/// Serve `app` on an ephemeral local port.
#[allow(dead_code)]
pub async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

async fn status(Path(code): Path<u16>) -> (StatusCode, String) {
    let code = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (code, code.canonical_reason().unwrap_or_default().to_string())
}

async fn echo(
    method: Method,
    uri: axum::http::Uri,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Value> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);
    Json(json!({
        "method": method.as_str(),
        "path": uri.path(),
        "query": query,
        "requestId": header("x-request-id"),
        "authorization": header("authorization"),
        "contentType": header("content-type"),
        "body": String::from_utf8_lossy(&body),
    }))
}

/// Requests received by a [`start_collector`] instance.
#[allow(dead_code)]
#[derive(Debug, Default)]
pub struct Collector {
    /// Status codes to answer with, in order. 200 once exhausted.
    script: std::sync::Mutex<std::collections::VecDeque<u16>>,
    received: std::sync::Mutex<Vec<Value>>,
    delay: std::time::Duration,
}

#[allow(dead_code)]
impl Collector {
    pub fn received(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }
}

/// Start a capture collector on `/ingest` that records every envelope and
/// answers with the scripted status codes after `delay`.
#[allow(dead_code)]
pub async fn start_collector(script: &[u16], delay: std::time::Duration) -> (SocketAddr, Arc<Collector>) {
    let collector = Arc::new(Collector {
        script: std::sync::Mutex::new(script.iter().copied().collect()),
        received: std::sync::Mutex::new(Vec::new()),
        delay,
    });
    let app = Router::new()
        .route("/ingest", axum::routing::post(ingest))
        .with_state(collector.clone());
    (serve(app).await, collector)
}

async fn ingest(axum::extract::State(collector): axum::extract::State<Arc<Collector>>, Json(envelope): Json<Value>) -> StatusCode {
    collector.received.lock().unwrap().push(envelope);
    tokio::time::sleep(collector.delay).await;
    let code = collector.script.lock().unwrap().pop_front().unwrap_or(200);
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}
