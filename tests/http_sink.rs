//! Remote sink delivery against a local collector.

use backend_monitor::config::SinkConfig;
use backend_monitor::monitor::MonitorOptions;
use backend_monitor::sink::HttpSink;
use backend_monitor::Monitor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

mod common;

fn sink_config(addr: SocketAddr, max_retries: u32) -> SinkConfig {
    SinkConfig {
        dsn: Some(format!("http://{}/ingest", addr)),
        environment: "staging".into(),
        max_retries,
        retry_base_delay_ms: 1,
        retry_max_delay_ms: 5,
        ..SinkConfig::default()
    }
}

fn monitor(config: &SinkConfig) -> (Monitor, Arc<HttpSink>) {
    let sink = Arc::new(HttpSink::new(config).unwrap());
    (Monitor::with_options(sink.clone(), MonitorOptions::from(config)), sink)
}

#[tokio::test]
async fn test_event_envelope_is_delivered() {
    let (addr, collector) = common::start_collector(&[], Duration::ZERO).await;
    let (monitor, sink) = monitor(&sink_config(addr, 3));

    let id = monitor.capture_message("order 5 settled").unwrap();
    assert!(monitor.flush(Duration::from_secs(5)).await);
    assert_eq!(sink.pending(), 0);

    let received = collector.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["type"], "event");
    assert_eq!(received[0]["event_id"], id.0.to_string());
    assert_eq!(received[0]["message"], "order 5 settled");
    assert_eq!(received[0]["environment"], "staging");
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let (addr, collector) = common::start_collector(&[503, 502], Duration::ZERO).await;
    let (monitor, sink) = monitor(&sink_config(addr, 3));

    monitor.capture_message("retry me");
    assert!(monitor.flush(Duration::from_secs(5)).await);
    assert_eq!(sink.pending(), 0);

    let received = collector.received();
    assert_eq!(received.len(), 3);
    assert!(received.iter().all(|e| e["message"] == "retry me"));
}

#[tokio::test]
async fn test_retries_stop_at_the_limit() {
    let (addr, collector) = common::start_collector(&[500, 500, 500, 500], Duration::ZERO).await;
    let (monitor, _sink) = monitor(&sink_config(addr, 2));

    monitor.capture_message("never accepted");
    assert!(monitor.flush(Duration::from_secs(5)).await);
    assert_eq!(collector.received().len(), 3);
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let (addr, collector) = common::start_collector(&[400], Duration::ZERO).await;
    let (monitor, sink) = monitor(&sink_config(addr, 3));

    monitor.capture_message("malformed");
    assert!(monitor.flush(Duration::from_secs(5)).await);
    assert_eq!(sink.pending(), 0);
    assert_eq!(collector.received().len(), 1);
}

#[tokio::test]
async fn test_flush_honours_its_timeout() {
    let (addr, collector) = common::start_collector(&[], Duration::from_millis(500)).await;
    let (monitor, sink) = monitor(&sink_config(addr, 0));

    let started = Instant::now();
    monitor.capture_message("slow collector");
    // Capturing never waits on the collector.
    assert!(started.elapsed() < Duration::from_millis(100));

    let started = Instant::now();
    assert!(!monitor.flush(Duration::from_millis(50)).await);
    assert!(started.elapsed() < Duration::from_millis(400));
    assert_eq!(sink.pending(), 1);

    assert!(monitor.flush(Duration::from_secs(5)).await);
    assert_eq!(sink.pending(), 0);
    assert_eq!(collector.received().len(), 1);
}

#[tokio::test]
async fn test_flush_with_nothing_pending_returns_at_once() {
    let (addr, _collector) = common::start_collector(&[], Duration::ZERO).await;
    let (monitor, _sink) = monitor(&sink_config(addr, 0));
    assert!(monitor.flush(Duration::from_millis(1)).await);
}
