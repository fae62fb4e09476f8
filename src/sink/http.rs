//! Remote sink delivering JSON envelopes over HTTP.
//!
//! # Responsibilities
//! - Queue events and spans without blocking the caller
//! - Deliver them from a background task, retrying with backoff
//! - Let `flush` wait for the queue to drain, bounded by a timeout
//!
//! # Design Decisions
//! - Unbounded queue: capture latency never depends on the remote endpoint
//! - Retries happen on the worker, never on the capturing task
//! - Client errors (4xx other than 429) are not retried

use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use url::Url;

use crate::config::SinkConfig;
use crate::observability::metrics;
use crate::resilience::backoff::Backoff;
use crate::sink::{CaptureSink, Event, EventId, SinkError, TransactionRecord};

/// Unit of delivery.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Envelope {
    Event(Event),
    Transaction(TransactionRecord),
}

#[derive(Debug, Default)]
struct Pending {
    count: AtomicUsize,
    idle: Notify,
}

impl Pending {
    fn done(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

#[derive(Debug, Clone)]
struct RetryPolicy {
    max_retries: u32,
    backoff: Backoff,
}

/// Sink posting to a remote collector endpoint.
#[derive(Debug)]
pub struct HttpSink {
    endpoint: Url,
    tx: mpsc::UnboundedSender<Envelope>,
    pending: Arc<Pending>,
}

impl HttpSink {
    /// Build the sink and spawn its delivery worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: &SinkConfig) -> Result<Self, SinkError> {
        let dsn = config.dsn.as_deref().unwrap_or_default();
        let endpoint: Url = dsn
            .parse()
            .map_err(|e: url::ParseError| SinkError::InvalidEndpoint(dsn.to_string(), e.to_string()))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(SinkError::InvalidEndpoint(
                dsn.to_string(),
                format!("unsupported scheme '{}'", endpoint.scheme()),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        let policy = RetryPolicy {
            max_retries: config.max_retries,
            backoff: Backoff::from_millis(config.retry_base_delay_ms, config.retry_max_delay_ms),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(Pending::default());
        tokio::spawn(deliver_loop(client, endpoint.clone(), policy, rx, pending.clone()));

        tracing::info!(endpoint = %endpoint, "HTTP capture sink started");
        Ok(Self {
            endpoint,
            tx,
            pending,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Number of envelopes not yet delivered or dropped.
    pub fn pending(&self) -> usize {
        self.pending.count.load(Ordering::Acquire)
    }

    fn enqueue(&self, envelope: Envelope) -> bool {
        self.pending.count.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(envelope).is_err() {
            tracing::warn!(endpoint = %self.endpoint, "Capture sink worker stopped, dropping envelope");
            self.pending.done();
            return false;
        }
        true
    }
}

#[async_trait]
impl CaptureSink for HttpSink {
    fn capture_event(&self, event: Event) -> Option<EventId> {
        let id = event.event_id;
        self.enqueue(Envelope::Event(event)).then_some(id)
    }

    fn record_transaction(&self, record: TransactionRecord) {
        self.enqueue(Envelope::Transaction(record));
    }

    async fn flush(&self, timeout: Duration) -> bool {
        let drained = async {
            loop {
                let notified = self.pending.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.pending.count.load(Ordering::Acquire) == 0 {
                    return;
                }
                notified.await;
            }
        };
        let completed = tokio::time::timeout(timeout, drained).await.is_ok();
        if !completed {
            tracing::warn!(
                pending = self.pending(),
                timeout_ms = timeout.as_millis() as u64,
                "Capture sink flush timed out"
            );
        }
        completed
    }
}

async fn deliver_loop(
    client: reqwest::Client,
    endpoint: Url,
    policy: RetryPolicy,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    pending: Arc<Pending>,
) {
    while let Some(envelope) = rx.recv().await {
        match deliver(&client, &endpoint, &policy, &envelope).await {
            Ok(()) => metrics::record_sink_delivery(true),
            Err(e) => {
                metrics::record_sink_delivery(false);
                tracing::warn!(endpoint = %endpoint, error = %e, "Dropping undeliverable envelope");
            }
        }
        pending.done();
    }
    tracing::debug!(endpoint = %endpoint, "Capture sink worker exiting");
}

async fn deliver(
    client: &reqwest::Client,
    endpoint: &Url,
    policy: &RetryPolicy,
    envelope: &Envelope,
) -> Result<(), SinkError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let err = match client.post(endpoint.clone()).json(envelope).send().await {
            Ok(response) if response.status().is_success() => return Ok(()),
            Ok(response) => {
                let status = response.status();
                let err = SinkError::Rejected(status.as_u16());
                if status.is_client_error() && status.as_u16() != 429 {
                    return Err(err);
                }
                err
            }
            Err(e) => SinkError::Client(e),
        };

        if attempt > policy.max_retries {
            return Err(err);
        }
        let delay = policy.backoff.delay(attempt);
        tracing::debug!(attempt, delay = ?delay, error = %err, "Retrying envelope delivery");
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_http_endpoint() {
        let config = SinkConfig {
            dsn: Some("ftp://collector.local/ingest".into()),
            ..SinkConfig::default()
        };
        let err = HttpSink::new(&config).unwrap_err();
        assert!(err.to_string().contains("unsupported scheme"));
    }

    #[test]
    fn test_rejects_garbage_endpoint() {
        let config = SinkConfig {
            dsn: Some("not a url".into()),
            ..SinkConfig::default()
        };
        assert!(matches!(
            HttpSink::new(&config),
            Err(SinkError::InvalidEndpoint(..))
        ));
    }

    #[test]
    fn test_envelope_is_tagged() {
        let record = TransactionRecord {
            trace_id: uuid::Uuid::nil(),
            span_id: uuid::Uuid::nil(),
            parent_span_id: None,
            operation: "cache".into(),
            name: "Get".into(),
            tags: Vec::new(),
            status: crate::monitor::SpanStatus::Ok,
            request_id: None,
            start_ms: 1,
            end_ms: 2,
        };
        let json = serde_json::to_value(Envelope::Transaction(record)).unwrap();
        assert_eq!(json["type"], "transaction");
        assert_eq!(json["status"], "ok");
    }
}
