//! Sink writing captures and spans to the tracing subscriber.

use async_trait::async_trait;
use std::time::Duration;

use crate::monitor::scope::Level;
use crate::sink::{CaptureSink, Event, EventId, TransactionRecord};

/// Fallback sink used when no remote endpoint is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl CaptureSink for LogSink {
    fn capture_event(&self, event: Event) -> Option<EventId> {
        let chain = event
            .exception
            .as_ref()
            .map(|e| e.chain.join(": "))
            .unwrap_or_default();
        match event.level {
            Level::Fatal | Level::Error => tracing::error!(
                event_id = %event.event_id,
                level = %event.level,
                tags = ?event.tags,
                caused_by = %chain,
                "{}", event.message
            ),
            Level::Warning => tracing::warn!(
                event_id = %event.event_id,
                tags = ?event.tags,
                "{}", event.message
            ),
            Level::Info | Level::Debug => tracing::info!(
                event_id = %event.event_id,
                level = %event.level,
                tags = ?event.tags,
                "{}", event.message
            ),
        }
        Some(event.event_id)
    }

    fn record_transaction(&self, record: TransactionRecord) {
        tracing::debug!(
            trace_id = %record.trace_id,
            span_id = %record.span_id,
            operation = %record.operation,
            name = %record.name,
            status = %record.status,
            tags = ?record.tags,
            "Transaction recorded"
        );
    }

    async fn flush(&self, _timeout: Duration) -> bool {
        true
    }
}
