//! Capture sink subsystem.
//!
//! # Data Flow
//! ```text
//! Monitor::capture / capture_message
//!     → Event (scope applied on an isolated copy)
//!     → CaptureSink::capture_event
//!
//! Transaction::finish
//!     → TransactionRecord
//!     → CaptureSink::record_transaction
//!
//! Monitor::flush(timeout)
//!     → CaptureSink::flush (bounded wait for pending deliveries)
//! ```
//!
//! # Design Decisions
//! - Capture and span recording never block the caller; delivery is queued
//! - Delivery failures are logged, never surfaced to business code
//! - `flush` is the only operation allowed to wait, and only up to its timeout

pub mod event;
pub mod http;
pub mod log;
pub mod memory;

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub use event::{Event, EventId, ExceptionInfo, TransactionRecord};
pub use http::HttpSink;
pub use log::LogSink;
pub use memory::MemorySink;

/// Backend accepting captured events and finished spans.
#[async_trait]
pub trait CaptureSink: Send + Sync + fmt::Debug {
    /// Enqueue an event. Returns its id, or `None` when the sink dropped it.
    fn capture_event(&self, event: Event) -> Option<EventId>;

    /// Enqueue a finished span.
    fn record_transaction(&self, record: TransactionRecord);

    /// Wait until everything enqueued so far is delivered or `timeout` elapses.
    /// Returns `true` when the queue drained in time.
    async fn flush(&self, timeout: Duration) -> bool;
}

/// Errors raised while building or delivering to a sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("invalid sink endpoint '{0}': {1}")]
    InvalidEndpoint(String, String),

    #[error("failed to build sink HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("sink rejected delivery with status {0}")]
    Rejected(u16),
}
