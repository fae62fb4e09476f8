//! Transaction spans.
//!
//! # State Transitions
//! ```text
//! created → tagged (zero or more times) → finished
//! ```
//! There is no way back from `finished`. A second finish is logged and ignored,
//! so every span hands exactly one record to the capture sink.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::SystemTime;
use uuid::Uuid;

use crate::monitor::context::Context;
use crate::monitor::types::{SpanStatus, Tag, Tick, TransactionInfo};
use crate::observability::metrics;
use crate::sink::{CaptureSink, TransactionRecord};

/// Shared handle to an in-flight span.
pub type TransactionRef = Arc<dyn Transaction>;

/// One in-flight unit of work.
pub trait Transaction: Send + Sync + fmt::Debug {
    /// Start a span nested under this one. Only `tick.tags` label the child.
    fn start_child_transaction(&self, tick: Tick) -> TransactionRef;

    /// Derive a context in which this transaction is the active one.
    fn create_new_transaction_context(&self, ctx: &Context) -> Context;

    /// Record the end time. No-op when already finished.
    fn finish(&self);

    /// Apply `tags`, then finish.
    fn finish_with_tags(&self, tags: Vec<Tag>);

    /// Set the outcome status. Ignored after finish.
    fn set_status(&self, status: SpanStatus);

    /// Snapshot of the span, valid before and after finish.
    fn info(&self) -> TransactionInfo;
}

struct SpanState {
    tags: Vec<Tag>,
    start: SystemTime,
    end: Option<SystemTime>,
    status: SpanStatus,
}

/// Span reporting to a [`CaptureSink`] when finished.
pub struct Span {
    tick: Tick,
    trace_id: Uuid,
    span_id: Uuid,
    parent_span_id: Option<Uuid>,
    request_id: Option<String>,
    sink: Arc<dyn CaptureSink>,
    state: Mutex<SpanState>,
    this: Weak<Span>,
}

impl Span {
    /// Start a new root span.
    pub(crate) fn root(sink: Arc<dyn CaptureSink>, tick: Tick, request_id: Option<String>) -> Arc<Self> {
        Self::build(sink, tick, Uuid::new_v4(), None, request_id)
    }

    fn build(
        sink: Arc<dyn CaptureSink>,
        tick: Tick,
        trace_id: Uuid,
        parent_span_id: Option<Uuid>,
        request_id: Option<String>,
    ) -> Arc<Self> {
        let span_id = Uuid::new_v4();
        tracing::trace!(
            %trace_id,
            %span_id,
            operation = %tick.operation,
            name = %tick.label(),
            "Span started"
        );

        Arc::new_cyclic(|this| Self {
            state: Mutex::new(SpanState {
                tags: tick.tags.clone(),
                start: SystemTime::now(),
                end: None,
                status: SpanStatus::Undefined,
            }),
            tick,
            trace_id,
            span_id,
            parent_span_id,
            request_id,
            sink,
            this: this.clone(),
        })
    }

    fn state(&self) -> MutexGuard<'_, SpanState> {
        // A panic while holding the lock cannot leave the state half-written.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transaction for Span {
    fn start_child_transaction(&self, tick: Tick) -> TransactionRef {
        Span::build(
            self.sink.clone(),
            tick,
            self.trace_id,
            Some(self.span_id),
            self.request_id.clone(),
        )
    }

    fn create_new_transaction_context(&self, ctx: &Context) -> Context {
        match self.this.upgrade() {
            Some(this) => ctx.with_transaction(this),
            None => ctx.clone(),
        }
    }

    fn finish(&self) {
        self.finish_with_tags(Vec::new());
    }

    fn finish_with_tags(&self, tags: Vec<Tag>) {
        let record = {
            let mut state = self.state();
            if state.end.is_some() {
                tracing::debug!(span_id = %self.span_id, name = %self.tick.label(), "Span already finished");
                return;
            }
            state.tags.extend(tags);
            let end = SystemTime::now();
            state.end = Some(end);

            TransactionRecord {
                trace_id: self.trace_id,
                span_id: self.span_id,
                parent_span_id: self.parent_span_id,
                operation: self.tick.operation.clone(),
                name: self.tick.label().to_string(),
                tags: state.tags.clone(),
                status: state.status,
                request_id: self.request_id.clone(),
                start_ms: unix_millis(state.start),
                end_ms: unix_millis(end),
            }
        };

        tracing::debug!(
            trace_id = %record.trace_id,
            span_id = %record.span_id,
            operation = %record.operation,
            name = %record.name,
            status = %record.status,
            duration_ms = record.end_ms.saturating_sub(record.start_ms),
            "Span finished"
        );
        metrics::record_span_finished(&record.operation, record.status);
        self.sink.record_transaction(record);
    }

    fn set_status(&self, status: SpanStatus) {
        let mut state = self.state();
        if state.end.is_none() {
            state.status = status;
        }
    }

    fn info(&self) -> TransactionInfo {
        let state = self.state();
        TransactionInfo {
            tick: Tick {
                operation: self.tick.operation.clone(),
                transaction_name: self.tick.transaction_name.clone(),
                tags: state.tags.clone(),
            },
            trace_id: self.trace_id,
            span_id: self.span_id,
            parent_span_id: self.parent_span_id,
            start: state.start,
            end: state.end,
            status: state.status.as_str().to_string(),
            status_code: state.status as u8,
        }
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Span")
            .field("operation", &self.tick.operation)
            .field("name", &self.tick.label())
            .field("trace_id", &self.trace_id)
            .field("span_id", &self.span_id)
            .field("parent_span_id", &self.parent_span_id)
            .finish()
    }
}

pub(crate) fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
