//! Backend instrumentation adapters.
//!
//! # Data Flow
//! ```text
//! bare adapter (Guard::bare)
//!     → .monitor(ctx, monitor, request_id, capture_error)
//!     → monitored view (same connection, own Guard)
//!
//! monitored operation:
//!     Guard::observe(Call { operation, action, tags }, real_op)
//!         → span = Monitor::new_transaction_from_context(ctx, tick)
//!         → result = real_op.await
//!         → span.set_status(error.span_status() | Ok), span.finish()
//!         → capture_error? Monitor::capture_error(err)
//!         → result (unchanged)
//!
//! bare operation:
//!     Guard::observe → real_op.await (no span, no capture)
//! ```
//!
//! # Design Decisions
//! - Monitored and bare views share the driver behind an `Arc`; only the guard differs
//! - The decorator never alters an operation's arguments or result
//! - Each adapter error type knows which span status it maps to

pub mod cache;
pub mod document;
pub mod http_client;
pub mod queue;
pub mod sql;
pub mod storage;

use std::error::Error as StdError;
use std::future::Future;
use std::sync::Arc;

use crate::monitor::{Context, Monitor, SpanStatus, Tag, Tick, TransactionRef};

/// Everything a monitored view needs to report its calls.
#[derive(Debug, Clone)]
pub struct Instrumentation {
    pub monitor: Monitor,
    pub ctx: Context,
    pub request_id: String,
    pub capture_error: bool,
}

/// Errors that know their span status.
pub trait SpanError: StdError + Send + Sync + 'static {
    fn span_status(&self) -> SpanStatus {
        SpanStatus::InternalError
    }
}

/// Description of one instrumented call.
#[derive(Debug, Clone)]
pub struct Call {
    pub operation: &'static str,
    pub action: String,
    pub tags: Vec<Tag>,
}

impl Call {
    pub fn new(operation: &'static str, action: impl Into<String>) -> Self {
        Self {
            operation,
            action: action.into(),
            tags: Vec::new(),
        }
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push(Tag::new(key, value));
        self
    }

    /// `key` for a single key, `key[i]` for several.
    pub fn keys<K: AsRef<str>>(mut self, keys: &[K]) -> Self {
        match keys {
            [] => {}
            [key] => self.tags.push(Tag::new("key", key.as_ref())),
            _ => {
                for (i, key) in keys.iter().enumerate() {
                    self.tags.push(Tag::new(format!("key[{}]", i), key.as_ref()));
                }
            }
        }
        self
    }
}

/// Instrumentation state of an adapter: bare or monitored.
#[derive(Debug, Clone, Default)]
pub struct Guard(Option<Arc<Instrumentation>>);

impl Guard {
    pub fn bare() -> Self {
        Self(None)
    }

    pub fn monitored(instrumentation: Instrumentation) -> Self {
        Self(Some(Arc::new(instrumentation)))
    }

    pub fn is_monitored(&self) -> bool {
        self.0.is_some()
    }

    pub fn instrumentation(&self) -> Option<&Instrumentation> {
        self.0.as_deref()
    }

    /// Request id of the monitored view, falling back to the context's.
    pub fn request_id(&self) -> Option<&str> {
        let inst = self.0.as_deref()?;
        if inst.request_id.is_empty() {
            inst.ctx.request_id()
        } else {
            Some(inst.request_id.as_str())
        }
    }

    /// Start the span for `call`. `None` on a bare guard.
    pub fn begin(&self, call: Call) -> Option<TransactionRef> {
        let inst = self.0.as_deref()?;
        let mut tags = Vec::with_capacity(call.tags.len() + 2);
        tags.push(Tag::new("requestId", self.request_id().unwrap_or_default()));
        tags.push(Tag::new("action", call.action.clone()));
        tags.extend(call.tags);

        Some(inst.monitor.new_transaction_from_context(
            &inst.ctx,
            Tick::new(call.operation, call.action).with_tags(tags),
        ))
    }

    /// Finish `span` with the outcome of the call and capture its error if asked to.
    pub fn end<T, E: SpanError>(&self, span: Option<TransactionRef>, result: &Result<T, E>) {
        self.end_with_tags(span, result, Vec::new());
    }

    pub fn end_with_tags<T, E: SpanError>(
        &self,
        span: Option<TransactionRef>,
        result: &Result<T, E>,
        tags: Vec<Tag>,
    ) {
        if let Some(span) = span {
            span.set_status(match result {
                Ok(_) => SpanStatus::Ok,
                Err(e) => e.span_status(),
            });
            span.finish_with_tags(tags);
        }
        if let Err(e) = result {
            self.capture(e);
        }
    }

    /// Forward `err` to the monitor when capture is enabled.
    pub fn capture(&self, err: &(dyn StdError + 'static)) {
        if let Some(inst) = self.0.as_deref().filter(|i| i.capture_error) {
            inst.monitor.capture_error(err);
        }
    }

    /// Run `op` between [`begin`](Self::begin) and [`end`](Self::end).
    pub async fn observe<T, E, F>(&self, call: Call, op: F) -> Result<T, E>
    where
        E: SpanError,
        F: Future<Output = Result<T, E>>,
    {
        let span = self.begin(call);
        let result = op.await;
        self.end(span, &result);
        result
    }

    /// A guard whose calls nest under `span` instead of the view's context.
    ///
    /// Capture is disabled on the child so the parent reports a failure once.
    pub fn child(&self, span: &Option<TransactionRef>) -> Guard {
        match (self.0.as_deref(), span) {
            (Some(inst), Some(span)) => Guard::monitored(Instrumentation {
                monitor: inst.monitor.clone(),
                ctx: span.create_new_transaction_context(&inst.ctx),
                request_id: inst.request_id.clone(),
                capture_error: false,
            }),
            _ => Guard::bare(),
        }
    }
}

/// Adapters that can produce a monitored view of themselves.
pub trait Instrument: Clone {
    fn guard(&self) -> &Guard;

    fn guard_mut(&mut self) -> &mut Guard;

    /// A sibling view sharing the same connection that reports every call.
    /// `self` is left untouched.
    fn monitor(
        &self,
        ctx: &Context,
        monitor: &Monitor,
        request_id: impl Into<String>,
        capture_error: bool,
    ) -> Self {
        let mut view = self.clone();
        *view.guard_mut() = Guard::monitored(Instrumentation {
            monitor: monitor.clone(),
            ctx: ctx.clone(),
            request_id: request_id.into(),
            capture_error,
        });
        view
    }

    fn is_monitored(&self) -> bool {
        self.guard().is_monitored()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use thiserror::Error;

    #[derive(Debug, Error)]
    #[error("row missing")]
    struct Missing;

    impl SpanError for Missing {
        fn span_status(&self) -> SpanStatus {
            SpanStatus::NotFound
        }
    }

    fn monitored(sink: &Arc<MemorySink>, capture_error: bool) -> Guard {
        Guard::monitored(Instrumentation {
            monitor: Monitor::new(sink.clone()),
            ctx: Context::background(),
            request_id: "req-1".into(),
            capture_error,
        })
    }

    #[tokio::test]
    async fn test_bare_guard_runs_without_span() {
        let guard = Guard::bare();
        let out: Result<u8, Missing> = guard.observe(Call::new("db", "GET FIRST"), async { Ok(3) }).await;
        assert_eq!(out.unwrap(), 3);
        assert!(guard.begin(Call::new("db", "x")).is_none());
    }

    #[tokio::test]
    async fn test_observe_tags_and_captures() {
        let sink = Arc::new(MemorySink::new());
        let guard = monitored(&sink, true);
        let out: Result<(), Missing> = guard
            .observe(Call::new("cache", "Get").keys(&["orders:42"]), async { Err(Missing) })
            .await;
        assert!(out.is_err());

        let spans = sink.transactions();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].tag("requestId"), Some("req-1"));
        assert_eq!(spans[0].tag("action"), Some("Get"));
        assert_eq!(spans[0].tag("key"), Some("orders:42"));
        assert_eq!(spans[0].status, SpanStatus::NotFound);
        assert_eq!(sink.capture_count(), 1);
    }

    #[tokio::test]
    async fn test_capture_disabled() {
        let sink = Arc::new(MemorySink::new());
        let guard = monitored(&sink, false);
        let _: Result<(), Missing> = guard.observe(Call::new("cache", "Get"), async { Err(Missing) }).await;
        assert_eq!(sink.capture_count(), 0);
        assert_eq!(sink.transactions().len(), 1);
    }

    #[test]
    fn test_multiple_keys_are_indexed() {
        let call = Call::new("cache", "MGet").keys(&["a", "b"]);
        assert_eq!(call.tags, vec![Tag::new("key[0]", "a"), Tag::new("key[1]", "b")]);
    }
}
