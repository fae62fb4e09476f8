//! Monitor facade: the single entry point for spans and captures.

use futures_util::FutureExt;
use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;

use crate::config::SinkConfig;
use crate::monitor::context::Context;
use crate::monitor::scope::{Level, Scope};
use crate::monitor::transaction::{unix_millis, Span, TransactionRef};
use crate::monitor::types::Tick;
use crate::observability::metrics;
use crate::sink::{CaptureSink, Event, EventId, ExceptionInfo, HttpSink, LogSink, SinkError};

/// Errors produced by the monitor itself.
#[derive(Debug, Clone, Error)]
pub enum MonitorError {
    /// A panic was caught at a recovery boundary.
    #[error("panic: {0}")]
    Panic(String),

    /// A scope value did not have the expected shape.
    #[error("invalid scope: {0}")]
    InvalidScope(String),

    #[error("capture sink unavailable: {0}")]
    Sink(String),
}

impl From<SinkError> for MonitorError {
    fn from(err: SinkError) -> Self {
        MonitorError::Sink(err.to_string())
    }
}

/// Static settings stamped onto every event.
#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub environment: Option<String>,
    pub release: Option<String>,
    pub server_name: Option<String>,
    /// Errors whose message contains any of these substrings are not forwarded.
    pub ignore_errors: Vec<String>,
    pub flush_timeout: Duration,
    /// Log every capture locally as it is handed to the sink.
    pub debug: bool,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            environment: None,
            release: None,
            server_name: None,
            ignore_errors: Vec::new(),
            flush_timeout: Duration::from_secs(2),
            debug: false,
        }
    }
}

impl From<&SinkConfig> for MonitorOptions {
    fn from(config: &SinkConfig) -> Self {
        fn non_empty(s: &str) -> Option<String> {
            (!s.is_empty()).then(|| s.to_string())
        }
        Self {
            environment: non_empty(&config.environment),
            release: non_empty(&config.release),
            server_name: non_empty(&config.server_name),
            ignore_errors: config.ignore_errors.clone(),
            flush_timeout: Duration::from_millis(config.flush_timeout_ms),
            debug: config.debug,
        }
    }
}

/// Process-wide monitoring capability.
///
/// Immutable once built: `set_scope` returns a new facade sharing the same sink,
/// and every capture builds its own event from a snapshot of the scope.
#[derive(Clone)]
pub struct Monitor {
    sink: Arc<dyn CaptureSink>,
    options: Arc<MonitorOptions>,
    scope: Option<Arc<Scope>>,
}

impl Monitor {
    pub fn new(sink: Arc<dyn CaptureSink>) -> Self {
        Self::with_options(sink, MonitorOptions::default())
    }

    pub fn with_options(sink: Arc<dyn CaptureSink>, options: MonitorOptions) -> Self {
        Self {
            sink,
            options: Arc::new(options),
            scope: None,
        }
    }

    /// Build a monitor from configuration. Without a DSN, captures go to the log.
    pub fn from_config(config: &SinkConfig) -> Result<Self, MonitorError> {
        let sink: Arc<dyn CaptureSink> = match config.dsn.as_deref() {
            Some(dsn) if !dsn.is_empty() => Arc::new(HttpSink::new(config)?),
            _ => {
                tracing::info!("No capture DSN configured, captures will be logged");
                Arc::new(LogSink)
            }
        };
        Ok(Self::with_options(sink, MonitorOptions::from(config)))
    }

    pub fn options(&self) -> &MonitorOptions {
        &self.options
    }

    pub fn scope(&self) -> Option<&Scope> {
        self.scope.as_deref()
    }

    /// Start a new root span, ignoring any transaction already in `ctx`.
    pub fn start_transaction(&self, ctx: &Context, tick: Tick) -> TransactionRef {
        Span::root(
            self.sink.clone(),
            tick,
            ctx.request_id().map(str::to_string),
        )
    }

    /// Start a child of the transaction active in `ctx`, or a root when there is none.
    ///
    /// A child is labelled by its operation; only `operation` and `tags` of `tick` are used.
    pub fn new_transaction_from_context(&self, ctx: &Context, tick: Tick) -> TransactionRef {
        match ctx.transaction() {
            Some(parent) => parent.start_child_transaction(Tick {
                operation: tick.operation,
                transaction_name: String::new(),
                tags: tick.tags,
            }),
            None => self.start_transaction(ctx, tick),
        }
    }

    /// Forward `err` to the sink. `None` is a no-op.
    pub fn capture(&self, err: Option<&dyn StdError>) -> Option<EventId> {
        self.capture_error(err?)
    }

    pub fn capture_error(&self, err: &dyn StdError) -> Option<EventId> {
        let message = err.to_string();
        if let Some(pattern) = self
            .options
            .ignore_errors
            .iter()
            .find(|p| message.contains(p.as_str()))
        {
            tracing::debug!(error = %message, pattern = %pattern, "Error ignored by capture filter");
            return None;
        }

        let event = self.build_event(message, Some(ExceptionInfo::from_error(err)), Level::Error);
        self.send(event, "error")
    }

    pub fn capture_message(&self, msg: &str) -> Option<EventId> {
        let event = self.build_event(msg.to_string(), None, Level::Info);
        self.send(event, "message")
    }

    /// A facade carrying `scope`. `self` is left unchanged.
    pub fn set_scope(&self, scope: Scope) -> Monitor {
        Monitor {
            sink: self.sink.clone(),
            options: self.options.clone(),
            scope: Some(Arc::new(scope)),
        }
    }

    /// Like [`set_scope`](Self::set_scope) for an untyped scope.
    ///
    /// A value that is not a scope is logged and yields an unscoped facade.
    pub fn set_scope_value(&self, value: serde_json::Value) -> Monitor {
        match serde_json::from_value::<Scope>(value) {
            Ok(scope) => self.set_scope(scope),
            Err(e) => {
                let err = MonitorError::InvalidScope(e.to_string());
                tracing::error!(error = %err, "Failed to set monitor scope");
                self.clear_scope()
            }
        }
    }

    pub fn clear_scope(&self) -> Monitor {
        Monitor {
            sink: self.sink.clone(),
            options: self.options.clone(),
            scope: None,
        }
    }

    /// Wait for pending captures to be delivered. Returns `false` on timeout.
    pub async fn flush(&self, timeout: Duration) -> bool {
        self.sink.flush(timeout).await
    }

    /// [`Monitor::flush`] bounded by the configured `flush_timeout`.
    pub async fn flush_default(&self) -> bool {
        self.flush(self.options.flush_timeout).await
    }

    /// Capture a panic payload obtained at a recovery boundary.
    pub fn recover(&self, payload: &(dyn Any + Send)) -> Option<EventId> {
        let err = MonitorError::Panic(panic_message(payload));
        tracing::error!(error = %err, "Recovered from panic");
        self.capture_error(&err)
    }

    /// Run `fut`, turning a panic into a captured [`MonitorError::Panic`].
    pub async fn catch_panic<F>(&self, fut: F) -> Result<F::Output, MonitorError>
    where
        F: Future,
    {
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(output) => Ok(output),
            Err(payload) => {
                self.recover(payload.as_ref());
                Err(MonitorError::Panic(panic_message(payload.as_ref())))
            }
        }
    }

    fn build_event(&self, message: String, exception: Option<ExceptionInfo>, default_level: Level) -> Event {
        let (level, tags, user) = match self.scope.as_deref() {
            Some(scope) => (
                scope.level(),
                scope.tags.clone(),
                (!scope.user.is_empty()).then(|| scope.user.clone()),
            ),
            None => (default_level, Vec::new(), None),
        };

        Event {
            event_id: EventId::new(),
            level,
            message,
            exception,
            tags,
            user,
            environment: self.options.environment.clone(),
            release: self.options.release.clone(),
            server_name: self.options.server_name.clone(),
            timestamp_ms: unix_millis(SystemTime::now()),
        }
    }

    fn send(&self, event: Event, kind: &'static str) -> Option<EventId> {
        if self.options.debug {
            tracing::debug!(
                event_id = %event.event_id,
                level = %event.level,
                kind,
                "Capturing {}", event.message
            );
        }
        let id = self.sink.capture_event(event);
        metrics::record_capture(kind, id.is_some());
        id
    }
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("sink", &self.sink)
            .field("scoped", &self.scope.is_some())
            .finish()
    }
}

/// Normalize a panic payload into a message.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(e) = payload.downcast_ref::<Box<dyn StdError + Send + Sync>>() {
        e.to_string()
    } else {
        "unknown error".to_string()
    }
}
