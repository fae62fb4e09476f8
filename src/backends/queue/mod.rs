//! Message broker adapter.
//!
//! # Data Flow
//! ```text
//! write_messages(topic, group_id, &payload)
//!     → Guard::observe(Call "queue" / "WRITE", topic, groupId)
//!     → payload as JSON → Broker::publish
//!
//! read_messages(topic, group_id, handler, retry, shutdown)
//!     → span "READ" (open for the whole consume loop)
//!     → loop:
//!         Broker::fetch ──(shutdown fired | broker closed)──→ finish "READ", return
//!         child span "HANDLE" (offset) → handler(ctx under child, message)
//!         Ok              → commit
//!         Err && !retry   → commit (message dropped)
//!         Err && retry    → no commit, back off, message redelivered
//! ```
//!
//! # Design Decisions
//! - Fetch is raced against the shutdown signal, so a consumer stops promptly
//! - Handler errors are captured per message; the loop keeps consuming
//! - Redelivery backs off exponentially to avoid spinning on a poison message

pub mod memory;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::backends::{Call, Guard, Instrument, SpanError};
use crate::monitor::{Context, SpanStatus};
use crate::resilience::backoff::Backoff;

pub use memory::MemoryBroker;

const OPERATION: &str = "queue";

/// Error type handlers may return.
pub type HandlerError = Box<dyn StdError + Send + Sync>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to encode message for {topic}: {source}")]
    Encode {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to decode message at offset {offset}: {source}")]
    Decode {
        offset: u64,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown topic {0}")]
    UnknownTopic(String),

    #[error("message handler failed at offset {offset}: {source}")]
    Handler {
        offset: u64,
        #[source]
        source: HandlerError,
    },

    #[error("broker connection closed")]
    Closed,

    #[error("broker error: {0}")]
    Broker(String),
}

impl SpanError for QueueError {
    fn span_status(&self) -> SpanStatus {
        match self {
            QueueError::Encode { .. } => SpanStatus::InvalidArgument,
            QueueError::Decode { .. } => SpanStatus::DataLoss,
            QueueError::UnknownTopic(_) => SpanStatus::NotFound,
            QueueError::Handler { .. } => SpanStatus::Aborted,
            QueueError::Closed => SpanStatus::Unavailable,
            QueueError::Broker(_) => SpanStatus::InternalError,
        }
    }
}

/// One fetched message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub offset: u64,
    pub value: Vec<u8>,
    pub timestamp_ms: u64,
}

impl Message {
    /// Decode the JSON payload.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, QueueError> {
        serde_json::from_slice(&self.value).map_err(|source| QueueError::Decode {
            offset: self.offset,
            source,
        })
    }
}

/// Broker connection.
#[async_trait]
pub trait Broker: Send + Sync + fmt::Debug + 'static {
    async fn publish(&self, topic: &str, values: Vec<Vec<u8>>) -> Result<(), QueueError>;

    /// Next uncommitted message for `group_id`, waiting until one is available.
    /// Fails with [`QueueError::Closed`] once the broker is closed.
    ///
    /// Must be cancel safe: dropping the future must not lose a message.
    async fn fetch(&self, topic: &str, group_id: &str) -> Result<Message, QueueError>;

    /// Mark every message up to and including `offset` as consumed by `group_id`.
    async fn commit(&self, topic: &str, group_id: &str, offset: u64) -> Result<(), QueueError>;

    async fn close(&self) -> Result<(), QueueError>;
}

/// Producer and consumer over a [`Broker`], bare or monitored.
#[derive(Debug)]
pub struct Queue<B> {
    broker: Arc<B>,
    backoff: Backoff,
    guard: Guard,
}

impl<B> Clone for Queue<B> {
    fn clone(&self) -> Self {
        Self {
            broker: self.broker.clone(),
            backoff: self.backoff,
            guard: self.guard.clone(),
        }
    }
}

impl<B: Broker> Instrument for Queue<B> {
    fn guard(&self) -> &Guard {
        &self.guard
    }

    fn guard_mut(&mut self) -> &mut Guard {
        &mut self.guard
    }
}

impl<B: Broker> Queue<B> {
    pub fn new(broker: B) -> Self {
        Self::from_arc(Arc::new(broker))
    }

    pub fn from_arc(broker: Arc<B>) -> Self {
        Self {
            broker,
            backoff: Backoff::new(Duration::from_millis(100), Duration::from_secs(5)),
            guard: Guard::bare(),
        }
    }

    /// Backoff bounds between redeliveries of a failed message.
    pub fn with_retry_delays(mut self, base: Duration, max: Duration) -> Self {
        self.backoff = Backoff::new(base, max);
        self
    }

    pub fn broker(&self) -> &Arc<B> {
        &self.broker
    }

    fn call(action: &str, topic: &str, group_id: &str) -> Call {
        Call::new(OPERATION, action)
            .tag("topic", topic)
            .tag("groupId", group_id)
    }

    /// Publish `message` as JSON.
    pub async fn write_messages<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        group_id: &str,
        message: &T,
    ) -> Result<(), QueueError> {
        self.guard
            .observe(Self::call("WRITE", topic, group_id), async {
                let value = serde_json::to_vec(message).map_err(|source| QueueError::Encode {
                    topic: topic.to_string(),
                    source,
                })?;
                self.broker.publish(topic, vec![value]).await
            })
            .await
    }

    /// Consume `topic` as `group_id` until `shutdown` fires or the broker closes.
    pub async fn read_messages<F, Fut>(
        &self,
        topic: &str,
        group_id: &str,
        handler: F,
        retry: bool,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), QueueError>
    where
        F: Fn(Context, Message) -> Fut + Send + Sync,
        Fut: Future<Output = Result<(), HandlerError>> + Send,
    {
        let span = self.guard.begin(Self::call("READ", topic, group_id));
        let child = self.guard.child(&span);
        let base_ctx = match (self.guard.instrumentation(), &span) {
            (Some(inst), Some(span)) => span.create_new_transaction_context(&inst.ctx),
            (Some(inst), None) => inst.ctx.clone(),
            _ => Context::background(),
        };

        let mut failures = 0u32;
        let result = loop {
            let message = tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!(topic, group_id, "Consumer received shutdown signal");
                    break Ok(());
                }
                fetched = self.broker.fetch(topic, group_id) => fetched,
            };
            let message = match message {
                Ok(message) => message,
                Err(QueueError::Closed) => {
                    tracing::info!(topic, group_id, "Broker closed, consumer stopping");
                    break Ok(());
                }
                Err(e @ QueueError::UnknownTopic(_)) => break Err(e),
                Err(e) => {
                    failures += 1;
                    tracing::error!(topic, group_id, error = %e, "Failed to fetch message");
                    tokio::select! {
                        _ = shutdown.recv() => {
                            tracing::info!(topic, group_id, "Consumer received shutdown signal");
                            break Ok(());
                        }
                        _ = tokio::time::sleep(self.backoff.delay(failures)) => continue,
                    }
                }
            };
            tracing::info!(topic, group_id, offset = message.offset, "Fetched message");

            let offset = message.offset;
            let handled = self.handle(&child, &base_ctx, &handler, group_id, message).await;
            match handled {
                Ok(()) => failures = 0,
                Err(e) => {
                    self.guard.capture(&e);
                    if retry {
                        failures += 1;
                        let delay = self.backoff.delay(failures);
                        tracing::info!(topic, group_id, offset, delay = ?delay, "Retrying message");
                        tokio::select! {
                            _ = shutdown.recv() => {
                                tracing::info!(topic, group_id, offset, "Consumer received shutdown signal while backing off");
                                break Ok(());
                            }
                            _ = tokio::time::sleep(delay) => continue,
                        }
                    }
                    tracing::warn!(topic, group_id, offset, error = %e, "Dropping failed message");
                }
            }
            if let Err(e) = self.broker.commit(topic, group_id, offset).await {
                tracing::error!(topic, group_id, offset, error = %e, "Failed to commit message");
            }
        };

        if let Some(span) = span {
            span.set_status(match &result {
                Ok(()) => SpanStatus::Ok,
                Err(e) => e.span_status(),
            });
            span.finish();
        }
        if let Err(e) = &result {
            self.guard.capture(e);
        }
        result
    }

    async fn handle<F, Fut>(
        &self,
        child: &Guard,
        base_ctx: &Context,
        handler: &F,
        group_id: &str,
        message: Message,
    ) -> Result<(), QueueError>
    where
        F: Fn(Context, Message) -> Fut,
        Fut: Future<Output = Result<(), HandlerError>>,
    {
        let offset = message.offset;
        let span = child.begin(
            Self::call("HANDLE", &message.topic, group_id).tag("offset", offset.to_string()),
        );
        let ctx = match &span {
            Some(span) => span.create_new_transaction_context(base_ctx),
            None => base_ctx.clone(),
        };
        let result = handler(ctx, message)
            .await
            .map_err(|source| QueueError::Handler { offset, source });
        child.end(span, &result);
        result
    }

    pub async fn close(&self) -> Result<(), QueueError> {
        self.broker.close().await
    }
}
