//! Value types describing a unit of work and its labels.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;
use uuid::Uuid;

use crate::rpc::Code;

/// Key/value label attached to a span or a capture.
///
/// Duplicate keys are legal; every tag is emitted in insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl<K: Into<String>, V: Into<String>> From<(K, V)> for Tag {
    fn from((key, value): (K, V)) -> Self {
        Self::new(key, value)
    }
}

/// Request to start a span.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    /// Instrumentation category ("http.server", "db", "cache", "queue", ...).
    pub operation: String,
    /// Specific action or endpoint. Empty falls back to `operation` as the label.
    pub transaction_name: String,
    /// Initial label set.
    pub tags: Vec<Tag>,
}

impl Tick {
    pub fn new(operation: impl Into<String>, transaction_name: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            transaction_name: transaction_name.into(),
            tags: Vec::new(),
        }
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = Tag>) -> Self {
        self.tags.extend(tags);
        self
    }

    /// Display label of the span started from this tick.
    pub fn label(&self) -> &str {
        if self.transaction_name.is_empty() {
            &self.operation
        } else {
            &self.transaction_name
        }
    }
}

/// Outcome status of a span.
#[repr(u8)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    #[default]
    Undefined = 0,
    Ok = 1,
    Cancelled = 2,
    Unknown = 3,
    InvalidArgument = 4,
    DeadlineExceeded = 5,
    NotFound = 6,
    AlreadyExists = 7,
    PermissionDenied = 8,
    ResourceExhausted = 9,
    FailedPrecondition = 10,
    Aborted = 11,
    OutOfRange = 12,
    Unimplemented = 13,
    InternalError = 14,
    Unavailable = 15,
    DataLoss = 16,
    Unauthenticated = 17,
}

impl SpanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SpanStatus::Undefined => "",
            SpanStatus::Ok => "ok",
            SpanStatus::Cancelled => "cancelled",
            SpanStatus::Unknown => "unknown",
            SpanStatus::InvalidArgument => "invalid_argument",
            SpanStatus::DeadlineExceeded => "deadline_exceeded",
            SpanStatus::NotFound => "not_found",
            SpanStatus::AlreadyExists => "already_exists",
            SpanStatus::PermissionDenied => "permission_denied",
            SpanStatus::ResourceExhausted => "resource_exhausted",
            SpanStatus::FailedPrecondition => "failed_precondition",
            SpanStatus::Aborted => "aborted",
            SpanStatus::OutOfRange => "out_of_range",
            SpanStatus::Unimplemented => "unimplemented",
            SpanStatus::InternalError => "internal_error",
            SpanStatus::Unavailable => "unavailable",
            SpanStatus::DataLoss => "data_loss",
            SpanStatus::Unauthenticated => "unauthenticated",
        }
    }

    /// Map an HTTP response status onto a span status.
    pub fn from_http_status(code: u16) -> Self {
        match code {
            200..=399 => SpanStatus::Ok,
            400 => SpanStatus::InvalidArgument,
            401 => SpanStatus::Unauthenticated,
            403 => SpanStatus::PermissionDenied,
            404 => SpanStatus::NotFound,
            409 => SpanStatus::AlreadyExists,
            429 => SpanStatus::ResourceExhausted,
            499 => SpanStatus::Cancelled,
            400..=499 => SpanStatus::FailedPrecondition,
            501 => SpanStatus::Unimplemented,
            503 => SpanStatus::Unavailable,
            504 => SpanStatus::DeadlineExceeded,
            500..=599 => SpanStatus::InternalError,
            _ => SpanStatus::Unknown,
        }
    }

    /// Map an RPC status code onto a span status.
    pub fn from_rpc_code(code: Code) -> Self {
        match code {
            Code::Ok => SpanStatus::Ok,
            Code::Cancelled => SpanStatus::Cancelled,
            Code::Unknown => SpanStatus::Unknown,
            Code::InvalidArgument => SpanStatus::InvalidArgument,
            Code::DeadlineExceeded => SpanStatus::DeadlineExceeded,
            Code::NotFound => SpanStatus::NotFound,
            Code::AlreadyExists => SpanStatus::AlreadyExists,
            Code::PermissionDenied => SpanStatus::PermissionDenied,
            Code::ResourceExhausted => SpanStatus::ResourceExhausted,
            Code::FailedPrecondition => SpanStatus::FailedPrecondition,
            Code::Aborted => SpanStatus::Aborted,
            Code::OutOfRange => SpanStatus::OutOfRange,
            Code::Unimplemented => SpanStatus::Unimplemented,
            Code::Internal => SpanStatus::InternalError,
            Code::Unavailable => SpanStatus::Unavailable,
            Code::DataLoss => SpanStatus::DataLoss,
            Code::Unauthenticated => SpanStatus::Unauthenticated,
        }
    }
}

impl fmt::Display for SpanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only snapshot of a span.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionInfo {
    pub tick: Tick,
    pub trace_id: Uuid,
    pub span_id: Uuid,
    pub parent_span_id: Option<Uuid>,
    pub start: SystemTime,
    /// Unset until the span is finished.
    pub end: Option<SystemTime>,
    pub status: String,
    pub status_code: u8,
}

impl TransactionInfo {
    pub fn is_finished(&self) -> bool {
        self.end.is_some()
    }

    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }
}
