//! Request-scoped context carrier.
//!
//! # Responsibilities
//! - Hold "the currently active transaction" for one logical request
//! - Carry the request identifier alongside it
//! - Travel through axum handlers via request extensions
//!
//! # Design Decisions
//! - Explicit value threaded through call chains, never a global or a string-keyed map
//! - Absent transaction is a valid state; lookups return `None`
//! - Deriving a context never mutates the original

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use std::convert::Infallible;
use std::fmt;

use crate::monitor::transaction::TransactionRef;

/// Request-scoped carrier for the active transaction.
#[derive(Clone, Default)]
pub struct Context {
    transaction: Option<TransactionRef>,
    request_id: Option<String>,
}

impl Context {
    /// An empty context with no active transaction.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a context whose active transaction is `transaction`.
    pub fn with_transaction(&self, transaction: TransactionRef) -> Self {
        Self {
            transaction: Some(transaction),
            request_id: self.request_id.clone(),
        }
    }

    /// Derive a context carrying `request_id`.
    pub fn with_request_id(&self, request_id: impl Into<String>) -> Self {
        Self {
            transaction: self.transaction.clone(),
            request_id: Some(request_id.into()),
        }
    }

    /// The active transaction, if one was attached.
    pub fn transaction(&self) -> Option<&TransactionRef> {
        self.transaction.as_ref()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field(
                "transaction",
                &self.transaction.as_ref().map(|t| t.info().span_id),
            )
            .field("request_id", &self.request_id)
            .finish()
    }
}

/// Handlers behind the HTTP monitor receive the context it stored; anywhere
/// else they get an empty one.
impl<S> FromRequestParts<S> for Context
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<Context>().cloned().unwrap_or_default())
    }
}
