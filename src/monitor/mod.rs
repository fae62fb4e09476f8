//! Monitoring core: spans, context carrier, scope and the facade.
//!
//! # Data Flow
//! ```text
//! entry point (HTTP middleware, RPC interceptor, job)
//!     → Monitor::start_transaction(ctx, Tick)          root span
//!     → span.create_new_transaction_context(ctx)       Context carries it
//!     → backend adapter:
//!           Monitor::new_transaction_from_context      child span (same trace)
//!           child.finish()                             TransactionRecord → sink
//!     → root.finish_with_tags([...])                   TransactionRecord → sink
//!
//! errors anywhere:
//!     → Monitor::capture(err)                          Event → sink
//! ```
//!
//! # Design Decisions
//! - Spans are shared handles (`Arc<dyn Transaction>`) safe to finish from any task
//! - A span reports exactly once; later finishes are ignored
//! - Children never inherit tags; every adapter labels its own span
//! - The facade is immutable; scoping returns a new value

pub mod context;
pub mod facade;
pub mod scope;
pub mod transaction;
pub mod types;

pub use context::Context;
pub use facade::{panic_message, Monitor, MonitorError, MonitorOptions};
pub use scope::{Level, Scope, User};
pub use transaction::{Span, Transaction, TransactionRef};
pub use types::{SpanStatus, Tag, Tick, TransactionInfo};
