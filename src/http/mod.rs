//! Inbound HTTP integration.
//!
//! # Data Flow
//! ```text
//! request
//!     → SetRequestIdLayer (x-request-id, UUID v4 when absent)
//!     → monitor_middleware
//!         → excluded path? pass through untouched
//!         → root span "http.server" / "<METHOD> <path>", tag requestId
//!         → Context stored in request extensions
//!     → handler (extracts Context, calls monitored backends)
//!     → span status from response status, finish
//!     → PropagateRequestIdLayer (x-request-id on response)
//! ```
//!
//! # Design Decisions
//! - The middleware is an ordinary axum layer; handlers opt in by extracting `Context`
//! - A handler panic is captured here and answered 500 unless `repanic` is set

pub mod middleware;
pub mod request;
pub mod server;

pub use middleware::{monitor_middleware, HttpMonitor};
pub use request::{propagate_request_id_layer, request_id_of, set_request_id_layer, X_REQUEST_ID};
pub use server::{AppState, HttpServer, Order};
