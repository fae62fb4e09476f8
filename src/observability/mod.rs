//! Observability of the monitoring layer itself.
//!
//! # Data Flow
//! ```text
//! monitor, sink, http, rpc, backends:
//!     → logging.rs (tracing subscriber, EnvFilter)
//!     → metrics.rs (span, capture and delivery counters)
//!
//! Consumers:
//!     → stdout
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Everything logs through `tracing`; nothing prints directly
//! - Metric updates are fire-and-forget and cost nothing without a recorder
//! - The request id is a structured field on every request-scoped log line

pub mod logging;
pub mod metrics;
