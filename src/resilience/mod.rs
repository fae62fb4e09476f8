//! Resilience helpers.
//!
//! # Data Flow
//! ```text
//! Failed delivery to the capture endpoint:
//!     → backoff.rs (exponential delay with jitter)
//!     → retry until max_retries, then drop and log
//! ```
//!
//! # Design Decisions
//! - Retries run on background workers, never on the request path
//! - Jitter spreads retries from many processes sharing one collector

pub mod backoff;

pub use backoff::Backoff;
