//! Process lifecycle.
//!
//! # Data Flow
//! ```text
//! SIGINT / SIGTERM (signals.rs)
//!     → Shutdown::trigger (shutdown.rs)
//!     → HTTP server stops accepting, consumers leave their read loops
//!     → Monitor::flush(timeout) drains pending captures
//! ```
//!
//! # Design Decisions
//! - One broadcast channel; every long-running task subscribes
//! - Flushing is bounded by the configured timeout, never open-ended

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
