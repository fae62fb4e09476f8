//! Monitoring layer for backend services.
//!
//! A [`Monitor`] facade records spans and captures errors to a pluggable
//! sink. Inbound HTTP requests and RPC calls open root spans; backend
//! adapters (cache, sql, document, queue, storage, HTTP client) open child
//! spans under whatever is active in the [`Context`] they were given.

pub mod backends;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod monitor;
pub mod observability;
pub mod resilience;
pub mod rpc;
pub mod sink;

pub use config::schema::MonitorConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use monitor::{Context, Monitor};
