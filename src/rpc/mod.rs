//! RPC boundary integration.
//!
//! # Data Flow
//! ```text
//! incoming unary call
//!     → ServerInterceptor::intercept
//!         → request id from payload "requestId"
//!         → root span "grpc.server" / full method
//!         → handler(ctx with span active, req)
//!         → capture error, finish with code/status/message
//!
//! outgoing unary call
//!     → ClientInterceptor::intercept
//!         → child of active span "grpc.client" / method
//!         → invoker(ctx, req)
//!         → capture error, finish, log request/response pair
//! ```
//!
//! # Design Decisions
//! - Framework-agnostic: handlers and invokers are plain async closures
//! - Errors travel as [`Status`]; other errors are mapped with [`Status::from_error`]

pub mod interceptor;
pub mod request_id;
pub mod status;

pub use interceptor::{ClientInterceptor, ServerInterceptor, UnaryServerInfo};
pub use request_id::request_id_from_payload;
pub use status::{Code, Status};
