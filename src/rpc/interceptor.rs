//! Unary server and client interceptors.
//!
//! A server interceptor wraps an incoming call in a root span named after the
//! fully-qualified method. A client interceptor nests the outgoing call under
//! whatever transaction is already active.

use serde::Serialize;
use std::future::Future;

use crate::monitor::{Context, Monitor, SpanStatus, Tag, Tick, TransactionRef};
use crate::rpc::request_id::{render, request_id_from_payload};
use crate::rpc::status::Status;

/// Metadata about the call being served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnaryServerInfo {
    /// "/package.Service/Method"
    pub full_method: String,
}

impl UnaryServerInfo {
    pub fn new(full_method: impl Into<String>) -> Self {
        Self {
            full_method: full_method.into(),
        }
    }
}

/// Server-side unary interceptor.
#[derive(Debug, Clone)]
pub struct ServerInterceptor {
    monitor: Monitor,
}

impl ServerInterceptor {
    pub fn new(monitor: Monitor) -> Self {
        Self { monitor }
    }

    /// Run `handler` inside an "grpc.server" root span.
    ///
    /// The handler receives a context in which the root span is active. A
    /// handler panic is captured and answered with `INTERNAL`.
    pub async fn intercept<Req, Resp, H, Fut>(
        &self,
        ctx: Context,
        req: Req,
        info: &UnaryServerInfo,
        handler: H,
    ) -> Result<Resp, Status>
    where
        Req: Serialize,
        H: FnOnce(Context, Req) -> Fut,
        Fut: Future<Output = Result<Resp, Status>>,
    {
        tracing::info!("entry from: {} ; request: {}", info.full_method, render(&req));

        let request_id = request_id_from_payload(&req)
            .or_else(|| ctx.request_id().map(str::to_string))
            .unwrap_or_default();
        let base = if request_id.is_empty() {
            ctx
        } else {
            ctx.with_request_id(request_id.clone())
        };

        let tr = self.monitor.start_transaction(
            &base,
            Tick::new("grpc.server", info.full_method.clone())
                .with_tags([Tag::new("requestId", request_id)]),
        );
        let derived = tr.create_new_transaction_context(&base);

        let outcome = self
            .monitor
            .catch_panic(async move { handler(derived, req).await })
            .await;
        let result = match outcome {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(status)) => {
                self.monitor.capture_error(&status);
                tracing::error!(method = %info.full_method, error = %status, "RPC handler failed");
                Err(status)
            }
            // Already captured by catch_panic.
            Err(panic) => Err(Status::internal(panic.to_string())),
        };

        finish(&tr, result.as_ref().err());
        result
    }
}

/// Client-side unary interceptor.
#[derive(Debug, Clone)]
pub struct ClientInterceptor {
    monitor: Monitor,
}

impl ClientInterceptor {
    pub fn new(monitor: Monitor) -> Self {
        Self { monitor }
    }

    /// Run `invoker` inside a "grpc.client" span nested under `ctx`.
    ///
    /// The request and response are logged once the span is finished.
    pub async fn intercept<Req, Resp, I, Fut>(
        &self,
        ctx: &Context,
        method: &str,
        req: Req,
        invoker: I,
    ) -> Result<Resp, Status>
    where
        Req: Serialize,
        Resp: Serialize,
        I: FnOnce(Context, Req) -> Fut,
        Fut: Future<Output = Result<Resp, Status>>,
    {
        let request_id = request_id_from_payload(&req)
            .or_else(|| ctx.request_id().map(str::to_string))
            .unwrap_or_default();
        let tr = self.monitor.new_transaction_from_context(
            ctx,
            Tick::new("grpc.client", method).with_tags([
                Tag::new("requestId", request_id),
                Tag::new("action", method),
            ]),
        );
        let rendered_req = render(&req);
        let derived = tr.create_new_transaction_context(ctx);

        let result = invoker(derived, req).await;
        if let Err(status) = &result {
            tracing::error!(method, error = %status, "RPC call failed");
            self.monitor.capture_error(status);
        }

        finish(&tr, result.as_ref().err());
        let rendered_resp = match &result {
            Ok(resp) => render(resp),
            Err(_) => "null".to_string(),
        };
        tracing::info!(
            "response from: {} ; request: {} ; response {}",
            method,
            rendered_req,
            rendered_resp
        );
        result
    }
}

fn finish(tr: &TransactionRef, err: Option<&Status>) {
    let ok = Status::ok();
    let status = err.unwrap_or(&ok);
    tr.set_status(SpanStatus::from_rpc_code(status.code()));
    tr.finish_with_tags(vec![
        Tag::new("code", status.code().as_i32().to_string()),
        Tag::new("status", status.code().as_str()),
        Tag::new("message", status.message()),
    ]);
}

impl Monitor {
    pub fn server_interceptor(&self) -> ServerInterceptor {
        ServerInterceptor::new(self.clone())
    }

    pub fn client_interceptor(&self) -> ClientInterceptor {
        ClientInterceptor::new(self.clone())
    }
}
