//! Root-span middleware for axum routers.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::HttpMonitorConfig;
use crate::http::request::request_id_of;
use crate::monitor::{Context, Monitor, SpanStatus, Tag, Tick};
use crate::observability::metrics;

/// Monitor plus the middleware options it runs with.
#[derive(Debug, Clone)]
pub struct HttpMonitor {
    monitor: Monitor,
    config: Arc<HttpMonitorConfig>,
}

impl HttpMonitor {
    pub fn new(monitor: Monitor, config: HttpMonitorConfig) -> Self {
        Self {
            monitor,
            config: Arc::new(config),
        }
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    /// Whether `path` bypasses tracing.
    pub fn is_excluded(&self, path: &str) -> bool {
        self.config
            .excluded_paths
            .iter()
            .any(|p| path.contains(p.as_str()))
    }

    /// Install the middleware on every route of `router`.
    pub fn attach<S>(self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router.layer(middleware::from_fn_with_state(self, monitor_middleware))
    }
}

impl Monitor {
    pub fn http_monitor(&self, config: HttpMonitorConfig) -> HttpMonitor {
        HttpMonitor::new(self.clone(), config)
    }
}

pub async fn monitor_middleware(
    State(http): State<HttpMonitor>,
    mut req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    if http.is_excluded(&path) {
        return next.run(req).await;
    }

    let start = Instant::now();
    let method = req.method().to_string();
    let request_id = request_id_of(req.headers()).unwrap_or_default();
    let base = if request_id.is_empty() {
        Context::background()
    } else {
        Context::background().with_request_id(request_id.clone())
    };

    let tr = http.monitor.start_transaction(
        &base,
        Tick::new("http.server", format!("{} {}", method, path))
            .with_tags([Tag::new("requestId", request_id.clone())]),
    );
    req.extensions_mut()
        .insert(tr.create_new_transaction_context(&base));

    tracing::debug!(request_id = %request_id, method = %method, path = %path, "Monitoring request");

    let response = match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(response) => response,
        Err(payload) => {
            http.monitor.recover(payload.as_ref());
            if http.config.wait_for_delivery {
                http.monitor
                    .flush(Duration::from_millis(http.config.timeout_ms))
                    .await;
            }
            tr.set_status(SpanStatus::InternalError);
            tr.finish_with_tags(vec![Tag::new("code", "500")]);
            metrics::record_request(&method, 500, start);

            if http.config.repanic {
                std::panic::resume_unwind(payload);
            }
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let status = response.status().as_u16();
    tr.set_status(SpanStatus::from_http_status(status));
    tr.finish_with_tags(vec![Tag::new("code", status.to_string())]);
    metrics::record_request(&method, status, start);
    response
}
