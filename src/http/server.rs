//! Orders service wiring the monitor into an axum application.
//!
//! # Responsibilities
//! - Build the router with request-id, tracing and monitor layers
//! - Serve order lookups from a monitored cache view per request
//! - Stop accepting on the shutdown signal

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use crate::backends::cache::{Cache, CacheError, CacheStore};
use crate::backends::Instrument;
use crate::config::HttpMonitorConfig;
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::lifecycle::Shutdown;
use crate::monitor::{Context, Monitor};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub item: String,
    pub quantity: u32,
}

#[derive(Debug, Deserialize)]
struct OrderQuery {
    id: String,
}

/// Application state injected into handlers.
#[derive(Debug)]
pub struct AppState<S> {
    pub monitor: Monitor,
    pub cache: Cache<S>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            monitor: self.monitor.clone(),
            cache: self.cache.clone(),
        }
    }
}

impl<S: CacheStore> AppState<S> {
    /// Cache view reporting to the request's active span.
    fn cache_for(&self, ctx: &Context) -> Cache<S> {
        self.cache
            .monitor(ctx, &self.monitor, ctx.request_id().unwrap_or_default(), true)
    }
}

/// Cache key of an order.
pub fn order_key(id: &str) -> String {
    format!("orders:{}", id)
}

/// HTTP server for the orders service.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new<S: CacheStore>(state: AppState<S>, config: HttpMonitorConfig) -> Self {
        Self {
            router: Self::build_router(state, config),
        }
    }

    /// Build the router with all middleware layers.
    pub fn build_router<S: CacheStore>(state: AppState<S>, config: HttpMonitorConfig) -> Router {
        let http_monitor = state.monitor.http_monitor(config);
        let routes = Router::new()
            .route("/health", get(health))
            .route("/orders", get(get_order_by_query::<S>))
            .route("/orders/{id}", get(get_order::<S>).put(put_order::<S>))
            .with_state(state);

        http_monitor
            .attach(routes)
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(Shutdown::wait(shutdown))
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn get_order<S: CacheStore>(State(state): State<AppState<S>>, ctx: Context, Path(id): Path<String>) -> Response {
    lookup(&state, &ctx, &id).await
}

async fn get_order_by_query<S: CacheStore>(
    State(state): State<AppState<S>>,
    ctx: Context,
    Query(query): Query<OrderQuery>,
) -> Response {
    lookup(&state, &ctx, &query.id).await
}

async fn lookup<S: CacheStore>(state: &AppState<S>, ctx: &Context, id: &str) -> Response {
    match state.cache_for(ctx).get::<Order>(&order_key(id)).await {
        Ok(order) => Json(order).into_response(),
        Err(CacheError::NotFound(_)) => (StatusCode::NOT_FOUND, "order not found").into_response(),
        Err(e) => {
            tracing::error!(order_id = id, error = %e, "Order lookup failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn put_order<S: CacheStore>(
    State(state): State<AppState<S>>,
    ctx: Context,
    Path(id): Path<String>,
    Json(order): Json<Order>,
) -> Response {
    if order.id != id {
        return (StatusCode::BAD_REQUEST, "order id does not match path").into_response();
    }
    match state.cache_for(&ctx).set(&order_key(&id), &order, Duration::ZERO).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            tracing::error!(order_id = %id, error = %e, "Order store failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::cache::MemoryCache;
    use crate::config::CacheConfig;
    use crate::sink::MemorySink;
    use axum::body::Body;
    use axum::extract::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(sink: &Arc<MemorySink>) -> Router {
        let state = AppState {
            monitor: Monitor::new(sink.clone()),
            cache: Cache::new(MemoryCache::new(), &CacheConfig::default()),
        };
        HttpServer::new(state, HttpMonitorConfig::default()).router()
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let sink = Arc::new(MemorySink::new());
        let app = app(&sink);
        let order = Order {
            id: "7".into(),
            item: "tea".into(),
            quantity: 2,
        };
        let put = Request::builder()
            .method("PUT")
            .uri("/orders/7")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&order).unwrap()))
            .unwrap();
        assert_eq!(app.clone().oneshot(put).await.unwrap().status(), StatusCode::NO_CONTENT);

        let get = Request::builder().uri("/orders/7").body(Body::empty()).unwrap();
        let response = app.oneshot(get).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let back: Order = serde_json::from_slice(&body).unwrap();
        assert_eq!(back, order);
    }

    #[tokio::test]
    async fn test_generated_request_id_tags_spans() {
        let sink = Arc::new(MemorySink::new());
        let get = Request::builder().uri("/orders/1").body(Body::empty()).unwrap();
        let response = app(&sink).oneshot(get).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let generated = response.headers()["x-request-id"].to_str().unwrap().to_string();
        let root = &sink.transactions_named("GET /orders/1")[0];
        assert_eq!(root.tag("requestId"), Some(generated.as_str()));
        let get_span = &sink.transactions_named("cache")[0];
        assert_eq!(get_span.tag("action"), Some("Get"));
        assert_eq!(get_span.parent_span_id, Some(root.span_id));
        assert_eq!(get_span.tag("requestId"), Some(generated.as_str()));
    }

    #[tokio::test]
    async fn test_mismatched_id_is_rejected() {
        let sink = Arc::new(MemorySink::new());
        let put = Request::builder()
            .method("PUT")
            .uri("/orders/1")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"id":"2","item":"x","quantity":1}"#))
            .unwrap();
        let response = app(&sink).oneshot(put).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
