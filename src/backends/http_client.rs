//! Outbound HTTP client adapter over `reqwest`.
//!
//! # Data Flow
//! ```text
//! RestClient::post(path, headers, &body)
//!     → span "http.client", name/action "POST <path>", tag method
//!     → reqwest send (x-request-id forwarded when known)
//!     → BaseResponse { status, headers, body }
//!     → finish with tags code, status (transport failure: 500 / InternalError)
//! ```
//!
//! # Design Decisions
//! - Any HTTP status is a response, not an error; only transport and encoding fail
//! - The span status follows the response code
//! - Authorization headers are never logged

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::backends::{Call, Guard, Instrument, SpanError};
use crate::http::request::X_REQUEST_ID;
use crate::monitor::{SpanStatus, Tag};

const OPERATION: &str = "http.client";

#[derive(Debug, Error)]
pub enum HttpClientError {
    #[error("invalid request url '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid header '{0}'")]
    InvalidHeader(String),

    #[error("failed to encode request body: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode response body: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl SpanError for HttpClientError {
    fn span_status(&self) -> SpanStatus {
        match self {
            HttpClientError::InvalidUrl { .. } | HttpClientError::InvalidHeader(_) | HttpClientError::Encode(_) => {
                SpanStatus::InvalidArgument
            }
            HttpClientError::Decode(_) => SpanStatus::DataLoss,
            HttpClientError::Transport(e) if e.is_timeout() => SpanStatus::DeadlineExceeded,
            HttpClientError::Transport(_) => SpanStatus::InternalError,
        }
    }
}

/// Response as received, whatever its status.
#[derive(Debug, Clone)]
pub struct BaseResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl BaseResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HttpClientError> {
        serde_json::from_slice(&self.body).map_err(HttpClientError::Decode)
    }
}

enum Body<'a> {
    Empty,
    Json(Vec<u8>),
    Form(&'a [(&'a str, &'a str)]),
}

/// REST client, bare or monitored.
#[derive(Debug, Clone)]
pub struct RestClient {
    client: reqwest::Client,
    base_url: Option<Url>,
    basic_auth: Option<(String, String)>,
    guard: Guard,
}

impl Instrument for RestClient {
    fn guard(&self) -> &Guard {
        &self.guard
    }

    fn guard_mut(&mut self) -> &mut Guard {
        &mut self.guard
    }
}

impl Default for RestClient {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

impl RestClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: None,
            basic_auth: None,
            guard: Guard::bare(),
        }
    }

    /// Client with a per-request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, HttpClientError> {
        Ok(Self::new(reqwest::Client::builder().timeout(timeout).build()?))
    }

    /// Resolve relative paths against `base_url`.
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, HttpClientError> {
        let url = Url::parse(base_url).map_err(|source| HttpClientError::InvalidUrl {
            url: base_url.to_string(),
            source,
        })?;
        self.base_url = Some(url);
        Ok(self)
    }

    /// A sibling client sending basic credentials on every request.
    pub fn set_basic_auth(&self, username: impl Into<String>, password: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.basic_auth = Some((username.into(), password.into()));
        next
    }

    pub async fn get(
        &self,
        path: &str,
        headers: &[(&str, &str)],
        params: &[(&str, &str)],
    ) -> Result<BaseResponse, HttpClientError> {
        self.execute(Method::GET, path, headers, params, Body::Empty).await
    }

    pub async fn post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        headers: &[(&str, &str)],
        body: &T,
    ) -> Result<BaseResponse, HttpClientError> {
        self.send_json(Method::POST, path, headers, body).await
    }

    pub async fn put<T: Serialize + ?Sized>(
        &self,
        path: &str,
        headers: &[(&str, &str)],
        body: &T,
    ) -> Result<BaseResponse, HttpClientError> {
        self.send_json(Method::PUT, path, headers, body).await
    }

    pub async fn patch<T: Serialize + ?Sized>(
        &self,
        path: &str,
        headers: &[(&str, &str)],
        body: &T,
    ) -> Result<BaseResponse, HttpClientError> {
        self.send_json(Method::PATCH, path, headers, body).await
    }

    pub async fn delete(
        &self,
        path: &str,
        headers: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<BaseResponse, HttpClientError> {
        match body {
            Some(body) => self.send_json(Method::DELETE, path, headers, body).await,
            None => self.execute(Method::DELETE, path, headers, &[], Body::Empty).await,
        }
    }

    /// POST as `application/x-www-form-urlencoded`.
    pub async fn post_form(
        &self,
        path: &str,
        headers: &[(&str, &str)],
        form: &[(&str, &str)],
    ) -> Result<BaseResponse, HttpClientError> {
        self.execute(Method::POST, path, headers, &[], Body::Form(form)).await
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        headers: &[(&str, &str)],
        body: &T,
    ) -> Result<BaseResponse, HttpClientError> {
        match serde_json::to_vec(body) {
            Ok(bytes) => self.execute(method, path, headers, &[], Body::Json(bytes)).await,
            Err(e) => {
                let result = Err(HttpClientError::Encode(e));
                let span = self.begin(&method, path);
                self.finish(span, &result);
                result
            }
        }
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        headers: &[(&str, &str)],
        params: &[(&str, &str)],
        body: Body<'_>,
    ) -> Result<BaseResponse, HttpClientError> {
        let span = self.begin(&method, path);
        let result = self.send(method, path, headers, params, body).await;
        self.finish(span, &result);
        result
    }

    fn begin(&self, method: &Method, path: &str) -> Option<crate::monitor::TransactionRef> {
        let name = format!("{} {}", method, path);
        self.guard
            .begin(Call::new(OPERATION, name).tag("method", method.as_str()))
    }

    fn finish(&self, span: Option<crate::monitor::TransactionRef>, result: &Result<BaseResponse, HttpClientError>) {
        if let Some(span) = span {
            let (code, status) = match result {
                Ok(response) => {
                    span.set_status(SpanStatus::from_http_status(response.status));
                    (response.status.to_string(), reason(response.status))
                }
                Err(e) => {
                    span.set_status(e.span_status());
                    ("500".to_string(), "InternalError".to_string())
                }
            };
            span.finish_with_tags(vec![Tag::new("code", code), Tag::new("status", status)]);
        }
        if let Err(e) = result {
            self.guard.capture(e);
        }
    }

    fn resolve(&self, path: &str) -> Result<Url, HttpClientError> {
        let parsed = match &self.base_url {
            Some(base) => base.join(path),
            None => Url::parse(path),
        };
        parsed.map_err(|source| HttpClientError::InvalidUrl {
            url: path.to_string(),
            source,
        })
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        headers: &[(&str, &str)],
        params: &[(&str, &str)],
        body: Body<'_>,
    ) -> Result<BaseResponse, HttpClientError> {
        let url = self.resolve(path)?;
        let mut header_map = HeaderMap::with_capacity(headers.len() + 1);
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| HttpClientError::InvalidHeader(name.to_string()))?;
            let value =
                HeaderValue::from_str(value).map_err(|_| HttpClientError::InvalidHeader(name.to_string()))?;
            header_map.append(name, value);
        }
        if let Some(request_id) = self.guard.request_id().filter(|id| !id.is_empty()) {
            if !header_map.contains_key(X_REQUEST_ID) {
                if let Ok(value) = HeaderValue::from_str(request_id) {
                    header_map.insert(X_REQUEST_ID, value);
                }
            }
        }

        let mut request = self.client.request(method.clone(), url.clone()).headers(header_map);
        if !params.is_empty() {
            request = request.query(params);
        }
        if let Some((username, password)) = &self.basic_auth {
            request = request.basic_auth(username, Some(password));
        }
        let logged_body = match body {
            Body::Empty => None,
            Body::Json(bytes) => {
                let logged = String::from_utf8_lossy(&bytes).into_owned();
                request = request
                    .header(axum::http::header::CONTENT_TYPE, "application/json")
                    .body(bytes);
                Some(logged)
            }
            Body::Form(form) => {
                request = request.form(form);
                Some(format!("{:?}", form))
            }
        };

        tracing::debug!(
            request_id = self.guard.request_id().unwrap_or_default(),
            %method,
            %url,
            params = ?params,
            body = logged_body.as_deref().unwrap_or_default(),
            "Outbound request"
        );

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(%method, %url, error = %e, "Outbound request failed");
                return Err(e.into());
            }
        };
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();

        tracing::debug!(
            request_id = self.guard.request_id().unwrap_or_default(),
            %method,
            %url,
            status,
            body = %String::from_utf8_lossy(&body),
            "Outbound response"
        );
        Ok(BaseResponse { status, headers, body })
    }
}

/// `"404 Not Found"` style status text.
fn reason(code: u16) -> String {
    match StatusCode::from_u16(code) {
        Ok(status) => match status.canonical_reason() {
            Some(text) => format!("{} {}", code, text),
            None => code.to_string(),
        },
        Err(_) => code.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{Context, Monitor};
    use crate::sink::MemorySink;
    use std::sync::Arc;

    #[test]
    fn test_reason_text() {
        assert_eq!(reason(404), "404 Not Found");
        assert_eq!(reason(299), "299");
    }

    #[test]
    fn test_relative_path_needs_base() {
        let client = RestClient::default();
        assert!(matches!(client.resolve("/orders"), Err(HttpClientError::InvalidUrl { .. })));

        let client = client.with_base_url("http://billing.local/api/").unwrap();
        assert_eq!(client.resolve("orders/1").unwrap().as_str(), "http://billing.local/api/orders/1");
    }

    #[test]
    fn test_basic_auth_is_per_instance() {
        let base = RestClient::default();
        let authed = base.set_basic_auth("svc", "secret");
        assert!(base.basic_auth.is_none());
        assert_eq!(authed.basic_auth, Some(("svc".into(), "secret".into())));
    }

    #[tokio::test]
    async fn test_transport_failure_finishes_as_internal_error() {
        let sink = Arc::new(MemorySink::new());
        let client = RestClient::with_timeout(Duration::from_millis(500))
            .unwrap()
            .monitor(&Context::background(), &Monitor::new(sink.clone()), "req-5", true);

        // Port 9 (discard) on localhost is expected to refuse connections.
        let err = client.get("http://127.0.0.1:9/ping", &[], &[]).await.unwrap_err();
        assert!(matches!(err, HttpClientError::Transport(_)));

        let span = &sink.transactions_named("GET http://127.0.0.1:9/ping")[0];
        assert_eq!(span.operation, "http.client");
        assert_eq!(span.tag("method"), Some("GET"));
        assert_eq!(span.tag("code"), Some("500"));
        assert_eq!(span.tag("status"), Some("InternalError"));
        assert_eq!(sink.capture_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_header_is_rejected_before_sending() {
        let client = RestClient::default();
        let err = client
            .get("http://127.0.0.1:9/", &[("bad header", "x")], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, HttpClientError::InvalidHeader(_)));
    }
}
