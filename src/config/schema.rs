//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML files.
//! Every section has defaults, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct MonitorConfig {
    /// Capture sink settings.
    pub sink: SinkConfig,

    /// HTTP server middleware settings.
    pub http: HttpMonitorConfig,

    /// Cache adapter settings.
    pub cache: CacheConfig,

    /// Logging and metrics for this process.
    pub observability: ObservabilityConfig,

    /// Demo service listener.
    pub server: ServerConfig,
}

/// Capture sink configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Collector endpoint. Unset means captures are only logged.
    pub dsn: Option<String>,

    /// Deployment environment stamped on events (e.g., "production").
    pub environment: String,

    /// Release identifier stamped on events.
    pub release: String,

    /// Host name stamped on events.
    pub server_name: String,

    /// Log every capture locally in addition to delivering it.
    pub debug: bool,

    /// Error message substrings that are never forwarded.
    pub ignore_errors: Vec<String>,

    /// Delivery attempts after the first failure.
    pub max_retries: u32,

    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,

    /// Default bound for `Monitor::flush`.
    pub flush_timeout_ms: u64,

    /// Per-request timeout for deliveries.
    pub request_timeout_ms: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            dsn: None,
            environment: String::new(),
            release: String::new(),
            server_name: String::new(),
            debug: false,
            ignore_errors: Vec::new(),
            max_retries: 3,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 2_000,
            flush_timeout_ms: 2_000,
            request_timeout_ms: 5_000,
        }
    }
}

/// HTTP server middleware configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpMonitorConfig {
    /// Requests whose path contains any of these substrings are not traced.
    pub excluded_paths: Vec<String>,

    /// Re-raise a recovered panic after capturing it.
    pub repanic: bool,

    /// Flush the sink before answering a request that panicked.
    pub wait_for_delivery: bool,

    /// Bound for the flush above.
    pub timeout_ms: u64,
}

impl Default for HttpMonitorConfig {
    fn default() -> Self {
        Self {
            excluded_paths: vec!["swagger".to_string()],
            repanic: false,
            wait_for_delivery: false,
            timeout_ms: 2_000,
        }
    }
}

/// Cache adapter configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Keys deleted per DEL command when removing by pattern.
    pub max_del_per_operation: usize,

    /// Keys requested per SCAN iteration when removing by pattern.
    pub scan_count: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_del_per_operation: 1_000,
            scan_count: 1_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log filter directive (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Demo service listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config: MonitorConfig = toml::from_str("").unwrap();
        assert!(config.sink.dsn.is_none());
        assert_eq!(config.http.excluded_paths, vec!["swagger"]);
        assert_eq!(config.cache.max_del_per_operation, 1_000);
    }

    #[test]
    fn test_partial_section() {
        let config: MonitorConfig = toml::from_str(
            r#"
            [sink]
            dsn = "http://collector.local/ingest"
            environment = "staging"

            [http]
            repanic = true
            "#,
        )
        .unwrap();
        assert_eq!(config.sink.environment, "staging");
        assert_eq!(config.sink.max_retries, 3);
        assert!(config.http.repanic);
        assert_eq!(config.http.timeout_ms, 2_000);
    }
}
