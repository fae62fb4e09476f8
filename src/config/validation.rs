//! Configuration validation.
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Pure function: `&MonitorConfig → Result<(), Vec<ValidationError>>`
//! - Runs before the config is accepted

use std::fmt;
use std::net::SocketAddr;
use url::Url;

use crate::config::schema::MonitorConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &MonitorConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Some(dsn) = config.sink.dsn.as_deref().filter(|d| !d.is_empty()) {
        match Url::parse(dsn) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => errors.push(ValidationError::new(
                "sink.dsn",
                format!("unsupported scheme '{}'", url.scheme()),
            )),
            Err(e) => errors.push(ValidationError::new("sink.dsn", e.to_string())),
        }
    }

    if config.sink.request_timeout_ms == 0 {
        errors.push(ValidationError::new("sink.request_timeout_ms", "must be greater than 0"));
    }
    if config.sink.retry_base_delay_ms > config.sink.retry_max_delay_ms {
        errors.push(ValidationError::new(
            "sink.retry_base_delay_ms",
            "must not exceed retry_max_delay_ms",
        ));
    }
    if config.http.excluded_paths.iter().any(|p| p.is_empty()) {
        errors.push(ValidationError::new(
            "http.excluded_paths",
            "empty entry would exclude every path",
        ));
    }
    if config.cache.max_del_per_operation == 0 {
        errors.push(ValidationError::new("cache.max_del_per_operation", "must be greater than 0"));
    }
    if config.cache.scan_count == 0 {
        errors.push(ValidationError::new("cache.scan_count", "must be greater than 0"));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }
    if config.server.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "server.bind_address",
            format!("'{}' is not a socket address", config.server.bind_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&MonitorConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = MonitorConfig::default();
        config.sink.dsn = Some("udp://collector:9000".into());
        config.cache.max_del_per_operation = 0;
        config.http.excluded_paths.push(String::new());

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec!["sink.dsn", "http.excluded_paths", "cache.max_del_per_operation"]
        );
    }
}
