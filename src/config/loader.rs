//! Configuration loading from disk.

use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::schema::MonitorConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Why a configuration file could not be used.
#[derive(Debug)]
pub enum ConfigError {
    Read { path: PathBuf, source: std::io::Error },
    Parse { origin: String, source: toml::de::Error },
    Invalid(Vec<ValidationError>),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "cannot read {}: {}", path.display(), source)
            }
            ConfigError::Parse { origin, source } => write!(f, "malformed TOML in {}: {}", origin, source),
            ConfigError::Invalid(errors) => {
                let listed: Vec<String> = errors.iter().map(ToString::to_string).collect();
                write!(f, "{} invalid setting(s): {}", errors.len(), listed.join("; "))
            }
        }
    }
}

impl StdError for ConfigError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid(_) => None,
        }
    }
}

/// Read, parse and validate the monitor configuration at `path`.
pub fn load_config(path: &Path) -> Result<MonitorConfig, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse(&text, &path.display().to_string())?;
    tracing::debug!(path = %path.display(), "Configuration file accepted");
    Ok(config)
}

/// Parse and validate configuration held in memory.
pub fn parse_config(text: &str) -> Result<MonitorConfig, ConfigError> {
    parse(text, "<inline>")
}

fn parse(text: &str, origin: &str) -> Result<MonitorConfig, ConfigError> {
    let config: MonitorConfig = toml::from_str(text).map_err(|source| ConfigError::Parse {
        origin: origin.to_string(),
        source,
    })?;
    validate_config(&config).map_err(ConfigError::Invalid)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_names_the_path() {
        let err = load_config(Path::new("/nonexistent/monitor.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("/nonexistent/monitor.toml"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let err = parse_config("[server]\nbind_address = \"nowhere\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("server.bind_address"));
    }

    #[test]
    fn test_syntax_error() {
        assert!(matches!(parse_config("[sink"), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_empty_text_yields_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.sink.dsn, None);
    }
}
