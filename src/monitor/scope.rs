//! Capture scope: tags, level and user bound to subsequent captures.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::monitor::types::Tag;

/// Severity attached to a captured event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl Level {
    /// Parse a level name, case-insensitively. Unknown names map to `Info`.
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "debug" => Level::Debug,
            "warning" => Level::Warning,
            "error" => Level::Error,
            "fatal" => Level::Fatal,
            _ => Level::Info,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warning => "warning",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub id: String,
    pub email: String,
}

impl User {
    pub fn is_empty(&self) -> bool {
        self.id.is_empty() && self.email.is_empty()
    }
}

/// Contextual metadata applied to every capture made through a scoped monitor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Scope {
    pub tags: Vec<Tag>,
    /// Level name; see [`Level::parse`].
    pub level: String,
    pub user: User,
}

impl Scope {
    pub fn level(&self) -> Level {
        Level::parse(&self.level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parsing() {
        assert_eq!(Level::parse("DEBUG"), Level::Debug);
        assert_eq!(Level::parse("Warning"), Level::Warning);
        assert_eq!(Level::parse("fatal"), Level::Fatal);
        assert_eq!(Level::parse("error"), Level::Error);
        assert_eq!(Level::parse("verbose"), Level::Info);
        assert_eq!(Level::parse(""), Level::Info);
    }

    #[test]
    fn test_scope_deserializes_partial_json() {
        let scope: Scope = serde_json::from_value(serde_json::json!({
            "level": "warning",
            "user": { "id": "u-1" }
        }))
        .unwrap();
        assert_eq!(scope.level(), Level::Warning);
        assert_eq!(scope.user.id, "u-1");
        assert!(scope.tags.is_empty());
    }

    #[test]
    fn test_scope_rejects_foreign_shape() {
        let result: Result<Scope, _> = serde_json::from_value(serde_json::json!({ "hub": 1 }));
        assert!(result.is_err());
    }
}
