//! Configuration error types.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for configuration loading and rule compilation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that make a rule set unusable. All of these are fatal at load.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("unsupported config format {0:?}, use .yaml, .yml, .toml or .json")]
    UnsupportedFormat(String),

    #[error("invalid regex {pattern:?}: {reason}")]
    InvalidRegex { pattern: String, reason: String },

    #[error("invalid rule for series query {series_query:?}: {reason}")]
    InvalidRule { series_query: String, reason: String },

    #[error("resource {0} is not known to the resource mapper")]
    UnknownResource(String),

    #[error("unknown template placeholder <<.{0}>>")]
    UnknownPlaceholder(String),

    #[error("malformed template {template:?}: {reason}")]
    MalformedTemplate { template: String, reason: String },
}

impl ConfigError {
    pub fn invalid_rule(series_query: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidRule {
            series_query: series_query.to_string(),
            reason: reason.into(),
        }
    }
}
