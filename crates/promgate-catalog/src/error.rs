//! Backend and discovery error types.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type BackendResult<T> = Result<T, BackendError>;
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Failures talking to the metrics backend.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("metrics backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),

    #[error("backend rejected query: {0}")]
    BadQuery(String),

    #[error("failed to load backend fixture {path}: {reason}")]
    Fixture { path: PathBuf, reason: String },
}

/// Failures of a relist tick. None of these are fatal to the process.
#[derive(Debug, Clone, Error)]
pub enum DiscoveryError {
    #[error("discovery query {series_query:?} failed: {source}")]
    Backend {
        series_query: String,
        #[source]
        source: BackendError,
    },

    #[error(
        "rule {rule} ({series_query}) has a fixed name {name:?} but matched {} metric families: {families:?}",
        .families.len()
    )]
    Ambiguous {
        rule: usize,
        series_query: String,
        name: String,
        families: Vec<String>,
    },
}
