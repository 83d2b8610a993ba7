//! Request-scoped provider errors.

use promgate_catalog::BackendError;
use promgate_rules::RuleError;
use thiserror::Error;

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Why a metrics request could not be answered. Every failure below the
/// provider boundary is normalized into one of these.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("metrics backend unavailable: {0}")]
    BackendUnavailable(#[source] BackendError),

    #[error("query failed: {0}")]
    Query(String),

    #[error("{object} matched {rows} rows, expected one")]
    Ambiguous { object: String, rows: usize },
}

impl From<BackendError> for ProviderError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::BadQuery(reason) => ProviderError::Query(reason),
            other => ProviderError::BackendUnavailable(other),
        }
    }
}

impl From<RuleError> for ProviderError {
    fn from(err: RuleError) -> Self {
        ProviderError::Query(err.to_string())
    }
}
