//! Rule engine error types.

use promgate_core::GroupResource;
use thiserror::Error;

pub type RuleResult<T> = Result<T, RuleError>;

/// Errors raised while turning a value request into a backend query.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("no label form is configured for resource {0}")]
    NoLabelForResource(GroupResource),

    #[error("resource {0} is not known to the resource mapper")]
    UnknownResource(String),
}
