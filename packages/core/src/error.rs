//! Validation errors for domain identifiers.

use thiserror::Error;

/// Errors raised when constructing domain identifiers from raw input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("job id must not be empty")]
    EmptyJobId,
    #[error("queue name must not be empty")]
    EmptyQueueName,
}
