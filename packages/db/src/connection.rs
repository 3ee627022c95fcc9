//! Store configuration and errors.

use thiserror::Error;

use crate::{KeyPrefixes, RetryPolicy};

/// Store configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    /// Redis connection URL.
    pub url: String,
    /// Key prefixes for the per-queue structures.
    pub prefixes: KeyPrefixes,
    /// Timeout and retry policy applied to every store call.
    pub retry: RetryPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://redis:6379".to_string(),
            prefixes: KeyPrefixes::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl StoreConfig {
    /// Create a config for the given Redis URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the key prefixes.
    pub fn with_prefixes(mut self, prefixes: KeyPrefixes) -> Self {
        self.prefixes = prefixes;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(#[from] redis::RedisError),
    #[error("Store call timed out: {op}")]
    Timeout { op: &'static str },
    #[error("Corrupt assignment: job {job_id} has no stored document")]
    CorruptAssignment { job_id: String },
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),
}

impl StoreError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Timeout { .. } => true,
            StoreError::Connection(error) => {
                error.is_timeout()
                    || error.is_io_error()
                    || error.is_connection_dropped()
                    || error.is_connection_refusal()
            }
            _ => false,
        }
    }

    /// Whether the call certainly never reached the server.
    pub fn never_applied(&self) -> bool {
        matches!(self, StoreError::Connection(error) if error.is_connection_refusal())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        StoreError::Serialization(error.to_string())
    }
}

impl From<queue_core::ValidationError> for StoreError {
    fn from(error: queue_core::ValidationError) -> Self {
        StoreError::InvalidInput(error.to_string())
    }
}
