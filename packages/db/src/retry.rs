//! Per-call timeout and transient-failure retry.

use std::future::Future;
use std::time::Duration;

use crate::StoreError;

/// Timeout and retry policy for store calls.
///
/// Idempotent calls are retried with exponential backoff while the error is
/// transient. Non-idempotent calls (enqueue, claim) are only retried when the
/// error proves the call never reached the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Upper bound on a single attempt.
    pub op_timeout: Duration,
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            op_timeout: Duration::from_millis(2_000),
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Set the per-attempt timeout.
    pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    /// Set the total number of attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the first backoff delay.
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Set the backoff ceiling.
    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    /// Run `call` under this policy.
    pub async fn run<T, F, Fut>(
        &self,
        op: &'static str,
        idempotent: bool,
        mut call: F,
    ) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut backoff = self.initial_backoff;
        let mut attempt = 1;

        loop {
            let result = match tokio::time::timeout(self.op_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout { op }),
            };

            match result {
                Err(error) if attempt < max_attempts && self.retryable(&error, idempotent) => {
                    tracing::warn!(
                        op,
                        attempt,
                        error = %error,
                        backoff_ms = backoff.as_millis() as u64,
                        "Transient store error, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2).min(self.max_backoff);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn retryable(&self, error: &StoreError, idempotent: bool) -> bool {
        if idempotent {
            error.is_transient()
        } else {
            error.never_applied()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::default()
            .with_op_timeout(Duration::from_millis(50))
            .with_initial_backoff(Duration::from_millis(1))
            .with_max_attempts(3)
    }

    #[tokio::test]
    async fn idempotent_calls_retry_timeouts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = fast_policy()
            .run("list", true, || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(StoreError::Timeout { op: "list" })
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_idempotent_calls_surface_timeouts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), StoreError> = fast_policy()
            .run("lease_next", false, || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(StoreError::Timeout { op: "lease_next" })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), StoreError> = fast_policy()
            .run("accept", true, || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::InvalidInput("bad".into()))
            })
            .await;

        assert!(matches!(result, Err(StoreError::InvalidInput(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), StoreError> = fast_policy()
            .run("purge_idle", true, || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::Timeout { op: "purge_idle" })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
