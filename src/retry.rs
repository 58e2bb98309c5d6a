use std::future::Future;

use crate::error::DbPoolError;
use crate::logging::SqlLogger;

/// Default attempt budget: the first try plus two retries.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Retry policy for idempotent reads.
///
/// Applied explicitly at the call sites that choose to retry; mutating statements never go
/// through it because a retried write after an ambiguous failure may apply twice.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    retryable: fn(&DbPoolError) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retryable: DbPoolError::is_connection_lost,
        }
    }
}

impl RetryPolicy {
    /// Policy with a custom budget and predicate. A budget of 0 is treated as 1.
    #[must_use]
    pub fn new(max_attempts: u32, retryable: fn(&DbPoolError) -> bool) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            retryable,
        }
    }

    /// Single attempt, never retries.
    #[must_use]
    pub fn none() -> Self {
        Self::new(1, |_| false)
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn is_retryable(&self, err: &DbPoolError) -> bool {
        (self.retryable)(err)
    }

    /// Run `attempt_fn` until it succeeds, fails with a non-retryable error, or the budget runs
    /// out. The last error is returned unchanged.
    pub(crate) async fn run<T, F, Fut>(
        &self,
        op: &'static str,
        log: &SqlLogger,
        mut attempt_fn: F,
    ) -> Result<T, DbPoolError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DbPoolError>>,
    {
        let mut attempt = 1;
        loop {
            match attempt_fn().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    log.attempt_failed(op, attempt, &err);
                    if attempt >= self.max_attempts || !self.is_retryable(&err) {
                        return Err(err);
                    }
                    log.retrying(op, attempt, self.max_attempts);
                    attempt += 1;
                }
            }
        }
    }
}
