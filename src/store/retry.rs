//! Bounded and unbounded retry with a fixed delay.
//!
//! Used by both connection establishment (unbounded) and writes (bounded).

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Retry schedule: attempt limit plus a fixed pause between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: Option<u32>,
    delay: Duration,
}

/// The last error of a retried operation together with the attempts spent.
#[derive(Debug)]
pub struct RetryError<E> {
    pub attempts: u32,
    pub error: E,
}

impl RetryPolicy {
    /// At most `attempts` tries (at least one).
    pub fn bounded(attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: Some(attempts.max(1)),
            delay,
        }
    }

    /// Retry until the operation succeeds or returns a non-retryable error.
    pub fn unbounded(delay: Duration) -> Self {
        Self {
            max_attempts: None,
            delay,
        }
    }

    /// Run `op` until it succeeds, fails with an error `retryable` rejects, or
    /// the attempt limit is reached. `op` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut, R>(
        &self,
        label: &str,
        mut op: F,
        retryable: R,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        E: Display,
    {
        let mut attempt = 1u32;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    let exhausted = self.max_attempts.is_some_and(|max| attempt >= max);
                    if exhausted || !retryable(&error) {
                        return Err(RetryError {
                            attempts: attempt,
                            error,
                        });
                    }
                    tracing::warn!(
                        operation = label,
                        attempt,
                        max_attempts = ?self.max_attempts,
                        retry_in = ?self.delay,
                        error = %error,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
