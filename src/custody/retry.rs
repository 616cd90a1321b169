//! Retry Policy
//!
//! One bounded retry abstraction for every ledger call, parameterized by a
//! fault classifier. Terminal faults stop immediately; retryable faults are
//! retried with a fixed delay until `max_attempts` is reached.
//!
//! Blind retries of ledger writes rely on the ledger rejecting exact duplicate
//! submissions, which makes them idempotent from the ledger's point of view.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

/// Classification of a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    /// Network, timeout or provider fault - may succeed on another attempt
    Retryable,
    /// Outright rejection - repeating cannot help
    Terminal,
}

/// Errors that know their own fault class
pub trait Classify {
    fn fault_class(&self) -> FaultClass;
}

/// Failure returned by [`RetryPolicy`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    #[error("terminal failure on attempt {attempt}: {error}")]
    Terminal { attempt: u32, error: E },

    #[error("retries exhausted after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    /// Number of invocations made before giving up
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Terminal { attempt, .. } => *attempt,
            RetryError::Exhausted { attempts, .. } => *attempts,
        }
    }

    /// The underlying (last observed) failure
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Terminal { error, .. } => error,
            RetryError::Exhausted { last, .. } => last,
        }
    }
}

/// Bounded, classified retry with fixed backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(1500),
        }
    }
}

impl RetryPolicy {
    /// `max_attempts` is clamped to at least one invocation
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Worst-case added blocking from backoff sleeps
    pub fn worst_case_delay(&self) -> Duration {
        self.backoff * self.max_attempts.saturating_sub(1)
    }

    /// Run `op` with the given fault classifier.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, E, Op, Fut, C>(
        &self,
        label: &str,
        mut op: Op,
        classify: C,
    ) -> Result<T, RetryError<E>>
    where
        Op: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> FaultClass,
        E: Display,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(op = label, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => match classify(&error) {
                    FaultClass::Terminal => {
                        debug!(op = label, attempt, error = %error, "Terminal failure");
                        return Err(RetryError::Terminal { attempt, error });
                    }
                    FaultClass::Retryable if attempt >= self.max_attempts => {
                        warn!(
                            op = label,
                            attempts = attempt,
                            error = %error,
                            "Retries exhausted"
                        );
                        return Err(RetryError::Exhausted {
                            attempts: attempt,
                            last: error,
                        });
                    }
                    FaultClass::Retryable => {
                        warn!(
                            op = label,
                            attempt,
                            max_attempts = self.max_attempts,
                            error = %error,
                            "Retryable failure"
                        );
                        tokio::time::sleep(self.backoff).await;
                        attempt += 1;
                    }
                },
            }
        }
    }
}

/// `withRetry(operation, maxAttempts, backoffDelay)` for self-classifying errors
pub async fn with_retry<T, E, Op, Fut>(
    op: Op,
    max_attempts: u32,
    backoff: Duration,
) -> Result<T, RetryError<E>>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + Display,
{
    RetryPolicy::new(max_attempts, backoff)
        .run("with_retry", op, |e: &E| e.fault_class())
        .await
}
