//! Runs fallible queue operations under a [`RetryPolicy`].

use std::thread;

use thiserror::Error;
use tracing::{debug, warn};

use hgcs_core::QueueError;

use super::types::{OnExhaust, RetryPolicy};

/// Why a retried operation gave up.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RetryError {
    /// Every allowed attempt failed with a transient error.
    #[error("{op} failed after {attempts} attempts: {last}")]
    Exhausted {
        op: &'static str,
        attempts: u32,
        last: QueueError,
        on_exhaust: OnExhaust,
    },
    /// A non-transient error; retrying would not help.
    #[error("{op} failed permanently: {error}")]
    Fatal { op: &'static str, error: QueueError },
}

impl RetryError {
    /// The error of the last attempt.
    pub fn last_error(&self) -> &QueueError {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Fatal { error, .. } => error,
        }
    }

    /// Whether the owning agent has to stop.
    pub fn is_fatal_to_agent(&self) -> bool {
        matches!(
            self,
            RetryError::Exhausted {
                on_exhaust: OnExhaust::AbortAgent,
                ..
            }
        )
    }
}

/// Retries an operation on transient [`QueueError`]s, sleeping between attempts.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    agent: &'static str,
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(agent: &'static str, policy: RetryPolicy) -> Self {
        Self { agent, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Call `f` until it succeeds, fails permanently, or runs out of attempts.
    ///
    /// `f` receives the 1-indexed attempt number.
    pub fn run<T, F>(&self, op: &'static str, mut f: F) -> Result<T, RetryError>
    where
        F: FnMut(u32) -> Result<T, QueueError>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match f(attempt) {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(agent = self.agent, op, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) if !error.is_transient() => {
                    return Err(RetryError::Fatal { op, error });
                }
                Err(error) => {
                    if !self.policy.should_retry(attempt) {
                        return Err(RetryError::Exhausted {
                            op,
                            attempts: attempt,
                            last: error,
                            on_exhaust: self.policy.on_exhaust,
                        });
                    }
                    let delay = self.policy.delay_for_attempt(attempt);
                    warn!(
                        agent = self.agent,
                        op,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        error = %error,
                        "attempt failed; retrying"
                    );
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                }
            }
        }
    }
}
