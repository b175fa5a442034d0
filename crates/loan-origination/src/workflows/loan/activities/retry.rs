use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout};
use tracing::warn;

use super::{ActivityContext, ActivityError, IdempotencyKey};
use crate::workflows::loan::domain::ActivityKind;

/// Exponential backoff schedule applied between failed attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub backoff_coefficient: f64,
    pub maximum_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            maximum_interval: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        if !scaled.is_finite() || scaled >= self.maximum_interval.as_secs_f64() {
            return self.maximum_interval;
        }
        Duration::from_secs_f64(scaled.max(0.0))
    }
}

/// Per-activity execution bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityOptions {
    pub start_to_close_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            start_to_close_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

/// Options for every activity the loan process dispatches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoanActivityOptions {
    pub agreement: ActivityOptions,
    pub credit_check: ActivityOptions,
    pub funding: ActivityOptions,
}

impl LoanActivityOptions {
    pub fn uniform(options: ActivityOptions) -> Self {
        Self {
            agreement: options.clone(),
            credit_check: options.clone(),
            funding: options,
        }
    }

    pub fn for_kind(&self, kind: ActivityKind) -> &ActivityOptions {
        match kind {
            ActivityKind::GenerateAgreement => &self.agreement,
            ActivityKind::CreditCheck => &self.credit_check,
            ActivityKind::ReleaseFunds => &self.funding,
        }
    }
}

/// Successful activity result with the number of attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityRun<T> {
    pub value: T,
    pub attempts: u32,
}

/// Final failure after the retry policy gave up.
#[derive(Debug, thiserror::Error)]
#[error("{activity} failed after {attempts} attempt(s): {error}")]
pub struct ActivityFailure {
    pub activity: ActivityKind,
    pub attempts: u32,
    pub error: ActivityError,
}

/// Invokes one activity under its timeout and retry policy.
#[derive(Debug, Clone)]
pub struct ActivityRunner {
    options: ActivityOptions,
}

impl ActivityRunner {
    pub fn new(options: ActivityOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ActivityOptions {
        &self.options
    }

    pub async fn run<T, F, Fut>(
        &self,
        activity: ActivityKind,
        key: IdempotencyKey,
        mut invoke: F,
    ) -> Result<ActivityRun<T>, ActivityFailure>
    where
        F: FnMut(ActivityContext) -> Fut,
        Fut: Future<Output = Result<T, ActivityError>>,
    {
        let max_attempts = self.options.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let context = ActivityContext {
                key: key.clone(),
                attempt,
            };
            let result = match timeout(self.options.start_to_close_timeout, invoke(context)).await
            {
                Ok(result) => result,
                Err(_) => Err(ActivityError::TimedOut(self.options.start_to_close_timeout)),
            };

            let error = match result {
                Ok(value) => {
                    return Ok(ActivityRun {
                        value,
                        attempts: attempt,
                    })
                }
                Err(error) => error,
            };

            if !error.is_retryable() || attempt >= max_attempts {
                return Err(ActivityFailure {
                    activity,
                    attempts: attempt,
                    error,
                });
            }

            let delay = self.options.retry.backoff(attempt);
            warn!(%activity, %key, attempt, ?delay, %error, "activity attempt failed, retrying");
            sleep(delay).await;
            attempt += 1;
        }
    }
}
