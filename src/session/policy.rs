//! Failure policy for subscribe, publish and unsubscribe
//!
//! Connect is never retried. Other operations either fail fast (the default)
//! or are retried on the same session with a bounded backoff.

use crate::error::SessionError;
use crate::transport::{OperationKind, TransportError};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Bounded retry configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries allowed after the first failure
    pub max_attempts: u32,
    /// Backoff pattern in milliseconds
    pub backoff_pattern: Vec<u64>,
    /// Delay used once the pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_pattern: vec![25, 50, 100, 250],
            sustained_delay: 250,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based)
    /// Pattern: 25ms, 50ms, 100ms, 250ms, then sustain at 250ms
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }

    /// Total time spent sleeping if every retry is used
    pub fn calculate_max_total_time(&self) -> u64 {
        (1..=self.max_attempts)
            .map(|attempt| self.calculate_backoff_delay(attempt))
            .sum()
    }
}

/// What to do when an operation fails
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OperationPolicy {
    /// The first failure is fatal
    #[default]
    FailFast,
    /// Retry broker rejections with backoff
    ///
    /// Only [`TransportError::Rejected`] is retried. An MQTT 3.1.1 PUBACK or
    /// PUBCOMP carries no failure code, so against a real broker this only
    /// ever retries subscribes. Publishes fail on a lost connection, and that
    /// is never retried.
    Retry(RetryConfig),
}

/// Outcome of consulting the policy after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Proceed { attempt: u32, delay_ms: u64 },
    Abort,
}

impl OperationPolicy {
    /// Decide whether to retry after `failures` previous retries
    pub fn decide(&self, failures: u32, error: &TransportError) -> RetryDecision {
        let config = match self {
            OperationPolicy::FailFast => return RetryDecision::Abort,
            OperationPolicy::Retry(config) => config,
        };

        if !error.is_transient() || failures >= config.max_attempts {
            return RetryDecision::Abort;
        }

        RetryDecision::Proceed {
            attempt: failures + 1,
            delay_ms: config.calculate_backoff_delay(failures + 1),
        }
    }
}

/// Run one request-and-acknowledge cycle under `policy`
///
/// `attempt` issues the request and waits for its token. A new request is
/// issued for every retry.
pub(crate) async fn run_operation<F, Fut>(
    policy: &OperationPolicy,
    operation: OperationKind,
    mut attempt: F,
) -> Result<(), SessionError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), TransportError>>,
{
    let mut failures = 0;
    loop {
        let error = match attempt().await {
            Ok(()) => return Ok(()),
            Err(error) => error,
        };

        match policy.decide(failures, &error) {
            RetryDecision::Proceed { attempt, delay_ms } => {
                warn!(
                    %operation,
                    attempt,
                    delay_ms,
                    "Operation failed, retrying: {}",
                    error
                );
                failures = attempt;
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            RetryDecision::Abort => return Err(SessionError::operation(operation, error)),
        }
    }
}
