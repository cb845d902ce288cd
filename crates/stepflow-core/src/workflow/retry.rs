//! Retry policy for step attempts.
//!
//! Stateless: every decision is a function of the step's retry budget, the
//! attempt number and the execution config. Two failure kinds back off
//! differently: a failed model call waits longer than an unmet criterion.

use std::time::Duration;

use stepflow_types::config::ExecutionConfig;
use stepflow_types::workflow::StepDefinition;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// AttemptFailure
// ---------------------------------------------------------------------------

/// Why an attempt did not complete the step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptFailure {
    /// The model call itself failed.
    CallFailed,
    /// The model answered but the criterion did not pass.
    CriteriaNotMet,
}

// ---------------------------------------------------------------------------
// RetryHandler
// ---------------------------------------------------------------------------

pub struct RetryHandler;

impl RetryHandler {
    /// Total attempts for `step`: the first try plus `max_retries`.
    pub fn max_attempts(step: &StepDefinition) -> u32 {
        step.max_attempts()
    }

    /// `attempt` is 1-based. Returns `true` if another attempt is allowed
    /// after this one fails.
    pub fn should_retry(step: &StepDefinition, attempt: u32) -> bool {
        attempt < Self::max_attempts(step)
    }

    /// Delay before the next attempt.
    pub fn backoff(config: &ExecutionConfig, failure: AttemptFailure) -> Duration {
        let ms = match failure {
            AttemptFailure::CallFailed => config.call_failure_backoff_ms,
            AttemptFailure::CriteriaNotMet => config.criteria_failure_backoff_ms,
        };
        Duration::from_millis(ms)
    }
}

/// Sleep for `duration` unless `cancel` fires first.
///
/// Returns `true` if the wait was cut short by cancellation.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    if cancel.is_cancelled() {
        return true;
    }
    if duration.is_zero() {
        return false;
    }
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
