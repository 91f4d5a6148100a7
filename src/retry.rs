//! Retry/backoff decision procedure for transport operations.
//!
//! Fixed policy: at most 3 attempts, with exponential backoff (1s then
//! 2s) between them. Only retriable failures consume an attempt;
//! anything classified as fatal is surfaced immediately. The policy is
//! a pure decision function — callers perform the actual sleep — so
//! the timing contract can be tested without a clock.

use std::time::Duration;

use crate::error::HarvestError;

pub const MAX_ATTEMPTS: u32 = 3;

/// Decision after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait this long, then try again.
    RetryAfter(Duration),
    /// Attempt budget spent; surface the last error.
    GiveUp,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            initial_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Decide what to do after attempt `attempt` (1-indexed) failed
    /// with a retriable error. Fatal errors must not be fed through
    /// here — check [`is_retriable`] first.
    pub fn after_failure(&self, attempt: u32) -> RetryDecision {
        if attempt >= self.max_attempts {
            RetryDecision::GiveUp
        } else {
            // Doubles per attempt: 1s after the first, 2s after the second.
            let delay = self.initial_delay * 2u32.pow(attempt - 1);
            RetryDecision::RetryAfter(delay)
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// A failed attempt, already classified by the transport layer.
/// Retriable failures consume an attempt from the policy budget;
/// fatal ones surface on first occurrence.
#[derive(Debug)]
pub enum Failure {
    Retriable(HarvestError),
    Fatal(HarvestError),
}

impl Failure {
    pub fn into_error(self) -> HarvestError {
        match self {
            Failure::Retriable(e) | Failure::Fatal(e) => e,
        }
    }
}

/// Classify a failure as retriable (connection refused, timeout,
/// remote overload) or fatal (remote-reported tool errors, malformed
/// responses, non-transient HTTP statuses).
pub fn is_retriable(err: &HarvestError) -> bool {
    matches!(err, HarvestError::Connection(_))
}

/// Whether an HTTP status is worth another attempt: 408 (request
/// timeout), 429 (rate limited), and all 5xx. Other 4xx statuses fail
/// immediately.
pub fn status_is_retriable(status: reqwest::StatusCode) -> bool {
    status.as_u16() == 408 || status.as_u16() == 429 || status.is_server_error()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.after_failure(1),
            RetryDecision::RetryAfter(Duration::from_secs(1))
        );
        assert_eq!(
            policy.after_failure(2),
            RetryDecision::RetryAfter(Duration::from_secs(2))
        );
    }

    #[test]
    fn gives_up_after_third_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.after_failure(3), RetryDecision::GiveUp);
        assert_eq!(policy.after_failure(4), RetryDecision::GiveUp);
    }

    #[test]
    fn connection_errors_are_retriable() {
        assert!(is_retriable(&HarvestError::Connection("refused".into())));
        assert!(!is_retriable(&HarvestError::ToolInvocation {
            tool: "jira_search_issues".into(),
            message: "bad jql".into(),
        }));
        assert!(!is_retriable(&HarvestError::Validation("missing key".into())));
    }

    #[test]
    fn retriable_statuses() {
        use reqwest::StatusCode;
        assert!(status_is_retriable(StatusCode::REQUEST_TIMEOUT));
        assert!(status_is_retriable(StatusCode::TOO_MANY_REQUESTS));
        assert!(status_is_retriable(StatusCode::BAD_GATEWAY));
        assert!(status_is_retriable(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!status_is_retriable(StatusCode::BAD_REQUEST));
        assert!(!status_is_retriable(StatusCode::NOT_FOUND));
    }
}
