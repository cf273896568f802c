//! Retry and backoff policy.
//!
//! The policy is a pure decision function over the attempt count, the time
//! elapsed since the first attempt, and the outcome of the last attempt. The
//! transport owns the clock and the sleeping; this module only decides.

use std::time::Duration;

/// Outcome of one HTTP attempt, as seen by the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The request failed below HTTP: connect error, timeout, broken stream
    Network(String),
    /// An HTTP response arrived with a non-success status
    Status {
        code: u16,
        /// Parsed `Retry-After` header, when the server sent one
        retry_after: Option<Duration>,
    },
}

impl AttemptOutcome {
    /// Short description for error messages.
    pub fn describe(&self) -> String {
        match self {
            AttemptOutcome::Network(message) => message.clone(),
            AttemptOutcome::Status { code, .. } => format!("HTTP {code}"),
        }
    }
}

/// What the transport should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait this long, then retry
    Retry(Duration),
    /// Stop retrying
    Fatal(FatalReason),
}

/// Why the policy gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalReason {
    /// The outcome is not retryable (e.g. HTTP 4xx other than 429)
    NonRetryable,
    /// The attempt budget is spent
    AttemptsExhausted,
    /// The elapsed-time ceiling was reached
    TimeExhausted,
}

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, the first one included
    pub max_attempts: u32,
    /// Ceiling on total elapsed time across attempts
    pub max_elapsed: Duration,
    /// First backoff delay, doubled per attempt
    pub base_delay: Duration,
    /// Cap on a single backoff delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_elapsed: Duration::from_secs(120),
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Decide whether to retry after `attempt` attempts (1-based) with
    /// `elapsed` time spent so far and the given last outcome.
    pub fn decide(
        &self,
        attempt: u32,
        elapsed: Duration,
        outcome: &AttemptOutcome,
    ) -> RetryDecision {
        if !self.is_retryable(outcome) {
            return RetryDecision::Fatal(FatalReason::NonRetryable);
        }
        if attempt >= self.max_attempts {
            return RetryDecision::Fatal(FatalReason::AttemptsExhausted);
        }
        if elapsed >= self.max_elapsed {
            return RetryDecision::Fatal(FatalReason::TimeExhausted);
        }
        RetryDecision::Retry(self.delay(attempt, outcome))
    }

    fn is_retryable(&self, outcome: &AttemptOutcome) -> bool {
        match outcome {
            AttemptOutcome::Network(_) => true,
            AttemptOutcome::Status { code, .. } => {
                matches!(code, 429 | 502 | 503 | 504)
            }
        }
    }

    /// Delay before the next attempt. A server-provided `Retry-After` wins;
    /// otherwise exponential backoff with full jitter, capped.
    fn delay(&self, attempt: u32, outcome: &AttemptOutcome) -> Duration {
        if let AttemptOutcome::Status {
            retry_after: Some(wait),
            ..
        } = outcome
        {
            return (*wait).min(self.max_delay);
        }
        let exponential = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let capped = exponential.min(self.max_delay);
        capped.mul_f64(rand::random::<f64>())
    }
}
