//! Retry policy and the explicit retry state machine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::ErrorKind;

/// Retry policy for uploads.
///
/// delay = base_delay * multiplier^(attempts - 1), capped at max_delay
///
/// Example with base_delay=2s, multiplier=2.0:
/// - after attempt 1: 2s
/// - after attempt 2: 4s
/// - after attempt 3: 8s
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total tries including the first one.
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound for a single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after `attempts` tries have failed (1-indexed).
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Wait `delay`, then try again.
    Retry { delay: Duration, reason: String },

    /// Stop; the last error is terminal.
    GiveUp { reason: String },
}

/// Attempt counter plus policy. One per (artifact, target) delivery.
///
/// Pure state: no clock, no sleeping. The uploader performs the waits.
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    attempts: u32,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Count a new attempt and return its 1-based number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Decide after the current attempt failed with an error of `kind`.
    pub fn on_failure(&self, kind: ErrorKind) -> RetryDecision {
        if !kind.is_retryable() {
            return RetryDecision::GiveUp {
                reason: format!("{kind:?} error is not retryable"),
            };
        }
        if self.attempts >= self.policy.max_attempts {
            return RetryDecision::GiveUp {
                reason: format!(
                    "max attempts reached: {}/{}",
                    self.attempts, self.policy.max_attempts
                ),
            };
        }
        let delay = self.policy.next_delay(self.attempts);
        RetryDecision::Retry {
            delay,
            reason: format!(
                "retry attempt {}/{} after {:?}",
                self.attempts + 1,
                self.policy.max_attempts,
                delay
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn default_policy_has_reasonable_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_secs(2));
        assert_eq!(policy.multiplier, 2.0);
    }

    #[test]
    fn exponential_backoff_increases() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(1), Duration::from_secs(2));
        assert_eq!(policy.next_delay(2), Duration::from_secs(4));
        assert_eq!(policy.next_delay(3), Duration::from_secs(8));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(5),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.next_delay(3), Duration::from_secs(5));
        assert_eq!(policy.next_delay(500), Duration::from_secs(5));
    }

    #[test]
    fn transient_failures_retry_until_budget() {
        let mut state = RetryState::new(RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        });

        assert_eq!(state.begin_attempt(), 1);
        assert!(matches!(
            state.on_failure(ErrorKind::Transient),
            RetryDecision::Retry { delay, .. } if delay == Duration::from_secs(2)
        ));

        assert_eq!(state.begin_attempt(), 2);
        assert!(matches!(
            state.on_failure(ErrorKind::Transient),
            RetryDecision::Retry { delay, .. } if delay == Duration::from_secs(4)
        ));

        assert_eq!(state.begin_attempt(), 3);
        assert!(matches!(
            state.on_failure(ErrorKind::Transient),
            RetryDecision::GiveUp { .. }
        ));
    }

    #[rstest]
    #[case::permanent(ErrorKind::Permanent)]
    #[case::cancelled(ErrorKind::Cancelled)]
    #[case::invalid(ErrorKind::InvalidInput)]
    fn non_transient_gives_up_immediately(#[case] kind: ErrorKind) {
        let mut state = RetryState::new(RetryPolicy::default());
        state.begin_attempt();
        assert!(matches!(state.on_failure(kind), RetryDecision::GiveUp { .. }));
        assert_eq!(state.attempts(), 1);
    }
}
