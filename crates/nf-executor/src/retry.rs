//! Bounded generation attempts with exponential backoff.

use crate::ExecutorError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 0,
            backoff_multiplier: 2.0,
            max_backoff_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1` (0-based).
    pub fn compute_delay(&self, attempt: u32) -> Duration {
        let delay_ms = (self.backoff_ms as f64) * self.backoff_multiplier.powi(attempt as i32);
        let capped = delay_ms.min(self.max_backoff_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Whether another attempt may start after `attempts` have run.
    pub fn has_attempts_left(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

/// Result of an attempt loop.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome<T> {
    Succeeded { value: T, attempts: u32 },
    /// Every attempt failed with a retryable error.
    Exhausted { attempts: u32, last_error: ExecutorError },
    /// A non-retryable error ended the loop early.
    Fatal { attempts: u32, error: ExecutorError },
}

impl<T> AttemptOutcome<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Succeeded { attempts, .. }
            | Self::Exhausted { attempts, .. }
            | Self::Fatal { attempts, .. } => *attempts,
        }
    }

    pub fn into_result(self) -> Result<T, ExecutorError> {
        match self {
            Self::Succeeded { value, .. } => Ok(value),
            Self::Exhausted { attempts, last_error } => {
                tracing::error!(attempts, error = %last_error, "generation attempts exhausted");
                Err(last_error)
            }
            Self::Fatal { error, .. } => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff() {
        let policy = RetryPolicy {
            max_attempts: 5,
            backoff_ms: 1000,
            backoff_multiplier: 2.0,
            max_backoff_ms: 30_000,
        };

        assert_eq!(policy.compute_delay(0), Duration::from_millis(1000));
        assert_eq!(policy.compute_delay(1), Duration::from_millis(2000));
        assert_eq!(policy.compute_delay(2), Duration::from_millis(4000));
        assert_eq!(policy.compute_delay(4), Duration::from_millis(16000));
        // Capped at 30s
        assert_eq!(policy.compute_delay(5), Duration::from_millis(30000));
    }

    #[test]
    fn attempt_limit() {
        let policy = RetryPolicy::default(); // max_attempts = 3
        assert!(policy.has_attempts_left(0));
        assert!(policy.has_attempts_left(2));
        assert!(!policy.has_attempts_left(3));
    }

    #[test]
    fn outcome_into_result() {
        let ok: AttemptOutcome<u8> = AttemptOutcome::Succeeded { value: 1, attempts: 2 };
        assert_eq!(ok.attempts(), 2);
        assert_eq!(ok.into_result(), Ok(1));

        let gone: AttemptOutcome<u8> = AttemptOutcome::Exhausted {
            attempts: 3,
            last_error: ExecutorError::SandboxTimeout(10),
        };
        assert_eq!(gone.into_result(), Err(ExecutorError::SandboxTimeout(10)));
    }
}
