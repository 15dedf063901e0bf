//! Retry/Backoff Engine.
//!
//! A pure decision: `(error, attempt, max_attempts) -> RetryDecision`. The dispatcher
//! owns the attempt counter; nothing here is shared between calls.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delay schedule between attempts. `attempt` is the 1-based number of the attempt that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Backoff {
    /// `1000ms * (attempt XOR 2)`: 3s, 0s, 1s, 6s, 7s, 4s, ...
    ///
    /// Bitwise XOR, not a power. Kept as the default so existing deployments see the
    /// same retry timing; prefer [`Backoff::Exponential`] for new configurations.
    #[default]
    LegacyXor,
    /// `base_ms * 2^(attempt - 1)`, capped at `max_ms`.
    Exponential { base_ms: u64, max_ms: u64 },
    Fixed { delay_ms: u64 },
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::LegacyXor => Duration::from_millis(1000 * u64::from(attempt ^ 2)),
            Backoff::Exponential { base_ms, max_ms } => {
                let factor = 1u64
                    .checked_shl(attempt.saturating_sub(1))
                    .unwrap_or(u64::MAX);
                Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
            }
            Backoff::Fixed { delay_ms } => Duration::from_millis(delay_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub retry: bool,
    pub delay: Duration,
}

impl RetryDecision {
    pub const STOP: RetryDecision = RetryDecision {
        retry: false,
        delay: Duration::ZERO,
    };
}

/// Retry iff attempts remain and the error is transient.
///
/// Timeouts, cancellations, admission refusals and configuration errors are never retried.
pub fn decide(error: &Error, attempt: u32, max_attempts: u32, backoff: Backoff) -> RetryDecision {
    if attempt < max_attempts && error.is_retryable() {
        RetryDecision {
            retry: true,
            delay: backoff.delay(attempt),
        }
    } else {
        RetryDecision::STOP
    }
}

/// Attempt budget plus delay schedule, as configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn decide(&self, error: &Error, attempt: u32) -> RetryDecision {
        decide(error, attempt, self.max_attempts, self.backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(1, Backoff::default())
    }
}
