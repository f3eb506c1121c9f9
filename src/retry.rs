//! Retry Strategy (C7): pluggable backoff plus retryable-error
//! classification.
//!
//! `rand` already appears in the wider example pack
//! (`Masorubka1-iscsi-client-rs/src/utils.rs` fills a buffer via
//! `rand::rng().fill(...)`); this crate uses it the same way to draw the
//! exponential-backoff jitter from a CSPRNG.

use std::time::Duration;

use rand::Rng;

use crate::error::ClientError;

/// Outcome of asking a [`RetryStrategy`] what to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub delay: Duration,
    pub give_up: bool,
}

/// Computes `(delay, give_up)` from a zero-based attempt counter.
pub trait RetryStrategy: Send + Sync {
    fn next(&self, attempt: u32) -> RetryDecision;
}

/// Never retries.
pub struct NoRetry;

impl RetryStrategy for NoRetry {
    fn next(&self, _attempt: u32) -> RetryDecision {
        RetryDecision { delay: Duration::ZERO, give_up: true }
    }
}

/// Constant delay until `max_retries` attempts have been made.
pub struct LinearBackoff {
    pub delay: Duration,
    pub max_retries: u32,
}

impl RetryStrategy for LinearBackoff {
    fn next(&self, attempt: u32) -> RetryDecision {
        RetryDecision {
            delay: self.delay,
            give_up: attempt >= self.max_retries,
        }
    }
}

/// `delay = min(base * 2^attempt, cap)`, jittered by ±10% from a CSPRNG.
pub struct ExponentialBackoff {
    pub base: Duration,
    pub cap: Duration,
    pub max_retries: u32,
}

impl RetryStrategy for ExponentialBackoff {
    fn next(&self, attempt: u32) -> RetryDecision {
        let give_up = attempt >= self.max_retries;
        let unjittered = self.base.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
        let capped = unjittered.min(self.cap);
        let delay = jitter(capped);
        RetryDecision { delay, give_up }
    }
}

/// Applies ±10% jitter to `d`, drawn from the thread-local CSPRNG.
fn jitter(d: Duration) -> Duration {
    let mut rng = rand::rng();
    let factor: f64 = rng.random_range(0.9..=1.1);
    Duration::from_secs_f64(d.as_secs_f64() * factor)
}

/// An error is retryable when it is an explicit retryable wrapper (per
/// [`ClientError::is_retryable`]) or equals a timeout.
pub fn is_retryable(err: &ClientError) -> bool {
    err.is_retryable()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_retry_always_gives_up() {
        let s = NoRetry;
        assert!(s.next(0).give_up);
        assert!(s.next(5).give_up);
    }

    #[test]
    fn linear_backoff_caps_at_max_retries() {
        let s = LinearBackoff { delay: Duration::from_millis(50), max_retries: 2 };
        assert!(!s.next(0).give_up);
        assert!(!s.next(1).give_up);
        assert!(s.next(2).give_up);
        assert_eq!(s.next(0).delay, Duration::from_millis(50));
    }

    #[test]
    fn exponential_backoff_jitter_within_range() {
        let s = ExponentialBackoff {
            base: Duration::from_millis(100),
            cap: Duration::from_secs(10),
            max_retries: 5,
        };
        for attempt in 0..5u32 {
            let expected = s.base.saturating_mul(1u32 << attempt).min(s.cap);
            for _ in 0..50 {
                let got = s.next(attempt).delay;
                let lo = expected.as_secs_f64() * 0.9;
                let hi = expected.as_secs_f64() * 1.1;
                assert!(
                    got.as_secs_f64() >= lo - 1e-9 && got.as_secs_f64() <= hi + 1e-9,
                    "attempt {attempt}: {got:?} not within 10% of {expected:?}"
                );
            }
        }
    }

    #[test]
    fn exponential_backoff_respects_cap() {
        let s = ExponentialBackoff {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(2),
            max_retries: 10,
        };
        let got = s.next(10).delay;
        assert!(got.as_secs_f64() <= 2.2);
    }

    #[test]
    fn retry_bound_respected_by_a_driving_loop() {
        let s = LinearBackoff { delay: Duration::ZERO, max_retries: 3 };
        let mut attempts = 0;
        loop {
            attempts += 1;
            let decision = s.next(attempts - 1);
            if decision.give_up {
                break;
            }
        }
        assert_eq!(attempts, 4, "k+1 send attempts for MaxRetries=k");
    }
}
