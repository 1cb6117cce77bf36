// Licensed under the MIT License
// Copyright (c) 2025 Hal <hal.long@outlook.com>

//! Retry backoff policies for transient chunk failures.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash, Hasher};
use std::time::Duration;

use crate::constants::{DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_BASE_DELAY, MAX_RETRY_AFTER};

/// How the delay between retry attempts grows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryStrategy {
    /// base * 2^(attempt-1)
    #[default]
    Exponential,
    /// base * attempt
    Linear,
    /// base
    Fixed,
}

/// Retry budget and pacing for one chunk
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure
    pub attempts: u32,
    /// Base delay fed into the strategy
    pub base_delay: Duration,
    /// Growth curve
    pub strategy: RetryStrategy,
    /// Randomize each delay by up to plus or minus 50 percent
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            base_delay: DEFAULT_RETRY_BASE_DELAY,
            strategy: RetryStrategy::Exponential,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given attempt, 1-based
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base = match self.strategy {
            RetryStrategy::Exponential => {
                let factor = 2u32.saturating_pow(attempt - 1);
                self.base_delay.saturating_mul(factor)
            }
            RetryStrategy::Linear => self.base_delay.saturating_mul(attempt),
            RetryStrategy::Fixed => self.base_delay,
        };
        if self.jitter {
            apply_jitter(base, attempt)
        } else {
            base
        }
    }
}

/// Scale a delay by a random factor in [0.5, 1.5)
fn apply_jitter(delay: Duration, seed: u32) -> Duration {
    let mut hasher = RandomState::new().build_hasher();
    seed.hash(&mut hasher);
    let roll = hasher.finish() % 1000;
    let factor = 0.5 + roll as f64 / 1000.0;
    delay.mul_f64(factor)
}

/// Parse a Retry-After header value: either delta seconds or an HTTP date.
///
/// The result is capped so a hostile header cannot stall a worker
/// indefinitely.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    let delay = if let Ok(secs) = value.parse::<u64>() {
        Duration::from_secs(secs)
    } else {
        let when = chrono::DateTime::parse_from_rfc2822(value).ok()?;
        let delta = when.signed_duration_since(chrono::Utc::now());
        delta.to_std().unwrap_or(Duration::ZERO)
    };
    Some(delay.min(MAX_RETRY_AFTER))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_growth() {
        let policy = RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(100),
            strategy: RetryStrategy::Exponential,
            jitter: false,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_linear_growth() {
        let policy = RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(100),
            strategy: RetryStrategy::Linear,
            jitter: false,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(3), Duration::from_millis(300));
    }

    #[test]
    fn test_fixed_delay() {
        let policy = RetryPolicy {
            attempts: 5,
            base_delay: Duration::from_millis(250),
            strategy: RetryStrategy::Fixed,
            jitter: false,
        };
        assert_eq!(policy.delay_for(1), policy.delay_for(5));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(1000),
            strategy: RetryStrategy::Fixed,
            jitter: true,
        };
        for attempt in 1..=20 {
            let d = policy.delay_for(attempt);
            assert!(d >= Duration::from_millis(500), "too short: {d:?}");
            assert!(d < Duration::from_millis(1500), "too long: {d:?}");
        }
    }

    #[test]
    fn test_retry_after_seconds() {
        assert_eq!(parse_retry_after("7"), Some(Duration::from_secs(7)));
        assert_eq!(parse_retry_after(" 30 "), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_retry_after_cap() {
        assert_eq!(parse_retry_after("86400"), Some(MAX_RETRY_AFTER));
    }

    #[test]
    fn test_retry_after_http_date_in_past() {
        let past = "Wed, 21 Oct 2015 07:28:00 GMT";
        assert_eq!(parse_retry_after(past), Some(Duration::ZERO));
    }

    #[test]
    fn test_retry_after_garbage() {
        assert_eq!(parse_retry_after("soon"), None);
    }
}
