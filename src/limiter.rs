// Licensed under the MIT License
// Copyright (c) 2025 Hal <hal.long@outlook.com>

//! Token-bucket rate limiter shared by the workers of one job.
//!
//! The bucket refills at the configured byte rate and allows a burst of one
//! refill interval. Waits are sliced into short sleeps so a cancellation
//! signal is observed promptly. A zero rate disables the limiter entirely.

use std::sync::Mutex;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::constants::{RATE_LIMITER_TICK, STREAM_BUFFER_SIZE};
use crate::error::{DownloadError, Result};

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Byte-granular token bucket. One instance per job, never shared across
/// jobs.
#[derive(Debug)]
pub struct RateLimiter {
    /// Refill rate in bytes per second; 0 means unlimited
    rate: u64,
    /// Burst capacity in bytes
    capacity: f64,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    /// Create a limiter for the given byte rate. A rate of 0 produces a
    /// no-op limiter.
    pub fn new(rate: u64) -> Self {
        // Capacity must fit at least one stream buffer or a single acquire
        // could never succeed.
        let capacity = rate.max(STREAM_BUFFER_SIZE as u64) as f64;
        Self {
            rate,
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Whether pacing is active
    pub fn is_enabled(&self) -> bool {
        self.rate > 0
    }

    /// Acquire `n` byte tokens, waiting for the bucket to refill when
    /// necessary. Returns `Cancelled` as soon as the token fires.
    pub async fn acquire(&self, n: usize, cancel: &CancellationToken) -> Result<()> {
        if self.rate == 0 || n == 0 {
            return Ok(());
        }
        let want = n as f64;
        loop {
            let deficit = {
                let mut state = self
                    .state
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.rate as f64).min(self.capacity);
                state.last_refill = now;
                if state.tokens >= want {
                    state.tokens -= want;
                    return Ok(());
                }
                want - state.tokens
            };

            let wait = std::time::Duration::from_secs_f64(deficit / self.rate as f64);
            let tick = wait.min(RATE_LIMITER_TICK);
            tokio::select! {
                _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                _ = tokio::time::sleep(tick) => {}
            }
        }
    }
}
