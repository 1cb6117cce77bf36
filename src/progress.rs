// Licensed under the MIT License
// Copyright (c) 2025 Hal <hal.long@outlook.com>

//! Progress aggregation
//!
//! Workers emit non-blocking byte ticks; the coordinator folds them into a
//! single view with instantaneous and average speed, percentage and ETA, and
//! invokes the user callback on a throttle. Ticks may drop under saturation;
//! chunk completions carry authoritative counters so the aggregate converges
//! to the exact total.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::constants::{PROGRESS_CALLBACK_INTERVAL, SPEED_WINDOW};
use crate::planner::Strategy;

/// Streamed progress report delivered to the user callback
#[derive(Debug, Clone, Serialize)]
pub struct Progress {
    /// Bytes written so far, including bytes adopted from a resume record
    pub bytes_downloaded: u64,
    /// Total resource size; -1 when unknown
    pub total_size: i64,
    /// Speed over the last rolling window, bytes per second
    pub speed: f64,
    /// Average speed since this invocation started, bytes per second
    pub average_speed: f64,
    /// Completion percentage, 0 to 100, or -1 when the size is unknown
    pub percentage: f64,
    /// Estimated time remaining when computable
    pub eta: Option<Duration>,
    /// Elapsed time since this invocation started
    pub elapsed: Duration,
}

impl Progress {
    /// Get a human-readable speed string
    pub fn speed_human(&self) -> String {
        format_rate(self.speed)
    }

    /// Get a human-readable ETA string
    pub fn eta_human(&self) -> String {
        match self.eta {
            Some(eta) => format_duration(eta),
            None => "unknown".to_string(),
        }
    }
}

/// Progress callback type
pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

/// Final report for one engine invocation
#[derive(Debug, Clone, Serialize)]
pub struct DownloadStats {
    /// Bytes fetched and written during this invocation
    pub bytes_downloaded: u64,
    /// Total resource size; -1 when unknown
    pub total_bytes: i64,
    /// Wall-clock duration of the invocation
    pub elapsed: Duration,
    /// Average throughput in bytes per second
    pub average_speed: f64,
    /// Whether the job reached completion
    pub success: bool,
    /// Whether a resume record was adopted
    pub resumed: bool,
    /// Worker retry attempts summed across chunks
    pub retries: u32,
    /// Redirects followed while probing
    pub redirects: u32,
    /// Terminal HTTP status observed by the probe
    pub final_status: u16,
    /// Strategy the job ran with
    pub strategy: Strategy,
}

impl DownloadStats {
    /// Get average speed in MB/s
    pub fn average_speed_mbps(&self) -> f64 {
        self.average_speed / (1024.0 * 1024.0)
    }

    /// Get bytes downloaded in human-readable form
    pub fn bytes_human(&self) -> String {
        format_size(self.bytes_downloaded)
    }
}

/// Single-writer aggregate owned by the coordinator task
pub(crate) struct ProgressTracker {
    total_size: i64,
    started: Instant,
    /// Bytes already on disk when the invocation began
    base_bytes: u64,
    /// Authoritative per-chunk counters
    chunk_bytes: Vec<u64>,
    samples: VecDeque<(Instant, u64)>,
    last_emit: Option<Instant>,
    callback: Option<ProgressCallback>,
}

impl ProgressTracker {
    pub fn new(
        total_size: i64,
        chunk_bytes: Vec<u64>,
        callback: Option<ProgressCallback>,
    ) -> Self {
        let base_bytes = chunk_bytes.iter().sum();
        Self {
            total_size,
            started: Instant::now(),
            base_bytes,
            chunk_bytes,
            samples: VecDeque::new(),
            last_emit: None,
            callback,
        }
    }

    /// Apply a byte delta reported by a worker tick
    pub fn record_delta(&mut self, chunk_id: u32, delta: u64) {
        if let Some(counter) = self.chunk_bytes.get_mut(chunk_id as usize) {
            *counter += delta;
        }
        let total = self.total_bytes();
        self.samples.push_back((Instant::now(), total));
        self.prune_samples();
    }

    /// Overwrite one chunk counter with its authoritative value
    pub fn set_chunk_bytes(&mut self, chunk_id: u32, bytes: u64) {
        if let Some(counter) = self.chunk_bytes.get_mut(chunk_id as usize) {
            *counter = bytes;
        }
        let total = self.total_bytes();
        self.samples.push_back((Instant::now(), total));
        self.prune_samples();
    }

    /// Reset one chunk counter, used when a server ignores a resume range
    pub fn reset_chunk(&mut self, chunk_id: u32) {
        if let Some(counter) = self.chunk_bytes.get_mut(chunk_id as usize) {
            *counter = 0;
        }
        // Refetched bytes no longer count toward the resumed base.
        let total = self.total_bytes();
        if self.base_bytes > total {
            self.base_bytes = total;
        }
    }

    /// Current sum of chunk counters
    pub fn total_bytes(&self) -> u64 {
        self.chunk_bytes.iter().sum()
    }

    /// Bytes fetched during this invocation only
    pub fn session_bytes(&self) -> u64 {
        self.total_bytes().saturating_sub(self.base_bytes)
    }

    /// Per-chunk counters, plan order
    pub fn counters(&self) -> &[u64] {
        &self.chunk_bytes
    }

    fn prune_samples(&mut self) {
        let cutoff = Instant::now() - SPEED_WINDOW;
        while let Some(&(stamp, _)) = self.samples.front() {
            if stamp < cutoff && self.samples.len() > 1 {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn instantaneous_speed(&self) -> f64 {
        let (Some(&(first_t, first_b)), Some(&(last_t, last_b))) =
            (self.samples.front(), self.samples.back())
        else {
            return 0.0;
        };
        let dt = last_t.duration_since(first_t).as_secs_f64();
        if dt <= 0.0 {
            return 0.0;
        }
        last_b.saturating_sub(first_b) as f64 / dt
    }

    /// Build the current progress view
    pub fn snapshot(&self) -> Progress {
        let elapsed = self.started.elapsed();
        let done = self.total_bytes();
        let average_speed = if elapsed.as_secs_f64() > 0.0 {
            self.session_bytes() as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let percentage = if self.total_size > 0 {
            (done as f64 / self.total_size as f64) * 100.0
        } else if self.total_size == 0 {
            100.0
        } else {
            -1.0
        };
        let eta = if self.total_size > 0 && average_speed > 0.0 {
            let remaining = (self.total_size as u64).saturating_sub(done);
            Some(Duration::from_secs_f64(remaining as f64 / average_speed))
        } else {
            None
        };
        Progress {
            bytes_downloaded: done,
            total_size: self.total_size,
            speed: self.instantaneous_speed(),
            average_speed,
            percentage,
            eta,
            elapsed,
        }
    }

    /// Invoke the callback if the throttle interval has passed
    pub fn maybe_emit(&mut self) {
        let Some(callback) = self.callback.as_ref() else {
            return;
        };
        let now = Instant::now();
        if let Some(last) = self.last_emit {
            if now.duration_since(last) < PROGRESS_CALLBACK_INTERVAL {
                return;
            }
        }
        self.last_emit = Some(now);
        callback(self.snapshot());
    }

    /// Invoke the callback unconditionally, used for the final tick
    pub fn emit_final(&mut self) {
        if let Some(callback) = self.callback.as_ref() {
            callback(self.snapshot());
        }
        self.last_emit = Some(Instant::now());
    }
}

fn format_size(size: u64) -> String {
    if size >= 1024 * 1024 * 1024 {
        format!("{:.2} GB", size as f64 / (1024.0 * 1024.0 * 1024.0))
    } else if size >= 1024 * 1024 {
        format!("{:.2} MB", size as f64 / (1024.0 * 1024.0))
    } else if size >= 1024 {
        format!("{:.2} KB", size as f64 / 1024.0)
    } else {
        format!("{size} B")
    }
}

fn format_rate(rate: f64) -> String {
    if rate >= 1024.0 * 1024.0 * 1024.0 {
        format!("{:.2} GB/s", rate / (1024.0 * 1024.0 * 1024.0))
    } else if rate >= 1024.0 * 1024.0 {
        format!("{:.2} MB/s", rate / (1024.0 * 1024.0))
    } else if rate >= 1024.0 {
        format!("{:.2} KB/s", rate / 1024.0)
    } else {
        format!("{rate:.0} B/s")
    }
}

fn format_duration(d: Duration) -> String {
    let total = d.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}
