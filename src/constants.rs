// Licensed under the MIT License
// Copyright (c) 2025 Hal <hal.long@outlook.com>

//! # Constants
//!
//! Centralized constants for the swiftget engine.
//! This module eliminates magic numbers and provides a single source of truth
//! for configurable values.

use std::time::Duration;

/// Default retry attempts per chunk
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default base delay for retry backoff
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Upper bound honoured for a server-provided Retry-After value
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(120);

/// Maximum redirect count
pub const MAX_REDIRECTS: usize = 10;

/// Smallest chunk the planner will emit in parallel mode (256 KiB)
pub const MIN_CHUNK_SIZE: u64 = 256 * 1024;

/// Largest auto-selected chunk target (4 MiB)
pub const MAX_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

/// Hard cap on worker concurrency for one job
pub const MAX_REASONABLE_CONCURRENCY: usize = 16;

/// Files at or below this size always download as a single stream (1 MiB)
pub const MIN_PARALLEL_BYTES: u64 = 1024 * 1024;

/// Transfers expected to be at or below this size use the lightweight
/// client profile (256 KiB)
pub const LIGHTWEIGHT_THRESHOLD: u64 = 256 * 1024;

/// Streaming buffer target for chunk bodies (64 KiB)
pub const STREAM_BUFFER_SIZE: usize = 64 * 1024;

/// Maximum sleep slice inside the rate limiter, keeps waits
/// cancellation-responsive
pub const RATE_LIMITER_TICK: Duration = Duration::from_millis(50);

/// Minimum interval between user progress callback invocations
pub const PROGRESS_CALLBACK_INTERVAL: Duration = Duration::from_millis(100);

/// Rolling window used for instantaneous speed estimation
pub const SPEED_WINDOW: Duration = Duration::from_secs(1);

/// Bound of the worker progress channel; ticks beyond it are dropped
pub const PROGRESS_CHANNEL_CAPACITY: usize = 1024;

/// Grace period granted to workers after a cancellation signal
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(5);

/// Connection pool: max idle connections kept per host
pub const POOL_MAX_IDLE_PER_HOST: usize = 20;

/// Connection pool: idle connection lifetime
pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Lightweight profile: max idle connections kept per host
pub const LIGHT_POOL_MAX_IDLE_PER_HOST: usize = 4;

/// Lightweight profile: idle connection lifetime
pub const LIGHT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(15);

/// TCP connect timeout
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// TCP keep-alive interval
pub const TCP_KEEPALIVE: Duration = Duration::from_secs(30);

/// Sidecar schema version understood by this build
pub const SIDECAR_SCHEMA_VERSION: u32 = 1;

/// Sidecar file suffix appended to the destination path
pub const SIDECAR_SUFFIX: &str = ".resume.json";

/// Default user agent when the caller does not override it
pub const DEFAULT_USER_AGENT: &str =
    concat!("swiftget/", env!("CARGO_PKG_VERSION"));
