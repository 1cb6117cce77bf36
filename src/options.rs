// Licensed under the MIT License
// Copyright (c) 2025 Hal <hal.long@outlook.com>

//! Download options
//!
//! Immutable per-job configuration built by the caller, consumed once by the
//! engine.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::constants::{CONNECT_TIMEOUT, MAX_REASONABLE_CONCURRENCY};
use crate::error::{DownloadError, Result};
use crate::hooks::DownloadHook;
use crate::progress::ProgressCallback;
use crate::retry::{RetryPolicy, RetryStrategy};
use crate::sink::{ByteSink, MemorySink};
use crate::transport::TransportPool;

/// Where downloaded bytes land
#[derive(Clone)]
pub enum Destination {
    /// Write to a file at this path; enables resume sidecars
    Path(PathBuf),
    /// Accumulate into a shared in-memory buffer
    Memory(Arc<MemorySink>),
    /// Arbitrary caller-supplied sink
    Custom(Arc<dyn ByteSink>),
}

impl std::fmt::Debug for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Destination::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Destination::Memory(_) => f.write_str("Memory"),
            Destination::Custom(_) => f.write_str("Custom(<sink>)"),
        }
    }
}

/// Optional byte filter applied to the stream in single mode
pub type ByteTransform = Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

/// Immutable input configuration for one download job
pub struct DownloadOptions {
    /// Destination sink
    pub destination: Destination,
    /// Worker concurrency; 0 selects automatically from the resource size
    pub concurrency: usize,
    /// Chunk size target in bytes; 0 selects automatically
    pub chunk_size: u64,
    /// Load and persist resume sidecars for path destinations
    pub enable_resume: bool,
    /// Replace an existing destination file
    pub overwrite: bool,
    /// Retry budget and backoff for transient chunk failures
    pub retry: RetryPolicy,
    /// Upper bound on each chunk fetch; `None` disables the bound
    pub operation_timeout: Option<Duration>,
    /// TCP connect timeout for pooled clients
    pub connect_timeout: Duration,
    /// Socket read timeout for pooled clients; `None` uses the pool default
    pub read_timeout: Option<Duration>,
    /// Rate ceiling in bytes per second; 0 means unlimited
    pub max_rate: u64,
    /// Extra request headers; hop-by-hop names are stripped before sending
    pub headers: HashMap<String, String>,
    /// User-Agent override
    pub user_agent: Option<String>,
    /// Progress callback invoked from the coordinator
    pub progress: Option<ProgressCallback>,
    /// Lifecycle hooks, run in order
    pub hooks: Vec<Arc<dyn DownloadHook>>,
    /// Suppress engine-side progress reporting
    pub quiet: bool,
    /// Fail before dispatch when the probed size differs from this
    pub expected_size: Option<u64>,
    /// Verify the finished bytes against this lowercase hex SHA-256 digest
    pub expected_sha256: Option<String>,
    /// Byte filter; forces the single-stream strategy and disables resume
    pub transform: Option<ByteTransform>,
    /// Caller cancellation token
    pub cancel: CancellationToken,
    /// Transport pool override, used by tests to inject a stub pool
    pub transport: Option<Arc<TransportPool>>,
}

impl DownloadOptions {
    /// Create options writing to the given file path, with defaults
    /// everywhere else
    pub fn to_path<P: Into<PathBuf>>(path: P) -> Self {
        Self::new(Destination::Path(path.into()))
    }

    /// Create options accumulating into the given memory sink
    pub fn to_memory(sink: Arc<MemorySink>) -> Self {
        Self::new(Destination::Memory(sink))
    }

    /// Create options with the given destination and defaults everywhere
    /// else
    pub fn new(destination: Destination) -> Self {
        Self {
            destination,
            concurrency: 0,
            chunk_size: 0,
            enable_resume: true,
            overwrite: false,
            retry: RetryPolicy::default(),
            operation_timeout: None,
            connect_timeout: CONNECT_TIMEOUT,
            read_timeout: None,
            max_rate: 0,
            headers: HashMap::new(),
            user_agent: None,
            progress: None,
            hooks: Vec::new(),
            quiet: false,
            expected_size: None,
            expected_sha256: None,
            transform: None,
            cancel: CancellationToken::new(),
            transport: None,
        }
    }

    /// Set worker concurrency
    pub fn with_concurrency(mut self, workers: usize) -> Self {
        self.concurrency = workers;
        self
    }

    /// Set the chunk size target
    pub fn with_chunk_size(mut self, size: u64) -> Self {
        self.chunk_size = size;
        self
    }

    /// Enable or disable resume sidecars
    pub fn with_resume(mut self, enable: bool) -> Self {
        self.enable_resume = enable;
        self
    }

    /// Allow replacing an existing destination
    pub fn with_overwrite(mut self, enable: bool) -> Self {
        self.overwrite = enable;
        self
    }

    /// Set the retry policy
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Set retry attempts keeping the rest of the policy
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry.attempts = attempts;
        self
    }

    /// Set the retry strategy keeping the rest of the policy
    pub fn with_retry_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.retry.strategy = strategy;
        self
    }

    /// Set the per-chunk operation timeout
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    /// Set the rate ceiling in bytes per second
    pub fn with_max_rate(mut self, bytes_per_sec: u64) -> Self {
        self.max_rate = bytes_per_sec;
        self
    }

    /// Add a request header
    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Override the User-Agent
    pub fn with_user_agent<S: Into<String>>(mut self, user_agent: S) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Set the progress callback
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Suppress progress reporting even when a callback is set
    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Append a lifecycle hook
    pub fn with_hook(mut self, hook: Arc<dyn DownloadHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Set the expected content length precondition
    pub fn with_expected_size(mut self, size: u64) -> Self {
        self.expected_size = Some(size);
        self
    }

    /// Set the expected SHA-256 digest, lowercase hex
    pub fn with_expected_sha256<S: Into<String>>(mut self, digest: S) -> Self {
        self.expected_sha256 = Some(digest.into());
        self
    }

    /// Set the single-stream byte transform
    pub fn with_transform(mut self, transform: ByteTransform) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Set the cancellation token observed by the job
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Inject a transport pool instead of the process-wide one
    pub fn with_transport_pool(mut self, pool: Arc<TransportPool>) -> Self {
        self.transport = Some(pool);
        self
    }

    /// Validate option combinations before the job starts
    pub fn validate(&self) -> Result<()> {
        if self.concurrency > 1024 {
            return Err(DownloadError::invalid_option(format!(
                "concurrency {} is unreasonable",
                self.concurrency
            )));
        }
        if let Some(digest) = &self.expected_sha256 {
            if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(DownloadError::invalid_option(
                    "expected_sha256 must be 64 hex characters",
                ));
            }
            if matches!(self.destination, Destination::Custom(_)) {
                return Err(DownloadError::invalid_option(
                    "checksum verification requires a path or memory destination",
                ));
            }
        }
        if self.transform.is_some() && self.expected_sha256.is_some() {
            return Err(DownloadError::invalid_option(
                "checksum verification cannot follow a byte transform",
            ));
        }
        if let Some(timeout) = self.operation_timeout {
            if timeout.is_zero() {
                return Err(DownloadError::invalid_option(
                    "operation timeout must be positive",
                ));
            }
        }
        Ok(())
    }

    /// Effective worker cap for dispatch
    pub(crate) fn worker_cap(&self) -> usize {
        if self.concurrency == 0 {
            MAX_REASONABLE_CONCURRENCY
        } else {
            self.concurrency.min(MAX_REASONABLE_CONCURRENCY)
        }
    }
}

impl std::fmt::Debug for DownloadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadOptions")
            .field("destination", &self.destination)
            .field("concurrency", &self.concurrency)
            .field("chunk_size", &self.chunk_size)
            .field("enable_resume", &self.enable_resume)
            .field("overwrite", &self.overwrite)
            .field("retry", &self.retry)
            .field("operation_timeout", &self.operation_timeout)
            .field("max_rate", &self.max_rate)
            .field("headers", &self.headers)
            .field("user_agent", &self.user_agent)
            .field("progress", &self.progress.as_ref().map(|_| "<callback>"))
            .field("hooks", &self.hooks.len())
            .field("quiet", &self.quiet)
            .field("expected_size", &self.expected_size)
            .field("expected_sha256", &self.expected_sha256)
            .field("transform", &self.transform.as_ref().map(|_| "<transform>"))
            .finish()
    }
}
