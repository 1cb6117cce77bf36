// Licensed under the MIT License
// Copyright (c) 2025 Hal <hal.long@outlook.com>

//! # swiftget
//!
//! High-performance HTTP(S) download engine with concurrent chunked
//! transfers, resumable downloads and rate control.
//!
//! ## Features
//!
//! - **Concurrent Downloads**: Multi-worker chunked downloads over ranged
//!   requests with a pooled transport
//! - **Resume Support**: Interrupted transfers continue from a persisted
//!   sidecar, validated against ETag and Last-Modified
//! - **Adaptive Planning**: Worker count and chunk sizes derived from the
//!   resource size, with automatic fallback to a single stream
//! - **Rate Control**: Token-bucket pacing shared across workers
//! - **Progress Tracking**: Throttled progress callbacks with speed and ETA
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use swiftget::{DownloadEngine, DownloadOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = DownloadEngine::new();
//!     let stats = engine
//!         .download(
//!             "https://example.com/release.tar.gz",
//!             DownloadOptions::to_path("release.tar.gz").with_concurrency(4),
//!         )
//!         .await?;
//!     println!("Downloaded {} bytes at {:.2} MB/s", stats.bytes_downloaded, stats.average_speed_mbps());
//!     Ok(())
//! }
//! ```

// Initialize the TLS crypto provider once (required when using the
// rustls-no-provider reqwest feature)
use std::sync::Once;
static INIT_TLS: Once = Once::new();

#[cfg(feature = "rustls-ring")]
pub(crate) fn init_tls_provider() {
    INIT_TLS.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

#[cfg(all(feature = "rustls-aws-lc", not(feature = "rustls-ring")))]
pub(crate) fn init_tls_provider() {
    INIT_TLS.call_once(|| {
        let _ = rustls_aws_lc::crypto::aws_lc_rs::default_provider().install_default();
    });
}

#[cfg(not(any(feature = "rustls-ring", feature = "rustls-aws-lc")))]
pub(crate) fn init_tls_provider() {
    INIT_TLS.call_once(|| {});
}

pub mod checksum;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod limiter;
pub mod logging;
pub mod options;
pub mod planner;
pub mod probe;
pub mod progress;
pub mod resume;
pub mod retry;
pub mod sink;
pub mod transport;

mod worker;

// Re-export commonly used types
pub use config::EngineConfig;
pub use engine::DownloadEngine;
pub use error::{DownloadError, DownloadFailure, Result};
pub use hooks::{DownloadHook, DownloadRequest};
pub use options::{ByteTransform, Destination, DownloadOptions};
pub use planner::{Chunk, ChunkPlan, Strategy};
pub use probe::{infer_filename, ResourceInfo};
pub use progress::{DownloadStats, Progress, ProgressCallback};
pub use resume::{sidecar_path, ChunkRecord, ResumeRecord};
pub use retry::{RetryPolicy, RetryStrategy};
pub use sink::{ByteSink, FileSink, MemorySink};
pub use transport::{ClientProfile, ClientTuning, TransportPool};
