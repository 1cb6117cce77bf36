// Licensed under the MIT License
// Copyright (c) 2025 Hal <hal.long@outlook.com>

//! Engine configuration
//!
//! Tuning defaults for the engine, layered from built-in values, an optional
//! `swiftget.toml` next to the working directory, and `SWIFTGET_*`
//! environment variables. The CLI materialises per-job options on top of
//! this; the engine itself reads nothing else from the environment.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_BASE_DELAY, DEFAULT_USER_AGENT,
};
use crate::error::{DownloadError, Result};

/// Global tuning defaults for a [`crate::DownloadEngine`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// User agent sent when a job does not override it
    pub user_agent: String,

    /// Default worker concurrency; 0 selects automatically
    pub concurrency: usize,

    /// Default chunk size target in bytes; 0 selects automatically
    pub chunk_size: u64,

    /// Default retry attempts per chunk
    pub retry_attempts: u32,

    /// Default retry base delay in milliseconds
    pub retry_base_delay_ms: u64,

    /// Default operation timeout in seconds; 0 disables the bound
    pub operation_timeout_secs: u64,

    /// Default rate ceiling in bytes per second; 0 means unlimited
    pub max_rate: u64,

    /// Whether jobs keep resume sidecars by default
    pub resume: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            concurrency: 0,
            chunk_size: 0,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY.as_millis() as u64,
            operation_timeout_secs: 0,
            max_rate: 0,
            resume: true,
        }
    }
}

impl EngineConfig {
    /// Load configuration from defaults, `swiftget.toml` and `SWIFTGET_*`
    /// environment variables, later layers winning
    pub fn load() -> Result<Self> {
        Figment::from(Serialized::defaults(EngineConfig::default()))
            .merge(Toml::file("swiftget.toml"))
            .merge(Env::prefixed("SWIFTGET_"))
            .extract()
            .map_err(|e| DownloadError::invalid_option(format!("configuration error: {e}")))
    }
}
