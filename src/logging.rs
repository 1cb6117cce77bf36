// Licensed under the MIT License
// Copyright (c) 2025 Hal <hal.long@outlook.com>

//! Logging configuration for swiftget
//!
//! This module provides structured logging with different levels for CLI and
//! API usage.

use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Logging mode for different usage contexts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// CLI mode - user-friendly output
    Cli,
    /// API mode - structured logging for applications
    Api,
    /// Silent mode - minimal logging
    Silent,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub mode: LoggingMode,
    pub level: String,
    pub show_target: bool,
    pub use_ansi_colors: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::api()
    }
}

impl LoggingConfig {
    /// Create CLI logging configuration
    pub fn cli(verbose: bool) -> Self {
        Self {
            mode: LoggingMode::Cli,
            level: if verbose {
                "debug".to_string()
            } else {
                "warn".to_string()
            },
            show_target: verbose,
            use_ansi_colors: true,
        }
    }

    /// Create API logging configuration
    pub fn api() -> Self {
        Self {
            mode: LoggingMode::Api,
            level: "warn".to_string(),
            show_target: false,
            use_ansi_colors: false,
        }
    }

    /// Create silent logging configuration
    pub fn silent() -> Self {
        Self {
            mode: LoggingMode::Silent,
            level: "error".to_string(),
            show_target: false,
            use_ansi_colors: false,
        }
    }
}

/// Initialize logging with the given configuration. Safe to call more than
/// once; later calls are ignored.
pub fn init_logging(config: LoggingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("swiftget={}", config.level)));

    let fmt_layer = fmt::layer()
        .with_target(config.show_target)
        .with_ansi(config.use_ansi_colors)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .ok();
    Ok(())
}

/// Initialize logging for CLI usage
pub fn init_cli_logging(verbose: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_logging(LoggingConfig::cli(verbose))
}

/// Initialize logging for API usage
pub fn init_api_logging() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_logging(LoggingConfig::api())
}
