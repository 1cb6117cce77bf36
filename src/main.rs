// Licensed under the MIT License
// Copyright (c) 2025 Hal <hal.long@outlook.com>

// Use high-performance memory allocator
#[cfg(not(disable_mimalloc))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use swiftget::{
    logging, DownloadEngine, DownloadError, DownloadOptions, EngineConfig, Progress,
    RetryStrategy,
};

/// swiftget - concurrent chunked download engine
#[derive(Parser)]
#[command(name = "swiftget")]
#[command(about = "High-performance HTTP(S) downloads with resume and rate control")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// URL to download
    url: String,

    /// Output path; derived from the response when omitted
    output: Option<PathBuf>,

    /// Number of parallel workers (0 = automatic)
    #[arg(short, long, default_value_t = 0)]
    concurrency: usize,

    /// Chunk size target, accepts K/M/G suffixes (0 = automatic)
    #[arg(long, default_value = "0", value_parser = parse_size)]
    chunk_size: u64,

    /// Rate ceiling in bytes per second, accepts K/M/G suffixes (0 = unlimited)
    #[arg(long, default_value = "0", value_parser = parse_size)]
    limit_rate: u64,

    /// Do not load or write resume sidecars
    #[arg(long)]
    no_resume: bool,

    /// Replace the output file if it exists
    #[arg(short = 'f', long)]
    overwrite: bool,

    /// Retry attempts per chunk
    #[arg(long)]
    retries: Option<u32>,

    /// Retry backoff strategy
    #[arg(long, value_parser = parse_retry_strategy)]
    retry_strategy: Option<RetryStrategy>,

    /// Per-chunk operation timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Extra request header, "Name: Value", repeatable
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// User-Agent override
    #[arg(short = 'A', long)]
    user_agent: Option<String>,

    /// Verify the finished file against this SHA-256 hex digest
    #[arg(long)]
    sha256: Option<String>,

    /// Suppress the progress bar
    #[arg(short, long)]
    quiet: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn parse_size(value: &str) -> Result<u64, String> {
    let value = value.trim();
    let (digits, factor) = match value.chars().last() {
        Some('k') | Some('K') => (&value[..value.len() - 1], 1024u64),
        Some('m') | Some('M') => (&value[..value.len() - 1], 1024 * 1024),
        Some('g') | Some('G') => (&value[..value.len() - 1], 1024 * 1024 * 1024),
        _ => (value, 1),
    };
    digits
        .trim()
        .parse::<u64>()
        .map(|n| n * factor)
        .map_err(|_| format!("invalid size {value:?}"))
}

fn parse_retry_strategy(value: &str) -> Result<RetryStrategy, String> {
    match value.to_ascii_lowercase().as_str() {
        "exponential" => Ok(RetryStrategy::Exponential),
        "linear" => Ok(RetryStrategy::Linear),
        "fixed" => Ok(RetryStrategy::Fixed),
        other => Err(format!(
            "unknown retry strategy {other:?}, expected exponential, linear or fixed"
        )),
    }
}

fn parse_header(raw: &str) -> anyhow::Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .with_context(|| format!("header {raw:?} is not in \"Name: Value\" form"))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
}

fn exit_code_for(error: &DownloadError) -> i32 {
    match error {
        DownloadError::InvalidOption { .. }
        | DownloadError::InvalidUrl(_)
        | DownloadError::FileExists { .. }
        | DownloadError::InternalInvariant { .. } => 1,
        DownloadError::Storage(_)
        | DownloadError::InsufficientSpace { .. }
        | DownloadError::Json(_) => 3,
        DownloadError::Cancelled => 4,
        _ => 2,
    }
}

fn progress_bar(quiet: bool) -> Option<ProgressBar> {
    if quiet {
        return None;
    }
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
            .unwrap()
            .progress_chars("#>-"),
    );
    Some(bar)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let _ = logging::init_cli_logging(cli.verbose);

    std::process::exit(match run(cli).await {
        Ok(()) => 0,
        Err(error) => {
            eprintln!("swiftget: {error}");
            exit_code_for(&error)
        }
    });
}

async fn run(cli: Cli) -> Result<(), DownloadError> {
    let config = EngineConfig::load()?;
    let engine = DownloadEngine::with_config(config.clone());

    let output = match &cli.output {
        Some(path) => path.clone(),
        None => {
            let parsed = url::Url::parse(&cli.url)?;
            let name = parsed
                .path()
                .split('/')
                .next_back()
                .filter(|s| !s.is_empty())
                .unwrap_or("download")
                .to_string();
            PathBuf::from(name)
        }
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let mut options = DownloadOptions::to_path(output.clone())
        .with_concurrency(if cli.concurrency > 0 {
            cli.concurrency
        } else {
            config.concurrency
        })
        .with_chunk_size(if cli.chunk_size > 0 {
            cli.chunk_size
        } else {
            config.chunk_size
        })
        .with_resume(!cli.no_resume && config.resume)
        .with_overwrite(cli.overwrite)
        .with_max_rate(if cli.limit_rate > 0 {
            cli.limit_rate
        } else {
            config.max_rate
        })
        .with_retry_attempts(cli.retries.unwrap_or(config.retry_attempts))
        .with_cancel_token(cancel);
    if let Some(strategy) = cli.retry_strategy {
        options = options.with_retry_strategy(strategy);
    }
    let timeout_secs = cli.timeout.unwrap_or(config.operation_timeout_secs);
    if timeout_secs > 0 {
        options = options.with_operation_timeout(Duration::from_secs(timeout_secs));
    }
    for raw in &cli.headers {
        let (name, value) =
            parse_header(raw).map_err(|e| DownloadError::invalid_option(e.to_string()))?;
        options = options.with_header(name, value);
    }
    if let Some(agent) = &cli.user_agent {
        options = options.with_user_agent(agent.clone());
    }
    if let Some(digest) = &cli.sha256 {
        options = options.with_expected_sha256(digest.clone());
    }

    let bar = progress_bar(cli.quiet);
    if let Some(bar) = bar.clone() {
        options = options.with_progress(Arc::new(move |progress: Progress| {
            if progress.total_size > 0 {
                bar.set_length(progress.total_size as u64);
            }
            bar.set_position(progress.bytes_downloaded);
        }));
    }

    match engine.download(&cli.url, options).await {
        Ok(stats) => {
            if let Some(bar) = bar {
                bar.finish_and_clear();
            }
            if !cli.quiet {
                let resumed = if stats.resumed { " (resumed)" } else { "" };
                println!(
                    "Saved {} as {}{resumed} in {:.2}s ({:.2} MB/s)",
                    stats.bytes_human(),
                    output.display(),
                    stats.elapsed.as_secs_f64(),
                    stats.average_speed_mbps()
                );
            }
            Ok(())
        }
        Err(failure) => {
            if let Some(bar) = bar {
                bar.abandon();
            }
            Err(failure.error)
        }
    }
}
