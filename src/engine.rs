// Licensed under the MIT License
// Copyright (c) 2025 Hal <hal.long@outlook.com>

//! Download coordinator
//!
//! Owns the job state machine: probe the resource, plan the chunk layout,
//! adopt or invalidate a resume record, fan the chunks out to workers,
//! aggregate their progress, persist the sidecar, and produce the final
//! statistics. It is the only place that mutates shared job state; workers
//! report through the event channel and stop through a cancellation token.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT_ENCODING, USER_AGENT};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;

use crate::checksum;
use crate::config::EngineConfig;
use crate::constants::{
    DEFAULT_CANCEL_GRACE, LIGHTWEIGHT_THRESHOLD, PROGRESS_CHANNEL_CAPACITY,
};
use crate::error::{DownloadError, DownloadFailure, Result};
use crate::hooks::DownloadRequest;
use crate::limiter::RateLimiter;
use crate::options::{Destination, DownloadOptions};
use crate::planner::{ChunkPlan, Strategy};
use crate::probe::{probe_resource, ResourceInfo};
use crate::progress::{DownloadStats, ProgressTracker};
use crate::resume::ResumeRecord;
use crate::sink::{ByteSink, FileSink, MemorySink};
use crate::transport::{is_hop_by_hop, ClientProfile, ClientTuning, TransportPool};
use crate::worker::{run_chunk, WorkerContext, WorkerEvent};

/// High-performance HTTP(S) download engine
///
/// # Example
/// ```rust,no_run
/// use swiftget::{DownloadEngine, DownloadOptions};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let engine = DownloadEngine::new();
///     let options = DownloadOptions::to_path("archive.tar.gz").with_concurrency(8);
///     let stats = engine
///         .download("https://example.com/archive.tar.gz", options)
///         .await?;
///     println!("Fetched {} bytes in {:?}", stats.bytes_downloaded, stats.elapsed);
///     Ok(())
/// }
/// ```
#[derive(Debug, Default)]
pub struct DownloadEngine {
    config: EngineConfig,
}

impl DownloadEngine {
    /// Create an engine with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine with explicit configuration
    pub fn with_config(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Run one download job to completion.
    ///
    /// On failure the returned [`DownloadFailure`] still carries statistics
    /// reflecting the bytes actually written.
    pub async fn download(
        &self,
        url: &str,
        options: DownloadOptions,
    ) -> std::result::Result<DownloadStats, DownloadFailure> {
        let started = Instant::now();

        let prepared = options.validate().and_then(|()| {
            Url::parse(url).map_err(DownloadError::InvalidUrl)
        });
        let parsed = match prepared {
            Ok(parsed) => parsed,
            Err(error) => {
                return Err(DownloadFailure {
                    error,
                    stats: empty_stats(started),
                });
            }
        };

        let mut job = Job::new(&self.config, url, parsed, options, started);
        let result = job.run().await;
        let stats = job.stats(result.is_ok());

        for hook in &job.options.hooks {
            if let Err(e) = hook.post_download(&stats, result.as_ref().err()).await {
                warn!("Post-download hook failed: {e}");
            }
        }

        match result {
            Ok(()) => Ok(stats),
            Err(error) => Err(DownloadFailure { error, stats }),
        }
    }

    /// Download straight to a file path with default options
    pub async fn download_to_path<P: Into<PathBuf>>(
        &self,
        url: &str,
        path: P,
    ) -> std::result::Result<DownloadStats, DownloadFailure> {
        self.download(url, DownloadOptions::to_path(path)).await
    }

    /// Download into memory, returning the bytes alongside the statistics
    pub async fn download_to_memory(
        &self,
        url: &str,
    ) -> std::result::Result<(Vec<u8>, DownloadStats), DownloadFailure> {
        let sink = Arc::new(MemorySink::new());
        let stats = self
            .download(url, DownloadOptions::to_memory(sink.clone()))
            .await?;
        Ok((sink.take(), stats))
    }
}

fn empty_stats(started: Instant) -> DownloadStats {
    DownloadStats {
        bytes_downloaded: 0,
        total_bytes: -1,
        elapsed: started.elapsed(),
        average_speed: 0.0,
        success: false,
        resumed: false,
        retries: 0,
        redirects: 0,
        final_status: 0,
        strategy: Strategy::Single,
    }
}

/// Everything mutable for one engine invocation
struct Job<'a> {
    config: &'a EngineConfig,
    raw_url: String,
    url: Url,
    options: DownloadOptions,
    started: Instant,
    pool: Arc<TransportPool>,
    tuning: ClientTuning,

    // Filled in as the state machine advances
    total_size: i64,
    session_bytes: u64,
    resumed: bool,
    downgraded: bool,
    retries: u32,
    redirects: u32,
    final_status: u16,
    strategy: Strategy,
    hook_headers: Option<HeaderMap>,
}

/// Terminal verdict of one dispatch round
enum RoundEnd {
    Completed,
    Cancelled,
    Failed(DownloadError),
}

/// Per-chunk lifecycle, mutated only by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Pending,
    InFlight,
    Completed,
    Failed,
}

impl<'a> Job<'a> {
    fn new(
        config: &'a EngineConfig,
        raw_url: &str,
        url: Url,
        options: DownloadOptions,
        started: Instant,
    ) -> Self {
        let pool = options
            .transport
            .clone()
            .unwrap_or_else(TransportPool::global);
        let tuning = ClientTuning::new(options.connect_timeout, options.read_timeout);
        Self {
            config,
            raw_url: raw_url.to_string(),
            url,
            options,
            started,
            pool,
            tuning,
            total_size: -1,
            session_bytes: 0,
            resumed: false,
            downgraded: false,
            retries: 0,
            redirects: 0,
            final_status: 0,
            strategy: Strategy::Single,
            hook_headers: None,
        }
    }

    fn stats(&self, success: bool) -> DownloadStats {
        let elapsed = self.started.elapsed();
        let average_speed = if elapsed.as_secs_f64() > 0.0 {
            self.session_bytes as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        DownloadStats {
            bytes_downloaded: self.session_bytes,
            total_bytes: self.total_size,
            elapsed,
            average_speed,
            success,
            resumed: self.resumed,
            retries: self.retries,
            redirects: self.redirects,
            final_status: self.final_status,
            strategy: self.strategy,
        }
    }

    async fn run(&mut self) -> Result<()> {
        let mut info = self.probe().await?;
        self.check_preconditions(&info)?;

        loop {
            match self.execute_plan(&info).await {
                Ok(()) => return Ok(()),
                Err(err)
                    if err.is_downgrade_eligible()
                        && self.strategy == Strategy::Parallel
                        && !self.downgraded
                        && !self.options.cancel.is_cancelled() =>
                {
                    warn!("Downgrading to single-stream strategy after: {err}");
                    self.downgraded = true;
                    self.resumed = false;
                    if let Destination::Path(path) = &self.options.destination {
                        let _ = ResumeRecord::remove(path).await;
                    }
                    // The resource may have changed identity; probe again so
                    // the fresh run records current markers.
                    info = self.probe().await?;
                    self.check_preconditions(&info)?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn probe(&mut self) -> Result<ResourceInfo> {
        let client = self
            .pool
            .client_for(&self.url, ClientProfile::Standard, self.tuning)?;
        let headers = self.request_headers(&self.options.headers.clone());
        let info = probe_resource(
            &client,
            &self.url,
            &headers,
            &self.options.cancel,
            self.options.operation_timeout,
        )
        .await?;
        self.total_size = info.total_size;
        self.redirects = info.redirect_chain.len() as u32;
        self.final_status = info.status;
        Ok(info)
    }

    fn check_preconditions(&self, info: &ResourceInfo) -> Result<()> {
        if let Some(expected) = self.options.expected_size {
            if info.total_size >= 0 && info.total_size as u64 != expected {
                return Err(DownloadError::invalid_option(format!(
                    "expected {expected} bytes but the server reports {}",
                    info.total_size
                )));
            }
        }
        Ok(())
    }

    /// Build the header map sent with every request: caller headers minus
    /// hop-by-hop names, plus User-Agent and identity encoding so ranges
    /// stay byte-exact
    fn request_headers(
        &self,
        caller: &std::collections::HashMap<String, String>,
    ) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in caller {
            if is_hop_by_hop(name) {
                continue;
            }
            let Ok(name) = name.parse::<HeaderName>() else {
                warn!("Skipping unrepresentable header name {name:?}");
                continue;
            };
            let Ok(value) = HeaderValue::from_str(value) else {
                warn!("Skipping unrepresentable header value for {name:?}");
                continue;
            };
            headers.insert(name, value);
        }
        let agent = self
            .options
            .user_agent
            .clone()
            .unwrap_or_else(|| self.config.user_agent.clone());
        if let Ok(value) = HeaderValue::from_str(&agent) {
            headers.insert(USER_AGENT, value);
        }
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        headers
    }

    /// One full pass: plan, prepare the sink, adopt resume state, dispatch
    /// workers and finalize
    async fn execute_plan(&mut self, info: &ResourceInfo) -> Result<()> {
        let force_single = self.options.transform.is_some() || self.downgraded;
        let mut plan = ChunkPlan::plan(
            info.total_size,
            info.accepts_ranges,
            self.options.concurrency,
            self.options.chunk_size,
            force_single,
        );
        let mut counters = vec![0u64; plan.chunks.len()];

        let resume_capable = matches!(self.options.destination, Destination::Path(_))
            && self.options.enable_resume
            && self.options.transform.is_none()
            && !self.downgraded
            && info.total_size >= 0;

        let sink: Arc<dyn ByteSink> = match self.options.destination.clone() {
            Destination::Path(path) => {
                match self
                    .prepare_file(&path, info, resume_capable, &mut plan, &mut counters)
                    .await?
                {
                    Some(sink) => Arc::new(sink),
                    // Destination already holds the complete resource.
                    None => {
                        self.strategy = plan.strategy;
                        return self.verify_checksum().await;
                    }
                }
            }
            Destination::Memory(sink) => sink,
            Destination::Custom(sink) => sink,
        };
        self.strategy = plan.strategy;

        if plan.is_empty() {
            // Zero-length resource: an empty output is the whole job.
            sink.truncate(0).await?;
            let result = sink.flush().await;
            let _ = sink.close().await;
            result?;
            if let Destination::Path(path) = &self.options.destination {
                ResumeRecord::remove(path).await?;
            }
            return Ok(());
        }

        self.run_pre_hooks(info).await?;

        // Pre-extend the output to its final length so chunk writes land
        // inside an existing, possibly sparse, region. A volume that cannot
        // hold the resource surfaces as InsufficientSpace from this call or
        // from the first write that actually allocates.
        if info.total_size > 0 && self.options.transform.is_none() {
            sink.truncate(info.total_size as u64).await?;
        }

        let sidecar_dest = if resume_capable {
            match &self.options.destination {
                Destination::Path(path) => Some(path.clone()),
                _ => None,
            }
        } else {
            None
        };

        let result = self
            .active_phase(info, &plan, counters, sink.clone(), sidecar_dest.as_deref())
            .await;

        match result {
            Ok(RoundEnd::Completed) => {
                if info.total_size >= 0 && self.options.transform.is_none() {
                    sink.truncate(info.total_size as u64).await?;
                }
                let flushed = sink.flush().await;
                let _ = sink.close().await;
                flushed?;
                if let Some(dest) = &sidecar_dest {
                    ResumeRecord::remove(dest).await?;
                }
                self.verify_checksum().await?;
                info!(
                    "Download of {} completed: {} bytes this run",
                    self.raw_url, self.session_bytes
                );
                Ok(())
            }
            Ok(RoundEnd::Cancelled) => {
                let _ = sink.flush().await;
                let _ = sink.close().await;
                Err(DownloadError::Cancelled)
            }
            Ok(RoundEnd::Failed(error)) => {
                let _ = sink.flush().await;
                let _ = sink.close().await;
                Err(error)
            }
            Err(error) => {
                let _ = sink.close().await;
                Err(error)
            }
        }
    }

    /// Prepare the file destination. Returns `None` when the destination is
    /// already the complete resource and nothing needs to run.
    async fn prepare_file(
        &mut self,
        path: &Path,
        info: &ResourceInfo,
        resume_capable: bool,
        plan: &mut ChunkPlan,
        counters: &mut Vec<u64>,
    ) -> Result<Option<FileSink>> {
        let existing_len = match tokio::fs::metadata(path).await {
            Ok(meta) => Some(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        if resume_capable {
            if let Some(record) = ResumeRecord::load(path).await {
                if record.matches(info) {
                    info!(
                        "Adopting resume record for {}: {} of {} bytes done",
                        path.display(),
                        record.completed_bytes(),
                        record.total_size
                    );
                    *plan = record.to_plan();
                    *counters = record.completed_counters();
                    self.resumed = true;
                    return Ok(Some(FileSink::open_resumable(path).await?));
                }
                warn!(
                    "Resume record for {} no longer matches the resource, starting fresh",
                    path.display()
                );
                ResumeRecord::remove(path).await?;
                return Ok(Some(FileSink::create(path).await?));
            }
        }

        match existing_len {
            Some(len) if !self.options.overwrite && !self.downgraded => {
                if resume_capable && info.total_size >= 0 && len == info.total_size as u64 {
                    debug!("{} already holds the complete resource", path.display());
                    Ok(None)
                } else {
                    Err(DownloadError::FileExists {
                        path: path.display().to_string(),
                    })
                }
            }
            _ => Ok(Some(FileSink::create(path).await?)),
        }
    }

    async fn run_pre_hooks(&mut self, info: &ResourceInfo) -> Result<()> {
        if self.options.hooks.is_empty() || self.hook_headers.is_some() {
            return Ok(());
        }
        let mut request = DownloadRequest {
            url: info.final_url.clone(),
            headers: self.options.headers.clone(),
        };
        for hook in &self.options.hooks {
            hook.pre_download(&mut request).await?;
        }
        self.hook_headers = Some(self.request_headers(&request.headers));
        Ok(())
    }

    /// Dispatch workers and consume their events until the job reaches a
    /// terminal state
    async fn active_phase(
        &mut self,
        info: &ResourceInfo,
        plan: &ChunkPlan,
        counters: Vec<u64>,
        sink: Arc<dyn ByteSink>,
        sidecar_dest: Option<&Path>,
    ) -> Result<RoundEnd> {
        let mut states: Vec<ChunkState> = plan
            .chunks
            .iter()
            .map(|chunk| match chunk.size() {
                Some(size) if counters[chunk.id as usize] >= size => ChunkState::Completed,
                _ => ChunkState::Pending,
            })
            .collect();

        let pending: Vec<_> = plan
            .chunks
            .iter()
            .filter(|chunk| states[chunk.id as usize] == ChunkState::Pending)
            .copied()
            .collect();

        let mut tracker = ProgressTracker::new(
            info.total_size,
            counters.clone(),
            if self.options.quiet {
                None
            } else {
                self.options.progress.clone()
            },
        );

        if pending.is_empty() {
            tracker.emit_final();
            self.session_bytes += tracker.session_bytes();
            return Ok(RoundEnd::Completed);
        }

        if let Some(dest) = sidecar_dest {
            let record = ResumeRecord::new(&self.raw_url, info, plan, tracker.counters());
            record.store(dest).await?;
        }

        let profile = match info.known_size() {
            Some(size) if size <= LIGHTWEIGHT_THRESHOLD => ClientProfile::Lightweight,
            _ => ClientProfile::Standard,
        };
        let client = self
            .pool
            .client_for(&info.final_url, profile, self.tuning)?;

        let headers = self
            .hook_headers
            .clone()
            .unwrap_or_else(|| self.request_headers(&self.options.headers.clone()));

        let job_cancel = self.options.cancel.child_token();
        let (events_tx, mut events_rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
        let workers = self.options.worker_cap().min(pending.len()).max(1);
        let semaphore = Arc::new(Semaphore::new(workers));

        debug!(
            "Dispatching {} chunks over {} workers ({:?})",
            pending.len(),
            workers,
            plan.strategy
        );

        let ctx = Arc::new(WorkerContext {
            client,
            url: info.final_url.clone(),
            headers,
            sink,
            limiter: Arc::new(RateLimiter::new(self.options.max_rate)),
            retry: self.options.retry.clone(),
            operation_timeout: self.options.operation_timeout,
            cancel: job_cancel.clone(),
            events: events_tx,
            etag: info.etag.clone(),
            single_mode: plan.strategy == Strategy::Single,
            transform: self.options.transform.clone(),
        });

        let mut join = JoinSet::new();
        for chunk in pending {
            let ctx = ctx.clone();
            let semaphore = semaphore.clone();
            let resumed = counters[chunk.id as usize];
            states[chunk.id as usize] = ChunkState::InFlight;
            join.spawn(async move {
                let permit = tokio::select! {
                    _ = ctx.cancel.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                if permit.is_none() {
                    return;
                }
                run_chunk(ctx, chunk, resumed).await;
            });
        }
        // The coordinator's context clone holds the last sender; dropping it
        // lets the channel close once every worker has returned.
        drop(ctx);

        let grace = self
            .options
            .operation_timeout
            .map_or(DEFAULT_CANCEL_GRACE, |t| t.min(DEFAULT_CANCEL_GRACE));

        let mut first_error: Option<DownloadError> = None;
        let mut cancel_requested = false;

        loop {
            let event = if cancel_requested || first_error.is_some() {
                match tokio::time::timeout(grace, events_rx.recv()).await {
                    Ok(event) => event,
                    Err(_) => {
                        warn!("Workers did not stop within the grace period, aborting");
                        join.abort_all();
                        break;
                    }
                }
            } else {
                tokio::select! {
                    _ = self.options.cancel.cancelled() => {
                        info!("Cancellation requested, stopping workers");
                        cancel_requested = true;
                        job_cancel.cancel();
                        continue;
                    }
                    event = events_rx.recv() => event,
                }
            };

            let Some(event) = event else { break };
            match event {
                WorkerEvent::Progress { chunk_id, delta } => {
                    tracker.record_delta(chunk_id, delta);
                    tracker.maybe_emit();
                }
                WorkerEvent::Restarted { chunk_id } => {
                    tracker.reset_chunk(chunk_id);
                }
                WorkerEvent::Completed {
                    chunk_id,
                    bytes,
                    retries,
                } => {
                    self.retries += retries;
                    tracker.set_chunk_bytes(chunk_id, bytes);
                    if let Some(state) = states.get_mut(chunk_id as usize) {
                        *state = ChunkState::Completed;
                    }
                    tracker.maybe_emit();
                    if let Some(dest) = sidecar_dest {
                        let record =
                            ResumeRecord::new(&self.raw_url, info, plan, tracker.counters());
                        if let Err(e) = record.store(dest).await {
                            warn!("Failed to persist resume record: {e}");
                        }
                    }
                }
                WorkerEvent::Stopped {
                    chunk_id,
                    bytes,
                    retries,
                } => {
                    self.retries += retries;
                    tracker.set_chunk_bytes(chunk_id, bytes);
                }
                WorkerEvent::Failed {
                    chunk_id,
                    error,
                    retries,
                } => {
                    self.retries += retries;
                    warn!("Chunk {chunk_id} failed: {error}");
                    if let Some(state) = states.get_mut(chunk_id as usize) {
                        *state = ChunkState::Failed;
                    }
                    if first_error.is_none() {
                        first_error = Some(error);
                        job_cancel.cancel();
                    }
                }
            }
        }

        while join.join_next().await.is_some() {}

        tracker.emit_final();
        // Accumulate rather than assign: a downgrade runs a second round,
        // and bytes fetched during the aborted first round still count
        // toward this invocation.
        self.session_bytes += tracker.session_bytes();

        let all_done = states.iter().all(|state| *state == ChunkState::Completed);

        // Keep the sidecar current so a later run resumes from exact
        // counters rather than the last completion boundary.
        if !all_done {
            if let Some(dest) = sidecar_dest {
                let record = ResumeRecord::new(&self.raw_url, info, plan, tracker.counters());
                if let Err(e) = record.store(dest).await {
                    warn!("Failed to persist resume record: {e}");
                }
            }
        }

        // A caller cancellation outranks worker errors observed while
        // draining; the sidecar is preserved either way.
        if cancel_requested && !all_done {
            return Ok(RoundEnd::Cancelled);
        }
        if let Some(error) = first_error {
            return Ok(RoundEnd::Failed(error));
        }
        if all_done {
            Ok(RoundEnd::Completed)
        } else {
            Ok(RoundEnd::Failed(DownloadError::internal(
                "workers exited without a terminal chunk state",
            )))
        }
    }

    async fn verify_checksum(&self) -> Result<()> {
        let Some(expected) = &self.options.expected_sha256 else {
            return Ok(());
        };
        let actual = match &self.options.destination {
            Destination::Path(path) => checksum::file_sha256(path).await?,
            Destination::Memory(sink) => checksum::sha256_hex(&sink.snapshot()),
            Destination::Custom(_) => return Ok(()),
        };
        checksum::verify(expected, &actual)
    }
}
