// Licensed under the MIT License
// Copyright (c) 2025 Hal <hal.long@outlook.com>

//! Chunk workers
//!
//! Each worker owns exactly one chunk: it issues a ranged GET, streams the
//! body buffer by buffer through the rate limiter into the sink at its
//! assigned offset, and reports progress to the coordinator. Transient
//! failures retry in place, re-requesting only the bytes past the last
//! durably written offset. Workers never touch shared state directly; every
//! observation flows through the event channel.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, RANGE, RETRY_AFTER};
use reqwest::{Client, Method};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::error::DownloadError;
use crate::limiter::RateLimiter;
use crate::options::ByteTransform;
use crate::planner::Chunk;
use crate::retry::{parse_retry_after, RetryPolicy};
use crate::sink::ByteSink;
use crate::transport::execute_following;

/// Messages from workers to the coordinator
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    /// Non-blocking byte tick; may be dropped under channel saturation
    Progress { chunk_id: u32, delta: u64 },
    /// The server ignored a resume range; the chunk restarted from zero
    Restarted { chunk_id: u32 },
    /// Chunk finished; `bytes` is the authoritative counter
    Completed { chunk_id: u32, bytes: u64, retries: u32 },
    /// Chunk stopped early on cancellation with `bytes` durably written
    Stopped { chunk_id: u32, bytes: u64, retries: u32 },
    /// Chunk failed after exhausting its retry budget
    Failed {
        chunk_id: u32,
        error: DownloadError,
        retries: u32,
    },
}

/// Immutable state shared by all workers of one job
pub(crate) struct WorkerContext {
    pub client: Client,
    pub url: Url,
    pub headers: HeaderMap,
    pub sink: Arc<dyn ByteSink>,
    pub limiter: Arc<RateLimiter>,
    pub retry: RetryPolicy,
    pub operation_timeout: Option<Duration>,
    pub cancel: CancellationToken,
    pub events: mpsc::Sender<WorkerEvent>,
    /// ETag recorded at probe time, compared against every chunk response
    pub etag: Option<String>,
    /// Single-stream mode: one chunk covers the whole body
    pub single_mode: bool,
    pub transform: Option<ByteTransform>,
}

struct FetchError {
    error: DownloadError,
    retry_after: Option<Duration>,
}

impl From<DownloadError> for FetchError {
    fn from(error: DownloadError) -> Self {
        Self {
            error,
            retry_after: None,
        }
    }
}

/// Drive one chunk to a terminal state, reporting the outcome on the event
/// channel
pub(crate) async fn run_chunk(ctx: Arc<WorkerContext>, chunk: Chunk, resumed: u64) {
    let mut completed = resumed;
    let mut attempt: u32 = 0;
    loop {
        match fetch_once(&ctx, &chunk, &mut completed).await {
            Ok(()) => {
                debug!("Chunk {} completed with {} bytes", chunk.id, completed);
                let _ = ctx
                    .events
                    .send(WorkerEvent::Completed {
                        chunk_id: chunk.id,
                        bytes: completed,
                        retries: attempt,
                    })
                    .await;
                return;
            }
            Err(FetchError {
                error: DownloadError::Cancelled,
                ..
            }) => {
                let _ = ctx
                    .events
                    .send(WorkerEvent::Stopped {
                        chunk_id: chunk.id,
                        bytes: completed,
                        retries: attempt,
                    })
                    .await;
                return;
            }
            Err(FetchError { error, retry_after }) => {
                if error.is_retryable() && attempt < ctx.retry.attempts {
                    attempt += 1;
                    let delay = retry_after.unwrap_or_else(|| ctx.retry.delay_for(attempt));
                    warn!(
                        "Chunk {} attempt {} failed: {}; retrying in {:?}",
                        chunk.id, attempt, error, delay
                    );
                    tokio::select! {
                        _ = ctx.cancel.cancelled() => {
                            let _ = ctx
                                .events
                                .send(WorkerEvent::Stopped {
                                    chunk_id: chunk.id,
                                    bytes: completed,
                                    retries: attempt,
                                })
                                .await;
                            return;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    continue;
                }
                let _ = ctx
                    .events
                    .send(WorkerEvent::Failed {
                        chunk_id: chunk.id,
                        error,
                        retries: attempt,
                    })
                    .await;
                return;
            }
        }
    }
}

/// One fetch attempt, resuming from the chunk's durably written offset
async fn fetch_once(
    ctx: &WorkerContext,
    chunk: &Chunk,
    completed: &mut u64,
) -> Result<(), FetchError> {
    if ctx.cancel.is_cancelled() {
        return Err(DownloadError::Cancelled.into());
    }
    if let Some(end) = chunk.end {
        if chunk.start + *completed > end {
            return Ok(());
        }
    }

    let work = stream_range(ctx, chunk, completed);
    match ctx.operation_timeout {
        Some(limit) => match tokio::time::timeout(limit, work).await {
            Ok(result) => result,
            Err(_) => Err(DownloadError::timeout(format!(
                "chunk {} exceeded the {limit:?} operation timeout",
                chunk.id
            ))
            .into()),
        },
        None => work.await,
    }
}

async fn stream_range(
    ctx: &WorkerContext,
    chunk: &Chunk,
    completed: &mut u64,
) -> Result<(), FetchError> {
    let resume_from = chunk.start + *completed;
    let mut headers = ctx.headers.clone();
    // Single streams start plain; everything else pins an exact range.
    let sent_range = !ctx.single_mode || resume_from > 0;
    if sent_range {
        let value = match chunk.end {
            Some(end) => format!("bytes={resume_from}-{end}"),
            None => format!("bytes={resume_from}-"),
        };
        headers.insert(
            RANGE,
            HeaderValue::from_str(&value)
                .map_err(|_| DownloadError::internal("unrepresentable range header"))?,
        );
    }

    let (response, _chain) = execute_following(
        &ctx.client,
        Method::GET,
        ctx.url.clone(),
        &headers,
        &ctx.cancel,
    )
    .await?;

    let status = response.status().as_u16();
    match status {
        206 => {}
        200 if !sent_range => {}
        200 if ctx.single_mode => {
            // The server ignored the resume range and is sending the whole
            // body again. Start the chunk over rather than splicing.
            warn!("Server ignored resume range, restarting single stream");
            *completed = 0;
            let _ = ctx.events.try_send(WorkerEvent::Restarted { chunk_id: chunk.id });
        }
        200 => {
            return Err(DownloadError::range_refused(format!(
                "expected 206 for chunk {} of {}, got 200",
                chunk.id, ctx.url
            ))
            .into());
        }
        _ => {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            return Err(FetchError {
                error: DownloadError::from_status_code(status, ctx.url.as_str()),
                retry_after,
            });
        }
    }

    // A changed entity tag means the bytes no longer line up with what is
    // already on disk.
    if ctx.etag.is_some() {
        let current = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if current.is_some() && current != ctx.etag {
            return Err(DownloadError::etag_mismatch(ctx.etag.clone(), current).into());
        }
    }

    let mut write_pos = chunk.start + *completed;
    let mut stream = response.bytes_stream();
    loop {
        let item = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(DownloadError::Cancelled.into()),
            item = stream.next() => item,
        };
        let Some(piece) = item else { break };
        let mut data = piece
            .map_err(|e| DownloadError::network(format!("body stream failed: {e}")))?;
        if data.is_empty() {
            continue;
        }

        // Never write past the assigned interval, even if the server sends
        // extra bytes.
        if let Some(end) = chunk.end {
            let allowed = end + 1 - (chunk.start + *completed);
            if data.len() as u64 > allowed {
                data = data.slice(0..allowed as usize);
            }
        }

        ctx.limiter.acquire(data.len(), &ctx.cancel).await?;

        if let Some(transform) = &ctx.transform {
            let out = transform(&data);
            if !out.is_empty() {
                ctx.sink.write_at(write_pos, &out).await?;
            }
            write_pos += out.len() as u64;
        } else {
            ctx.sink.write_at(write_pos, &data).await?;
            write_pos += data.len() as u64;
        }
        *completed += data.len() as u64;

        let _ = ctx.events.try_send(WorkerEvent::Progress {
            chunk_id: chunk.id,
            delta: data.len() as u64,
        });

        if let Some(end) = chunk.end {
            if chunk.start + *completed > end {
                break;
            }
        }
    }

    if let Some(end) = chunk.end {
        let expected = end + 1 - chunk.start;
        if *completed < expected {
            return Err(DownloadError::network(format!(
                "body for chunk {} ended at {} of {} bytes",
                chunk.id, *completed, expected
            ))
            .into());
        }
    }
    Ok(())
}
