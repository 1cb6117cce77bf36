// Licensed under the MIT License
// Copyright (c) 2025 Hal <hal.long@outlook.com>

//! Resource probing
//!
//! Learns what the server is willing to do before any worker is dispatched:
//! final URL after redirects, content length, range support and identity
//! markers. A HEAD request is tried first; servers that reject HEAD get a
//! one-byte ranged GET instead.

use std::time::Duration;

use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE,
    CONTENT_TYPE, ETAG, LAST_MODIFIED, RANGE,
};
use reqwest::{Client, Method, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::error::{DownloadError, Result};
use crate::transport::execute_following;

/// What the probe learned about the resource
#[derive(Debug, Clone)]
pub struct ResourceInfo {
    /// URL after redirect resolution; workers fetch this directly
    pub final_url: Url,
    /// Content length in bytes; -1 when the server did not say
    pub total_size: i64,
    /// Content-Type as sent by the server
    pub content_type: Option<String>,
    /// Entity tag for change detection
    pub etag: Option<String>,
    /// Last-Modified for change detection
    pub last_modified: Option<String>,
    /// Whether ranged requests are accepted
    pub accepts_ranges: bool,
    /// Filename suggested by Content-Disposition
    pub suggested_filename: Option<String>,
    /// Redirects followed to reach the terminal response
    pub redirect_chain: Vec<Url>,
    /// Terminal HTTP status
    pub status: u16,
}

impl ResourceInfo {
    /// Content length when the server advertised one
    pub fn known_size(&self) -> Option<u64> {
        if self.total_size >= 0 {
            Some(self.total_size as u64)
        } else {
            None
        }
    }
}

/// Probe a resource, honouring the caller timeout and cancellation token
pub(crate) async fn probe_resource(
    client: &Client,
    url: &Url,
    headers: &HeaderMap,
    cancel: &CancellationToken,
    timeout: Option<Duration>,
) -> Result<ResourceInfo> {
    let work = probe_inner(client, url, headers, cancel);
    match timeout {
        Some(limit) => tokio::time::timeout(limit, work)
            .await
            .map_err(|_| DownloadError::timeout(format!("probe of {url} exceeded {limit:?}")))?,
        None => work.await,
    }
}

async fn probe_inner(
    client: &Client,
    url: &Url,
    headers: &HeaderMap,
    cancel: &CancellationToken,
) -> Result<ResourceInfo> {
    let (response, chain) =
        execute_following(client, Method::HEAD, url.clone(), headers, cancel).await?;
    let status = response.status();
    if is_probe_success(status) {
        debug!("HEAD probe of {} succeeded with {}", url, status);
        return Ok(extract(url, response, chain));
    }

    match status.as_u16() {
        401 | 403 | 407 | 404 => Err(DownloadError::from_status_code(status.as_u16(), url.as_str())),
        _ => {
            // Some servers refuse HEAD outright. Ask for the first byte
            // instead; a 206 answer also proves range support.
            debug!(
                "HEAD probe of {} returned {}, falling back to ranged GET",
                url, status
            );
            let mut ranged = headers.clone();
            ranged.insert(RANGE, HeaderValue::from_static("bytes=0-0"));
            let (response, chain) =
                execute_following(client, Method::GET, url.clone(), &ranged, cancel).await?;
            let status = response.status();
            if is_probe_success(status) {
                Ok(extract(url, response, chain))
            } else {
                Err(DownloadError::from_status_code(status.as_u16(), url.as_str()))
            }
        }
    }
}

fn is_probe_success(status: StatusCode) -> bool {
    status.is_success() && status.as_u16() != 204
}

fn extract(original: &Url, response: reqwest::Response, chain: Vec<Url>) -> ResourceInfo {
    let status = response.status();
    let headers = response.headers();

    let header_str =
        |name: &reqwest::header::HeaderName| headers.get(name).and_then(|v| v.to_str().ok());

    let total_size = if status.as_u16() == 206 {
        // A partial answer reports the full size after the slash in
        // Content-Range: bytes 0-0/12345
        header_str(&CONTENT_RANGE)
            .and_then(|v| v.rsplit('/').next())
            .and_then(|total| total.parse::<i64>().ok())
            .unwrap_or(-1)
    } else {
        header_str(&CONTENT_LENGTH)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(-1)
    };

    let accepts_ranges = status.as_u16() == 206
        || header_str(&ACCEPT_RANGES)
            .map(|v| v.to_ascii_lowercase().contains("bytes"))
            .unwrap_or(false);

    let suggested_filename = header_str(&CONTENT_DISPOSITION).and_then(parse_disposition_filename);

    let final_url = chain.last().cloned().unwrap_or_else(|| original.clone());

    debug!(
        "Probe result for {}: size={}, ranges={}, status={}",
        original, total_size, accepts_ranges, status
    );

    ResourceInfo {
        final_url,
        total_size,
        content_type: header_str(&CONTENT_TYPE).map(str::to_string),
        etag: header_str(&ETAG).map(str::to_string),
        last_modified: header_str(&LAST_MODIFIED).map(str::to_string),
        accepts_ranges,
        suggested_filename,
        redirect_chain: chain,
        status: status.as_u16(),
    }
}

/// Pull a filename out of a Content-Disposition value. Handles the quoted
/// and bare `filename=` forms plus the RFC 5987 `filename*=` form without
/// percent-decoding.
fn parse_disposition_filename(value: &str) -> Option<String> {
    for part in value.split(';') {
        let part = part.trim();
        if let Some(rest) = part.strip_prefix("filename*=") {
            let name = rest.rsplit("''").next().unwrap_or(rest);
            if !name.is_empty() {
                return Some(name.trim_matches('"').to_string());
            }
        }
        if let Some(rest) = part.strip_prefix("filename=") {
            let name = rest.trim().trim_matches('"');
            if !name.is_empty() {
                return Some(name.to_string());
            }
        }
    }
    None
}

/// Best-effort filename for a resource: Content-Disposition first, then the
/// last URL path segment, then a generic fallback
pub fn infer_filename(info: &ResourceInfo, url: &Url) -> String {
    if let Some(name) = &info.suggested_filename {
        return name.clone();
    }
    let path = url.path();
    let candidate = path.split('/').next_back().unwrap_or("");
    if candidate.is_empty() {
        "download".to_string()
    } else {
        candidate.to_string()
    }
}
