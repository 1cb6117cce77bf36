// Licensed under the MIT License
// Copyright (c) 2025 Hal <hal.long@outlook.com>

//! Transport pool
//!
//! Process-wide cache of HTTP clients keyed by host authority. Lookup is
//! read-dominated: a read lock serves the fast path, a write lock with a
//! double check builds missing clients exactly once. A lightweight profile
//! with a smaller idle pool serves transfers expected to stay under 256 KiB.
//!
//! Redirects are disabled at the client level; callers follow them manually
//! so the redirect chain stays observable. Standard proxy environment
//! variables are honoured by reqwest.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use once_cell::sync::Lazy;
use reqwest::header::{HeaderMap, LOCATION};
use reqwest::{Client, Method};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::constants::{
    CONNECT_TIMEOUT, LIGHT_POOL_IDLE_TIMEOUT, LIGHT_POOL_MAX_IDLE_PER_HOST, MAX_REDIRECTS,
    POOL_IDLE_TIMEOUT, POOL_MAX_IDLE_PER_HOST, TCP_KEEPALIVE,
};
use crate::error::{DownloadError, Result};

static GLOBAL_POOL: Lazy<Arc<TransportPool>> = Lazy::new(|| Arc::new(TransportPool::new()));

/// Client tuning profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientProfile {
    /// Full connection pool for sustained transfers
    Standard,
    /// Small pool with short idle lifetimes for tiny transfers
    Lightweight,
}

/// Per-job socket timeouts folded into the pool key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientTuning {
    connect_timeout_ms: u64,
    read_timeout_ms: Option<u64>,
}

impl ClientTuning {
    /// Tuning from caller timeouts; `None` falls back to pool defaults
    pub fn new(connect_timeout: Duration, read_timeout: Option<Duration>) -> Self {
        Self {
            connect_timeout_ms: connect_timeout.as_millis() as u64,
            read_timeout_ms: read_timeout.map(|t| t.as_millis() as u64),
        }
    }
}

impl Default for ClientTuning {
    fn default() -> Self {
        Self::new(CONNECT_TIMEOUT, None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PoolKey {
    authority: String,
    profile: ClientProfile,
    tuning: ClientTuning,
}

/// Host-keyed cache of reusable HTTP clients
#[derive(Debug, Default)]
pub struct TransportPool {
    clients: RwLock<HashMap<PoolKey, Client>>,
}

impl TransportPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide pool instance
    pub fn global() -> Arc<TransportPool> {
        GLOBAL_POOL.clone()
    }

    /// Fetch or build the client for a URL's authority
    pub fn client_for(
        &self,
        url: &url::Url,
        profile: ClientProfile,
        tuning: ClientTuning,
    ) -> Result<Client> {
        let key = PoolKey {
            authority: authority_of(url),
            profile,
            tuning,
        };
        {
            let clients = self
                .clients
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(client) = clients.get(&key) {
                return Ok(client.clone());
            }
        }
        let mut clients = self
            .clients
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        // Another task may have built the client while the write lock was
        // contended.
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }
        let client = build_client(profile, tuning)?;
        debug!("Built {:?} transport client for {}", profile, key.authority);
        clients.insert(key, client.clone());
        Ok(client)
    }

    /// Drop every cached client, draining their idle connections
    pub fn close(&self) {
        self.clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of cached clients
    pub fn len(&self) -> usize {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// True when no client has been built yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn build_client(profile: ClientProfile, tuning: ClientTuning) -> Result<Client> {
    crate::init_tls_provider();

    let (max_idle, idle_timeout) = match profile {
        ClientProfile::Standard => (POOL_MAX_IDLE_PER_HOST, POOL_IDLE_TIMEOUT),
        ClientProfile::Lightweight => (LIGHT_POOL_MAX_IDLE_PER_HOST, LIGHT_POOL_IDLE_TIMEOUT),
    };

    let mut builder = Client::builder()
        .pool_max_idle_per_host(max_idle)
        .pool_idle_timeout(idle_timeout)
        .connect_timeout(Duration::from_millis(tuning.connect_timeout_ms))
        .tcp_keepalive(TCP_KEEPALIVE)
        .tcp_nodelay(true)
        .http2_adaptive_window(true)
        .redirect(reqwest::redirect::Policy::none());

    if let Some(read_ms) = tuning.read_timeout_ms {
        builder = builder.read_timeout(Duration::from_millis(read_ms));
    }

    builder
        .build()
        .map_err(|e| DownloadError::network(format!("Failed to create HTTP client: {e}")))
}

/// Canonical `scheme://host:port` key for a URL
fn authority_of(url: &url::Url) -> String {
    let scheme = url.scheme();
    let host = url.host_str().unwrap_or_default();
    let port = url
        .port_or_known_default()
        .map(|p| p.to_string())
        .unwrap_or_default();
    format!("{scheme}://{host}:{port}")
}

/// Hop-by-hop header names that must never be forwarded
pub(crate) fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Execute a request following up to ten redirects manually, recording the
/// chain. Returns the terminal response and the URLs visited after the
/// first.
pub(crate) async fn execute_following(
    client: &Client,
    method: Method,
    url: url::Url,
    headers: &HeaderMap,
    cancel: &CancellationToken,
) -> Result<(reqwest::Response, Vec<url::Url>)> {
    let mut current = url;
    let mut chain: Vec<url::Url> = Vec::new();
    loop {
        let request = client
            .request(method.clone(), current.clone())
            .headers(headers.clone());
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            result = request.send() => result?,
        };

        if !response.status().is_redirection() {
            return Ok((response, chain));
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                DownloadError::network(format!(
                    "Redirect without Location from {current}"
                ))
            })?;
        let next = current
            .join(location)
            .map_err(DownloadError::InvalidUrl)?;
        chain.push(next.clone());
        if chain.len() > MAX_REDIRECTS {
            return Err(DownloadError::network(format!(
                "Redirect chain exceeded {MAX_REDIRECTS} hops at {next}"
            )));
        }
        debug!("Following redirect {} -> {}", current, next);
        current = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authority_includes_default_port() {
        let url = url::Url::parse("https://example.com/file.bin").unwrap();
        assert_eq!(authority_of(&url), "https://example.com:443");
        let url = url::Url::parse("http://example.com:8080/x").unwrap();
        assert_eq!(authority_of(&url), "http://example.com:8080");
    }

    #[test]
    fn test_hop_by_hop_detection() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("transfer-encoding"));
        assert!(!is_hop_by_hop("Authorization"));
        assert!(!is_hop_by_hop("Range"));
    }

    #[test]
    fn test_pool_reuses_clients() {
        let pool = TransportPool::new();
        let url = url::Url::parse("https://example.com/a").unwrap();
        let tuning = ClientTuning::default();
        pool.client_for(&url, ClientProfile::Standard, tuning)
            .unwrap();
        pool.client_for(&url, ClientProfile::Standard, tuning)
            .unwrap();
        assert_eq!(pool.len(), 1);

        let other = url::Url::parse("https://other.example.com/b").unwrap();
        pool.client_for(&other, ClientProfile::Standard, tuning)
            .unwrap();
        assert_eq!(pool.len(), 2);

        pool.client_for(&url, ClientProfile::Lightweight, tuning)
            .unwrap();
        assert_eq!(pool.len(), 3);

        pool.close();
        assert!(pool.is_empty());
    }
}
