// Licensed under the MIT License
// Copyright (c) 2025 Hal <hal.long@outlook.com>

//! Resume sidecar
//!
//! A download in flight keeps a JSON sidecar next to the destination
//! recording the chunk plan and per-chunk completion counters. Updates are
//! atomic: write to a temp file, fsync, rename over the target. The sidecar
//! is removed on success and kept on failure or cancellation so a later run
//! can pick up where this one stopped.

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::constants::{SIDECAR_SCHEMA_VERSION, SIDECAR_SUFFIX};
use crate::error::Result;
use crate::planner::{Chunk, ChunkPlan, Strategy};
use crate::probe::ResourceInfo;

/// Per-chunk persisted state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Chunk identifier matching the in-memory plan
    pub id: u32,
    /// First byte of the interval
    pub start: u64,
    /// Last byte of the interval, inclusive
    pub end: u64,
    /// Bytes durably written for this chunk so far
    pub completed: u64,
}

/// Serialized snapshot of an interrupted download
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeRecord {
    /// Sidecar layout version
    pub schema: u32,
    /// URL the caller asked for
    pub url: String,
    /// URL after redirect resolution
    pub final_url: String,
    /// Server entity tag at probe time
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub etag: Option<String>,
    /// Server Last-Modified at probe time
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_modified: Option<String>,
    /// Total resource size in bytes
    pub total_size: i64,
    /// Strategy the chunks were planned for
    pub strategy: Strategy,
    /// Chunk intervals and their completion counters
    pub chunks: Vec<ChunkRecord>,
    /// Creation time as a Unix timestamp
    pub created_unix: i64,
}

/// Sidecar path for a destination: `<destination>.resume.json`
pub fn sidecar_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_os_string();
    name.push(SIDECAR_SUFFIX);
    PathBuf::from(name)
}

impl ResumeRecord {
    /// Snapshot a fresh plan with the given per-chunk counters
    pub fn new(
        url: &str,
        info: &ResourceInfo,
        plan: &ChunkPlan,
        completed: &[u64],
    ) -> ResumeRecord {
        let chunks = plan
            .chunks
            .iter()
            .map(|chunk| ChunkRecord {
                id: chunk.id,
                start: chunk.start,
                // Bounded chunks only: unknown-size jobs never persist a sidecar.
                end: chunk.end.unwrap_or(0),
                completed: completed.get(chunk.id as usize).copied().unwrap_or(0),
            })
            .collect();
        ResumeRecord {
            schema: SIDECAR_SCHEMA_VERSION,
            url: url.to_string(),
            final_url: info.final_url.to_string(),
            etag: info.etag.clone(),
            last_modified: info.last_modified.clone(),
            total_size: info.total_size,
            strategy: plan.strategy,
            chunks,
            created_unix: chrono::Utc::now().timestamp(),
        }
    }

    /// Load the sidecar for a destination. Returns `None` when the file is
    /// absent or unreadable; a corrupt sidecar is treated as absent so the
    /// caller falls back to a fresh download.
    pub async fn load(destination: &Path) -> Option<ResumeRecord> {
        let path = sidecar_path(destination);
        let raw = tokio::fs::read(&path).await.ok()?;
        match serde_json::from_slice::<ResumeRecord>(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Discarding unreadable resume record {}: {e}", path.display());
                None
            }
        }
    }

    /// Whether this build understands the record layout
    pub fn is_schema_supported(&self) -> bool {
        self.schema == SIDECAR_SCHEMA_VERSION
    }

    /// Validate the record against a fresh probe. The resource must still
    /// have the same size and identity markers, and the recorded chunks must
    /// form an exact partition of it.
    pub fn matches(&self, info: &ResourceInfo) -> bool {
        if !self.is_schema_supported() {
            return false;
        }
        if self.total_size < 0 || self.total_size != info.total_size {
            return false;
        }
        if self.etag != info.etag || self.last_modified != info.last_modified {
            return false;
        }
        if !info.accepts_ranges {
            // Resuming requires ranged requests for the unfinished tail.
            return false;
        }
        let mut expected_start = 0u64;
        for (index, chunk) in self.chunks.iter().enumerate() {
            if chunk.id as usize != index || chunk.start != expected_start {
                return false;
            }
            if chunk.end < chunk.start || chunk.completed > chunk.end - chunk.start + 1 {
                return false;
            }
            expected_start = chunk.end + 1;
        }
        expected_start == self.total_size as u64
    }

    /// Reconstruct the chunk plan recorded in the sidecar
    pub fn to_plan(&self) -> ChunkPlan {
        ChunkPlan {
            strategy: self.strategy,
            chunks: self
                .chunks
                .iter()
                .map(|chunk| Chunk {
                    id: chunk.id,
                    start: chunk.start,
                    end: Some(chunk.end),
                })
                .collect(),
            total_size: self.total_size,
        }
    }

    /// Per-chunk completion counters in plan order
    pub fn completed_counters(&self) -> Vec<u64> {
        self.chunks.iter().map(|chunk| chunk.completed).collect()
    }

    /// Total bytes already accounted for by the record
    pub fn completed_bytes(&self) -> u64 {
        self.chunks.iter().map(|chunk| chunk.completed).sum()
    }

    /// Atomically persist the record next to the destination
    pub async fn store(&self, destination: &Path) -> Result<()> {
        let path = sidecar_path(destination);
        let tmp = path.with_extension("json.tmp");
        let payload = serde_json::to_vec(self)?;

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);
        let std_file = tokio::task::spawn_blocking({
            let tmp = tmp.clone();
            move || options.open(&tmp)
        })
        .await
        .map_err(|e| crate::error::DownloadError::internal(format!("blocking task failed: {e}")))??;
        let mut file = tokio::fs::File::from_std(std_file);
        file.write_all(&payload).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &path).await?;
        debug!("Persisted resume record to {}", path.display());
        Ok(())
    }

    /// Delete the sidecar for a destination, ignoring a missing file
    pub async fn remove(destination: &Path) -> Result<()> {
        let path = sidecar_path(destination);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
