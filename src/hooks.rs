// Licensed under the MIT License
// Copyright (c) 2025 Hal <hal.long@outlook.com>

//! Pre and post download hooks
//!
//! Hooks are the only extension point that runs inside the job lifecycle.
//! A pre hook may rewrite request headers or veto the job by returning an
//! error; a post hook observes the outcome. Post hook errors are logged and
//! never overwrite the job result.

use std::collections::HashMap;

use async_trait::async_trait;
use url::Url;

use crate::error::{DownloadError, Result};
use crate::progress::DownloadStats;

/// Mutable request view handed to pre hooks after planning, before dispatch
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    /// Resolved URL the workers will fetch
    pub url: Url,
    /// Headers sent with every worker request; hooks may add or replace
    pub headers: HashMap<String, String>,
}

/// Capability interface for download lifecycle hooks
#[async_trait]
pub trait DownloadHook: Send + Sync {
    /// Runs once per job before workers are dispatched. Returning an error
    /// aborts the job.
    async fn pre_download(&self, _request: &mut DownloadRequest) -> Result<()> {
        Ok(())
    }

    /// Runs once per job after the last worker returns, on success and on
    /// failure alike.
    async fn post_download(
        &self,
        _stats: &DownloadStats,
        _error: Option<&DownloadError>,
    ) -> Result<()> {
        Ok(())
    }
}
