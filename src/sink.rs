// Licensed under the MIT License
// Copyright (c) 2025 Hal <hal.long@outlook.com>

//! Output sinks
//!
//! Workers write each buffer at an absolute offset inside their assigned
//! range, so a sink only needs positioned writes plus truncate, flush and
//! close. Because ranges are disjoint, concurrent `write_at` calls never
//! overlap and need no coordination.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{DownloadError, Result};

/// Positional byte sink consumed by the download engine
#[async_trait]
pub trait ByteSink: Send + Sync {
    /// Write the whole buffer at the given absolute offset, returning the
    /// number of bytes written
    async fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize>;

    /// Set the sink length, extending with a sparse/zero region or
    /// discarding bytes past `len`
    async fn truncate(&self, len: u64) -> Result<()>;

    /// Push buffered bytes to durable storage where applicable
    async fn flush(&self) -> Result<()>;

    /// Flush and release the sink
    async fn close(&self) -> Result<()>;
}

#[cfg(unix)]
fn write_full_at(file: &std::fs::File, mut offset: u64, mut buf: &[u8]) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    while !buf.is_empty() {
        let written = file.write_at(buf, offset)?;
        if written == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "positional write returned zero",
            ));
        }
        buf = &buf[written..];
        offset += written as u64;
    }
    Ok(())
}

#[cfg(windows)]
fn write_full_at(file: &std::fs::File, mut offset: u64, mut buf: &[u8]) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        let written = file.seek_write(buf, offset)?;
        if written == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "positional write returned zero",
            ));
        }
        buf = &buf[written..];
        offset += written as u64;
    }
    Ok(())
}

/// File-backed sink using the OS positional write call
#[derive(Debug)]
pub struct FileSink {
    file: Arc<std::fs::File>,
    path: PathBuf,
}

impl FileSink {
    /// Create or truncate the destination file
    pub async fn create(path: &Path) -> Result<Self> {
        let path = path.to_path_buf();
        let file = tokio::task::spawn_blocking({
            let path = path.clone();
            move || {
                std::fs::OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&path)
            }
        })
        .await
        .map_err(|e| DownloadError::internal(format!("blocking task failed: {e}")))??;
        Ok(Self {
            file: Arc::new(file),
            path,
        })
    }

    /// Open the destination keeping any existing bytes, creating it when
    /// absent. Used on the resume path.
    pub async fn open_resumable(path: &Path) -> Result<Self> {
        let path = path.to_path_buf();
        let file = tokio::task::spawn_blocking({
            let path = path.clone();
            move || {
                std::fs::OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .open(&path)
            }
        })
        .await
        .map_err(|e| DownloadError::internal(format!("blocking task failed: {e}")))??;
        Ok(Self {
            file: Arc::new(file),
            path,
        })
    }

    /// Destination path this sink writes to
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ByteSink for FileSink {
    async fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize> {
        let file = self.file.clone();
        let data = buf.to_vec();
        let len = data.len();
        tokio::task::spawn_blocking(move || write_full_at(&file, offset, &data))
            .await
            .map_err(|e| DownloadError::internal(format!("blocking task failed: {e}")))??;
        Ok(len)
    }

    async fn truncate(&self, len: u64) -> Result<()> {
        let file = self.file.clone();
        tokio::task::spawn_blocking(move || file.set_len(len))
            .await
            .map_err(|e| DownloadError::internal(format!("blocking task failed: {e}")))??;
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let file = self.file.clone();
        tokio::task::spawn_blocking(move || file.sync_data())
            .await
            .map_err(|e| DownloadError::internal(format!("blocking task failed: {e}")))??;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.flush().await
    }
}

/// Growable in-memory sink
#[derive(Debug, Default)]
pub struct MemorySink {
    buffer: Mutex<Vec<u8>>,
}

impl MemorySink {
    /// Create an empty in-memory sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the accumulated bytes
    pub fn snapshot(&self) -> Vec<u8> {
        self.buffer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Move the accumulated bytes out, leaving the sink empty
    pub fn take(&self) -> Vec<u8> {
        std::mem::take(
            &mut *self
                .buffer
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        )
    }

    /// Current length in bytes
    pub fn len(&self) -> usize {
        self.buffer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// True when nothing has been written yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ByteSink for MemorySink {
    async fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize> {
        let mut buffer = self
            .buffer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let end = offset as usize + buf.len();
        if buffer.len() < end {
            buffer.resize(end, 0);
        }
        buffer[offset as usize..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    async fn truncate(&self, len: u64) -> Result<()> {
        let mut buffer = self
            .buffer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        buffer.resize(len as usize, 0);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_sink_out_of_order_writes() {
        let sink = MemorySink::new();
        sink.write_at(4, b"5678").await.unwrap();
        sink.write_at(0, b"1234").await.unwrap();
        assert_eq!(sink.snapshot(), b"12345678");
    }

    #[tokio::test]
    async fn test_memory_sink_truncate_extends_with_zeros() {
        let sink = MemorySink::new();
        sink.write_at(0, b"ab").await.unwrap();
        sink.truncate(4).await.unwrap();
        assert_eq!(sink.snapshot(), vec![b'a', b'b', 0, 0]);
    }

    #[tokio::test]
    async fn test_file_sink_positioned_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let sink = FileSink::create(&path).await.unwrap();
        sink.write_at(3, b"def").await.unwrap();
        sink.write_at(0, b"abc").await.unwrap();
        sink.flush().await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn test_file_sink_truncate_discards_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let sink = FileSink::create(&path).await.unwrap();
        sink.write_at(0, b"abcdef").await.unwrap();
        sink.truncate(3).await.unwrap();
        sink.close().await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"abc");
    }
}
