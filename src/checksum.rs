// Licensed under the MIT License
// Copyright (c) 2025 Hal <hal.long@outlook.com>

//! Opt-in SHA-256 verification of finished downloads.

use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{DownloadError, Result};

/// Hex digest of a byte slice
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

/// Hex digest of a file, read in fixed buffers off the async runtime
pub async fn file_sha256(path: &Path) -> Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> std::io::Result<String> {
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; 128 * 1024];
        loop {
            let read = file.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(hex_encode(&hasher.finalize()))
    })
    .await
    .map_err(|e| DownloadError::internal(format!("blocking task failed: {e}")))?
    .map_err(DownloadError::from)
}

/// Compare an expected digest against an actual one, case-insensitively
pub fn verify(expected: &str, actual: &str) -> Result<()> {
    if expected.eq_ignore_ascii_case(actual) {
        Ok(())
    } else {
        Err(DownloadError::ChecksumMismatch {
            expected: expected.to_ascii_lowercase(),
            actual: actual.to_ascii_lowercase(),
        })
    }
}

fn hex_encode(digest: &[u8]) -> String {
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        // sha256("abc")
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_verify_case_insensitive() {
        assert!(verify("ABC123", "abc123").is_ok());
        assert!(verify("abc123", "abc124").is_err());
    }

    #[tokio::test]
    async fn test_file_digest_matches_slice_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();
        assert_eq!(file_sha256(&path).await.unwrap(), sha256_hex(&data));
    }
}
