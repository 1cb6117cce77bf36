// Licensed under the MIT License
// Copyright (c) 2025 Hal <hal.long@outlook.com>

use thiserror::Error;

/// Main error type for swiftget operations
#[derive(Error, Debug)]
pub enum DownloadError {
    /// Network-related errors (DNS, TCP, TLS, broken streams)
    #[error("Network error: {message}")]
    Network { message: String },

    /// Operation or request timeout
    #[error("Operation timed out: {message}")]
    Timeout { message: String },

    /// Terminal HTTP status that is neither success nor a more specific kind
    #[error("HTTP {status}: {message} ({url})")]
    HttpStatus {
        status: u16,
        message: String,
        url: String,
    },

    /// Authentication or proxy authentication challenge (401, 403, 407)
    #[error("Authentication failed (HTTP {status}): {url}")]
    AuthenticationFailed { status: u16, url: String },

    /// Resource does not exist on the server
    #[error("Resource not found: {url}")]
    NotFound { url: String },

    /// Server advertised or implied range support but refused a ranged request
    #[error("Server refused range request: {message}")]
    RangeRefused { message: String },

    /// Resource identity changed between requests
    #[error("Resource changed mid-transfer: expected {expected:?}, got {actual:?}")]
    EtagMismatch {
        expected: Option<String>,
        actual: Option<String>,
    },

    /// URL parsing errors
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Local storage errors (open, write, rename)
    #[error("Storage error: {0}")]
    Storage(#[source] std::io::Error),

    /// The destination volume cannot hold the resource
    #[error("Insufficient disk space: {message}")]
    InsufficientSpace { message: String },

    /// Destination exists and overwriting was not requested
    #[error("Destination already exists: {path}")]
    FileExists { path: String },

    /// The job was cancelled by the caller
    #[error("Download cancelled")]
    Cancelled,

    /// Caller-supplied options failed validation
    #[error("Invalid option: {message}")]
    InvalidOption { message: String },

    /// Opt-in SHA-256 comparison failed after the bytes landed
    #[error("Checksum validation failed: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Sidecar serialization errors
    #[error("Resume record error: {0}")]
    Json(#[from] serde_json::Error),

    /// A state that the engine considers impossible
    #[error("Internal invariant violated: {message}")]
    InternalInvariant { message: String },
}

impl DownloadError {
    /// Create a new network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a new range refusal error
    pub fn range_refused<S: Into<String>>(message: S) -> Self {
        Self::RangeRefused {
            message: message.into(),
        }
    }

    /// Create a new invalid option error
    pub fn invalid_option<S: Into<String>>(message: S) -> Self {
        Self::InvalidOption {
            message: message.into(),
        }
    }

    /// Create a new insufficient space error
    pub fn insufficient_space<S: Into<String>>(message: S) -> Self {
        Self::InsufficientSpace {
            message: message.into(),
        }
    }

    /// Create a new internal invariant error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::InternalInvariant {
            message: message.into(),
        }
    }

    /// Create an ETag mismatch error
    pub fn etag_mismatch(expected: Option<String>, actual: Option<String>) -> Self {
        Self::EtagMismatch { expected, actual }
    }

    /// Map a terminal HTTP status code to the matching error kind
    pub fn from_status_code<S: Into<String>>(status: u16, url: S) -> Self {
        let url = url.into();
        match status {
            401 | 403 | 407 => Self::AuthenticationFailed { status, url },
            404 => Self::NotFound { url },
            416 => Self::range_refused(format!(
                "HTTP 416 Range Not Satisfiable for {url}"
            )),
            _ => {
                let message = match status {
                    400 => "Bad Request",
                    405 => "Method Not Allowed",
                    408 => "Request Timeout",
                    429 => "Too Many Requests",
                    500 => "Internal Server Error",
                    502 => "Bad Gateway",
                    503 => "Service Unavailable",
                    504 => "Gateway Timeout",
                    _ => "Unexpected Status",
                };
                Self::HttpStatus {
                    status,
                    message: message.to_string(),
                    url,
                }
            }
        }
    }

    /// Check if the error is retryable within one chunk's retry budget
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::Network { .. } => true,
            DownloadError::Timeout { .. } => true,
            DownloadError::HttpStatus { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            _ => false,
        }
    }

    /// Check if the error may trigger a one-time downgrade from parallel
    /// to single-stream strategy
    pub fn is_downgrade_eligible(&self) -> bool {
        matches!(
            self,
            DownloadError::RangeRefused { .. } | DownloadError::EtagMismatch { .. }
        )
    }

    /// Get HTTP status code if this error carries one
    pub fn status_code(&self) -> Option<u16> {
        match self {
            DownloadError::HttpStatus { status, .. } => Some(*status),
            DownloadError::AuthenticationFailed { status, .. } => Some(*status),
            DownloadError::NotFound { .. } => Some(404),
            _ => None,
        }
    }

    /// Get the error category for metrics and logging
    pub fn category(&self) -> &'static str {
        match self {
            DownloadError::Network { .. } => "network",
            DownloadError::Timeout { .. } => "timeout",
            DownloadError::HttpStatus { .. } => "http_status",
            DownloadError::AuthenticationFailed { .. } => "authentication",
            DownloadError::NotFound { .. } => "not_found",
            DownloadError::RangeRefused { .. } => "range_refused",
            DownloadError::EtagMismatch { .. } => "etag_mismatch",
            DownloadError::InvalidUrl(_) => "url",
            DownloadError::Storage(_) => "storage",
            DownloadError::InsufficientSpace { .. } => "insufficient_space",
            DownloadError::FileExists { .. } => "file_exists",
            DownloadError::Cancelled => "cancelled",
            DownloadError::InvalidOption { .. } => "invalid_option",
            DownloadError::ChecksumMismatch { .. } => "checksum",
            DownloadError::Json(_) => "resume_record",
            DownloadError::InternalInvariant { .. } => "internal",
        }
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                message: err.to_string(),
            }
        } else {
            Self::Network {
                message: err.to_string(),
            }
        }
    }
}

impl From<std::io::Error> for DownloadError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::StorageFull {
            Self::InsufficientSpace {
                message: err.to_string(),
            }
        } else {
            Self::Storage(err)
        }
    }
}

/// Result type alias for swiftget operations
pub type Result<T> = std::result::Result<T, DownloadError>;

/// Terminal outcome of a job that could not complete, carrying the error and
/// the statistics accumulated up to the failure point
#[derive(Debug)]
pub struct DownloadFailure {
    /// What went wrong
    pub error: DownloadError,
    /// Bytes actually written, elapsed time and counters at failure time
    pub stats: crate::progress::DownloadStats,
}

impl std::fmt::Display for DownloadFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for DownloadFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl From<DownloadFailure> for DownloadError {
    fn from(failure: DownloadFailure) -> Self {
        failure.error
    }
}
