//! Error types for the transfer layer.
//!
//! These errors describe a single stream or fragment transfer. The engine
//! classifies them with [`classify_error`](super::classify_error) to decide
//! on retries, and maps them to an [`ErrorKind`] when a job fails.

use std::path::PathBuf;

use thiserror::Error;

use crate::error::ErrorKind;

/// Which file-size bound a transfer violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeBound {
    /// The media is larger than `max_filesize`.
    Max,
    /// The media is smaller than `min_filesize`.
    Min,
}

impl std::fmt::Display for SizeBound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Max => write!(f, "maximum"),
            Self::Min => write!(f, "minimum"),
        }
    }
}

/// Errors that can occur while transferring media bytes.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused/reset, TLS errors, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present (for 429 responses).
        retry_after: Option<String>,
    },

    /// Authentication or authorization required to access the media.
    #[error("authentication required for {domain} (HTTP {status}) downloading {url}")]
    AuthRequired {
        /// The URL that requires authentication.
        url: String,
        /// The HTTP status code (401, 403 or 407).
        status: u16,
        /// The domain requiring authentication.
        domain: String,
    },

    /// File system error while writing into the working directory.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// The stream uses a delivery the engine cannot fetch (e.g. encrypted HLS).
    #[error("unsupported stream {url}: {reason}")]
    UnsupportedStream {
        /// Stream or playlist URL.
        url: String,
        /// What is unsupported.
        reason: String,
    },

    /// Received byte count does not match the advertised content length.
    #[error("integrity check failed for {url}: expected {expected_bytes} bytes, got {actual_bytes}")]
    Integrity {
        /// URL whose body was truncated or padded.
        url: String,
        /// Expected size in bytes.
        expected_bytes: u64,
        /// Actual size in bytes.
        actual_bytes: u64,
    },

    /// Media size is outside the configured `min_filesize`/`max_filesize` window.
    #[error("{bound} size limit violated for {url}: {actual_bytes} bytes against limit of {limit_bytes}")]
    SizeLimit {
        /// URL of the offending stream.
        url: String,
        /// Which bound was violated.
        bound: SizeBound,
        /// Configured limit in bytes.
        limit_bytes: u64,
        /// Observed (or declared) size in bytes.
        actual_bytes: u64,
    },

    /// A fragment kept failing transiently until its retry budget ran out.
    #[error("giving up on {url} after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// URL of the fragment or stream.
        url: String,
        /// Number of attempts made.
        attempts: u32,
        /// The last error observed.
        #[source]
        source: Box<DownloadError>,
    },
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates an HTTP status error with a Retry-After header value.
    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates an unsupported-stream error.
    pub fn unsupported_stream(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnsupportedStream {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates an integrity mismatch error.
    pub fn integrity(url: impl Into<String>, expected_bytes: u64, actual_bytes: u64) -> Self {
        Self::Integrity {
            url: url.into(),
            expected_bytes,
            actual_bytes,
        }
    }

    /// Creates an authentication-required error.
    pub fn auth_required(url: impl Into<String>, status: u16, domain: impl Into<String>) -> Self {
        Self::AuthRequired {
            url: url.into(),
            status,
            domain: domain.into(),
        }
    }

    /// Creates a size-limit violation.
    pub fn size_limit(
        url: impl Into<String>,
        bound: SizeBound,
        limit_bytes: u64,
        actual_bytes: u64,
    ) -> Self {
        Self::SizeLimit {
            url: url.into(),
            bound,
            limit_bytes,
            actual_bytes,
        }
    }

    /// Wraps the last transient error once the retry budget is spent.
    pub fn retries_exhausted(url: impl Into<String>, attempts: u32, last: DownloadError) -> Self {
        Self::RetriesExhausted {
            url: url.into(),
            attempts,
            source: Box::new(last),
        }
    }

    /// Maps this transfer error to the job-level error taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network { .. }
            | Self::Timeout { .. }
            | Self::Integrity { .. }
            | Self::RetriesExhausted { .. } => ErrorKind::TransientNetwork,
            Self::HttpStatus { status, .. } => match status {
                408 | 429 | 500..=599 => ErrorKind::TransientNetwork,
                _ => ErrorKind::Content,
            },
            Self::AuthRequired { .. } | Self::UnsupportedStream { .. } => ErrorKind::Content,
            Self::SizeLimit { .. } => ErrorKind::LimitViolation,
            Self::InvalidUrl { .. } => ErrorKind::Configuration,
            Self::Io { .. } => ErrorKind::Internal,
        }
    }
}

// No `From<reqwest::Error>` / `From<std::io::Error>`: every variant needs the
// url or path the source error lacks, so the helper constructors are used.

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_download_error_timeout_display() {
        let error = DownloadError::timeout("https://cdn.example.com/seg-1.ts");
        assert!(error.to_string().contains("timeout"));
        assert!(error.to_string().contains("https://cdn.example.com/seg-1.ts"));
    }

    #[test]
    fn test_download_error_http_status_display() {
        let error = DownloadError::http_status("https://cdn.example.com/video.mp4", 404);
        let msg = error.to_string();
        assert!(msg.contains("404"), "Expected '404' in: {msg}");
        assert!(msg.contains("video.mp4"), "Expected URL in: {msg}");
    }

    #[test]
    fn test_download_error_size_limit_display_names_bound() {
        let error =
            DownloadError::size_limit("https://cdn.example.com/v.mp4", SizeBound::Max, 1024, 4096);
        let msg = error.to_string();
        assert!(msg.starts_with("maximum size limit"), "got: {msg}");
        assert!(msg.contains("4096"));

        let error =
            DownloadError::size_limit("https://cdn.example.com/v.mp4", SizeBound::Min, 1024, 10);
        assert!(error.to_string().starts_with("minimum size limit"));
    }

    #[test]
    fn test_download_error_retries_exhausted_keeps_source() {
        let last = DownloadError::http_status("https://cdn.example.com/seg-3.ts", 503);
        let error = DownloadError::retries_exhausted("https://cdn.example.com/seg-3.ts", 4, last);
        let msg = error.to_string();
        assert!(msg.contains("after 4 attempts"), "got: {msg}");
        assert!(std::error::Error::source(&error).is_some());
    }

    #[test]
    fn test_download_error_kind_mapping() {
        assert_eq!(
            DownloadError::http_status("u", 503).kind(),
            ErrorKind::TransientNetwork
        );
        assert_eq!(DownloadError::http_status("u", 404).kind(), ErrorKind::Content);
        assert_eq!(DownloadError::timeout("u").kind(), ErrorKind::TransientNetwork);
        assert_eq!(
            DownloadError::size_limit("u", SizeBound::Max, 1, 2).kind(),
            ErrorKind::LimitViolation
        );
        assert_eq!(
            DownloadError::auth_required("u", 401, "example.com").kind(),
            ErrorKind::Content
        );
        assert_eq!(DownloadError::invalid_url("nope").kind(), ErrorKind::Configuration);
        let io = std::io::Error::new(std::io::ErrorKind::StorageFull, "disk full");
        assert_eq!(DownloadError::io("/tmp/x", io).kind(), ErrorKind::Internal);
    }
}
