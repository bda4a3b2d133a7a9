//! Job-level error taxonomy and the JSON error body handed to the HTTP layer.
//!
//! Every module keeps its own `thiserror` enum; [`JobError`] aggregates them
//! and [`JobError::kind`] preserves the classification up to the boundary,
//! where [`ErrorKind::status_code`] picks the response status.

use serde::Serialize;
use thiserror::Error;

use crate::artifact::ArtifactError;
use crate::dependency::BootstrapError;
use crate::download::{DownloadError, FailureType, classify_error};
use crate::extractor::ExtractError;
use crate::postprocess::TranscodeError;
use crate::request::ValidationError;

/// Message shown when the connectivity pre-check fails.
pub const NO_INTERNET_MESSAGE: &str = "Check your network connection";

/// Classification of a terminal job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Caller-fixable request problem (bad URL, contradictory parameters).
    Configuration,
    /// Timeout, reset or upstream 5xx that outlived the retry budget.
    TransientNetwork,
    /// Content not found, private, removed or geo-restricted.
    Content,
    /// File-size window violated.
    LimitViolation,
    /// A required external binary is missing and could not be installed.
    DependencyUnavailable,
    /// The caller went away or the job was superseded.
    Cancelled,
    /// Local fault: disk I/O, corrupted container, tool misbehaviour.
    Internal,
}

impl ErrorKind {
    /// HTTP status the boundary should answer with.
    ///
    /// `Cancelled` maps to 499; no response is actually sent for it.
    #[must_use]
    pub fn status_code(self) -> u16 {
        match self {
            Self::Configuration => 400,
            Self::Content | Self::LimitViolation => 422,
            Self::TransientNetwork => 503,
            Self::DependencyUnavailable | Self::Internal => 500,
            Self::Cancelled => 499,
        }
    }

    /// Stable machine-readable code for the JSON error body.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Configuration => "INVALID_REQUEST",
            Self::TransientNetwork => "UPSTREAM_UNAVAILABLE",
            Self::Content => "CONTENT_UNAVAILABLE",
            Self::LimitViolation => "LIMIT_VIOLATION",
            Self::DependencyUnavailable => "DEPENDENCY_UNAVAILABLE",
            Self::Cancelled => "CANCELLED",
            Self::Internal => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Configuration => "configuration error",
            Self::TransientNetwork => "transient network error",
            Self::Content => "content error",
            Self::LimitViolation => "limit violation",
            Self::DependencyUnavailable => "dependency unavailable",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal error",
        };
        f.write_str(name)
    }
}

/// Terminal failure of a download job.
#[derive(Debug, Error)]
pub enum JobError {
    /// The request failed boundary validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A required external binary is unavailable.
    #[error(transparent)]
    Dependency(#[from] BootstrapError),

    /// Media metadata extraction failed.
    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// Stream or fragment transfer failed.
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// A fatal post-processing step failed.
    #[error(transparent)]
    Transcode(#[from] TranscodeError),

    /// Working directory or artifact collection failed.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    /// The connectivity pre-check failed.
    #[error("no internet connection")]
    NoInternet,

    /// A livestream did not start within the allowed wait.
    #[error("livestream is not yet available after waiting {waited_secs}s")]
    NotYetAvailable {
        /// Seconds spent polling.
        waited_secs: u64,
    },

    /// The extractor returned an entry without any downloadable stream.
    #[error("no downloadable stream for {entry_id}")]
    NoStreams {
        /// Entry identifier as reported by the extractor.
        entry_id: String,
    },

    /// The job was cancelled before reaching a terminal state.
    #[error("job cancelled")]
    Cancelled,

    /// The job task panicked or was aborted by the runtime.
    #[error("job task failed: {0}")]
    Task(String),
}

impl JobError {
    /// Classification preserved up to the boundary.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Configuration,
            Self::Dependency(e) => e.kind(),
            Self::Extract(e) => e.kind(),
            Self::Download(e) => e.kind(),
            Self::Transcode(TranscodeError::Unavailable { .. }) => ErrorKind::DependencyUnavailable,
            Self::Transcode(_) | Self::Artifact(_) | Self::Task(_) => ErrorKind::Internal,
            Self::NoInternet => ErrorKind::TransientNetwork,
            Self::NotYetAvailable { .. } | Self::NoStreams { .. } => ErrorKind::Content,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Retry classification used by the job-level attempt loop.
    #[must_use]
    pub fn failure_type(&self) -> FailureType {
        match self {
            Self::Download(e) => classify_error(e),
            Self::Extract(e) => e.failure_type(),
            _ => FailureType::Permanent,
        }
    }

    /// Builds the JSON error body for this failure.
    #[must_use]
    pub fn to_response(&self) -> ErrorResponse {
        if matches!(self, Self::NoInternet) {
            return ErrorResponse::new("NO_INTERNET", NO_INTERNET_MESSAGE);
        }
        ErrorResponse::new(self.kind().code(), self.to_string())
    }

    /// HTTP status for this failure.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }
}

/// JSON error body: `{"success": false, "message": ..., "error": {"code": ..., "message": ...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    /// Always `false`.
    pub success: bool,
    /// Human-readable summary.
    pub message: String,
    /// Machine-readable detail.
    pub error: ErrorDetail,
}

/// Nested error detail of an [`ErrorResponse`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDetail {
    /// Stable code such as `CONTENT_UNAVAILABLE`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ErrorResponse {
    /// Creates an error body with the same message at both levels.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            success: false,
            message: message.clone(),
            error: ErrorDetail {
                code: code.into(),
                message,
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ErrorKind::Configuration.status_code(), 400);
        assert_eq!(ErrorKind::Content.status_code(), 422);
        assert_eq!(ErrorKind::LimitViolation.status_code(), 422);
        assert_eq!(ErrorKind::TransientNetwork.status_code(), 503);
        assert_eq!(ErrorKind::DependencyUnavailable.status_code(), 500);
        assert_eq!(ErrorKind::Internal.status_code(), 500);
        assert_eq!(ErrorKind::Cancelled.status_code(), 499);
    }

    #[test]
    fn test_no_internet_body() {
        let body = JobError::NoInternet.to_response();
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "NO_INTERNET");
        assert_eq!(json["error"]["message"], NO_INTERNET_MESSAGE);
        assert_eq!(JobError::NoInternet.status_code(), 503);
    }

    #[test]
    fn test_download_error_keeps_classification() {
        let err = JobError::from(DownloadError::http_status("https://cdn.example.com/v", 404));
        assert_eq!(err.kind(), ErrorKind::Content);
        assert_eq!(err.failure_type(), FailureType::Permanent);
        let body = err.to_response();
        assert_eq!(body.error.code, "CONTENT_UNAVAILABLE");
        assert!(body.message.contains("404"));
    }

    #[test]
    fn test_cancelled_is_not_retryable() {
        assert_eq!(JobError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(JobError::Cancelled.failure_type(), FailureType::Permanent);
    }
}
