//! Retry logic with exponential backoff for transient transfer failures.
//!
//! This module provides the [`RetryPolicy`] and [`FailureType`] types for
//! classifying transfer errors and determining retry behavior.
//!
//! # Overview
//!
//! When a transfer fails, the error is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - Temporary failures that may succeed on retry
//! - [`FailureType::Permanent`] - Failures that won't succeed regardless of retries
//! - [`FailureType::NeedsAuth`] - Authentication required
//! - [`FailureType::RateLimited`] - Server rate limiting (retries with backoff)
//! - [`FailureType::LimitViolation`] - File-size bounds violated (deterministic)
//! - [`FailureType::Exhausted`] - A nested retry budget has already been spent
//!
//! The [`RetryPolicy`] then determines whether to retry based on failure type
//! and attempt count, calculating exponential backoff delays with jitter. The
//! same policy type drives both job-level attempts and per-fragment attempts.
//!
//! # Example
//!
//! ```
//! use unidl_core::download::{
//!     DownloadError, RetryPolicy, FailureType, RetryDecision, classify_error
//! };
//!
//! let policy = RetryPolicy::default();
//! let error = DownloadError::http_status("https://cdn.example.com/seg-1.ts", 503);
//! let failure_type = classify_error(&error);
//!
//! match policy.should_retry(failure_type, 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {:?} (attempt {})", delay, attempt);
//!     }
//!     RetryDecision::DoNotRetry { reason } => {
//!         println!("Not retrying: {}", reason);
//!     }
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use super::DownloadError;

/// Default maximum attempts for a job.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default maximum attempts for a single fragment.
pub const DEFAULT_FRAGMENT_RETRIES: u32 = 10;

/// Default base delay for exponential backoff (1 second).
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default maximum delay cap (32 seconds).
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Maximum jitter added to delays (500ms).
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Classification of transfer failure types.
///
/// Used to determine whether a failed transfer should be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: network timeout, connection reset, 5xx server errors,
    /// truncated fragment body.
    Transient,

    /// Permanent failure that won't succeed regardless of retries.
    ///
    /// Examples: 404 Not Found, 410 Gone, invalid URL, local disk errors.
    Permanent,

    /// Authentication or authorization required.
    NeedsAuth,

    /// Server rate limiting (HTTP 429).
    ///
    /// Retries with exponential backoff, or the server's Retry-After value.
    RateLimited,

    /// Media is outside the configured file-size window.
    ///
    /// The size of a given source does not change between fetches.
    LimitViolation,

    /// An inner retry loop (fragment level) already spent its budget.
    Exhausted,
}

/// Decision on whether to retry a failed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for retry behavior with exponential backoff.
///
/// # Default Values
///
/// - `max_attempts`: 3
/// - `base_delay`: 1 second
/// - `max_delay`: 32 seconds
/// - `backoff_multiplier`: 2.0
/// - `max_jitter`: 500 milliseconds
///
/// # Delay Calculation
///
/// ```text
/// delay = min(base_delay * multiplier^(attempt-1), max_delay) + jitter
/// ```
///
/// With defaults, delays are approximately: 1s, 2s, 4s (before hitting max attempts).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Base delay for the first retry.
    base_delay: Duration,

    /// Maximum delay cap.
    max_delay: Duration,

    /// Multiplier applied each attempt (typically 2.0 for doubling).
    backoff_multiplier: f32,

    /// Upper bound of the random jitter added to each delay.
    max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_jitter: MAX_JITTER,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with custom settings.
    ///
    /// # Arguments
    ///
    /// * `max_attempts` - Maximum attempts including initial (must be >= 1)
    /// * `base_delay` - Base delay for first retry
    /// * `max_delay` - Maximum delay cap
    /// * `backoff_multiplier` - Multiplier for exponential increase
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
            max_jitter: MAX_JITTER,
        }
    }

    /// Creates a policy with a custom max_attempts, using defaults for other settings.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Overrides the jitter bound (zero disables jitter).
    #[must_use]
    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Determines whether to retry a failed transfer.
    ///
    /// # Arguments
    ///
    /// * `failure_type` - Classification of the failure
    /// * `attempt` - The attempt number that just failed (1-indexed)
    #[instrument(level = "debug", skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        match failure_type {
            FailureType::Permanent => {
                return RetryDecision::DoNotRetry {
                    reason: "permanent failure - retry would not help".to_string(),
                };
            }
            FailureType::NeedsAuth => {
                return RetryDecision::DoNotRetry {
                    reason: "authentication required - retry without auth would not help"
                        .to_string(),
                };
            }
            FailureType::LimitViolation => {
                return RetryDecision::DoNotRetry {
                    reason: "file size limit violated - size will not change on re-fetch"
                        .to_string(),
                };
            }
            FailureType::Exhausted => {
                return RetryDecision::DoNotRetry {
                    reason: "fragment retry budget already exhausted".to_string(),
                };
            }
            FailureType::Transient | FailureType::RateLimited => {}
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.calculate_delay(attempt);

        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Calculates the delay for a retry attempt with exponential backoff and jitter.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let multiplier = f64::from(self.backoff_multiplier);

        // attempt 1 = multiplier^0 = 1x base
        let exponent = f64::from(attempt.saturating_sub(1));
        let delay_ms = base_ms * multiplier.powf(exponent);

        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped_ms as u64) + self.calculate_jitter()
    }

    /// Generates random jitter between 0 and `max_jitter`.
    #[allow(clippy::cast_possible_truncation)]
    fn calculate_jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..=max_ms);
        Duration::from_millis(jitter_ms)
    }
}

/// Classifies a transfer error into a failure type for retry decisions.
///
/// # HTTP Status Code Classification
///
/// | Status | Type | Rationale |
/// |--------|------|-----------|
/// | 401/403/407 | NeedsAuth | Credentials, cookies or geo-block |
/// | 404/410 | Permanent | Content gone |
/// | 408 | Transient | Request timeout |
/// | 429 | RateLimited | Retry with backoff or Retry-After |
/// | 451 | Permanent | Legal block |
/// | 5xx | Transient | Upstream trouble |
///
/// # Non-HTTP Errors
///
/// | Error | Type |
/// |-------|------|
/// | Timeout, Network (non-TLS), Integrity | Transient |
/// | Network (TLS) | Permanent |
/// | Io, InvalidUrl, UnsupportedStream | Permanent |
/// | SizeLimit | LimitViolation |
/// | RetriesExhausted | Exhausted |
#[instrument(level = "debug")]
pub fn classify_error(error: &DownloadError) -> FailureType {
    match error {
        DownloadError::HttpStatus { status, .. } => classify_http_status(*status),
        DownloadError::AuthRequired { .. } => FailureType::NeedsAuth,
        DownloadError::Timeout { .. } | DownloadError::Integrity { .. } => FailureType::Transient,
        DownloadError::Network { source, .. } => {
            if is_tls_error(source) {
                FailureType::Permanent
            } else {
                FailureType::Transient
            }
        }
        DownloadError::Io { .. }
        | DownloadError::InvalidUrl { .. }
        | DownloadError::UnsupportedStream { .. } => FailureType::Permanent,
        DownloadError::SizeLimit { .. } => FailureType::LimitViolation,
        DownloadError::RetriesExhausted { .. } => FailureType::Exhausted,
    }
}

/// Classifies an HTTP status code into a failure type.
#[allow(clippy::match_same_arms)]
fn classify_http_status(status: u16) -> FailureType {
    match status {
        401 | 403 | 407 => FailureType::NeedsAuth,
        404 => FailureType::Permanent,
        408 => FailureType::Transient,
        410 => FailureType::Permanent,
        429 => FailureType::RateLimited,
        451 => FailureType::Permanent,
        status if (400..500).contains(&status) => FailureType::Permanent,
        status if (500..600).contains(&status) => FailureType::Transient,
        _ => FailureType::Permanent,
    }
}

/// Checks if a reqwest error is a TLS/certificate error.
fn is_tls_error(error: &reqwest::Error) -> bool {
    let error_string = error.to_string().to_lowercase();
    error_string.contains("certificate")
        || error_string.contains("tls")
        || error_string.contains("ssl")
        || error_string.contains("handshake")
}
