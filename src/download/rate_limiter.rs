//! Bandwidth limiting for media transfers.
//!
//! This module provides the [`RateLimiter`] struct which enforces the
//! request's `rate_limit` (bytes per second) across every fragment worker of
//! one job, and [`parse_retry_after`] for honoring server-mandated delays on
//! HTTP 429 responses.
//!
//! # Overview
//!
//! The limiter is a token bucket holding at most one second worth of bytes.
//! Workers call [`RateLimiter::acquire`] after receiving a chunk; when the
//! bucket is in deficit the caller sleeps until the deficit is paid back.
//! Because all workers of a job share one limiter, the aggregate throughput
//! stays at the configured rate regardless of the fragment window.
//!
//! # Example
//!
//! ```
//! use unidl_core::download::RateLimiter;
//!
//! # async fn example() {
//! // 2 MiB/s shared by all fragment workers of a job
//! let limiter = RateLimiter::new(2 * 1024 * 1024);
//! limiter.acquire(64 * 1024).await;
//!
//! // No limit requested
//! let unlimited = RateLimiter::disabled();
//! unlimited.acquire(u64::MAX).await;
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::constants::{CUMULATIVE_DELAY_WARNING_THRESHOLD, MAX_RETRY_AFTER};

/// Shared byte-rate limiter for one job.
///
/// `RateLimiter` is `Send + Sync` and is meant to be wrapped in `Arc` and
/// handed to each fragment worker of the job.
#[derive(Debug)]
pub struct RateLimiter {
    /// Allowed bytes per second, `None` when disabled.
    bytes_per_sec: Option<u64>,

    /// Bucket state; the lock is held while a worker sleeps off a deficit so
    /// concurrent workers queue behind it instead of overdrawing.
    bucket: Mutex<Bucket>,

    /// Total time spent throttling (milliseconds), for diagnostics.
    cumulative_delay_ms: AtomicU64,
}

#[derive(Debug)]
struct Bucket {
    /// Available bytes; negative while in deficit.
    available: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Creates a limiter allowing `bytes_per_sec` bytes per second.
    ///
    /// A rate of zero is treated as "disabled".
    #[must_use]
    #[instrument(level = "debug")]
    pub fn new(bytes_per_sec: u64) -> Self {
        if bytes_per_sec == 0 {
            return Self::disabled();
        }
        debug!("creating bandwidth limiter");
        Self {
            bytes_per_sec: Some(bytes_per_sec),
            bucket: Mutex::new(Bucket {
                #[allow(clippy::cast_precision_loss)]
                available: bytes_per_sec as f64,
                last_refill: Instant::now(),
            }),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    /// Creates a limiter from an optional rate (`None` disables limiting).
    #[must_use]
    pub fn from_rate(bytes_per_sec: Option<u64>) -> Self {
        bytes_per_sec.map_or_else(Self::disabled, Self::new)
    }

    /// Creates a disabled limiter that never delays.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            bytes_per_sec: None,
            bucket: Mutex::new(Bucket {
                available: 0.0,
                last_refill: Instant::now(),
            }),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    /// Returns whether limiting is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.bytes_per_sec.is_none()
    }

    /// Returns the configured rate in bytes per second.
    #[must_use]
    pub fn bytes_per_sec(&self) -> Option<u64> {
        self.bytes_per_sec
    }

    /// Returns the total time callers have been throttled so far.
    #[must_use]
    pub fn cumulative_delay(&self) -> Duration {
        Duration::from_millis(self.cumulative_delay_ms.load(Ordering::SeqCst))
    }

    /// Accounts for `bytes` just received, sleeping if the rate is exceeded.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub async fn acquire(&self, bytes: u64) {
        let Some(rate) = self.bytes_per_sec else {
            return;
        };
        let rate = rate as f64;

        let mut bucket = self.bucket.lock().await;
        let now = Instant::now();
        let refill = now.duration_since(bucket.last_refill).as_secs_f64() * rate;
        bucket.available = (bucket.available + refill).min(rate);
        bucket.last_refill = now;
        bucket.available -= bytes as f64;

        if bucket.available < 0.0 {
            let delay = Duration::from_secs_f64(-bucket.available / rate);
            let delay_ms = delay.as_millis() as u64;
            let cumulative = Duration::from_millis(
                self.cumulative_delay_ms
                    .fetch_add(delay_ms, Ordering::SeqCst)
                    .saturating_add(delay_ms),
            );
            debug!(
                delay_ms,
                cumulative_ms = cumulative.as_millis(),
                "applying bandwidth limit delay"
            );
            if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD
                && cumulative.saturating_sub(delay) < CUMULATIVE_DELAY_WARNING_THRESHOLD
            {
                warn!(
                    cumulative_delay_secs = cumulative.as_secs(),
                    "bandwidth limit is dominating transfer time"
                );
            }
            tokio::time::sleep(delay).await;
            bucket.available = 0.0;
            bucket.last_refill = Instant::now();
        }
    }
}

/// Parses a Retry-After header value into a Duration.
///
/// Supports two formats as per RFC 7231:
/// - Integer seconds: `Retry-After: 120`
/// - HTTP-date: `Retry-After: Wed, 21 Oct 2025 07:28:00 GMT`
///
/// Returns `None` if the value cannot be parsed. Caps excessive values at 1 hour.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use unidl_core::download::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("0"), Some(Duration::ZERO));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
#[instrument(level = "debug")]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }

        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);

        if duration > MAX_RETRY_AFTER {
            warn!(
                seconds,
                max_seconds = MAX_RETRY_AFTER.as_secs(),
                "Retry-After exceeds maximum, capping at 1 hour"
            );
            return Some(MAX_RETRY_AFTER);
        }

        return Some(duration);
    }

    if let Ok(datetime) = httpdate::parse_http_date(header_value) {
        match datetime.duration_since(std::time::SystemTime::now()) {
            Ok(duration) if duration > MAX_RETRY_AFTER => Some(MAX_RETRY_AFTER),
            Ok(duration) => Some(duration),
            Err(_) => {
                debug!(header_value, "Retry-After date is in the past, returning zero");
                Some(Duration::ZERO)
            }
        }
    } else {
        debug!(header_value, "unparseable Retry-After value");
        None
    }
}
