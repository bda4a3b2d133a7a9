//! Constants for the download module (timeouts, fragment window, throttling).

use std::time::Duration;

/// Default socket timeout for media hosts (30 seconds), applied to connect and idle reads.
pub const SOCKET_TIMEOUT_SECS: u64 = 30;

/// Default number of fragments fetched concurrently within one job.
pub const DEFAULT_CONCURRENT_FRAGMENTS: usize = 8;

/// Upper bound for the fragment window.
pub const MAX_CONCURRENT_FRAGMENTS: usize = 32;

/// Warning threshold for cumulative bandwidth throttling per job (30 seconds).
pub const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Maximum Retry-After header value (1 hour) to prevent excessive delays.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);
