//! Media transfer: HTTP client, fragment assembly, retries and the per-job
//! download engine.
//!
//! # Features
//!
//! - Streaming single-request transfers (memory-efficient for large files)
//! - In-order fragment assembly with a bounded concurrency window
//! - HLS media and master playlist resolution
//! - Job-level and fragment-level retry with exponential backoff and `Retry-After`
//! - Byte-rate limiting shared by all workers of a job
//! - File-size window enforced before and during the transfer
//!
//! # Example
//!
//! ```no_run
//! use std::collections::BTreeMap;
//! use std::path::Path;
//! use std::time::Duration;
//! use unidl_core::download::{HttpClient, RateLimiter, SizeWindow};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new(Duration::from_secs(30), None, "unidl/0.1")?;
//! let bytes = client
//!     .download_to_path(
//!         "https://cdn.example.com/clip.mp4",
//!         &BTreeMap::new(),
//!         Path::new("./clip.mp4"),
//!         SizeWindow::default(),
//!         &RateLimiter::disabled(),
//!         |_| {},
//!     )
//!     .await?;
//! println!("Downloaded {bytes} bytes");
//! # Ok(())
//! # }
//! ```

mod client;
mod constants;
mod engine;
mod error;
mod filename;
mod fragment;
pub mod rate_limiter;
mod retry;

pub use client::{HttpClient, SizeWindow};
pub use constants::{DEFAULT_CONCURRENT_FRAGMENTS, MAX_CONCURRENT_FRAGMENTS, SOCKET_TIMEOUT_SECS};
pub use engine::{DEFAULT_LIVE_POLL_INTERVAL, DownloadEngine, EngineOutput, EngineTools};
pub use error::{DownloadError, SizeBound};
pub(crate) use filename::split_extension;
pub use filename::{resolve_unique_path, sanitize_filename};
pub use fragment::{FragmentTransfer, HlsPlaylist, parse_hls_playlist, resolve_hls_segments};
pub use rate_limiter::{RateLimiter, parse_retry_after};
pub use retry::{
    DEFAULT_FRAGMENT_RETRIES, DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy,
    classify_error,
};

// Note: Per project-context.md, we do NOT define module-local Result aliases.
// Use `Result<T, DownloadError>` explicitly in function signatures.
