//! unidl Core Library
//!
//! Media download orchestration: a request goes in, a set of files in a
//! scoped working directory comes out, and the directory is removed once
//! the caller is done with it.
//!
//! # Architecture
//!
//! - [`request`] - Request model and boundary validation
//! - [`format`] - Quality preset to format-selection plan
//! - [`job`] - Immutable job descriptor built from request and plan
//! - [`dependency`] - Single-flight bootstrap of the `yt-dlp` and `ffmpeg` binaries
//! - [`extractor`] - Media metadata extraction
//! - [`download`] - Transfers, fragment assembly, retries and the per-job engine
//! - [`postprocess`] - Transcoder-backed post-processing chain
//! - [`progress`] - Concurrent per-job progress tracking
//! - [`artifact`] - Working directories and artifact hand-off
//! - [`service`] - End-to-end job control flow

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod artifact;
pub mod config;
pub mod connectivity;
pub mod dependency;
pub mod download;
pub mod error;
pub mod extractor;
pub mod format;
pub mod job;
pub mod postprocess;
pub mod progress;
pub mod request;
pub mod service;
#[cfg(test)]
pub mod test_support;
pub(crate) mod user_agent;

// Re-export commonly used types
pub use artifact::{Artifact, ArtifactSet, WorkDir};
pub use config::{ConfigError, EngineConfig};
pub use dependency::{BootstrapError, DependencyBootstrapper, DependencySpec, DependencyState};
pub use download::{DownloadEngine, DownloadError, FailureType, RetryPolicy};
pub use error::{ErrorKind, ErrorResponse, JobError};
pub use extractor::{MediaEntry, MediaExtractor, MediaInfo};
pub use format::{FormatPlan, resolve};
pub use job::{JobDescriptor, JobId};
pub use postprocess::Transcoder;
pub use progress::{JobState, ProgressSnapshot, ProgressTracker};
pub use request::{
    AudioFormat, Credentials, DownloadRequest, Secret, ValidationError, VideoCodec, VideoQuality,
};
pub use service::{BootstrappedToolchain, Handoff, JobHandle, MediaService, Toolchain};
