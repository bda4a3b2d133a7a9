//! Shared fakes and fixtures for integration tests.
//!
//! The extractor and transcoder fakes stand in for the external binaries so
//! that media transfers run against a local wiremock server.

#![allow(dead_code)]

pub mod socket_guard;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use unidl_core::dependency::{BinaryFetcher, BinaryProbe};
use unidl_core::extractor::{ExtractError, MediaStream};
use unidl_core::postprocess::TranscodeError;
use unidl_core::{
    BootstrapError, DownloadError, EngineConfig, JobDescriptor, MediaEntry, MediaExtractor,
    MediaInfo, Toolchain, Transcoder,
};

/// Extractor returning the same result on every call.
pub struct FixedExtractor {
    info: MediaInfo,
    calls: AtomicU32,
    expressions: Mutex<Vec<String>>,
}

impl FixedExtractor {
    pub fn new(info: MediaInfo) -> Self {
        Self {
            info,
            calls: AtomicU32::new(0),
            expressions: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Format expressions the extractor was invoked with.
    pub fn expressions(&self) -> Vec<String> {
        self.expressions.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaExtractor for FixedExtractor {
    async fn extract(&self, job: &JobDescriptor) -> Result<MediaInfo, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.expressions
            .lock()
            .unwrap()
            .push(job.format.expression.clone());
        Ok(self.info.clone())
    }
}

/// Copies the first `-i` input to the output argument and records each step.
#[derive(Default)]
pub struct CopyTranscoder {
    steps: Mutex<Vec<String>>,
}

impl CopyTranscoder {
    pub fn steps(&self) -> Vec<String> {
        self.steps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transcoder for CopyTranscoder {
    async fn transcode(&self, step: &str, args: &[String]) -> Result<(), TranscodeError> {
        self.steps.lock().unwrap().push(step.to_string());
        let input = args
            .iter()
            .position(|a| a == "-i")
            .and_then(|i| args.get(i + 1))
            .unwrap();
        let output = args.last().unwrap();
        tokio::fs::copy(input, output)
            .await
            .map_err(|source| TranscodeError::Io {
                path: PathBuf::from(output),
                source,
            })?;
        Ok(())
    }
}

/// Toolchain handing out prebuilt fakes.
pub struct StaticToolchain {
    pub extractor: Arc<FixedExtractor>,
    pub transcoder: Option<Arc<CopyTranscoder>>,
}

impl StaticToolchain {
    pub fn new(info: MediaInfo) -> Self {
        Self {
            extractor: Arc::new(FixedExtractor::new(info)),
            transcoder: Some(Arc::new(CopyTranscoder::default())),
        }
    }

    pub fn without_transcoder(mut self) -> Self {
        self.transcoder = None;
        self
    }

    pub fn steps(&self) -> Vec<String> {
        self.transcoder.as_ref().map(|t| t.steps()).unwrap_or_default()
    }
}

#[async_trait]
impl Toolchain for StaticToolchain {
    async fn extractor(&self) -> Result<Arc<dyn MediaExtractor>, BootstrapError> {
        Ok(self.extractor.clone())
    }

    async fn transcoder(&self) -> Result<Arc<dyn Transcoder>, BootstrapError> {
        match &self.transcoder {
            Some(transcoder) => Ok(transcoder.clone()),
            None => Err(BootstrapError::Fetch {
                binary: "ffmpeg".to_string(),
                url: "https://releases.invalid/ffmpeg".to_string(),
                reason: "offline".to_string(),
            }),
        }
    }
}

/// Fetcher writing a stub executable and counting calls.
#[derive(Default)]
pub struct CountingFetcher {
    pub calls: AtomicU32,
}

#[async_trait]
impl BinaryFetcher for CountingFetcher {
    async fn fetch(&self, _url: &str, dest: &Path) -> Result<u64, DownloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        tokio::fs::write(dest, b"#!/bin/sh\necho stub 1.0\n")
            .await
            .map_err(|e| DownloadError::io(dest, e))?;
        Ok(24)
    }
}

/// Probe accepting any existing file.
pub struct AcceptProbe;

#[async_trait]
impl BinaryProbe for AcceptProbe {
    async fn probe(&self, path: &Path, _version_arg: &str) -> Result<String, String> {
        if path.exists() {
            Ok("stub 1.0".to_string())
        } else {
            Err("missing".to_string())
        }
    }
}

/// Engine configuration rooted at `work_dir`, offline and without backoff.
pub fn test_config(work_dir: &Path) -> EngineConfig {
    EngineConfig {
        work_dir: work_dir.to_path_buf(),
        check_internet: false,
        retry_base_delay: Duration::ZERO,
        retry_jitter: Duration::ZERO,
        ..EngineConfig::default()
    }
}

pub fn video_stream(format_id: &str, url: String, height: u32) -> MediaStream {
    MediaStream {
        format_id: format_id.to_string(),
        url,
        ext: "mp4".to_string(),
        protocol: Some("https".to_string()),
        vcodec: Some("avc1.64001f".to_string()),
        acodec: None,
        height: Some(height),
        ..MediaStream::default()
    }
}

pub fn audio_stream(format_id: &str, url: String) -> MediaStream {
    MediaStream {
        format_id: format_id.to_string(),
        url,
        ext: "m4a".to_string(),
        protocol: Some("https".to_string()),
        vcodec: None,
        acodec: Some("mp4a.40.2".to_string()),
        ..MediaStream::default()
    }
}

/// Single-entry extraction result.
pub fn single(id: &str, title: &str, streams: Vec<MediaStream>) -> MediaInfo {
    MediaInfo {
        playlist_title: None,
        entries: vec![MediaEntry {
            id: id.to_string(),
            title: Some(title.to_string()),
            ext: "mp4".to_string(),
            streams,
            ..MediaEntry::default()
        }],
    }
}

/// Number of directories directly under `root`.
pub fn job_dirs(root: &Path) -> usize {
    std::fs::read_dir(root)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| e.path().is_dir())
                .count()
        })
        .unwrap_or(0)
}
