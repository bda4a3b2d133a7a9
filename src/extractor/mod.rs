//! Media metadata extraction.
//!
//! A [`MediaExtractor`] resolves a page URL plus a format-selection
//! expression into concrete streams (direct URLs or fragment lists),
//! subtitles and descriptive fields. The engine performs the transfers.

mod ytdlp;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::download::FailureType;
use crate::error::ErrorKind;
use crate::job::JobDescriptor;

pub use ytdlp::{YtDlpExtractor, build_args, redact_args};

/// Livestream status of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LiveStatus {
    /// Regular upload.
    #[default]
    NotLive,
    /// Currently live.
    IsLive,
    /// Scheduled, not started yet.
    IsUpcoming,
    /// Finished livestream.
    WasLive,
}

impl LiveStatus {
    fn parse(value: Option<&str>) -> Self {
        match value {
            Some("is_live") => Self::IsLive,
            Some("is_upcoming") => Self::IsUpcoming,
            Some("was_live" | "post_live") => Self::WasLive,
            _ => Self::NotLive,
        }
    }
}

/// One downloadable stream of an entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MediaStream {
    /// Extractor format identifier.
    pub format_id: String,
    /// Direct URL (or HLS playlist URL).
    pub url: String,
    /// Container extension.
    pub ext: String,
    /// Transfer protocol (`https`, `m3u8_native`, `http_dash_segments`, ...).
    pub protocol: Option<String>,
    /// Video codec, `None` for audio-only streams.
    pub vcodec: Option<String>,
    /// Audio codec, `None` for video-only streams.
    pub acodec: Option<String>,
    /// Frame height.
    pub height: Option<u32>,
    /// Declared or approximate size in bytes.
    pub filesize: Option<u64>,
    /// Absolute fragment URLs, empty for single-request streams.
    pub fragments: Vec<String>,
    /// Headers the host expects.
    pub http_headers: BTreeMap<String, String>,
}

impl MediaStream {
    /// Whether this stream carries video.
    #[must_use]
    pub fn has_video(&self) -> bool {
        self.vcodec.is_some()
    }

    /// Whether this stream carries audio.
    #[must_use]
    pub fn has_audio(&self) -> bool {
        self.acodec.is_some()
    }

    /// Whether this stream is an HLS playlist without pre-resolved fragments.
    #[must_use]
    pub fn is_hls_playlist(&self) -> bool {
        self.fragments.is_empty()
            && self
                .protocol
                .as_deref()
                .is_some_and(|p| p.starts_with("m3u8"))
    }
}

/// A subtitle track offered for an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleTrack {
    /// Language code.
    pub lang: String,
    /// File extension (`vtt`, `srt`, ...).
    pub ext: String,
    /// Download URL.
    pub url: String,
}

/// A single media item (a video, or one playlist entry).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MediaEntry {
    /// Extractor identifier.
    pub id: String,
    /// Title.
    pub title: Option<String>,
    /// Final container extension.
    pub ext: String,
    /// Uploader or channel.
    pub uploader: Option<String>,
    /// Description text.
    pub description: Option<String>,
    /// Thumbnail URL.
    pub thumbnail: Option<String>,
    /// Livestream status.
    pub live_status: LiveStatus,
    /// 1-based playlist position.
    pub playlist_index: Option<u32>,
    /// Selected streams; two entries mean separate video and audio.
    pub streams: Vec<MediaStream>,
    /// Requested subtitle tracks.
    pub subtitles: Vec<SubtitleTrack>,
    /// Raw extractor metadata (for `.info.json`).
    pub raw: serde_json::Value,
}

impl MediaEntry {
    /// Format identifier of the selection (`137+140` for pairs).
    #[must_use]
    pub fn format_id(&self) -> String {
        self.streams
            .iter()
            .map(|s| s.format_id.as_str())
            .collect::<Vec<_>>()
            .join("+")
    }

    /// Sum of declared stream sizes, when every stream declares one.
    #[must_use]
    pub fn declared_size(&self) -> Option<u64> {
        self.streams
            .iter()
            .map(|s| s.filesize)
            .try_fold(0u64, |acc, size| size.map(|s| acc.saturating_add(s)))
    }
}

/// Extraction result: one entry for a single video, several for a playlist.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MediaInfo {
    /// Playlist title, when the URL is a playlist.
    pub playlist_title: Option<String>,
    /// Entries in playlist order.
    pub entries: Vec<MediaEntry>,
}

impl MediaInfo {
    /// Parses a `--dump-single-json` document.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::Parse`] for malformed JSON.
    pub fn from_json_str(json: &str) -> Result<Self, ExtractError> {
        let value: serde_json::Value =
            serde_json::from_str(json).map_err(|source| ExtractError::Parse { source })?;
        Self::from_value(value)
    }

    /// Parses an already decoded document.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::Parse`] when the document does not have the expected shape.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ExtractError> {
        let raw: RawInfo =
            serde_json::from_value(value.clone()).map_err(|source| ExtractError::Parse { source })?;

        if raw.kind.as_deref() == Some("playlist") || raw.entries.is_some() {
            let mut entries = Vec::new();
            for (position, entry) in raw.entries.unwrap_or_default().into_iter().enumerate() {
                // Unavailable playlist members are reported as null.
                let Some(entry_value) = entry else { continue };
                let parsed: RawInfo = serde_json::from_value(entry_value.clone())
                    .map_err(|source| ExtractError::Parse { source })?;
                let fallback_index = u32::try_from(position + 1).ok();
                entries.push(parsed.into_entry(entry_value, fallback_index));
            }
            return Ok(Self {
                playlist_title: raw.title,
                entries,
            });
        }

        Ok(Self {
            playlist_title: None,
            entries: vec![raw.into_entry(value, None)],
        })
    }

    /// Whether any entry is still waiting to go live.
    #[must_use]
    pub fn is_upcoming(&self) -> bool {
        !self.entries.is_empty()
            && self
                .entries
                .iter()
                .all(|e| e.live_status == LiveStatus::IsUpcoming && e.streams.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct RawFragment {
    url: Option<String>,
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawFormat {
    format_id: Option<String>,
    url: Option<String>,
    ext: Option<String>,
    protocol: Option<String>,
    vcodec: Option<String>,
    acodec: Option<String>,
    height: Option<u32>,
    filesize: Option<f64>,
    filesize_approx: Option<f64>,
    fragments: Option<Vec<RawFragment>>,
    fragment_base_url: Option<String>,
    http_headers: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct RawSubtitle {
    ext: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawInfo {
    #[serde(rename = "_type")]
    kind: Option<String>,
    id: Option<String>,
    title: Option<String>,
    uploader: Option<String>,
    channel: Option<String>,
    description: Option<String>,
    thumbnail: Option<String>,
    live_status: Option<String>,
    playlist_index: Option<u32>,
    requested_formats: Option<Vec<RawFormat>>,
    requested_subtitles: Option<BTreeMap<String, RawSubtitle>>,
    entries: Option<Vec<Option<serde_json::Value>>>,
    #[serde(flatten)]
    format: RawFormat,
}

impl RawInfo {
    fn into_entry(self, raw: serde_json::Value, fallback_index: Option<u32>) -> MediaEntry {
        let mut streams: Vec<MediaStream> = self
            .requested_formats
            .unwrap_or_default()
            .into_iter()
            .filter_map(RawFormat::into_stream)
            .collect();
        let ext = self.format.ext.clone().unwrap_or_else(|| "mp4".to_string());
        if streams.is_empty()
            && let Some(stream) = self.format.into_stream()
        {
            streams.push(stream);
        }

        let subtitles = self
            .requested_subtitles
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(lang, sub)| {
                Some(SubtitleTrack {
                    lang,
                    ext: sub.ext.unwrap_or_else(|| "vtt".to_string()),
                    url: sub.url?,
                })
            })
            .collect();

        MediaEntry {
            id: self.id.unwrap_or_else(|| "media".to_string()),
            title: self.title,
            ext,
            uploader: self.uploader.or(self.channel),
            description: self.description,
            thumbnail: self.thumbnail,
            live_status: LiveStatus::parse(self.live_status.as_deref()),
            playlist_index: self.playlist_index.or(fallback_index),
            streams,
            subtitles,
            raw,
        }
    }
}

impl RawFormat {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn into_stream(self) -> Option<MediaStream> {
        let fragments: Vec<String> = self
            .fragments
            .unwrap_or_default()
            .into_iter()
            .filter_map(|fragment| match (fragment.url, fragment.path) {
                (Some(url), _) => Some(url),
                (None, Some(path)) => {
                    let base = self.fragment_base_url.as_deref()?;
                    Url::parse(base).ok()?.join(&path).ok().map(String::from)
                }
                (None, None) => None,
            })
            .collect();

        let url = self
            .url
            .or_else(|| self.fragment_base_url.clone())
            .filter(|u| !u.is_empty());
        if url.is_none() && fragments.is_empty() {
            return None;
        }

        let codec = |c: Option<String>| c.filter(|c| c != "none" && !c.is_empty());
        Some(MediaStream {
            format_id: self.format_id.unwrap_or_else(|| "0".to_string()),
            url: url.unwrap_or_default(),
            ext: self.ext.unwrap_or_else(|| "mp4".to_string()),
            protocol: self.protocol,
            vcodec: codec(self.vcodec),
            acodec: codec(self.acodec),
            height: self.height,
            filesize: self
                .filesize
                .or(self.filesize_approx)
                .filter(|s| s.is_finite() && *s >= 0.0)
                .map(|s| s as u64),
            fragments,
            http_headers: self.http_headers.unwrap_or_default(),
        })
    }
}

/// Extraction failures, classified from extractor output.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Content not found, private, removed or blocked.
    #[error("content unavailable: {message}")]
    Unavailable {
        /// Extractor message.
        message: String,
    },

    /// Content is blocked in this region.
    #[error("content is geo-restricted: {message}")]
    GeoRestricted {
        /// Extractor message.
        message: String,
    },

    /// Content requires login or cookies.
    #[error("authentication required: {message}")]
    AuthRequired {
        /// Extractor message.
        message: String,
    },

    /// The URL is not supported by any extractor.
    #[error("unsupported url: {message}")]
    Unsupported {
        /// Extractor message.
        message: String,
    },

    /// A scheduled livestream has not started.
    #[error("livestream has not started: {message}")]
    NotYetLive {
        /// Extractor message.
        message: String,
    },

    /// Timeout, throttling or upstream 5xx.
    #[error("transient extraction failure: {message}")]
    Transient {
        /// Extractor message.
        message: String,
    },

    /// The extractor binary could not be started.
    #[error("failed to start extractor {binary}: {source}")]
    Spawn {
        /// Binary path.
        binary: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The extractor output is not valid metadata.
    #[error("invalid extractor output: {source}")]
    Parse {
        /// Decoder error.
        #[source]
        source: serde_json::Error,
    },

    /// Unclassified extractor failure.
    #[error("extractor failed (exit code {code:?}): {message}")]
    Failed {
        /// Exit code, if any.
        code: Option<i32>,
        /// Last error line.
        message: String,
    },
}

impl ExtractError {
    /// Job-level classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable { .. }
            | Self::GeoRestricted { .. }
            | Self::AuthRequired { .. }
            | Self::NotYetLive { .. } => ErrorKind::Content,
            Self::Unsupported { .. } => ErrorKind::Configuration,
            Self::Transient { .. } => ErrorKind::TransientNetwork,
            Self::Spawn { .. } => ErrorKind::DependencyUnavailable,
            Self::Parse { .. } | Self::Failed { .. } => ErrorKind::Internal,
        }
    }

    /// Retry classification.
    #[must_use]
    pub fn failure_type(&self) -> FailureType {
        match self {
            Self::Transient { .. } => FailureType::Transient,
            Self::AuthRequired { .. } => FailureType::NeedsAuth,
            _ => FailureType::Permanent,
        }
    }
}

/// Classifies extractor stderr into an [`ExtractError`].
#[must_use]
pub fn classify_stderr(stderr: &str, code: Option<i32>) -> ExtractError {
    let lower = stderr.to_lowercase();
    let message = last_error_line(stderr);

    let any = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if any(&["this live event will begin", "premieres in", "waiting for the stream", "is_upcoming"]) {
        return ExtractError::NotYetLive { message };
    }
    if any(&[
        "http error 429",
        "too many requests",
        "timed out",
        "timeout",
        "connection reset",
        "temporary failure in name resolution",
        "remote end closed",
        "http error 500",
        "http error 502",
        "http error 503",
        "http error 504",
    ]) {
        return ExtractError::Transient { message };
    }
    if any(&["not available in your country", "geo restrict", "geo-restrict"])
        || (lower.contains("geo") && lower.contains("block"))
    {
        return ExtractError::GeoRestricted { message };
    }
    if any(&[
        "sign in to confirm",
        "login required",
        "members-only",
        "http error 401",
        "http error 403",
        "use --cookies",
    ]) {
        return ExtractError::AuthRequired { message };
    }
    if any(&["unsupported url", "is not a valid url"]) {
        return ExtractError::Unsupported { message };
    }
    if any(&[
        "private video",
        "video unavailable",
        "has been removed",
        "http error 404",
        "http error 410",
        "does not exist",
        "copyright",
        "no video formats",
        "requested format is not available",
        "not available",
    ]) {
        return ExtractError::Unavailable { message };
    }
    ExtractError::Failed { code, message }
}

fn last_error_line(stderr: &str) -> String {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| l.to_lowercase().starts_with("error"))
        .or_else(|| stderr.lines().rev().map(str::trim).find(|l| !l.is_empty()))
        .unwrap_or("no output")
        .trim_start_matches("ERROR:")
        .trim()
        .chars()
        .take(500)
        .collect()
}

/// Resolves a page URL into streams for a job.
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    /// Extracts media information using the job's format expression,
    /// playlist selection and network options.
    async fn extract(&self, job: &JobDescriptor) -> Result<MediaInfo, ExtractError>;
}
