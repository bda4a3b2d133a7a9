//! Job configuration: merges a validated request and its format plan into
//! one immutable [`JobDescriptor`].

mod playlist;
mod template;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};
use url::Url;

use crate::download::{DEFAULT_CONCURRENT_FRAGMENTS, DEFAULT_FRAGMENT_RETRIES, DEFAULT_MAX_RETRIES};
use crate::download::{MAX_CONCURRENT_FRAGMENTS, RetryPolicy, SOCKET_TIMEOUT_SECS};
use crate::format::FormatPlan;
use crate::postprocess::PostProcessor;
use crate::request::{Credentials, ValidatedRequest};

pub use playlist::{ItemSpec, PlaylistSelection};
pub use template::{DEFAULT_OUTPUT_TEMPLATE, OutputTemplate, TemplateFields};

/// Subtitle language used when none is requested.
pub const DEFAULT_SUBTITLE_LANG: &str = "en";

/// Default upper bound for `wait_for_video`.
pub const DEFAULT_MAX_LIVE_WAIT: Duration = Duration::from_secs(600);

static JOB_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique job identifier (16 hex characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct JobId(String);

impl JobId {
    /// Derives a fresh identifier from the URL, the clock and a process counter.
    #[must_use]
    pub fn generate(url: &str) -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let counter = JOB_COUNTER.fetch_add(1, Ordering::Relaxed);

        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        hasher.update(nanos.to_le_bytes());
        hasher.update(counter.to_le_bytes());
        let digest = hasher.finalize();

        let hex: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
        Self(hex)
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Exponential backoff parameters shared by job and fragment retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Backoff {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap on any single delay.
    pub max_delay: Duration,
    /// Upper bound of random jitter added to each delay.
    pub max_jitter: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(32),
            max_jitter: Duration::from_millis(500),
        }
    }
}

/// Engine-wide defaults merged into every descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDefaults {
    /// Job-level attempts.
    pub retries: u32,
    /// Per-fragment attempts.
    pub fragment_retries: u32,
    /// Connect and read-inactivity timeout.
    pub socket_timeout: Duration,
    /// Fragment worker window.
    pub concurrent_fragments: usize,
    /// Upper bound applied to `wait_for_video`.
    pub max_live_wait: Duration,
    /// Backoff parameters.
    pub backoff: Backoff,
}

impl Default for JobDefaults {
    fn default() -> Self {
        Self {
            retries: DEFAULT_MAX_RETRIES,
            fragment_retries: DEFAULT_FRAGMENT_RETRIES,
            socket_timeout: Duration::from_secs(SOCKET_TIMEOUT_SECS),
            concurrent_fragments: DEFAULT_CONCURRENT_FRAGMENTS,
            max_live_wait: DEFAULT_MAX_LIVE_WAIT,
            backoff: Backoff::default(),
        }
    }
}

/// Size and bandwidth limits enforced while fetching.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransferLimits {
    /// Bytes per second across all workers of the job.
    pub rate_limit: Option<u64>,
    /// Maximum media size in bytes.
    pub max_filesize: Option<u64>,
    /// Minimum media size in bytes.
    pub min_filesize: Option<u64>,
}

/// Livestream options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LiveOptions {
    /// Fetch the stream from its start.
    pub from_start: bool,
    /// How long to wait for a scheduled stream, already clamped.
    pub wait: Option<Duration>,
}

/// Side files written next to the primary media.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct SideFiles {
    /// `.description` text.
    pub description: bool,
    /// `.info.json` metadata dump.
    pub info_json: bool,
    /// Keep the thumbnail image as a side file.
    pub thumbnail: bool,
    /// Fetch the thumbnail (for writing or embedding).
    pub fetch_thumbnail: bool,
    /// Subtitle languages to fetch; empty when subtitles are off.
    pub subtitle_langs: Vec<String>,
    /// Keep subtitle files as side files.
    pub subtitles: bool,
}

/// Fully resolved, immutable job configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobDescriptor {
    /// Target URL.
    pub url: Url,
    /// Resolved format plan.
    pub format: FormatPlan,
    /// Post-processors, in execution order.
    pub post_processors: Vec<PostProcessor>,
    /// Output filename template.
    pub output_template: OutputTemplate,
    /// Playlist selection.
    pub playlist: PlaylistSelection,
    /// Job-level attempts.
    pub retries: u32,
    /// Per-fragment attempts.
    pub fragment_retries: u32,
    /// Connect and read-inactivity timeout.
    pub socket_timeout: Duration,
    /// Fragment worker window.
    pub concurrent_fragments: usize,
    /// Backoff parameters.
    pub backoff: Backoff,
    /// Size and bandwidth limits.
    pub limits: TransferLimits,
    /// Proxy for extraction and transfers.
    pub proxy: Option<Url>,
    /// Prefer free formats at equal quality.
    pub prefer_free_formats: bool,
    /// Livestream options.
    pub live: LiveOptions,
    /// Side files to write.
    pub side_files: SideFiles,
    /// Site authentication, never serialized.
    #[serde(skip)]
    pub credentials: Credentials,
}

impl JobDescriptor {
    /// Retry policy for the job-level attempt loop.
    #[must_use]
    pub fn job_retry_policy(&self) -> RetryPolicy {
        self.policy(self.retries)
    }

    /// Retry policy for each fragment.
    #[must_use]
    pub fn fragment_retry_policy(&self) -> RetryPolicy {
        self.policy(self.fragment_retries)
    }

    fn policy(&self, attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            attempts,
            self.backoff.base_delay,
            self.backoff.max_delay,
            2.0,
        )
        .with_max_jitter(self.backoff.max_jitter)
    }

    /// Whether the transcoder binary is needed (merge or any post-processor).
    #[must_use]
    pub fn needs_transcoder(&self) -> bool {
        self.format.merge_output_format.is_some() || !self.post_processors.is_empty()
    }
}

/// Builds the descriptor. Pure and total for any validated request.
#[must_use]
#[instrument(level = "debug", skip_all, fields(url = %request.url))]
pub fn build(request: &ValidatedRequest, plan: FormatPlan, defaults: &JobDefaults) -> JobDescriptor {
    let raw = request.request();

    let mut post_processors = Vec::new();
    if let Some(extraction) = &plan.audio_extraction {
        post_processors.push(PostProcessor::ExtractAudio {
            codec: extraction.codec,
            quality: extraction.quality.clone(),
            keep_video: extraction.keep_video,
        });
    } else if let Some(codec) = plan.audio_conversion {
        post_processors.push(PostProcessor::ConvertAudio { codec });
    }
    if raw.add_metadata {
        post_processors.push(PostProcessor::Metadata);
    }
    if raw.embed_thumbnail {
        post_processors.push(PostProcessor::EmbedThumbnail);
    }

    let subtitle_langs = if raw.subtitles {
        let langs: Vec<String> = raw
            .subtitle_langs
            .iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        if langs.is_empty() {
            vec![DEFAULT_SUBTITLE_LANG.to_string()]
        } else {
            langs
        }
    } else {
        Vec::new()
    };
    if raw.subtitles && raw.embed_subtitles {
        post_processors.push(PostProcessor::EmbedSubtitles {
            langs: subtitle_langs.clone(),
        });
    }

    let live = LiveOptions {
        from_start: raw.live_from_start,
        wait: raw
            .wait_for_video
            .map(|secs| Duration::from_secs(secs).min(defaults.max_live_wait)),
    };

    let descriptor = JobDescriptor {
        url: request.url.clone(),
        format: plan,
        post_processors,
        output_template: OutputTemplate::new(raw.output_template.as_deref()),
        playlist: PlaylistSelection::normalize(
            raw.playlist_start,
            raw.playlist_end,
            raw.playlist_items.as_deref(),
            raw.max_downloads,
        ),
        retries: defaults.retries.max(1),
        fragment_retries: defaults.fragment_retries.max(1),
        socket_timeout: defaults.socket_timeout,
        concurrent_fragments: defaults
            .concurrent_fragments
            .clamp(1, MAX_CONCURRENT_FRAGMENTS),
        backoff: defaults.backoff,
        limits: TransferLimits {
            rate_limit: request.rate_limit,
            max_filesize: request.max_filesize,
            min_filesize: request.min_filesize,
        },
        proxy: request.proxy.clone(),
        prefer_free_formats: raw.prefer_free_formats,
        live,
        side_files: SideFiles {
            description: raw.write_description,
            info_json: raw.write_info_json,
            thumbnail: raw.write_thumbnail,
            fetch_thumbnail: raw.write_thumbnail || raw.embed_thumbnail,
            subtitles: raw.subtitles,
            subtitle_langs,
        },
        credentials: request.credentials.clone(),
    };

    debug!(
        expression = %descriptor.format.expression,
        post_processors = descriptor.post_processors.len(),
        retries = descriptor.retries,
        "job descriptor built"
    );
    descriptor
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::format::{FormatPreferences, resolve};
    use crate::request::{AudioFormat, DownloadRequest, VideoQuality};

    fn build_from(request: DownloadRequest) -> JobDescriptor {
        let validated = request.validate().unwrap();
        let plan = resolve(&FormatPreferences::from_request(validated.request()));
        build(&validated, plan, &JobDefaults::default())
    }

    #[test]
    fn test_defaults_for_720p_request() {
        let job = build_from(DownloadRequest::new("https://www.youtube.com/watch?v=abc"));
        assert_eq!(job.retries, 3);
        assert_eq!(job.fragment_retries, 10);
        assert_eq!(job.socket_timeout, Duration::from_secs(30));
        assert_eq!(job.concurrent_fragments, 8);
        assert_eq!(job.format.height_ceiling, Some(720));
        assert_eq!(job.post_processors, vec![PostProcessor::Metadata]);
        assert_eq!(job.output_template.as_str(), DEFAULT_OUTPUT_TEMPLATE);
        assert_eq!(job.playlist, PlaylistSelection::All);
        assert!(job.needs_transcoder());
    }

    #[test]
    fn test_post_processor_order_is_fixed() {
        let job = build_from(DownloadRequest {
            quality: VideoQuality::Audio,
            audio_format: Some(AudioFormat::M4a),
            embed_thumbnail: true,
            subtitles: true,
            embed_subtitles: true,
            ..DownloadRequest::new("https://example.com/v")
        });
        let names: Vec<&str> = job.post_processors.iter().map(PostProcessor::name).collect();
        assert_eq!(
            names,
            ["extract_audio", "metadata", "embed_thumbnail", "embed_subtitles"]
        );
    }

    #[test]
    fn test_conversion_precedes_metadata_for_video() {
        let job = build_from(DownloadRequest {
            audio_format: Some(AudioFormat::Opus),
            add_metadata: false,
            ..DownloadRequest::new("https://example.com/v")
        });
        assert_eq!(
            job.post_processors,
            vec![PostProcessor::ConvertAudio {
                codec: AudioFormat::Opus
            }]
        );
    }

    #[test]
    fn test_subtitles_default_to_english() {
        let job = build_from(DownloadRequest {
            subtitles: true,
            ..DownloadRequest::new("https://example.com/v")
        });
        assert_eq!(job.side_files.subtitle_langs, vec!["en".to_string()]);
        assert!(!job.post_processors.iter().any(|p| p.name() == "embed_subtitles"));
    }

    #[test]
    fn test_wait_for_video_is_clamped() {
        let job = build_from(DownloadRequest {
            wait_for_video: Some(86_400),
            live_from_start: true,
            ..DownloadRequest::new("https://example.com/live")
        });
        assert_eq!(job.live.wait, Some(DEFAULT_MAX_LIVE_WAIT));
        assert!(job.live.from_start);
    }

    #[test]
    fn test_limits_carried_from_validation() {
        let job = build_from(DownloadRequest {
            max_filesize: Some("1K".into()),
            rate_limit: Some("500K".into()),
            ..DownloadRequest::new("https://example.com/v")
        });
        assert_eq!(job.limits.max_filesize, Some(1024));
        assert_eq!(job.limits.rate_limit, Some(500 * 1024));
        assert_eq!(job.limits.min_filesize, None);
    }

    #[test]
    fn test_job_ids_are_unique_hex() {
        let a = JobId::generate("https://example.com/v");
        let b = JobId::generate("https://example.com/v");
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 16);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_retry_policies_follow_descriptor() {
        let job = build_from(DownloadRequest::new("https://example.com/v"));
        assert_eq!(job.job_retry_policy().max_attempts(), 3);
        assert_eq!(job.fragment_retry_policy().max_attempts(), 10);
    }

    #[test]
    fn test_max_downloads_lives_only_in_playlist_selection() {
        let job = build_from(DownloadRequest {
            playlist_start: 3,
            max_downloads: Some(2),
            ..DownloadRequest::new("https://example.com/list")
        });
        assert_eq!(job.playlist.max_entries(), Some(2));
        assert_eq!(job.playlist.to_expression().as_deref(), Some("3:4"));

        let json = serde_json::to_value(&job).unwrap();
        assert!(json.get("max_downloads").is_none());
        assert!(json.get("credentials").is_none());
    }

    #[test]
    fn test_credentials_reach_descriptor_but_not_its_json() {
        let job = build_from(DownloadRequest {
            username: Some("alice".into()),
            password: Some(crate::request::Secret::new("hunter2")),
            ..DownloadRequest::new("https://example.com/members/1")
        });
        assert_eq!(job.credentials.username.as_deref(), Some("alice"));
        assert!(!serde_json::to_string(&job).unwrap().contains("hunter2"));
        assert!(!format!("{job:?}").contains("hunter2"));
    }
}
