//! Download request model and boundary validation.
//!
//! A [`DownloadRequest`] is what the caller sends (JSON body or CLI flags).
//! [`DownloadRequest::validate`] turns it into a [`ValidatedRequest`] with
//! parsed URL, sizes and proxy, so later stages are pure and total.

mod size;

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

pub use size::parse_size;

#[allow(clippy::expect_used)]
static PLAYLIST_ITEMS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\d+(?:\s*-\s*\d+)?(?:\s*,\s*\d+(?:\s*-\s*\d+)?)*\s*$")
        .expect("playlist items regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static AUDIO_QUALITY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*\d{1,4}\s*k?\s*$").expect("audio quality regex is valid") // Static pattern, safe to panic
});

/// Named quality preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VideoQuality {
    /// Up to 1080 lines.
    #[serde(rename = "1080p")]
    P1080,
    /// Up to 720 lines.
    #[default]
    #[serde(rename = "720p")]
    P720,
    /// Up to 480 lines.
    #[serde(rename = "480p")]
    P480,
    /// Audio only.
    #[serde(rename = "audio")]
    Audio,
    /// Best available, no ceiling.
    #[serde(rename = "best")]
    Best,
}

impl VideoQuality {
    /// Resolution ceiling in lines, `None` for `audio` and `best`.
    #[must_use]
    pub fn height_ceiling(self) -> Option<u32> {
        match self {
            Self::P1080 => Some(1080),
            Self::P720 => Some(720),
            Self::P480 => Some(480),
            Self::Audio | Self::Best => None,
        }
    }

    /// Wire name of the preset.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::P1080 => "1080p",
            Self::P720 => "720p",
            Self::P480 => "480p",
            Self::Audio => "audio",
            Self::Best => "best",
        }
    }
}

impl std::str::FromStr for VideoQuality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "1080p" => Ok(Self::P1080),
            "720p" => Ok(Self::P720),
            "480p" => Ok(Self::P480),
            "audio" => Ok(Self::Audio),
            "best" => Ok(Self::Best),
            other => Err(format!("unknown quality preset '{other}'")),
        }
    }
}

/// Target audio container for extraction or conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    /// MPEG layer 3.
    Mp3,
    /// AAC in an MP4 container.
    M4a,
    /// Opus.
    Opus,
    /// Vorbis in Ogg.
    Vorbis,
    /// PCM WAV.
    Wav,
    /// Keep the source codec.
    Best,
}

impl AudioFormat {
    /// Wire name of the format.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::M4a => "m4a",
            Self::Opus => "opus",
            Self::Vorbis => "vorbis",
            Self::Wav => "wav",
            Self::Best => "best",
        }
    }
}

impl std::str::FromStr for AudioFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mp3" => Ok(Self::Mp3),
            "m4a" => Ok(Self::M4a),
            "opus" => Ok(Self::Opus),
            "vorbis" => Ok(Self::Vorbis),
            "wav" => Ok(Self::Wav),
            "best" => Ok(Self::Best),
            other => Err(format!("unknown audio format '{other}'")),
        }
    }
}

/// Preferred video codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    /// H.264 / AVC.
    H264,
    /// H.265 / HEVC.
    H265,
    /// VP9.
    Vp9,
    /// AV1.
    Av1,
    /// No preference.
    Best,
}

impl std::str::FromStr for VideoCodec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "h264" => Ok(Self::H264),
            "h265" => Ok(Self::H265),
            "vp9" => Ok(Self::Vp9),
            "av1" => Ok(Self::Av1),
            "best" => Ok(Self::Best),
            other => Err(format!("unknown video codec '{other}'")),
        }
    }
}

/// Browsers `yt-dlp` can read cookies from.
const COOKIE_BROWSERS: &[&str] = &[
    "brave", "chrome", "chromium", "edge", "firefox", "opera", "safari", "vivaldi", "whale",
];

/// A string kept out of `Debug` output and serialized requests.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wraps a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The wrapped value, for handing to the extractor only.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Site authentication forwarded to the extractor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Account name.
    pub username: Option<String>,
    /// Account password.
    pub password: Option<Secret>,
    /// Browser (optionally `browser:profile`) to load cookies from.
    pub cookies_from_browser: Option<String>,
}

impl Credentials {
    /// Whether any authentication was supplied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.password.is_none() && self.cookies_from_browser.is_none()
    }
}

/// Caller-supplied download request. Immutable once accepted.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadRequest {
    /// Target page or media URL (http/https).
    pub url: String,
    /// Quality preset, ignored when `format` is set.
    pub quality: VideoQuality,
    /// Raw format-selection expression, passed through verbatim.
    pub format: Option<String>,
    /// Extract the audio track into `audio_format`.
    pub extract_audio: bool,
    /// Audio container for extraction, or conversion of a retained video's audio.
    pub audio_format: Option<AudioFormat>,
    /// Audio bitrate in kbit/s (`"192"`) or VBR quality `0`-`10`.
    pub audio_quality: Option<String>,
    /// Preferred video codec.
    pub video_codec: Option<VideoCodec>,
    /// Write subtitle side files.
    pub subtitles: bool,
    /// Subtitle languages, `["en"]` when empty.
    pub subtitle_langs: Vec<String>,
    /// Embed subtitles into the primary container.
    pub embed_subtitles: bool,
    /// Embed the thumbnail as cover art.
    pub embed_thumbnail: bool,
    /// Write title/uploader/description tags.
    pub add_metadata: bool,
    /// Keep the video after audio extraction.
    pub keep_video: bool,
    /// Write a `.description` side file.
    pub write_description: bool,
    /// Write a `.info.json` side file.
    pub write_info_json: bool,
    /// Write the thumbnail as a side file.
    pub write_thumbnail: bool,
    /// Output template such as `%(title)s.%(ext)s`.
    pub output_template: Option<String>,
    /// First playlist index (1-based).
    pub playlist_start: u32,
    /// Last playlist index, inclusive.
    pub playlist_end: Option<u32>,
    /// Explicit playlist items, e.g. `"1,3,5-7"`.
    pub playlist_items: Option<String>,
    /// Stop after this many entries.
    pub max_downloads: Option<u32>,
    /// Bandwidth cap, e.g. `"2M"` per second.
    pub rate_limit: Option<String>,
    /// Reject media larger than this.
    pub max_filesize: Option<String>,
    /// Reject media smaller than this.
    pub min_filesize: Option<String>,
    /// Proxy URL for extraction and transfers.
    pub proxy: Option<String>,
    /// Prefer free containers/codecs at equal quality.
    pub prefer_free_formats: bool,
    /// Download livestreams from their start.
    pub live_from_start: bool,
    /// Seconds to wait for a scheduled stream to start.
    pub wait_for_video: Option<u64>,
    /// Login name for sites that require an account.
    pub username: Option<String>,
    /// Password for `username`; never serialized back out.
    #[serde(skip_serializing)]
    pub password: Option<Secret>,
    /// Load cookies from a local browser profile, e.g. `firefox`.
    pub cookies_from_browser: Option<String>,
}

impl Default for DownloadRequest {
    fn default() -> Self {
        Self {
            url: String::new(),
            quality: VideoQuality::default(),
            format: None,
            extract_audio: false,
            audio_format: None,
            audio_quality: None,
            video_codec: None,
            subtitles: false,
            subtitle_langs: Vec::new(),
            embed_subtitles: false,
            embed_thumbnail: false,
            add_metadata: true,
            keep_video: false,
            write_description: false,
            write_info_json: false,
            write_thumbnail: false,
            output_template: None,
            playlist_start: 1,
            playlist_end: None,
            playlist_items: None,
            max_downloads: None,
            rate_limit: None,
            max_filesize: None,
            min_filesize: None,
            proxy: None,
            prefer_free_formats: true,
            live_from_start: false,
            wait_for_video: None,
            username: None,
            password: None,
            cookies_from_browser: None,
        }
    }
}

/// Boundary validation failures. All classify as configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The URL is missing.
    #[error("url is required")]
    EmptyUrl,

    /// The URL does not parse or lacks a host.
    #[error("invalid url '{url}': {reason}")]
    InvalidUrl {
        /// Offending value.
        url: String,
        /// Parser message.
        reason: String,
    },

    /// The URL scheme is not http/https.
    #[error("unsupported url scheme '{scheme}' (expected http or https)")]
    UnsupportedScheme {
        /// Offending scheme.
        scheme: String,
    },

    /// A size/rate string does not parse.
    #[error("invalid {field} '{value}' (expected e.g. 500K, 2M, 1G)")]
    InvalidSize {
        /// Request field name.
        field: &'static str,
        /// Offending value.
        value: String,
    },

    /// `min_filesize` exceeds `max_filesize`.
    #[error("min_filesize ({min} bytes) exceeds max_filesize ({max} bytes)")]
    SizeWindow {
        /// Parsed minimum.
        min: u64,
        /// Parsed maximum.
        max: u64,
    },

    /// Playlist bounds are out of order or zero.
    #[error("invalid playlist range: start {start}, end {end:?}")]
    PlaylistRange {
        /// Requested start.
        start: u32,
        /// Requested end.
        end: Option<u32>,
    },

    /// `playlist_items` is not a list of indices and ranges.
    #[error("invalid playlist_items '{value}' (expected e.g. 1,3,5-7)")]
    PlaylistItems {
        /// Offending value.
        value: String,
    },

    /// `max_downloads` is zero.
    #[error("max_downloads must be at least 1")]
    MaxDownloads,

    /// The output template would escape the working directory.
    #[error("invalid output_template '{template}': {reason}")]
    OutputTemplate {
        /// Offending template.
        template: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// `audio_quality` is neither a bitrate nor a VBR level.
    #[error("invalid audio_quality '{value}' (expected a bitrate like 192 or a VBR level 0-10)")]
    AudioQuality {
        /// Offending value.
        value: String,
    },

    /// The proxy URL does not parse.
    #[error("invalid proxy '{value}'")]
    Proxy {
        /// Offending value.
        value: String,
    },

    /// The raw format expression is blank.
    #[error("format must not be empty when given")]
    EmptyFormat,

    /// A password was given without a username.
    #[error("password requires a username")]
    PasswordWithoutUsername,

    /// `cookies_from_browser` names a browser the extractor cannot read.
    #[error("unsupported cookies_from_browser '{value}' (expected one of {browsers})", browsers = COOKIE_BROWSERS.join(", "))]
    CookiesBrowser {
        /// Offending value.
        value: String,
    },
}

/// A request that passed validation, with its string fields parsed.
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    request: DownloadRequest,
    /// Parsed target URL.
    pub url: Url,
    /// Bandwidth cap in bytes per second.
    pub rate_limit: Option<u64>,
    /// Maximum media size in bytes.
    pub max_filesize: Option<u64>,
    /// Minimum media size in bytes.
    pub min_filesize: Option<u64>,
    /// Parsed proxy URL.
    pub proxy: Option<Url>,
    /// Trimmed authentication settings.
    pub credentials: Credentials,
}

impl ValidatedRequest {
    /// The original request.
    #[must_use]
    pub fn request(&self) -> &DownloadRequest {
        &self.request
    }
}

impl DownloadRequest {
    /// Creates a request for `url` with every other field at its default.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Validates the request at the boundary.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] for a missing or non-http(s) URL,
    /// unparseable sizes, contradictory bounds, malformed playlist items,
    /// an escaping output template, a bad audio quality, a bad proxy, a
    /// password without a username or an unknown cookie browser.
    pub fn validate(self) -> Result<ValidatedRequest, ValidationError> {
        let url = parse_target_url(&self.url)?;

        if self.format.as_deref().is_some_and(|f| f.trim().is_empty()) {
            return Err(ValidationError::EmptyFormat);
        }

        let rate_limit = parse_size_field("rate_limit", self.rate_limit.as_deref())?;
        let max_filesize = parse_size_field("max_filesize", self.max_filesize.as_deref())?;
        let min_filesize = parse_size_field("min_filesize", self.min_filesize.as_deref())?;
        if let (Some(min), Some(max)) = (min_filesize, max_filesize)
            && min > max
        {
            return Err(ValidationError::SizeWindow { min, max });
        }

        if self.playlist_start == 0 || self.playlist_end.is_some_and(|end| end < self.playlist_start)
        {
            return Err(ValidationError::PlaylistRange {
                start: self.playlist_start,
                end: self.playlist_end,
            });
        }
        if let Some(items) = self.playlist_items.as_deref()
            && !is_valid_playlist_items(items)
        {
            return Err(ValidationError::PlaylistItems {
                value: items.to_string(),
            });
        }
        if self.max_downloads == Some(0) {
            return Err(ValidationError::MaxDownloads);
        }

        if let Some(template) = self.output_template.as_deref() {
            validate_output_template(template)?;
        }

        if let Some(quality) = self.audio_quality.as_deref()
            && !AUDIO_QUALITY_PATTERN.is_match(quality)
        {
            return Err(ValidationError::AudioQuality {
                value: quality.to_string(),
            });
        }

        let proxy = match self.proxy.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(value) => Some(Url::parse(value).map_err(|_| ValidationError::Proxy {
                value: value.to_string(),
            })?),
        };

        let credentials = parse_credentials(&self)?;

        debug!(url = %url, authenticated = !credentials.is_empty(), "request validated");
        Ok(ValidatedRequest {
            request: self,
            url,
            rate_limit,
            max_filesize,
            min_filesize,
            proxy,
            credentials,
        })
    }
}

fn parse_credentials(request: &DownloadRequest) -> Result<Credentials, ValidationError> {
    let non_blank = |value: Option<&str>| {
        value
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    let username = non_blank(request.username.as_deref());
    let password = request
        .password
        .as_ref()
        .filter(|p| !p.expose().is_empty())
        .cloned();
    if password.is_some() && username.is_none() {
        return Err(ValidationError::PasswordWithoutUsername);
    }

    let cookies_from_browser = non_blank(request.cookies_from_browser.as_deref());
    if let Some(value) = &cookies_from_browser {
        let browser = value
            .split(['+', ':'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        if !COOKIE_BROWSERS.contains(&browser.as_str()) {
            return Err(ValidationError::CookiesBrowser {
                value: value.clone(),
            });
        }
    }

    Ok(Credentials {
        username,
        password,
        cookies_from_browser,
    })
}

fn parse_target_url(raw: &str) -> Result<Url, ValidationError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ValidationError::EmptyUrl);
    }
    let url = Url::parse(raw).map_err(|e| ValidationError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ValidationError::UnsupportedScheme {
            scheme: url.scheme().to_string(),
        });
    }
    let has_host = match url.host() {
        Some(url::Host::Domain(domain)) => domain.contains('.') || domain == "localhost",
        Some(url::Host::Ipv4(_) | url::Host::Ipv6(_)) => true,
        None => false,
    };
    if !has_host {
        return Err(ValidationError::InvalidUrl {
            url: raw.to_string(),
            reason: "missing or incomplete host".to_string(),
        });
    }
    Ok(url)
}

fn parse_size_field(field: &'static str, value: Option<&str>) -> Result<Option<u64>, ValidationError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => parse_size(value)
            .map(Some)
            .ok_or_else(|| ValidationError::InvalidSize {
                field,
                value: value.to_string(),
            }),
    }
}

fn is_valid_playlist_items(items: &str) -> bool {
    if !PLAYLIST_ITEMS_PATTERN.is_match(items) {
        return false;
    }
    items.split(',').all(|part| {
        let mut bounds = part.split('-').map(|n| n.trim().parse::<u32>());
        match (bounds.next(), bounds.next()) {
            (Some(Ok(single)), None) => single >= 1,
            (Some(Ok(start)), Some(Ok(end))) => start >= 1 && start <= end,
            _ => false,
        }
    })
}

fn validate_output_template(template: &str) -> Result<(), ValidationError> {
    let reject = |reason| ValidationError::OutputTemplate {
        template: template.to_string(),
        reason,
    };
    if template.trim().is_empty() {
        return Err(reject("template is empty"));
    }
    if template.starts_with('/') || template.starts_with('\\') || template.chars().nth(1) == Some(':') {
        return Err(reject("absolute paths are not allowed"));
    }
    if template.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(reject("parent directory segments are not allowed"));
    }
    Ok(())
}
