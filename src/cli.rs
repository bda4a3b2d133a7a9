//! CLI argument definitions using clap derive macros.

use std::convert::Infallible;
use std::path::PathBuf;

use clap::Parser;

use unidl_core::{AudioFormat, DownloadRequest, Secret, VideoCodec, VideoQuality};

/// Download media from a page URL.
///
/// unidl resolves the requested quality to a format selection, bootstraps
/// `yt-dlp` and `ffmpeg` on first use, transfers and post-processes the
/// media, and copies the results into the output directory.
#[derive(Parser, Debug)]
#[command(name = "unidl")]
#[command(author, version, about)]
#[allow(clippy::struct_excessive_bools)]
pub struct Args {
    /// Page or media URL to download
    #[arg(required_unless_present = "check_deps")]
    pub url: Option<String>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Bootstrap the external binaries, print their versions and exit
    #[arg(long)]
    pub check_deps: bool,

    /// Directory the finished files are copied into
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Quality preset: 1080p, 720p, 480p, audio or best
    #[arg(short = 'Q', long, default_value = "720p")]
    pub quality: VideoQuality,

    /// Raw format-selection expression, overrides --quality
    #[arg(short, long)]
    pub format: Option<String>,

    /// Extract the audio track
    #[arg(short = 'x', long)]
    pub extract_audio: bool,

    /// Audio container: mp3, m4a, opus, vorbis, wav or best
    #[arg(long)]
    pub audio_format: Option<AudioFormat>,

    /// Audio bitrate in kbit/s or VBR level 0-10
    #[arg(long)]
    pub audio_quality: Option<String>,

    /// Preferred video codec: h264, h265, vp9, av1 or best
    #[arg(long)]
    pub video_codec: Option<VideoCodec>,

    /// Keep the video after audio extraction
    #[arg(short = 'k', long)]
    pub keep_video: bool,

    /// Write subtitle files
    #[arg(long)]
    pub subtitles: bool,

    /// Subtitle languages (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub sub_langs: Vec<String>,

    /// Embed subtitles into the media container
    #[arg(long)]
    pub embed_subtitles: bool,

    /// Embed the thumbnail as cover art
    #[arg(long)]
    pub embed_thumbnail: bool,

    /// Do not write title/uploader/description tags
    #[arg(long)]
    pub no_metadata: bool,

    /// Write a .description file
    #[arg(long)]
    pub write_description: bool,

    /// Write a .info.json file
    #[arg(long)]
    pub write_info_json: bool,

    /// Write the thumbnail image
    #[arg(long)]
    pub write_thumbnail: bool,

    /// Output file name template, e.g. "%(title)s.%(ext)s"
    #[arg(long)]
    pub output_template: Option<String>,

    /// First playlist entry (1-based)
    #[arg(long, default_value_t = 1)]
    pub playlist_start: u32,

    /// Last playlist entry, inclusive
    #[arg(long)]
    pub playlist_end: Option<u32>,

    /// Playlist entries to download, e.g. "1,3,5-7"
    #[arg(long)]
    pub playlist_items: Option<String>,

    /// Stop after this many entries
    #[arg(long)]
    pub max_downloads: Option<u32>,

    /// Bandwidth cap per second, e.g. 2M
    #[arg(short = 'r', long)]
    pub limit_rate: Option<String>,

    /// Reject media larger than this, e.g. 500M
    #[arg(long)]
    pub max_filesize: Option<String>,

    /// Reject media smaller than this, e.g. 10K
    #[arg(long)]
    pub min_filesize: Option<String>,

    /// Proxy URL for extraction and transfers
    #[arg(long)]
    pub proxy: Option<String>,

    /// Account name for sites that require a login
    #[arg(short = 'u', long)]
    pub username: Option<String>,

    /// Account password
    #[arg(short = 'p', long, env = "UNIDL_PASSWORD", hide_env_values = true, value_parser = parse_secret)]
    pub password: Option<Secret>,

    /// Load cookies from a browser profile, e.g. firefox or chrome:Profile 1
    #[arg(long)]
    pub cookies_from_browser: Option<String>,

    /// Do not prefer free formats at equal quality
    #[arg(long)]
    pub no_prefer_free_formats: bool,

    /// Download livestreams from their start
    #[arg(long)]
    pub live_from_start: bool,

    /// Seconds to wait for a scheduled stream to start
    #[arg(long)]
    pub wait_for_video: Option<u64>,

    /// Job-level retry attempts (1-10), overrides UNIDL_RETRY_ATTEMPTS
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=10))]
    pub retries: Option<u32>,

    /// Skip the connectivity probe
    #[arg(long)]
    pub no_check_internet: bool,
}

impl Args {
    /// Builds the download request for the positional URL.
    #[must_use]
    pub fn to_request(&self) -> DownloadRequest {
        DownloadRequest {
            url: self.url.clone().unwrap_or_default(),
            quality: self.quality,
            format: self.format.clone(),
            extract_audio: self.extract_audio,
            audio_format: self.audio_format,
            audio_quality: self.audio_quality.clone(),
            video_codec: self.video_codec,
            subtitles: self.subtitles,
            subtitle_langs: self.sub_langs.clone(),
            embed_subtitles: self.embed_subtitles,
            embed_thumbnail: self.embed_thumbnail,
            add_metadata: !self.no_metadata,
            keep_video: self.keep_video,
            write_description: self.write_description,
            write_info_json: self.write_info_json,
            write_thumbnail: self.write_thumbnail,
            output_template: self.output_template.clone(),
            playlist_start: self.playlist_start,
            playlist_end: self.playlist_end,
            playlist_items: self.playlist_items.clone(),
            max_downloads: self.max_downloads,
            rate_limit: self.limit_rate.clone(),
            max_filesize: self.max_filesize.clone(),
            min_filesize: self.min_filesize.clone(),
            proxy: self.proxy.clone(),
            prefer_free_formats: !self.no_prefer_free_formats,
            live_from_start: self.live_from_start,
            wait_for_video: self.wait_for_video,
            username: self.username.clone(),
            password: self.password.clone(),
            cookies_from_browser: self.cookies_from_browser.clone(),
        }
    }
}

fn parse_secret(value: &str) -> Result<Secret, Infallible> {
    Ok(Secret::new(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_url_parses_with_defaults() {
        let args = Args::try_parse_from(["unidl", "https://example.com/watch?v=1"]).unwrap();
        assert_eq!(args.url.as_deref(), Some("https://example.com/watch?v=1"));
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert_eq!(args.quality, VideoQuality::P720);
        assert_eq!(args.output_dir, PathBuf::from("."));
    }

    #[test]
    fn test_cli_url_required_without_check_deps() {
        let err = Args::try_parse_from(["unidl"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);

        let args = Args::try_parse_from(["unidl", "--check-deps"]).unwrap();
        assert!(args.check_deps);
        assert!(args.url.is_none());
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["unidl", "-vv", "https://a.example"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["unidl", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_unknown_quality_rejected() {
        let err = Args::try_parse_from(["unidl", "-Q", "4k", "https://a.example"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_retries_over_max_rejected() {
        let err =
            Args::try_parse_from(["unidl", "--retries", "11", "https://a.example"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_audio_flags_map_to_request() {
        let args = Args::try_parse_from([
            "unidl",
            "-x",
            "--audio-format",
            "mp3",
            "--audio-quality",
            "192",
            "--sub-langs",
            "en,de",
            "--no-metadata",
            "https://a.example/v",
        ])
        .unwrap();
        let request = args.to_request();
        assert!(request.extract_audio);
        assert_eq!(request.audio_format, Some(AudioFormat::Mp3));
        assert_eq!(request.audio_quality.as_deref(), Some("192"));
        assert_eq!(request.subtitle_langs, vec!["en".to_string(), "de".to_string()]);
        assert!(!request.add_metadata);
        assert!(request.prefer_free_formats);
    }

    #[test]
    fn test_cli_credentials_map_to_request_and_stay_hidden() {
        let args = Args::try_parse_from([
            "unidl",
            "-u",
            "alice",
            "-p",
            "hunter2",
            "--cookies-from-browser",
            "firefox",
            "https://a.example/v",
        ])
        .unwrap();
        assert!(!format!("{args:?}").contains("hunter2"));

        let request = args.to_request();
        assert_eq!(request.username.as_deref(), Some("alice"));
        assert_eq!(request.password.as_ref().map(Secret::expose), Some("hunter2"));
        assert_eq!(request.cookies_from_browser.as_deref(), Some("firefox"));
    }
}
