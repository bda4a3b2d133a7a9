//! [`MediaExtractor`] backed by a `yt-dlp` executable in metadata-only mode.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use super::{ExtractError, MediaExtractor, MediaInfo, classify_stderr};
use crate::job::JobDescriptor;
use crate::user_agent::media_user_agent;

/// Upper bound for one metadata extraction (playlists can be slow).
const EXTRACT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Runs `yt-dlp --dump-single-json` and parses its output.
#[derive(Debug, Clone)]
pub struct YtDlpExtractor {
    binary: PathBuf,
    timeout: Duration,
}

impl YtDlpExtractor {
    /// Creates an extractor for the given executable.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            timeout: EXTRACT_TIMEOUT,
        }
    }

    /// Overrides the per-invocation timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

const PASSWORD_FLAG: &str = "--password";

/// Copy of `args` safe to log: the password value is masked.
#[must_use]
pub fn redact_args(args: &[String]) -> Vec<&str> {
    let mut redacted = Vec::with_capacity(args.len());
    let mut mask_next = false;
    for arg in args {
        redacted.push(if mask_next { "***" } else { arg.as_str() });
        mask_next = arg == PASSWORD_FLAG;
    }
    redacted
}

/// Builds the extractor command line for a job.
#[must_use]
pub fn build_args(job: &JobDescriptor) -> Vec<String> {
    let mut args: Vec<String> = [
        "--dump-single-json",
        "--no-warnings",
        "--no-progress",
        "--format",
    ]
    .map(str::to_string)
    .to_vec();
    args.push(job.format.expression.clone());
    args.push("--socket-timeout".to_string());
    args.push(job.socket_timeout.as_secs().to_string());
    // The engine's attempt loop owns retries.
    args.push("--extractor-retries".to_string());
    args.push("0".to_string());
    args.push("--user-agent".to_string());
    args.push(media_user_agent().to_string());

    if let Some(container) = &job.format.merge_output_format {
        args.push("--merge-output-format".to_string());
        args.push(container.clone());
    }
    if job.prefer_free_formats {
        args.push("--prefer-free-formats".to_string());
    }
    if job.live.from_start {
        args.push("--live-from-start".to_string());
    }
    if let Some(proxy) = &job.proxy {
        args.push("--proxy".to_string());
        args.push(proxy.to_string());
    }
    if let Some(username) = &job.credentials.username {
        args.push("--username".to_string());
        args.push(username.clone());
    }
    if let Some(password) = &job.credentials.password {
        args.push(PASSWORD_FLAG.to_string());
        args.push(password.expose().to_string());
    }
    if let Some(browser) = &job.credentials.cookies_from_browser {
        args.push("--cookies-from-browser".to_string());
        args.push(browser.clone());
    }
    if let Some(items) = job.playlist.to_expression() {
        args.push("--playlist-items".to_string());
        args.push(items);
    }
    if !job.side_files.subtitle_langs.is_empty() {
        args.push("--write-subs".to_string());
        args.push("--sub-langs".to_string());
        args.push(job.side_files.subtitle_langs.join(","));
    }
    args.push("--".to_string());
    args.push(job.url.to_string());
    args
}

#[async_trait]
impl MediaExtractor for YtDlpExtractor {
    #[instrument(level = "debug", skip(self, job), fields(url = %job.url))]
    async fn extract(&self, job: &JobDescriptor) -> Result<MediaInfo, ExtractError> {
        let args = build_args(job);
        debug!(args = ?redact_args(&args), "running extractor");
        let mut command = Command::new(&self.binary);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| ExtractError::Transient {
                message: format!("extraction timed out after {}s", self.timeout.as_secs()),
            })?
            .map_err(|source| ExtractError::Spawn {
                binary: self.binary.display().to_string(),
                source,
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            let error = classify_stderr(&stderr, output.status.code());
            warn!(code = ?output.status.code(), error = %error, "extraction failed");
            return Err(error);
        }
        if !stderr.trim().is_empty() {
            debug!(stderr = %stderr.trim(), "extractor diagnostics");
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut info = MediaInfo::from_json_str(&stdout)?;
        if let Some(cap) = job.playlist.max_entries() {
            info.entries.truncate(cap);
        }
        debug!(entries = info.entries.len(), "extraction complete");
        Ok(info)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::format::{FormatPreferences, resolve};
    use crate::job::{JobDefaults, build};
    use crate::request::{DownloadRequest, Secret};

    fn job(request: DownloadRequest) -> JobDescriptor {
        let validated = request.validate().unwrap();
        let plan = resolve(&FormatPreferences::from_request(validated.request()));
        build(&validated, plan, &JobDefaults::default())
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_default_args() {
        let args = build_args(&job(DownloadRequest::new("https://example.com/watch?v=1")));
        assert_eq!(args[0], "--dump-single-json");
        assert_eq!(value_after(&args, "--socket-timeout"), Some("30"));
        assert_eq!(value_after(&args, "--merge-output-format"), Some("mp4"));
        assert!(args.contains(&"--prefer-free-formats".to_string()));
        assert!(!args.contains(&"--playlist-items".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("https://example.com/watch?v=1"));
        assert_eq!(args[args.len() - 2], "--");
    }

    #[test]
    fn test_optional_flags() {
        let args = build_args(&job(DownloadRequest {
            subtitles: true,
            subtitle_langs: vec!["en".into(), "de".into()],
            playlist_items: Some("1,3".into()),
            proxy: Some("http://proxy.local:8080".into()),
            live_from_start: true,
            ..DownloadRequest::new("https://example.com/list")
        }));
        assert_eq!(value_after(&args, "--sub-langs"), Some("en,de"));
        assert_eq!(value_after(&args, "--playlist-items"), Some("1,3"));
        assert_eq!(value_after(&args, "--proxy"), Some("http://proxy.local:8080/"));
        assert!(args.contains(&"--live-from-start".to_string()));
    }

    #[test]
    fn test_extractor_never_retries_on_its_own() {
        let args = build_args(&job(DownloadRequest::new("https://example.com/watch?v=1")));
        assert_eq!(value_after(&args, "--extractor-retries"), Some("0"));
    }

    #[test]
    fn test_credentials_are_passed_and_redacted() {
        let args = build_args(&job(DownloadRequest {
            username: Some("alice".into()),
            password: Some(Secret::new("hunter2")),
            cookies_from_browser: Some("firefox".into()),
            ..DownloadRequest::new("https://example.com/members/1")
        }));
        assert_eq!(value_after(&args, "--username"), Some("alice"));
        assert_eq!(value_after(&args, "--password"), Some("hunter2"));
        assert_eq!(value_after(&args, "--cookies-from-browser"), Some("firefox"));

        let logged = redact_args(&args);
        assert!(!logged.contains(&"hunter2"));
        let at = logged.iter().position(|a| *a == "--password").unwrap();
        assert_eq!(logged[at + 1], "***");
        assert!(logged.contains(&"alice"));
    }

    #[test]
    fn test_no_credentials_no_auth_flags() {
        let args = build_args(&job(DownloadRequest::new("https://example.com/watch?v=1")));
        for flag in ["--username", "--password", "--cookies-from-browser"] {
            assert!(!args.contains(&flag.to_string()), "{flag} present");
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let extractor = YtDlpExtractor::new("/nonexistent/yt-dlp-binary");
        let err = extractor
            .extract(&job(DownloadRequest::new("https://example.com/v")))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Spawn { .. }));
    }
}
