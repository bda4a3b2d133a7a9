//! Segmented transfers: HLS playlist resolution and the fragment window.
//!
//! Fragments are fetched with a bounded window of concurrent requests and
//! written to the output strictly in playlist order, so the assembled file
//! is byte-identical regardless of how many fragments had to be retried.
//! Each fragment has its own retry budget; when a fragment spends it on
//! transient failures the whole stream fails with
//! [`DownloadError::RetriesExhausted`], which the job loop does not retry.

use std::collections::BTreeMap;
use std::path::Path;

use futures_util::{StreamExt, stream};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument, warn};
use url::Url;

use super::client::{HttpClient, SizeWindow};
use super::error::DownloadError;
use super::rate_limiter::{RateLimiter, parse_retry_after};
use super::retry::{FailureType, RetryDecision, RetryPolicy, classify_error};

/// A parsed HLS playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HlsPlaylist {
    /// Variant streams as `(bandwidth, url)`.
    Master(Vec<(u64, String)>),
    /// Absolute segment URLs, including the init segment first when present.
    Media(Vec<String>),
}

/// Parses an HLS playlist, resolving URIs against `base`.
///
/// # Errors
///
/// Returns [`DownloadError::UnsupportedStream`] for non-HLS documents,
/// encrypted segments and byte-range addressing.
pub fn parse_hls_playlist(text: &str, base: &Url) -> Result<HlsPlaylist, DownloadError> {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    if lines.next() != Some("#EXTM3U") {
        return Err(DownloadError::unsupported_stream(base.as_str(), "not an HLS playlist"));
    }

    let join = |uri: &str| -> Result<String, DownloadError> {
        base.join(uri)
            .map(String::from)
            .map_err(|_| DownloadError::invalid_url(uri))
    };

    let mut variants = Vec::new();
    let mut segments = Vec::new();
    let mut pending_bandwidth: Option<u64> = None;

    for line in lines {
        if let Some(attrs) = line.strip_prefix("#EXT-X-STREAM-INF:") {
            pending_bandwidth = Some(attribute(attrs, "BANDWIDTH").and_then(|b| b.parse().ok()).unwrap_or(0));
        } else if let Some(attrs) = line.strip_prefix("#EXT-X-KEY:") {
            let method = attribute(attrs, "METHOD").unwrap_or("NONE");
            if method != "NONE" {
                return Err(DownloadError::unsupported_stream(
                    base.as_str(),
                    format!("encrypted segments ({method})"),
                ));
            }
        } else if line.starts_with("#EXT-X-BYTERANGE") {
            return Err(DownloadError::unsupported_stream(base.as_str(), "byte-range segments"));
        } else if let Some(attrs) = line.strip_prefix("#EXT-X-MAP:") {
            if let Some(uri) = attribute(attrs, "URI") {
                segments.push(join(uri)?);
            }
        } else if line.starts_with('#') {
            continue;
        } else if let Some(bandwidth) = pending_bandwidth.take() {
            variants.push((bandwidth, join(line)?));
        } else {
            segments.push(join(line)?);
        }
    }

    if variants.is_empty() {
        Ok(HlsPlaylist::Media(segments))
    } else {
        Ok(HlsPlaylist::Master(variants))
    }
}

/// Reads `KEY=value` or `KEY="value"` from an attribute list.
fn attribute<'a>(attrs: &'a str, key: &str) -> Option<&'a str> {
    let mut rest = attrs;
    while !rest.is_empty() {
        let (name, after) = rest.split_once('=')?;
        let (value, next) = if let Some(quoted) = after.strip_prefix('"') {
            let end = quoted.find('"')?;
            (&quoted[..end], quoted[end + 1..].trim_start_matches(','))
        } else {
            match after.split_once(',') {
                Some((value, next)) => (value, next),
                None => (after, ""),
            }
        };
        if name.trim() == key {
            return Some(value);
        }
        rest = next;
    }
    None
}

/// Fetches an HLS playlist and returns its segment URLs.
///
/// A master playlist is followed once, to its highest-bandwidth variant.
///
/// # Errors
///
/// Returns transfer errors from fetching the playlist, or
/// [`DownloadError::UnsupportedStream`] for playlists the engine cannot assemble.
#[instrument(level = "debug", skip(client, headers))]
pub async fn resolve_hls_segments(
    client: &HttpClient,
    url: &str,
    headers: &BTreeMap<String, String>,
) -> Result<Vec<String>, DownloadError> {
    let mut current = url.to_string();
    for _ in 0..2 {
        let base = Url::parse(&current).map_err(|_| DownloadError::invalid_url(&current))?;
        let text = client.fetch_text(&current, headers).await?;
        match parse_hls_playlist(&text, &base)? {
            HlsPlaylist::Media(segments) if segments.is_empty() => {
                return Err(DownloadError::unsupported_stream(&current, "playlist has no segments"));
            }
            HlsPlaylist::Media(segments) => {
                debug!(segments = segments.len(), "resolved HLS media playlist");
                return Ok(segments);
            }
            HlsPlaylist::Master(variants) => {
                let Some((bandwidth, best)) = variants.into_iter().max_by_key(|(bw, _)| *bw) else {
                    return Err(DownloadError::unsupported_stream(&current, "no variants"));
                };
                debug!(bandwidth, variant = %best, "following HLS variant");
                current = best;
            }
        }
    }
    Err(DownloadError::unsupported_stream(url, "nested master playlists"))
}

/// Shared inputs of one fragmented transfer.
#[derive(Debug, Clone, Copy)]
pub struct FragmentTransfer<'a> {
    /// Client of the job.
    pub client: &'a HttpClient,
    /// Headers the host expects.
    pub headers: &'a BTreeMap<String, String>,
    /// Per-fragment retry policy.
    pub policy: &'a RetryPolicy,
    /// Job-wide bandwidth limiter.
    pub limiter: &'a RateLimiter,
    /// Fragment window.
    pub concurrency: usize,
    /// Size bounds of the assembled file.
    pub window: SizeWindow,
}

impl FragmentTransfer<'_> {
    /// Fetches `fragments` and appends them in order to `path`.
    ///
    /// `on_fragment(done, total, bytes)` is called after each fragment is
    /// written. Returning early (error or cancellation of the caller's
    /// future) drops the in-flight requests. The partial file is removed on
    /// error.
    ///
    /// # Errors
    ///
    /// Returns the first fragment failure (wrapped as
    /// [`DownloadError::RetriesExhausted`] when its transient budget ran
    /// out), a size-limit violation, or an I/O error.
    #[instrument(level = "debug", skip(self, fragments, on_fragment), fields(fragments = fragments.len(), path = %path.display()))]
    pub async fn download<F>(
        &self,
        stream_url: &str,
        fragments: &[String],
        path: &Path,
        mut on_fragment: F,
    ) -> Result<u64, DownloadError>
    where
        F: FnMut(usize, usize, u64) + Send,
    {
        let total = fragments.len();
        let file = tokio::fs::File::create(path)
            .await
            .map_err(|e| DownloadError::io(path, e))?;
        let mut writer = BufWriter::new(file);

        let result = async {
            let mut window = stream::iter(fragments.iter().map(|url| self.fetch_fragment(url)))
                .buffered(self.concurrency.max(1))
                .boxed();
            let mut written: u64 = 0;
            let mut done = 0;

            while let Some(fragment) = window.next().await {
                let bytes = fragment?;
                written += bytes.len() as u64;
                self.window.check_progress(stream_url, written)?;
                writer
                    .write_all(&bytes)
                    .await
                    .map_err(|e| DownloadError::io(path, e))?;
                done += 1;
                on_fragment(done, total, written);
            }
            writer.flush().await.map_err(|e| DownloadError::io(path, e))?;
            self.window.check_final(stream_url, written)?;
            Ok(written)
        }
        .await;

        if result.is_err() {
            debug!(path = %path.display(), "cleaning up partial fragment file after error");
            let _ = tokio::fs::remove_file(path).await;
        }
        result
    }

    async fn fetch_fragment(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        let mut attempt = 1;
        loop {
            let error = match self.client.fetch_bytes(url, self.headers, self.limiter).await {
                Ok(bytes) => return Ok(bytes),
                Err(error) => error,
            };

            let failure = classify_error(&error);
            match self.policy.should_retry(failure, attempt) {
                RetryDecision::Retry { delay, attempt: next } => {
                    let delay = server_delay(&error).unwrap_or(delay);
                    warn!(
                        fragment = url,
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "fragment failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = next;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(fragment = url, attempt, reason, "fragment not retried");
                    return Err(
                        if matches!(failure, FailureType::Transient | FailureType::RateLimited) {
                            DownloadError::retries_exhausted(url, attempt, error)
                        } else {
                            error
                        },
                    );
                }
            }
        }
    }
}

/// Server-mandated delay of a 429 response.
pub(crate) fn server_delay(error: &DownloadError) -> Option<std::time::Duration> {
    match error {
        DownloadError::HttpStatus {
            status: 429,
            retry_after: Some(value),
            ..
        } => parse_retry_after(value),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::test_support::socket_guard::start_mock_server_or_skip;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, Request, Respond, ResponseTemplate};

    fn base() -> Url {
        Url::parse("https://cdn.example.com/hls/index.m3u8").unwrap()
    }

    #[test]
    fn test_parse_media_playlist_with_init_segment() {
        let text = "#EXTM3U\n#EXT-X-VERSION:7\n#EXT-X-MAP:URI=\"init.mp4\"\n#EXTINF:4.0,\nseg0.m4s\n#EXTINF:4.0,\nhttps://other.example.com/seg1.m4s\n#EXT-X-ENDLIST\n";
        let playlist = parse_hls_playlist(text, &base()).unwrap();
        assert_eq!(
            playlist,
            HlsPlaylist::Media(vec![
                "https://cdn.example.com/hls/init.mp4".to_string(),
                "https://cdn.example.com/hls/seg0.m4s".to_string(),
                "https://other.example.com/seg1.m4s".to_string(),
            ])
        );
    }

    #[test]
    fn test_parse_master_playlist() {
        let text = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360,CODECS=\"avc1.4d401e,mp4a.40.2\"\nlow/index.m3u8\n#EXT-X-STREAM-INF:BANDWIDTH=2500000,RESOLUTION=1280x720\nhigh/index.m3u8\n";
        let playlist = parse_hls_playlist(text, &base()).unwrap();
        assert_eq!(
            playlist,
            HlsPlaylist::Master(vec![
                (800_000, "https://cdn.example.com/hls/low/index.m3u8".to_string()),
                (2_500_000, "https://cdn.example.com/hls/high/index.m3u8".to_string()),
            ])
        );
    }

    #[test]
    fn test_encrypted_and_non_hls_rejected() {
        let encrypted = "#EXTM3U\n#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\"\nseg0.ts\n";
        assert!(matches!(
            parse_hls_playlist(encrypted, &base()),
            Err(DownloadError::UnsupportedStream { .. })
        ));
        let clear = "#EXTM3U\n#EXT-X-KEY:METHOD=NONE\nseg0.ts\n";
        assert!(parse_hls_playlist(clear, &base()).is_ok());
        assert!(parse_hls_playlist("<html></html>", &base()).is_err());
    }

    #[test]
    fn test_attribute_parsing() {
        let attrs = "BANDWIDTH=1,CODECS=\"a,b\",URI=\"x.m3u8\"";
        assert_eq!(attribute(attrs, "CODECS"), Some("a,b"));
        assert_eq!(attribute(attrs, "URI"), Some("x.m3u8"));
        assert_eq!(attribute(attrs, "BANDWIDTH"), Some("1"));
        assert_eq!(attribute(attrs, "RESOLUTION"), None);
    }

    #[test]
    fn test_server_delay_only_for_429() {
        let busy = DownloadError::http_status_with_retry_after("u", 429, Some("3".to_string()));
        assert_eq!(server_delay(&busy), Some(Duration::from_secs(3)));
        let unavailable = DownloadError::http_status_with_retry_after("u", 503, Some("3".to_string()));
        assert_eq!(server_delay(&unavailable), None);
    }

    /// Fails the first `fail` requests with 503, then serves `body`.
    struct Flaky {
        hits: Arc<AtomicUsize>,
        fail: usize,
        body: Vec<u8>,
    }

    impl Respond for Flaky {
        fn respond(&self, _request: &Request) -> ResponseTemplate {
            if self.hits.fetch_add(1, Ordering::SeqCst) < self.fail {
                ResponseTemplate::new(503)
            } else {
                ResponseTemplate::new(200).set_body_bytes(self.body.clone())
            }
        }
    }

    async fn run_transfer(fail: usize, attempts: u32) -> Option<(Result<u64, DownloadError>, TempDir)> {
        let server = start_mock_server_or_skip().await?;
        let temp_dir = TempDir::new().unwrap();
        for index in 0..4u8 {
            let responder = Flaky {
                hits: Arc::new(AtomicUsize::new(0)),
                fail: if index == 2 { fail } else { 0 },
                body: vec![index; 100],
            };
            Mock::given(method("GET"))
                .and(path(format!("/seg{index}.ts")))
                .respond_with(responder)
                .mount(&server)
                .await;
        }

        let fragments: Vec<String> = (0..4).map(|i| format!("{}/seg{i}.ts", server.uri())).collect();
        let client = HttpClient::new(Duration::from_secs(5), None, "unidl-test").unwrap();
        let policy = RetryPolicy::new(attempts, Duration::from_millis(1), Duration::from_millis(5), 2.0)
            .with_max_jitter(Duration::ZERO);
        let limiter = RateLimiter::disabled();
        let headers = BTreeMap::new();
        let transfer = FragmentTransfer {
            client: &client,
            headers: &headers,
            policy: &policy,
            limiter: &limiter,
            concurrency: 3,
            window: SizeWindow::default(),
        };
        let target = temp_dir.path().join("out.ts");
        let result = transfer.download("stream", &fragments, &target, |_, _, _| {}).await;
        Some((result, temp_dir))
    }

    #[tokio::test]
    async fn test_fragments_assembled_in_order_after_retries() {
        let Some((result, temp_dir)) = run_transfer(2, 3).await else {
            return;
        };
        assert_eq!(result.unwrap(), 400);
        let bytes = std::fs::read(temp_dir.path().join("out.ts")).unwrap();
        let expected: Vec<u8> = (0..4u8).flat_map(|i| vec![i; 100]).collect();
        assert_eq!(bytes, expected);
    }

    #[tokio::test]
    async fn test_fragment_budget_exhaustion_fails_stream() {
        let Some((result, temp_dir)) = run_transfer(3, 3).await else {
            return;
        };
        match result {
            Err(DownloadError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert!(!temp_dir.path().join("out.ts").exists());
    }
}
