//! HTTP client wrapper for media transfers.
//!
//! This module provides the `HttpClient` struct which streams single-request
//! media to disk, fetches fragments into memory, and maps HTTP failures into
//! [`DownloadError`] variants the retry layer can classify.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{CONTENT_LENGTH, RETRY_AFTER};
use reqwest::{Client, Proxy};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument};
use url::Url;

use super::error::{DownloadError, SizeBound};
use super::rate_limiter::RateLimiter;

/// File-size window enforced while a media file is being written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizeWindow {
    /// Largest accepted size in bytes.
    pub max: Option<u64>,
    /// Smallest accepted size in bytes.
    pub min: Option<u64>,
}

impl SizeWindow {
    /// Creates a window from optional bounds.
    #[must_use]
    pub fn new(max: Option<u64>, min: Option<u64>) -> Self {
        Self { max, min }
    }

    /// Rejects a declared size outside the window before any byte is fetched.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::SizeLimit`] naming the violated bound.
    pub fn check_declared(&self, url: &str, declared: u64) -> Result<(), DownloadError> {
        self.check_progress(url, declared)?;
        self.check_final(url, declared)
    }

    /// Rejects a running byte count above the maximum.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::SizeLimit`] for [`SizeBound::Max`].
    pub fn check_progress(&self, url: &str, received: u64) -> Result<(), DownloadError> {
        match self.max {
            Some(max) if received > max => {
                Err(DownloadError::size_limit(url, SizeBound::Max, max, received))
            }
            _ => Ok(()),
        }
    }

    /// Rejects a completed file below the minimum.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::SizeLimit`] for [`SizeBound::Min`].
    pub fn check_final(&self, url: &str, total: u64) -> Result<(), DownloadError> {
        match self.min {
            Some(min) if total < min => {
                Err(DownloadError::size_limit(url, SizeBound::Min, min, total))
            }
            _ => Ok(()),
        }
    }
}

/// HTTP client for media hosts.
///
/// Created once per job (the proxy and timeouts are per job) and shared by
/// every fragment worker of that job, taking advantage of connection pooling.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Builds a client with the job's socket timeout, proxy and User-Agent.
    ///
    /// The socket timeout bounds connection setup and every idle read; a
    /// slow but steady transfer is never cut off.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidUrl`] when the proxy is rejected, or
    /// [`DownloadError::Network`] when the TLS backend cannot be initialised.
    #[instrument(level = "debug", skip(proxy), fields(proxy = proxy.is_some()))]
    pub fn new(
        socket_timeout: Duration,
        proxy: Option<&Url>,
        user_agent: &str,
    ) -> Result<Self, DownloadError> {
        let mut builder = Client::builder()
            .connect_timeout(socket_timeout)
            .read_timeout(socket_timeout)
            .gzip(true)
            .user_agent(user_agent);
        if let Some(proxy) = proxy {
            let resolved =
                Proxy::all(proxy.as_str()).map_err(|_| DownloadError::invalid_url(proxy.as_str()))?;
            builder = builder.proxy(resolved);
        }
        let client = builder
            .build()
            .map_err(|e| DownloadError::network("client", e))?;
        Ok(Self { client })
    }

    /// Fetches a whole body into memory (fragments, thumbnails, subtitles).
    ///
    /// Verifies the received byte count against `Content-Length` when the
    /// server declares one, so a truncated fragment is retried instead of
    /// silently corrupting the assembled file.
    ///
    /// # Errors
    ///
    /// Returns the mapped status, network, timeout or integrity error.
    #[instrument(level = "trace", skip(self, headers, limiter))]
    pub async fn fetch_bytes(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        limiter: &RateLimiter,
    ) -> Result<Vec<u8>, DownloadError> {
        let response = self.send_request(url, headers).await?;
        let expected = declared_length(&response);
        let mut stream = response.bytes_stream();
        let mut body = Vec::with_capacity(
            expected
                .and_then(|len| usize::try_from(len).ok())
                .unwrap_or(0)
                .min(64 * 1024 * 1024),
        );

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| map_reqwest_error(url, e))?;
            limiter.acquire(chunk.len() as u64).await;
            body.extend_from_slice(&chunk);
        }

        if let Some(expected) = expected
            && expected != body.len() as u64
        {
            return Err(DownloadError::integrity(url, expected, body.len() as u64));
        }
        Ok(body)
    }

    /// Fetches a small text document (HLS playlists).
    ///
    /// # Errors
    ///
    /// Returns the mapped status, network or timeout error.
    pub async fn fetch_text(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
    ) -> Result<String, DownloadError> {
        let response = self.send_request(url, headers).await?;
        response.text().await.map_err(|e| map_reqwest_error(url, e))
    }

    /// Streams a single-request media file to `path`.
    ///
    /// A declared `Content-Length` above the maximum fails before the body
    /// is read; otherwise the running byte count is checked as chunks
    /// arrive and the minimum is checked at the end. `on_chunk` receives the
    /// running total. The partial file is removed on any error.
    ///
    /// # Errors
    ///
    /// Returns the mapped transfer error, a size-limit violation, or an I/O
    /// error while writing.
    #[instrument(level = "debug", skip(self, headers, limiter, on_chunk), fields(path = %path.display()))]
    pub async fn download_to_path<F>(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        path: &Path,
        window: SizeWindow,
        limiter: &RateLimiter,
        on_chunk: F,
    ) -> Result<u64, DownloadError>
    where
        F: FnMut(u64) + Send,
    {
        let response = self.send_request(url, headers).await?;
        let declared = declared_length(&response);
        if let Some(declared) = declared {
            window.check_progress(url, declared)?;
        }

        let mut file = File::create(path)
            .await
            .map_err(|e| DownloadError::io(path, e))?;
        let result = stream_to_file(&mut file, response, url, path, window, limiter, on_chunk).await;
        drop(file);

        let outcome = result.and_then(|written| {
            if let Some(declared) = declared
                && declared != written
            {
                return Err(DownloadError::integrity(url, declared, written));
            }
            window.check_final(url, written)?;
            Ok(written)
        });

        if outcome.is_err() {
            debug!(path = %path.display(), "cleaning up partial file after error");
            let _ = tokio::fs::remove_file(path).await;
        }
        outcome
    }

    async fn send_request(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
    ) -> Result<reqwest::Response, DownloadError> {
        let parsed = Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(DownloadError::invalid_url(url));
        }

        let mut request = self.client.get(parsed.clone());
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_reqwest_error(url, e))?;

        if !response.status().is_success() {
            let status_code = response.status().as_u16();

            // Promote auth-related status codes to AuthRequired
            if matches!(status_code, 401 | 403 | 407) {
                let domain = parsed
                    .host_str()
                    .map_or_else(|| url.to_string(), str::to_string);
                return Err(DownloadError::auth_required(url, status_code, domain));
            }

            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            return Err(DownloadError::http_status_with_retry_after(
                url,
                status_code,
                retry_after,
            ));
        }

        Ok(response)
    }
}

fn map_reqwest_error(url: &str, error: reqwest::Error) -> DownloadError {
    if error.is_timeout() {
        DownloadError::timeout(url)
    } else {
        DownloadError::network(url, error)
    }
}

/// Declared body length. Ignored for compressed bodies, whose decoded size differs.
fn declared_length(response: &reqwest::Response) -> Option<u64> {
    if response
        .headers()
        .contains_key(reqwest::header::CONTENT_ENCODING)
    {
        return None;
    }
    response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Streams response body to file, returning bytes written.
///
/// This is extracted to enable cleanup on error in the caller.
async fn stream_to_file<F>(
    file: &mut File,
    response: reqwest::Response,
    url: &str,
    file_path: &Path,
    window: SizeWindow,
    limiter: &RateLimiter,
    mut on_chunk: F,
) -> Result<u64, DownloadError>
where
    F: FnMut(u64) + Send,
{
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| map_reqwest_error(url, e))?;

        bytes_written += chunk.len() as u64;
        window.check_progress(url, bytes_written)?;
        limiter.acquire(chunk.len() as u64).await;

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(file_path, e))?;
        on_chunk(bytes_written);
    }

    // Ensure all data is flushed to disk
    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(file_path, e))?;

    Ok(bytes_written)
}
