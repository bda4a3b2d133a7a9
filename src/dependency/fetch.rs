//! Release downloads for bootstrapped binaries.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::download::{DownloadError, HttpClient, RateLimiter, SizeWindow};
use crate::user_agent::bootstrap_user_agent;

/// Timeout for connecting to and reading from the release host.
const FETCH_SOCKET_TIMEOUT: Duration = Duration::from_secs(60);

/// Downloads a release artifact to a local path.
#[async_trait]
pub trait BinaryFetcher: Send + Sync {
    /// Writes the body of `url` to `dest`, returning the byte count.
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, DownloadError>;
}

/// [`BinaryFetcher`] over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpBinaryFetcher {
    client: HttpClient,
}

impl HttpBinaryFetcher {
    /// Creates a fetcher identifying itself with the bootstrap User-Agent.
    ///
    /// # Errors
    ///
    /// Returns the client construction error.
    pub fn new() -> Result<Self, DownloadError> {
        Ok(Self {
            client: HttpClient::new(FETCH_SOCKET_TIMEOUT, None, &bootstrap_user_agent())?,
        })
    }
}

#[async_trait]
impl BinaryFetcher for HttpBinaryFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, DownloadError> {
        info!(url, dest = %dest.display(), "fetching binary release");
        self.client
            .download_to_path(
                url,
                &BTreeMap::new(),
                dest,
                SizeWindow::default(),
                &RateLimiter::disabled(),
                |_| {},
            )
            .await
    }
}
