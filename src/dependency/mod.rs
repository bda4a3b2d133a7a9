//! Bootstrapping of external binaries (`ffmpeg`, `yt-dlp`).
//!
//! A [`DependencyBootstrapper`] answers "is this binary usable, and where is
//! it". The first call probes `PATH`, then the local install directory, and
//! as a last resort fetches a pinned release build for the current platform.
//! The outcome is cached in a [`DependencyState`]; later calls only re-check
//! that the cached file still exists.
//!
//! Bootstrapping is single-flight: concurrent callers queue on one gate, and
//! callers that waited behind a bootstrap share its outcome instead of
//! starting their own fetch.

mod fetch;
mod probe;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::ErrorKind;

pub use fetch::{BinaryFetcher, HttpBinaryFetcher};
pub use probe::{BinaryProbe, CommandProbe, find_on_path};

/// Pinned `ffmpeg-static` release providing single-file builds.
const FFMPEG_RELEASE: &str = "https://github.com/eugeneware/ffmpeg-static/releases/download/b6.0";

/// Pinned `yt-dlp` release.
const YT_DLP_RELEASE: &str = "https://github.com/yt-dlp/yt-dlp/releases/download/2024.12.23";

/// Errors from bootstrapping a binary.
///
/// Cloneable so every caller waiting on a bootstrap receives the same error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BootstrapError {
    /// No release build exists for this OS and architecture.
    #[error("no {binary} build available for {os}/{arch}")]
    UnsupportedPlatform {
        /// Binary name.
        binary: String,
        /// Operating system.
        os: String,
        /// CPU architecture.
        arch: String,
    },

    /// The release download failed.
    #[error("failed to fetch {binary} from {url}: {reason}")]
    Fetch {
        /// Binary name.
        binary: String,
        /// Release URL.
        url: String,
        /// Underlying failure.
        reason: String,
    },

    /// The downloaded file does not match the pinned checksum.
    #[error("checksum mismatch for {binary}: expected {expected}, got {actual}")]
    Checksum {
        /// Binary name.
        binary: String,
        /// Configured SHA-256.
        expected: String,
        /// Computed SHA-256.
        actual: String,
    },

    /// The binary exists but does not run.
    #[error("{binary} at {path} is not usable: {reason}")]
    Verify {
        /// Binary name.
        binary: String,
        /// Probed path.
        path: PathBuf,
        /// Probe failure.
        reason: String,
    },

    /// The binary could not be written to the install directory.
    #[error("failed to install {binary} to {path}: {reason}")]
    Install {
        /// Binary name.
        binary: String,
        /// Install path.
        path: PathBuf,
        /// Underlying failure.
        reason: String,
    },
}

impl BootstrapError {
    /// Error classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedPlatform { .. } => ErrorKind::Configuration,
            _ => ErrorKind::DependencyUnavailable,
        }
    }
}

/// Which binary to bootstrap and where to get it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencySpec {
    name: &'static str,
    version_arg: &'static str,
    download_url: Option<String>,
    sha256: Option<String>,
}

impl DependencySpec {
    /// The `ffmpeg` transcoder, fetched from the pinned static build.
    #[must_use]
    pub fn ffmpeg() -> Self {
        Self {
            name: "ffmpeg",
            version_arg: "-version",
            download_url: ffmpeg_release_url(std::env::consts::OS, std::env::consts::ARCH),
            sha256: None,
        }
    }

    /// The `yt-dlp` extractor, fetched from the pinned standalone build.
    #[must_use]
    pub fn yt_dlp() -> Self {
        Self {
            name: "yt-dlp",
            version_arg: "--version",
            download_url: yt_dlp_release_url(std::env::consts::OS, std::env::consts::ARCH),
            sha256: None,
        }
    }

    /// Overrides the release URL.
    #[must_use]
    pub fn with_download_url(mut self, url: impl Into<String>) -> Self {
        self.download_url = Some(url.into());
        self
    }

    /// Pins the SHA-256 of the release file (hex, case-insensitive).
    #[must_use]
    pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = Some(sha256.into().to_ascii_lowercase());
        self
    }

    /// Binary name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// File name of the executable on this platform.
    #[must_use]
    pub fn executable_name(&self) -> String {
        if cfg!(windows) {
            format!("{}.exe", self.name)
        } else {
            self.name.to_string()
        }
    }

    /// Release URL for this platform, if any.
    #[must_use]
    pub fn download_url(&self) -> Option<&str> {
        self.download_url.as_deref()
    }
}

fn ffmpeg_release_url(os: &str, arch: &str) -> Option<String> {
    let platform = match os {
        "linux" => "linux",
        "macos" => "darwin",
        "windows" => "win32",
        _ => return None,
    };
    let arch = match arch {
        "x86_64" => "x64",
        "aarch64" => "arm64",
        "x86" if os == "windows" || os == "linux" => "ia32",
        _ => return None,
    };
    let suffix = if os == "windows" { ".exe" } else { "" };
    Some(format!("{FFMPEG_RELEASE}/ffmpeg-{platform}-{arch}{suffix}"))
}

fn yt_dlp_release_url(os: &str, arch: &str) -> Option<String> {
    let asset = match (os, arch) {
        ("linux", "x86_64") => "yt-dlp_linux",
        ("linux", "aarch64") => "yt-dlp_linux_aarch64",
        ("macos", "x86_64" | "aarch64") => "yt-dlp_macos",
        ("windows", "x86_64") => "yt-dlp.exe",
        ("windows", "x86") => "yt-dlp_x86.exe",
        _ => return None,
    };
    Some(format!("{YT_DLP_RELEASE}/{asset}"))
}

/// A verified, runnable binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ready {
    /// Absolute path of the executable.
    pub path: PathBuf,
    /// First line of its version output.
    pub version: String,
}

/// Cached bootstrap outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DependencyState {
    /// Not checked yet, or invalidated.
    #[default]
    Unknown,
    /// A bootstrap attempt is running.
    Bootstrapping,
    /// Usable.
    Ready(Ready),
    /// The last attempt failed.
    Unavailable(BootstrapError),
}

/// Single-flight bootstrapper for one external binary.
pub struct DependencyBootstrapper {
    spec: DependencySpec,
    bin_dir: PathBuf,
    search_path: bool,
    fetcher: Arc<dyn BinaryFetcher>,
    probe: Arc<dyn BinaryProbe>,
    state: RwLock<DependencyState>,
    gate: Mutex<()>,
    generation: AtomicU64,
}

impl std::fmt::Debug for DependencyBootstrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyBootstrapper")
            .field("spec", &self.spec)
            .field("bin_dir", &self.bin_dir)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl DependencyBootstrapper {
    /// Creates a bootstrapper installing into `bin_dir`.
    pub fn new(
        spec: DependencySpec,
        bin_dir: impl Into<PathBuf>,
        fetcher: Arc<dyn BinaryFetcher>,
        probe: Arc<dyn BinaryProbe>,
    ) -> Self {
        Self {
            spec,
            bin_dir: bin_dir.into(),
            search_path: true,
            fetcher,
            probe,
            state: RwLock::new(DependencyState::Unknown),
            gate: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// Skips the `PATH` lookup and only considers the install directory.
    #[must_use]
    pub fn without_path_lookup(mut self) -> Self {
        self.search_path = false;
        self
    }

    /// Binary managed by this bootstrapper.
    #[must_use]
    pub fn spec(&self) -> &DependencySpec {
        &self.spec
    }

    /// Where a fetched binary is installed.
    #[must_use]
    pub fn install_path(&self) -> PathBuf {
        self.bin_dir.join(self.spec.executable_name())
    }

    /// Current cached state.
    #[must_use]
    pub fn state(&self) -> DependencyState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_state(&self, state: DependencyState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Forgets the cached outcome; the next call bootstraps again.
    pub fn invalidate(&self) {
        debug!(binary = self.spec.name, "dependency state invalidated");
        self.set_state(DependencyState::Unknown);
    }

    /// Returns the usable binary, bootstrapping it on first need.
    ///
    /// # Errors
    ///
    /// Returns the [`BootstrapError`] of the attempt this call ran or waited on.
    #[instrument(skip(self), fields(binary = self.spec.name))]
    pub async fn ensure_ready(&self) -> Result<Ready, BootstrapError> {
        if let Some(ready) = self.cached_ready().await {
            return Ok(ready);
        }

        let observed = self.generation.load(Ordering::Acquire);
        let _gate = self.gate.lock().await;

        // Someone else finished an attempt while we queued: share it.
        if self.generation.load(Ordering::Acquire) != observed
            && let DependencyState::Unavailable(e) = self.state()
        {
            return Err(e);
        }
        if let Some(ready) = self.cached_ready().await {
            return Ok(ready);
        }

        self.set_state(DependencyState::Bootstrapping);
        let result = self.bootstrap().await;
        match &result {
            Ok(ready) => {
                info!(path = %ready.path.display(), version = %ready.version, "dependency ready");
                self.set_state(DependencyState::Ready(ready.clone()));
            }
            Err(e) => {
                warn!(error = %e, "dependency unavailable");
                self.set_state(DependencyState::Unavailable(e.clone()));
            }
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
        result
    }

    /// Cached `Ready` whose file still exists. A vanished file invalidates the cache.
    async fn cached_ready(&self) -> Option<Ready> {
        let DependencyState::Ready(ready) = self.state() else {
            return None;
        };
        if tokio::fs::try_exists(&ready.path).await.unwrap_or(false) {
            return Some(ready);
        }
        warn!(path = %ready.path.display(), "cached binary disappeared");
        self.invalidate();
        None
    }

    async fn bootstrap(&self) -> Result<Ready, BootstrapError> {
        if self.search_path
            && let Some(path) = find_on_path(&self.spec.executable_name())
        {
            match self.verify(&path).await {
                Ok(ready) => return Ok(ready),
                Err(e) => debug!(error = %e, "binary on PATH rejected"),
            }
        }

        let target = self.install_path();
        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            match self.verify(&target).await {
                Ok(ready) => return Ok(ready),
                Err(e) => warn!(error = %e, "installed binary rejected, fetching again"),
            }
        }

        self.install(&target).await?;
        self.verify(&target).await.inspect_err(|_| {
            let _ = std::fs::remove_file(&target);
        })
    }

    async fn verify(&self, path: &Path) -> Result<Ready, BootstrapError> {
        let version = self
            .probe
            .probe(path, self.spec.version_arg)
            .await
            .map_err(|reason| BootstrapError::Verify {
                binary: self.spec.name.to_string(),
                path: path.to_path_buf(),
                reason,
            })?;
        Ok(Ready {
            path: path.to_path_buf(),
            version,
        })
    }

    async fn install(&self, target: &Path) -> Result<(), BootstrapError> {
        let binary = self.spec.name.to_string();
        let url = self
            .spec
            .download_url()
            .ok_or_else(|| BootstrapError::UnsupportedPlatform {
                binary: binary.clone(),
                os: std::env::consts::OS.to_string(),
                arch: std::env::consts::ARCH.to_string(),
            })?;
        let install_error = |reason: String| BootstrapError::Install {
            binary: binary.clone(),
            path: target.to_path_buf(),
            reason,
        };

        tokio::fs::create_dir_all(&self.bin_dir)
            .await
            .map_err(|e| install_error(e.to_string()))?;
        let partial = self
            .bin_dir
            .join(format!("{}.part", self.spec.executable_name()));

        info!(url, "fetching dependency");
        if let Err(e) = self.fetcher.fetch(url, &partial).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(BootstrapError::Fetch {
                binary,
                url: url.to_string(),
                reason: e.to_string(),
            });
        }

        if let Some(expected) = &self.spec.sha256 {
            let actual = sha256_file(&partial)
                .await
                .map_err(|e| install_error(e.to_string()))?;
            if &actual != expected {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(BootstrapError::Checksum {
                    binary,
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        make_executable(&partial)
            .await
            .map_err(|e| install_error(e.to_string()))?;
        tokio::fs::rename(&partial, target)
            .await
            .map_err(|e| install_error(e.to_string()))?;
        Ok(())
    }
}

async fn sha256_file(path: &Path) -> std::io::Result<String> {
    let bytes = tokio::fs::read(path).await?;
    let digest = Sha256::digest(&bytes);
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
