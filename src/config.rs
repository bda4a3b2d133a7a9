//! Engine configuration from `UNIDL_*` environment variables.
//!
//! [`EngineConfig::from_env`] reads every variable, falling back to the
//! defaults below, and validates ranges. The CLI overrides individual
//! values after loading.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::download::{
    DEFAULT_CONCURRENT_FRAGMENTS, DEFAULT_FRAGMENT_RETRIES, DEFAULT_LIVE_POLL_INTERVAL,
    DEFAULT_MAX_RETRIES, MAX_CONCURRENT_FRAGMENTS, SOCKET_TIMEOUT_SECS,
};
use crate::job::{Backoff, DEFAULT_MAX_LIVE_WAIT, JobDefaults};

/// Default root for per-job working directories.
pub const DEFAULT_WORK_DIR: &str = "./cache/unidl";

/// Default process-wide cap on running jobs.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(1000);
const DEFAULT_RETRY_JITTER: Duration = Duration::from_millis(500);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(32);

/// Invalid configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The value does not parse.
    #[error("invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        /// Variable or setting name.
        name: String,
        /// Offending value.
        value: String,
        /// What was expected.
        reason: &'static str,
    },

    /// The value parses but is outside the accepted range.
    #[error("{name} must be between {min} and {max}, got {value}")]
    OutOfRange {
        /// Variable or setting name.
        name: &'static str,
        /// Offending value.
        value: u64,
        /// Lowest accepted value.
        min: u64,
        /// Highest accepted value.
        max: u64,
    },
}

/// Engine-wide settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Root under which per-job working directories are created.
    pub work_dir: PathBuf,
    /// Simultaneously running jobs.
    pub max_concurrent: usize,
    /// Job-level attempts.
    pub retry_attempts: u32,
    /// Per-fragment attempts.
    pub fragment_retries: u32,
    /// Connect and read-inactivity timeout.
    pub socket_timeout: Duration,
    /// Fragment worker window.
    pub concurrent_fragments: usize,
    /// Upper bound applied to a request's livestream wait.
    pub max_live_wait: Duration,
    /// Livestream availability poll period.
    pub live_poll_interval: Duration,
    /// Delay before the first retry.
    pub retry_base_delay: Duration,
    /// Upper bound of random retry jitter.
    pub retry_jitter: Duration,
    /// Install location for bootstrapped binaries; `<work_dir>/bin` when unset.
    pub bin_dir: Option<PathBuf>,
    /// Transcoder release URL override.
    pub ffmpeg_url: Option<String>,
    /// Pinned transcoder checksum.
    pub ffmpeg_sha256: Option<String>,
    /// Extractor release URL override.
    pub ytdlp_url: Option<String>,
    /// Pinned extractor checksum.
    pub ytdlp_sha256: Option<String>,
    /// Probe connectivity before each job.
    pub check_internet: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            retry_attempts: DEFAULT_MAX_RETRIES,
            fragment_retries: DEFAULT_FRAGMENT_RETRIES,
            socket_timeout: Duration::from_secs(SOCKET_TIMEOUT_SECS),
            concurrent_fragments: DEFAULT_CONCURRENT_FRAGMENTS,
            max_live_wait: DEFAULT_MAX_LIVE_WAIT,
            live_poll_interval: DEFAULT_LIVE_POLL_INTERVAL,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            retry_jitter: DEFAULT_RETRY_JITTER,
            bin_dir: None,
            ffmpeg_url: None,
            ffmpeg_sha256: None,
            ytdlp_url: None,
            ytdlp_sha256: None,
            check_internet: true,
        }
    }
}

impl EngineConfig {
    /// Loads and validates the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns the first unparsable or out-of-range value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads and validates the configuration from an arbitrary lookup.
    ///
    /// Blank values count as unset.
    ///
    /// # Errors
    ///
    /// Returns the first unparsable or out-of-range value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(dir) = get("UNIDL_WORK_DIR") {
            config.work_dir = PathBuf::from(dir);
        }
        if let Some(value) = get("UNIDL_MAX_CONCURRENT") {
            config.max_concurrent = parse_number("UNIDL_MAX_CONCURRENT", &value)?;
        }
        if let Some(value) = get("UNIDL_RETRY_ATTEMPTS") {
            config.retry_attempts = parse_number("UNIDL_RETRY_ATTEMPTS", &value)?;
        }
        if let Some(value) = get("UNIDL_FRAGMENT_RETRIES") {
            config.fragment_retries = parse_number("UNIDL_FRAGMENT_RETRIES", &value)?;
        }
        if let Some(value) = get("UNIDL_SOCKET_TIMEOUT") {
            config.socket_timeout = Duration::from_secs(parse_number("UNIDL_SOCKET_TIMEOUT", &value)?);
        }
        if let Some(value) = get("UNIDL_CONCURRENT_FRAGMENTS") {
            config.concurrent_fragments = parse_number("UNIDL_CONCURRENT_FRAGMENTS", &value)?;
        }
        if let Some(value) = get("UNIDL_MAX_LIVE_WAIT") {
            config.max_live_wait = Duration::from_secs(parse_number("UNIDL_MAX_LIVE_WAIT", &value)?);
        }
        if let Some(value) = get("UNIDL_LIVE_POLL_INTERVAL") {
            config.live_poll_interval =
                Duration::from_secs(parse_number("UNIDL_LIVE_POLL_INTERVAL", &value)?);
        }
        if let Some(value) = get("UNIDL_RETRY_BASE_DELAY_MS") {
            config.retry_base_delay =
                Duration::from_millis(parse_number("UNIDL_RETRY_BASE_DELAY_MS", &value)?);
        }
        if let Some(value) = get("UNIDL_RETRY_JITTER_MS") {
            config.retry_jitter = Duration::from_millis(parse_number("UNIDL_RETRY_JITTER_MS", &value)?);
        }
        config.bin_dir = get("UNIDL_BIN_DIR").map(PathBuf::from);
        config.ffmpeg_url = get("UNIDL_FFMPEG_URL");
        config.ffmpeg_sha256 = get("UNIDL_FFMPEG_SHA256");
        config.ytdlp_url = get("UNIDL_YTDLP_URL");
        config.ytdlp_sha256 = get("UNIDL_YTDLP_SHA256");
        if let Some(value) = get("UNIDL_CHECK_INTERNET") {
            config.check_internet = parse_bool("UNIDL_CHECK_INTERNET", &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks every numeric setting against its accepted range.
    ///
    /// # Errors
    ///
    /// Returns the first out-of-range value, or an invalid checksum.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("max_concurrent", self.max_concurrent as u64, 1, 64)?;
        check_range("retry_attempts", u64::from(self.retry_attempts), 1, 10)?;
        check_range("fragment_retries", u64::from(self.fragment_retries), 1, 50)?;
        check_range("socket_timeout", self.socket_timeout.as_secs(), 1, 3600)?;
        check_range(
            "concurrent_fragments",
            self.concurrent_fragments as u64,
            1,
            MAX_CONCURRENT_FRAGMENTS as u64,
        )?;
        check_range("max_live_wait", self.max_live_wait.as_secs(), 0, 86_400)?;
        check_range("live_poll_interval", self.live_poll_interval.as_secs(), 1, 3600)?;
        check_range(
            "retry_base_delay",
            u64::try_from(self.retry_base_delay.as_millis()).unwrap_or(u64::MAX),
            0,
            60_000,
        )?;
        for (name, sha) in [("ffmpeg_sha256", &self.ffmpeg_sha256), ("ytdlp_sha256", &self.ytdlp_sha256)] {
            if let Some(sha) = sha
                && (sha.len() != 64 || !sha.chars().all(|c| c.is_ascii_hexdigit()))
            {
                return Err(ConfigError::Invalid {
                    name: name.to_string(),
                    value: sha.clone(),
                    reason: "expected 64 hex characters",
                });
            }
        }
        Ok(())
    }

    /// Install location for bootstrapped binaries.
    #[must_use]
    pub fn bin_dir(&self) -> PathBuf {
        self.bin_dir
            .clone()
            .unwrap_or_else(|| self.work_dir.join("bin"))
    }

    /// Root of the per-job working directories.
    #[must_use]
    pub fn jobs_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Defaults merged into every job descriptor.
    #[must_use]
    pub fn job_defaults(&self) -> JobDefaults {
        JobDefaults {
            retries: self.retry_attempts,
            fragment_retries: self.fragment_retries,
            socket_timeout: self.socket_timeout,
            concurrent_fragments: self.concurrent_fragments,
            max_live_wait: self.max_live_wait,
            backoff: Backoff {
                base_delay: self.retry_base_delay,
                max_delay: MAX_RETRY_DELAY.max(self.retry_base_delay),
                max_jitter: self.retry_jitter,
            },
        }
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::Invalid {
        name: name.to_string(),
        value: value.to_string(),
        reason: "expected a non-negative integer",
    })
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name: name.to_string(),
            value: value.to_string(),
            reason: "expected true or false",
        }),
    }
}

fn check_range(name: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name,
            value,
            min,
            max,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<EngineConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        EngineConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.max_concurrent, 3);
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.bin_dir(), PathBuf::from(DEFAULT_WORK_DIR).join("bin"));
        assert!(config.check_internet);
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("UNIDL_WORK_DIR", "/tmp/unidl"),
            ("UNIDL_MAX_CONCURRENT", "8"),
            ("UNIDL_SOCKET_TIMEOUT", "5"),
            ("UNIDL_CHECK_INTERNET", "no"),
            ("UNIDL_RETRY_JITTER_MS", "0"),
            ("UNIDL_FFMPEG_URL", " "),
        ])
        .unwrap();
        assert_eq!(config.work_dir, PathBuf::from("/tmp/unidl"));
        assert_eq!(config.max_concurrent, 8);
        assert_eq!(config.socket_timeout, Duration::from_secs(5));
        assert!(!config.check_internet);
        assert_eq!(config.ffmpeg_url, None);
        assert_eq!(config.job_defaults().backoff.max_jitter, Duration::ZERO);
    }

    #[test]
    fn test_out_of_range_rejected() {
        assert_eq!(
            load(&[("UNIDL_MAX_CONCURRENT", "0")]).unwrap_err(),
            ConfigError::OutOfRange {
                name: "max_concurrent",
                value: 0,
                min: 1,
                max: 64
            }
        );
        assert!(load(&[("UNIDL_CONCURRENT_FRAGMENTS", "33")]).is_err());
        assert!(load(&[("UNIDL_RETRY_ATTEMPTS", "11")]).is_err());
    }

    #[test]
    fn test_unparsable_values_rejected() {
        assert!(matches!(
            load(&[("UNIDL_RETRY_ATTEMPTS", "three")]),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(load(&[("UNIDL_CHECK_INTERNET", "maybe")]).is_err());
        assert!(load(&[("UNIDL_FFMPEG_SHA256", "abc")]).is_err());
    }
}
