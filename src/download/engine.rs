//! Per-job download engine.
//!
//! [`DownloadEngine::run`] drives one [`JobDescriptor`] through
//! `Pending → Fetching → (Retrying → Fetching)* → PostProcessing → Complete`,
//! or into `Failed` from any non-terminal state.
//!
//! # Attempts
//!
//! Extraction and stream transfer form one attempt. Transient failures
//! (timeouts, resets, 5xx, throttling) retry the whole attempt with
//! exponential backoff after clearing the working directory; everything
//! else fails the job immediately. Fragments carry their own, larger retry
//! budget, and a fragment that spends it fails the job without consuming a
//! further job-level attempt.
//!
//! Post-processing runs once, after every selected entry has been fetched.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::client::{HttpClient, SizeWindow};
use super::filename::{extension_from_url, resolve_unique_path, sanitize_filename, split_extension};
use super::fragment::{FragmentTransfer, resolve_hls_segments, server_delay};
use super::rate_limiter::RateLimiter;
use super::retry::RetryDecision;
use super::DownloadError;
use crate::artifact::{self, ArtifactSet, WorkDir};
use crate::error::JobError;
use crate::extractor::{ExtractError, MediaEntry, MediaExtractor, MediaInfo, MediaStream};
use crate::format::MERGE_CONTAINER;
use crate::job::{JobDescriptor, TemplateFields};
use crate::postprocess::{self, ChainOutcome, MediaContext, PostProcessor, TranscodeError, Transcoder};
use crate::progress::{JobState, ProgressDelta, ProgressReporter};
use crate::user_agent::media_user_agent;

/// Default period between availability checks of a scheduled livestream.
pub const DEFAULT_LIVE_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// External tools a job runs with.
#[derive(Clone, Copy)]
pub struct EngineTools<'a> {
    /// Metadata and stream resolution.
    pub extractor: &'a dyn MediaExtractor,
    /// Merge and post-processing; `None` when the job needs neither.
    pub transcoder: Option<&'a dyn Transcoder>,
}

impl std::fmt::Debug for EngineTools<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineTools")
            .field("transcoder", &self.transcoder.is_some())
            .finish_non_exhaustive()
    }
}

/// Result of a completed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOutput {
    /// Files ready for handoff.
    pub artifacts: ArtifactSet,
    /// Non-fatal problems (side files, optional post-processors).
    pub warnings: Vec<String>,
    /// Job-level attempts used.
    pub attempts: u32,
    /// Media bytes transferred by the successful attempt.
    pub bytes_transferred: u64,
}

/// Runs download jobs.
///
/// The engine itself is stateless between jobs; everything a job needs
/// comes from its descriptor and the tools passed to [`run`](Self::run).
#[derive(Debug, Clone)]
pub struct DownloadEngine {
    live_poll_interval: Duration,
}

impl Default for DownloadEngine {
    fn default() -> Self {
        Self {
            live_poll_interval: DEFAULT_LIVE_POLL_INTERVAL,
        }
    }
}

impl DownloadEngine {
    /// Creates an engine with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the livestream poll period.
    #[must_use]
    pub fn with_live_poll_interval(mut self, interval: Duration) -> Self {
        self.live_poll_interval = interval;
        self
    }

    /// Livestream poll period.
    #[must_use]
    pub fn live_poll_interval(&self) -> Duration {
        self.live_poll_interval
    }

    /// Runs one job to a terminal state inside `workdir`.
    ///
    /// Progress goes to `reporter`; the terminal state (`Complete` or
    /// `Failed` with its classification) is recorded before returning.
    /// Cancelling `cancel` drops all in-flight work and fails the job with
    /// [`JobError::Cancelled`]. Removing the working directory is the
    /// caller's job.
    ///
    /// # Errors
    ///
    /// Returns the classified terminal failure.
    #[instrument(skip_all, fields(job_id = %reporter.job_id(), url = %job.url))]
    pub async fn run(
        &self,
        job: &JobDescriptor,
        workdir: &WorkDir,
        tools: EngineTools<'_>,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<EngineOutput, JobError> {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(JobError::Cancelled),
            result = self.drive(job, workdir, tools, reporter) => result,
        };

        match &result {
            Ok(output) => {
                reporter.state(JobState::Complete);
                info!(
                    primary = %output.artifacts.primary.file_name,
                    attempts = output.attempts,
                    bytes = output.bytes_transferred,
                    warnings = output.warnings.len(),
                    "job complete"
                );
            }
            Err(e) => {
                reporter.fail(e.kind(), e.to_string());
                warn!(kind = %e.kind(), error = %e, "job failed");
            }
        }
        result
    }

    async fn drive(
        &self,
        job: &JobDescriptor,
        workdir: &WorkDir,
        tools: EngineTools<'_>,
        reporter: &ProgressReporter,
    ) -> Result<EngineOutput, JobError> {
        let session = Session {
            client: HttpClient::new(job.socket_timeout, job.proxy.as_ref(), media_user_agent())?,
            limiter: RateLimiter::from_rate(job.limits.rate_limit),
            job,
            workdir,
            tools,
            reporter,
        };

        let (fetched, attempts) = self.fetch_with_retry(&session).await?;

        reporter.state(JobState::PostProcessing);
        let mut warnings = fetched.warnings;
        let mut primaries = Vec::with_capacity(fetched.entries.len());
        let mut extras = Vec::new();
        for item in fetched.entries {
            let outcome = session.post_process(item).await?;
            primaries.push(outcome.primary);
            extras.extend(outcome.extra_media);
            warnings.extend(outcome.warnings);
        }
        primaries.extend(extras);

        let artifacts = artifact::collect(workdir.path(), &primaries).await?;
        Ok(EngineOutput {
            artifacts,
            warnings,
            attempts,
            bytes_transferred: fetched.bytes,
        })
    }

    async fn fetch_with_retry(&self, s: &Session<'_>) -> Result<(Fetched, u32), JobError> {
        let policy = s.job.job_retry_policy();
        let mut attempt = 1u32;

        loop {
            s.reporter.report(ProgressDelta::Attempt(attempt));
            s.reporter.state(JobState::Fetching);
            debug!(attempt, "starting attempt");

            let error = match self.fetch_once(s).await {
                Ok(fetched) => return Ok((fetched, attempt)),
                Err(error) => error,
            };

            match policy.should_retry(error.failure_type(), attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next_attempt,
                } => {
                    let server = match &error {
                        JobError::Download(e) => server_delay(e),
                        _ => None,
                    };
                    let delay = server.unwrap_or(delay);
                    warn!(
                        attempt = next_attempt,
                        max_attempts = policy.max_attempts(),
                        delay_ms = delay.as_millis(),
                        using_retry_after = server.is_some(),
                        error = %error,
                        "retrying job"
                    );
                    s.reporter.state(JobState::Retrying);
                    s.workdir.clear().await?;
                    tokio::time::sleep(delay).await;
                    attempt = next_attempt;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(attempt, %reason, "not retrying job");
                    return Err(error);
                }
            }
        }
    }

    async fn fetch_once(&self, s: &Session<'_>) -> Result<Fetched, JobError> {
        let info = self.extract(s).await?;
        if info.entries.is_empty() {
            return Err(JobError::NoStreams {
                entry_id: s.job.url.to_string(),
            });
        }

        let total = u32::try_from(info.entries.len()).unwrap_or(u32::MAX);
        let mut fetched = Fetched::default();
        for (position, entry) in info.entries.into_iter().enumerate() {
            let index = u32::try_from(position + 1).unwrap_or(u32::MAX);
            s.reporter.report(ProgressDelta::Entry { index, total });
            debug!(entry = %entry.id, index, total, "fetching entry");
            let item = s.fetch_entry(entry, &mut fetched).await?;
            fetched.entries.push(item);
        }
        Ok(fetched)
    }

    /// Extraction with the livestream wait sub-state.
    async fn extract(&self, s: &Session<'_>) -> Result<MediaInfo, JobError> {
        let started = Instant::now();
        loop {
            let pending = match s.tools.extractor.extract(s.job).await {
                Ok(info) if !info.is_upcoming() => return Ok(info),
                Ok(_) => None,
                Err(e @ ExtractError::NotYetLive { .. }) => Some(e),
                Err(e) => return Err(e.into()),
            };

            let Some(max_wait) = s.job.live.wait else {
                return Err(pending.map_or(JobError::NotYetAvailable { waited_secs: 0 }, JobError::from));
            };
            let waited = started.elapsed();
            if waited >= max_wait {
                return Err(JobError::NotYetAvailable {
                    waited_secs: waited.as_secs(),
                });
            }
            let pause = self.live_poll_interval.min(max_wait - waited);
            info!(
                waited_secs = waited.as_secs(),
                pause_ms = pause.as_millis(),
                "livestream has not started, waiting"
            );
            tokio::time::sleep(pause).await;
        }
    }
}

/// Everything one job shares across its attempts.
struct Session<'a> {
    job: &'a JobDescriptor,
    workdir: &'a WorkDir,
    tools: EngineTools<'a>,
    reporter: &'a ProgressReporter,
    client: HttpClient,
    limiter: RateLimiter,
}

/// Output of a successful fetch attempt.
#[derive(Default)]
struct Fetched {
    entries: Vec<FetchedEntry>,
    warnings: Vec<String>,
    bytes: u64,
}

/// One entry's media plus the side inputs post-processing may embed.
struct FetchedEntry {
    entry: MediaEntry,
    media: PathBuf,
    thumbnail: Option<PathBuf>,
    subtitles: Vec<(String, PathBuf)>,
}

impl Session<'_> {
    async fn fetch_entry(&self, entry: MediaEntry, fetched: &mut Fetched) -> Result<FetchedEntry, JobError> {
        if entry.streams.is_empty() {
            return Err(JobError::NoStreams { entry_id: entry.id });
        }

        let window = SizeWindow::new(self.job.limits.max_filesize, self.job.limits.min_filesize);
        let declared = entry.declared_size();
        if let Some(declared) = declared {
            window.check_declared(self.job.url.as_str(), declared)?;
        }
        // A merged file is only checked against the minimum once complete.
        let stream_window = if entry.streams.len() > 1 {
            SizeWindow::new(window.max, None)
        } else {
            window
        };

        let entry_stem = sanitize_filename(&entry.id);
        let mut parts = Vec::with_capacity(entry.streams.len());
        for stream in &entry.streams {
            let path = self.workdir.path().join(format!(
                "{entry_stem}.f{}.{}",
                sanitize_filename(&stream.format_id),
                stream_extension(stream)
            ));
            let written = self
                .fetch_stream(stream, &path, stream_window, fetched.bytes, declared)
                .await?;
            fetched.bytes += written;
            parts.push(path);
        }

        let media = self.assemble(&entry, &parts, window).await?;
        let (thumbnail, subtitles) = self.write_side_files(&entry, &media, &mut fetched.warnings).await?;
        Ok(FetchedEntry {
            entry,
            media,
            thumbnail,
            subtitles,
        })
    }

    async fn fetch_stream(
        &self,
        stream: &MediaStream,
        path: &Path,
        window: SizeWindow,
        base: u64,
        total: Option<u64>,
    ) -> Result<u64, DownloadError> {
        let headers = &stream.http_headers;
        let reporter = self.reporter;

        if stream.fragments.is_empty() && !stream.is_hls_playlist() {
            return self
                .client
                .download_to_path(&stream.url, headers, path, window, &self.limiter, |written| {
                    reporter.report(ProgressDelta::Bytes {
                        transferred: base + written,
                        total,
                    });
                })
                .await;
        }

        let resolved;
        let fragments = if stream.fragments.is_empty() {
            resolved = resolve_hls_segments(&self.client, &stream.url, headers).await?;
            &resolved
        } else {
            &stream.fragments
        };
        let policy = self.job.fragment_retry_policy();
        let transfer = FragmentTransfer {
            client: &self.client,
            headers,
            policy: &policy,
            limiter: &self.limiter,
            concurrency: self.job.concurrent_fragments,
            window,
        };
        transfer
            .download(&stream.url, fragments, path, |done, count, written| {
                reporter.report(ProgressDelta::Fragments {
                    done: done as u64,
                    total: Some(count as u64),
                });
                reporter.report(ProgressDelta::Bytes {
                    transferred: base + written,
                    total,
                });
            })
            .await
    }

    /// Moves or merges the fetched streams into the templated output file.
    async fn assemble(&self, entry: &MediaEntry, parts: &[PathBuf], window: SizeWindow) -> Result<PathBuf, JobError> {
        let ext = match (parts.len(), entry.streams.first()) {
            (1, Some(stream)) => stream_extension(stream),
            _ => self
                .job
                .format
                .merge_output_format
                .as_deref()
                .unwrap_or(MERGE_CONTAINER),
        };
        let format_id = entry.format_id();
        let name = self.job.output_template.render(&TemplateFields {
            title: entry.title.as_deref(),
            id: Some(&entry.id),
            ext,
            uploader: entry.uploader.as_deref(),
            playlist_index: entry.playlist_index,
            format_id: Some(&format_id),
        });
        let media = resolve_unique_path(self.workdir.path(), &name);

        match (parts, entry.streams.as_slice()) {
            ([single], _) => {
                tokio::fs::rename(single, &media)
                    .await
                    .map_err(|e| DownloadError::io(&media, e))?;
            }
            ([first, second], [first_stream, second_stream]) => {
                let transcoder = self.tools.transcoder.ok_or_else(|| TranscodeError::Unavailable {
                    step: "merge".to_string(),
                })?;
                let (video, audio) = if second_stream.has_video() && !first_stream.has_video() {
                    (second, first)
                } else {
                    (first, second)
                };
                postprocess::merge_streams(transcoder, video, audio, &media).await?;
                let size = tokio::fs::metadata(&media)
                    .await
                    .map_err(|e| DownloadError::io(&media, e))?
                    .len();
                window.check_final(self.job.url.as_str(), size)?;
            }
            _ => {
                return Err(DownloadError::unsupported_stream(
                    self.job.url.as_str(),
                    format!("{} streams selected, at most two can be merged", parts.len()),
                )
                .into());
            }
        }
        debug!(media = %media.display(), "entry media assembled");
        Ok(media)
    }

    /// Writes the requested side files next to `media`.
    ///
    /// Returns the thumbnail and subtitle tracks that were fetched, for
    /// embedding. Failed fetches become warnings.
    async fn write_side_files(
        &self,
        entry: &MediaEntry,
        media: &Path,
        warnings: &mut Vec<String>,
    ) -> Result<(Option<PathBuf>, Vec<(String, PathBuf)>), JobError> {
        let side = &self.job.side_files;
        let dir = self.workdir.path();
        let file_name = media
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (stem, _) = split_extension(&file_name);

        if side.description
            && let Some(text) = &entry.description
        {
            let path = dir.join(format!("{stem}.description"));
            write_file(&path, text.as_bytes()).await?;
        }

        if side.info_json {
            let path = dir.join(format!("{stem}.info.json"));
            match serde_json::to_vec_pretty(&entry.raw) {
                Ok(body) => write_file(&path, &body).await?,
                Err(e) => warnings.push(format!("info_json: {e}")),
            }
        }

        let mut thumbnail = None;
        if side.fetch_thumbnail
            && let Some(url) = &entry.thumbnail
        {
            let ext = extension_from_url(url)
                .filter(|e| matches!(e.as_str(), "jpg" | "jpeg" | "png" | "webp"))
                .unwrap_or_else(|| "jpg".to_string());
            let path = dir.join(format!("{stem}.{ext}"));
            match self.fetch_side_file(url, &path).await {
                Ok(()) => thumbnail = Some(path),
                Err(e) => {
                    warn!(url, error = %e, "thumbnail fetch failed");
                    warnings.push(format!("thumbnail: {e}"));
                }
            }
        }

        let mut subtitles = Vec::new();
        for track in &entry.subtitles {
            let path = dir.join(format!(
                "{stem}.{}.{}",
                sanitize_filename(&track.lang),
                sanitize_filename(&track.ext)
            ));
            match self.fetch_side_file(&track.url, &path).await {
                Ok(()) => subtitles.push((track.lang.clone(), path)),
                Err(e) => {
                    warn!(lang = %track.lang, error = %e, "subtitle fetch failed");
                    warnings.push(format!("subtitles ({}): {e}", track.lang));
                }
            }
        }

        Ok((thumbnail, subtitles))
    }

    async fn fetch_side_file(&self, url: &str, path: &Path) -> Result<(), DownloadError> {
        let body = self.client.fetch_bytes(url, &BTreeMap::new(), &self.limiter).await?;
        tokio::fs::write(path, body)
            .await
            .map_err(|e| DownloadError::io(path, e))
    }

    /// Runs the post-processor chain on one entry and drops files that were
    /// fetched only for embedding.
    async fn post_process(&self, item: FetchedEntry) -> Result<ChainOutcome, JobError> {
        let steps = &self.job.post_processors;
        let outcome = if steps.is_empty() {
            ChainOutcome {
                primary: item.media,
                extra_media: Vec::new(),
                warnings: Vec::new(),
            }
        } else {
            let transcoder = self.tools.transcoder.ok_or_else(|| TranscodeError::Unavailable {
                step: steps.first().map_or("post-processing", PostProcessor::name).to_string(),
            })?;
            let ctx = MediaContext {
                title: item.entry.title.as_deref(),
                uploader: item.entry.uploader.as_deref(),
                description: item.entry.description.as_deref(),
                thumbnail: item.thumbnail.as_deref(),
                subtitles: &item.subtitles,
            };
            postprocess::run_chain(transcoder, steps, item.media, &ctx).await?
        };

        let side = &self.job.side_files;
        if !side.thumbnail
            && let Some(path) = &item.thumbnail
        {
            remove_quietly(path).await;
        }
        if !side.subtitles {
            for (_, path) in &item.subtitles {
                remove_quietly(path).await;
            }
        }
        Ok(outcome)
    }
}

fn stream_extension(stream: &MediaStream) -> &str {
    if stream.ext.is_empty() {
        "bin"
    } else {
        &stream.ext
    }
}

async fn write_file(path: &Path, body: &[u8]) -> Result<(), DownloadError> {
    tokio::fs::write(path, body)
        .await
        .map_err(|e| DownloadError::io(path, e))
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        debug!(path = %path.display(), error = %e, "failed to remove embedded side file");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::error::ErrorKind;
    use crate::extractor::LiveStatus;
    use crate::format::{FormatPreferences, resolve};
    use crate::job::{Backoff, JobDefaults, JobId, build};
    use crate::progress::ProgressTracker;
    use crate::request::DownloadRequest;

    type Script = Box<dyn Fn(u32) -> Result<MediaInfo, ExtractError> + Send + Sync>;

    struct ScriptedExtractor {
        calls: AtomicU32,
        script: Script,
    }

    impl ScriptedExtractor {
        fn new(script: impl Fn(u32) -> Result<MediaInfo, ExtractError> + Send + Sync + 'static) -> Self {
            Self {
                calls: AtomicU32::new(0),
                script: Box::new(script),
            }
        }
    }

    #[async_trait]
    impl MediaExtractor for ScriptedExtractor {
        async fn extract(&self, _job: &JobDescriptor) -> Result<MediaInfo, ExtractError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            (self.script)(call)
        }
    }

    fn job(request: DownloadRequest) -> JobDescriptor {
        let validated = request.validate().unwrap();
        let plan = resolve(&FormatPreferences::from_request(validated.request()));
        let defaults = JobDefaults {
            backoff: Backoff {
                base_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
                max_jitter: Duration::ZERO,
            },
            ..JobDefaults::default()
        };
        build(&validated, plan, &defaults)
    }

    async fn run_job(
        engine: &DownloadEngine,
        job: &JobDescriptor,
        extractor: &ScriptedExtractor,
        cancel: &CancellationToken,
    ) -> (Result<EngineOutput, JobError>, Arc<ProgressTracker>) {
        let root = TempDir::new().unwrap();
        let workdir = WorkDir::create(root.path(), &JobId::from("t")).await.unwrap();
        let tracker = Arc::new(ProgressTracker::new());
        let reporter = tracker.register(JobId::from("t")).unwrap();
        let tools = EngineTools {
            extractor,
            transcoder: None,
        };
        let result = engine.run(job, &workdir, tools, &reporter, cancel).await;
        (result, tracker)
    }

    fn upcoming() -> MediaInfo {
        MediaInfo {
            playlist_title: None,
            entries: vec![MediaEntry {
                id: "live1".to_string(),
                live_status: LiveStatus::IsUpcoming,
                ..MediaEntry::default()
            }],
        }
    }

    #[tokio::test]
    async fn test_transient_extraction_uses_every_attempt() {
        let job = job(DownloadRequest::new("https://example.com/watch?v=1"));
        let extractor = ScriptedExtractor::new(|_| {
            Err(ExtractError::Transient {
                message: "HTTP Error 503".to_string(),
            })
        });

        let (result, tracker) = run_job(&DownloadEngine::new(), &job, &extractor, &CancellationToken::new()).await;
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientNetwork);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), job.retries);

        let snapshot = tracker.snapshot(&JobId::from("t")).unwrap();
        assert_eq!(snapshot.state, JobState::Failed);
        assert_eq!(snapshot.attempt, job.retries);
    }

    #[tokio::test]
    async fn test_content_error_is_not_retried() {
        let job = job(DownloadRequest::new("https://example.com/watch?v=1"));
        let extractor = ScriptedExtractor::new(|_| {
            Err(ExtractError::Unavailable {
                message: "Video unavailable".to_string(),
            })
        });

        let (result, tracker) = run_job(&DownloadEngine::new(), &job, &extractor, &CancellationToken::new()).await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Content);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
        let snapshot = tracker.snapshot(&JobId::from("t")).unwrap();
        assert_eq!(snapshot.error_kind, Some(ErrorKind::Content));
        assert_eq!(snapshot.attempt, 1);
    }

    #[tokio::test]
    async fn test_entry_without_streams_fails() {
        let job = job(DownloadRequest::new("https://example.com/watch?v=1"));
        let extractor = ScriptedExtractor::new(|_| {
            Ok(MediaInfo {
                playlist_title: None,
                entries: vec![MediaEntry {
                    id: "abc".to_string(),
                    ..MediaEntry::default()
                }],
            })
        });

        let (result, _) = run_job(&DownloadEngine::new(), &job, &extractor, &CancellationToken::new()).await;
        assert!(matches!(result, Err(JobError::NoStreams { entry_id }) if entry_id == "abc"));
    }

    #[tokio::test]
    async fn test_upcoming_stream_without_wait_fails_immediately() {
        let job = job(DownloadRequest::new("https://example.com/live"));
        let extractor = ScriptedExtractor::new(|_| Ok(upcoming()));

        let (result, _) = run_job(&DownloadEngine::new(), &job, &extractor, &CancellationToken::new()).await;
        assert!(matches!(result, Err(JobError::NotYetAvailable { waited_secs: 0 })));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_live_wait_polls_until_deadline() {
        let mut job = job(DownloadRequest::new("https://example.com/live"));
        job.live.wait = Some(Duration::from_millis(60));
        let extractor = ScriptedExtractor::new(|_| {
            Err(ExtractError::NotYetLive {
                message: "Premieres in 2 hours".to_string(),
            })
        });
        let engine = DownloadEngine::new().with_live_poll_interval(Duration::from_millis(10));

        let (result, _) = run_job(&engine, &job, &extractor, &CancellationToken::new()).await;
        let err = result.unwrap_err();
        assert!(matches!(err, JobError::NotYetAvailable { .. }), "{err:?}");
        assert_eq!(err.kind(), ErrorKind::Content);
        assert!(extractor.calls.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn test_cancelled_job_is_failed_as_cancelled() {
        let job = job(DownloadRequest::new("https://example.com/watch?v=1"));
        let extractor = ScriptedExtractor::new(|_| Ok(upcoming()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (result, tracker) = run_job(&DownloadEngine::new(), &job, &extractor, &cancel).await;
        assert!(matches!(result, Err(JobError::Cancelled)));
        let snapshot = tracker.snapshot(&JobId::from("t")).unwrap();
        assert_eq!(snapshot.error_kind, Some(ErrorKind::Cancelled));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
    }
}
