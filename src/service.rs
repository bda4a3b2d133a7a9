//! Request-to-artifact control flow.
//!
//! [`MediaService`] validates a request, resolves its format plan and
//! descriptor, waits for a job slot, confirms the external binaries, runs
//! the [`DownloadEngine`] inside a fresh [`WorkDir`] and hands the result
//! off as a [`Handoff`]. The working directory is removed exactly once: by
//! [`Handoff::release`] after the caller consumed the artifacts, right after
//! a failure, or by `Drop` when the caller goes away.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, instrument, warn};

use crate::artifact::{Artifact, ArtifactError, ArtifactSet, WorkDir, content_disposition};
use crate::config::EngineConfig;
use crate::connectivity;
use crate::dependency::{
    BootstrapError, CommandProbe, DependencyBootstrapper, DependencySpec, HttpBinaryFetcher,
};
use crate::download::{DownloadEngine, DownloadError, EngineOutput, EngineTools, resolve_unique_path};
use crate::error::JobError;
use crate::extractor::{MediaExtractor, YtDlpExtractor};
use crate::format::{FormatPreferences, resolve};
use crate::job::{self, JobDescriptor, JobId};
use crate::postprocess::{FfmpegTranscoder, Transcoder};
use crate::progress::{ProgressReporter, ProgressTracker};
use crate::request::DownloadRequest;

/// Source of the external tools a job runs with.
#[async_trait]
pub trait Toolchain: Send + Sync {
    /// A ready extractor.
    async fn extractor(&self) -> Result<Arc<dyn MediaExtractor>, BootstrapError>;

    /// A ready transcoder.
    async fn transcoder(&self) -> Result<Arc<dyn Transcoder>, BootstrapError>;
}

/// [`Toolchain`] backed by bootstrapped `yt-dlp` and `ffmpeg` binaries.
#[derive(Debug, Clone)]
pub struct BootstrappedToolchain {
    ytdlp: Arc<DependencyBootstrapper>,
    ffmpeg: Arc<DependencyBootstrapper>,
}

impl BootstrappedToolchain {
    /// Wraps existing bootstrappers.
    #[must_use]
    pub fn new(ytdlp: Arc<DependencyBootstrapper>, ffmpeg: Arc<DependencyBootstrapper>) -> Self {
        Self { ytdlp, ffmpeg }
    }

    /// Bootstrappers installing into the configured bin directory, fetching
    /// from the configured (or pinned) release URLs.
    ///
    /// # Errors
    ///
    /// Returns the HTTP client construction error.
    pub fn from_config(config: &EngineConfig) -> Result<Self, DownloadError> {
        let fetcher = Arc::new(HttpBinaryFetcher::new()?);
        let probe = Arc::new(CommandProbe);
        let bin_dir = config.bin_dir();

        let mut ytdlp = DependencySpec::yt_dlp();
        if let Some(url) = &config.ytdlp_url {
            ytdlp = ytdlp.with_download_url(url);
        }
        if let Some(sha) = &config.ytdlp_sha256 {
            ytdlp = ytdlp.with_sha256(sha);
        }
        let mut ffmpeg = DependencySpec::ffmpeg();
        if let Some(url) = &config.ffmpeg_url {
            ffmpeg = ffmpeg.with_download_url(url);
        }
        if let Some(sha) = &config.ffmpeg_sha256 {
            ffmpeg = ffmpeg.with_sha256(sha);
        }

        Ok(Self::new(
            Arc::new(DependencyBootstrapper::new(ytdlp, &bin_dir, fetcher.clone(), probe.clone())),
            Arc::new(DependencyBootstrapper::new(ffmpeg, &bin_dir, fetcher, probe)),
        ))
    }

    /// The extractor bootstrapper.
    #[must_use]
    pub fn ytdlp(&self) -> &Arc<DependencyBootstrapper> {
        &self.ytdlp
    }

    /// The transcoder bootstrapper.
    #[must_use]
    pub fn ffmpeg(&self) -> &Arc<DependencyBootstrapper> {
        &self.ffmpeg
    }
}

#[async_trait]
impl Toolchain for BootstrappedToolchain {
    async fn extractor(&self) -> Result<Arc<dyn MediaExtractor>, BootstrapError> {
        let ready = self.ytdlp.ensure_ready().await?;
        Ok(Arc::new(YtDlpExtractor::new(ready.path)))
    }

    async fn transcoder(&self) -> Result<Arc<dyn Transcoder>, BootstrapError> {
        let ready = self.ffmpeg.ensure_ready().await?;
        Ok(Arc::new(FfmpegTranscoder::new(ready.path)))
    }
}

/// Entry point for download jobs.
pub struct MediaService {
    config: EngineConfig,
    engine: DownloadEngine,
    toolchain: Arc<dyn Toolchain>,
    tracker: Arc<ProgressTracker>,
    slots: Arc<Semaphore>,
}

impl std::fmt::Debug for MediaService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaService")
            .field("config", &self.config)
            .field("running", &(self.config.max_concurrent - self.slots.available_permits()))
            .finish_non_exhaustive()
    }
}

impl MediaService {
    /// Creates a service.
    #[must_use]
    pub fn new(config: EngineConfig, toolchain: Arc<dyn Toolchain>) -> Self {
        let engine = DownloadEngine::new().with_live_poll_interval(config.live_poll_interval);
        Self {
            slots: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            tracker: Arc::new(ProgressTracker::new()),
            config,
            engine,
            toolchain,
        }
    }

    /// Progress of all jobs.
    #[must_use]
    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.tracker
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validates a request and builds its descriptor without running it.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Validation`] for an invalid request.
    pub fn prepare(&self, request: DownloadRequest) -> Result<JobDescriptor, JobError> {
        let validated = request.validate()?;
        let plan = resolve(&FormatPreferences::from_request(validated.request()));
        Ok(job::build(&validated, plan, &self.config.job_defaults()))
    }

    /// Starts a job and returns its handle once it is registered.
    ///
    /// Cancelling `cancel`, or dropping the returned handle before the job
    /// finished, cancels the job.
    ///
    /// # Errors
    ///
    /// Returns validation failures and [`JobError::NoInternet`] before any
    /// job state is created.
    #[instrument(skip_all, fields(url = %request.url))]
    pub async fn start(&self, request: DownloadRequest, cancel: &CancellationToken) -> Result<JobHandle, JobError> {
        let descriptor = self.prepare(request)?;

        if self.config.check_internet && !connectivity::has_internet().await {
            warn!("no internet connection");
            return Err(JobError::NoInternet);
        }

        let job_id = JobId::generate(descriptor.url.as_str());
        let reporter = self
            .tracker
            .register(job_id.clone())
            .map_err(|e| JobError::Task(e.to_string()))?;
        info!(job_id = %job_id, quality = %descriptor.format.label, "job accepted");

        let token = cancel.child_token();
        let abandoned = Arc::new(AtomicBool::new(false));
        let task = JobTask {
            engine: self.engine.clone(),
            toolchain: Arc::clone(&self.toolchain),
            slots: Arc::clone(&self.slots),
            jobs_dir: self.config.jobs_dir().to_path_buf(),
            descriptor,
            reporter,
            cancel: token.clone(),
            abandoned: Arc::clone(&abandoned),
        };
        Ok(JobHandle {
            job_id: job_id.clone(),
            cancel: token.clone(),
            guard: token.drop_guard(),
            detach: Detach {
                job_id,
                tracker: Arc::clone(&self.tracker),
                abandoned,
                armed: true,
            },
            task: tokio::spawn(task.run()),
        })
    }

    /// Runs a job to completion.
    ///
    /// # Errors
    ///
    /// Returns the classified terminal failure.
    pub async fn download(&self, request: DownloadRequest, cancel: &CancellationToken) -> Result<Handoff, JobError> {
        self.start(request, cancel).await?.wait().await
    }
}

/// A started job.
///
/// Dropping the handle cancels the job. Its progress entry is then removed
/// as soon as the job reaches a terminal state.
#[derive(Debug)]
pub struct JobHandle {
    job_id: JobId,
    cancel: CancellationToken,
    guard: DropGuard,
    detach: Detach,
    task: JoinHandle<Result<Handoff, JobError>>,
}

/// Marks a job as abandoned when its handle goes away unobserved.
///
/// Whichever side runs last removes the progress entry: this guard when the
/// job is already terminal, otherwise the job task once it finishes.
#[derive(Debug)]
struct Detach {
    job_id: JobId,
    tracker: Arc<ProgressTracker>,
    abandoned: Arc<AtomicBool>,
    armed: bool,
}

impl Detach {
    fn disarm(mut self) -> Arc<ProgressTracker> {
        self.armed = false;
        Arc::clone(&self.tracker)
    }
}

impl Drop for Detach {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.abandoned.store(true, Ordering::SeqCst);
        let terminal = self
            .tracker
            .snapshot(&self.job_id)
            .is_ok_and(|snapshot| snapshot.state.is_terminal());
        if terminal && self.tracker.remove(&self.job_id) {
            debug!(job_id = %self.job_id, "removed progress entry of abandoned job");
        }
    }
}

impl JobHandle {
    /// Job identifier.
    #[must_use]
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the job.
    ///
    /// A failed job's progress entry is removed once the error is returned;
    /// a successful job's entry lives until its [`Handoff`] is released.
    ///
    /// # Errors
    ///
    /// Returns the classified terminal failure.
    pub async fn wait(self) -> Result<Handoff, JobError> {
        let Self {
            job_id,
            guard,
            detach,
            task,
            ..
        } = self;
        let result = task.await.unwrap_or_else(|e| Err(JobError::Task(e.to_string())));
        guard.disarm();
        let tracker = detach.disarm();
        if result.is_err() {
            tracker.remove(&job_id);
        }
        result
    }
}

/// Everything the spawned job task owns.
struct JobTask {
    engine: DownloadEngine,
    toolchain: Arc<dyn Toolchain>,
    slots: Arc<Semaphore>,
    jobs_dir: PathBuf,
    descriptor: JobDescriptor,
    reporter: ProgressReporter,
    cancel: CancellationToken,
    abandoned: Arc<AtomicBool>,
}

impl JobTask {
    async fn run(self) -> Result<Handoff, JobError> {
        let abandoned = Arc::clone(&self.abandoned);
        let result = self.execute().await;
        result.map_err(|(error, reporter)| {
            if !reporter.current_state().is_terminal() {
                reporter.fail(error.kind(), error.to_string());
            }
            if abandoned.load(Ordering::SeqCst) && reporter.tracker().remove(reporter.job_id()) {
                debug!(job_id = %reporter.job_id(), "removed progress entry of abandoned job");
            }
            error
        })
    }

    async fn execute(self) -> Result<Handoff, (JobError, ProgressReporter)> {
        let Self {
            engine,
            toolchain,
            slots,
            jobs_dir,
            descriptor,
            reporter,
            cancel,
            ..
        } = self;

        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err((JobError::Cancelled, reporter)),
            permit = slots.acquire_owned() => permit,
        };
        let Ok(_permit) = permit else {
            return Err((JobError::Task("job slots closed".to_string()), reporter));
        };

        let workdir = match WorkDir::create(&jobs_dir, reporter.job_id()).await {
            Ok(workdir) => workdir,
            Err(e) => return Err((e.into(), reporter)),
        };

        let tools = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(JobError::Cancelled),
            tools = resolve_tools(toolchain.as_ref(), &descriptor) => tools,
        };
        let (extractor, transcoder) = match tools {
            Ok(tools) => tools,
            Err(e) => {
                workdir.release().await;
                return Err((e, reporter));
            }
        };

        let tools = EngineTools {
            extractor: extractor.as_ref(),
            transcoder: transcoder.as_deref(),
        };
        match engine.run(&descriptor, &workdir, tools, &reporter, &cancel).await {
            Ok(output) => Ok(Handoff::new(
                reporter.job_id().clone(),
                workdir,
                output,
                descriptor.format.label.clone(),
                Arc::clone(reporter.tracker()),
            )),
            Err(e) => {
                workdir.release().await;
                Err((e, reporter))
            }
        }
    }
}

async fn resolve_tools(
    toolchain: &dyn Toolchain,
    descriptor: &JobDescriptor,
) -> Result<(Arc<dyn MediaExtractor>, Option<Arc<dyn Transcoder>>), JobError> {
    let transcoder = async {
        if descriptor.needs_transcoder() {
            toolchain.transcoder().await.map(Some)
        } else {
            Ok(None)
        }
    };
    let (extractor, transcoder) = tokio::try_join!(toolchain.extractor(), transcoder)?;
    Ok((extractor, transcoder))
}

/// Artifacts of a completed job, valid until released.
#[derive(Debug)]
pub struct Handoff {
    job_id: JobId,
    workdir: WorkDir,
    output: EngineOutput,
    quality_label: String,
    tracker: Arc<ProgressTracker>,
}

impl Handoff {
    fn new(
        job_id: JobId,
        workdir: WorkDir,
        output: EngineOutput,
        quality_label: String,
        tracker: Arc<ProgressTracker>,
    ) -> Self {
        Self {
            job_id,
            workdir,
            output,
            quality_label,
            tracker,
        }
    }

    /// Job identifier.
    #[must_use]
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// All artifacts.
    #[must_use]
    pub fn artifacts(&self) -> &ArtifactSet {
        &self.output.artifacts
    }

    /// Primary media file.
    #[must_use]
    pub fn primary(&self) -> &Artifact {
        &self.output.artifacts.primary
    }

    /// Non-fatal problems the job ran into.
    #[must_use]
    pub fn warnings(&self) -> &[String] {
        &self.output.warnings
    }

    /// Resolved quality label (`720p`, `audio`, `custom format`).
    #[must_use]
    pub fn quality_label(&self) -> &str {
        &self.quality_label
    }

    /// Job-level attempts used.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.output.attempts
    }

    /// Working directory holding the artifacts.
    #[must_use]
    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }

    /// Response headers describing the primary artifact.
    #[must_use]
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let primary = self.primary();
        vec![
            ("Content-Type", primary.content_type.to_string()),
            ("Content-Length", primary.size.to_string()),
            ("Content-Disposition", content_disposition(&primary.file_name)),
            ("X-Job-Id", self.job_id.to_string()),
            ("X-Quality", self.quality_label.clone()),
        ]
    }

    /// Copies every artifact into `dir`, never overwriting existing files.
    ///
    /// # Errors
    ///
    /// Returns the first copy failure.
    pub async fn persist_to(&self, dir: &Path) -> Result<Vec<PathBuf>, ArtifactError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| ArtifactError::io(dir, e))?;
        let mut copied = Vec::new();
        for artifact in self.output.artifacts.iter() {
            let target = resolve_unique_path(dir, &artifact.file_name);
            tokio::fs::copy(&artifact.path, &target)
                .await
                .map_err(|e| ArtifactError::io(&target, e))?;
            copied.push(target);
        }
        Ok(copied)
    }

    /// Removes the working directory and the progress entry.
    ///
    /// Returns `true` when this call removed the directory.
    pub async fn release(self) -> bool {
        let removed = self.workdir.release().await;
        info!(job_id = %self.job_id, "artifacts released");
        removed
    }
}

impl Drop for Handoff {
    fn drop(&mut self) {
        self.tracker.remove(&self.job_id);
    }
}
