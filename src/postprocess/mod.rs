//! Post-processing: stream merge, audio extraction/conversion, metadata,
//! thumbnail and subtitle embedding, run through a [`Transcoder`].
//!
//! Steps run strictly in descriptor order. Each writes a temporary output
//! next to the media and renames it over the target, so a failed step never
//! leaves a half-written primary file. Extraction, conversion and merge
//! failures are fatal; metadata, thumbnail and subtitle failures become
//! warnings and the primary file is kept.

pub mod args;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::download::split_extension;
use crate::request::AudioFormat;

/// Upper bound for one transcoder invocation.
const TRANSCODE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// A post-processing step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PostProcessor {
    /// Extract the audio track.
    ExtractAudio {
        /// Target codec.
        codec: AudioFormat,
        /// Bitrate or VBR level.
        quality: String,
        /// Keep the source video.
        keep_video: bool,
    },
    /// Re-encode the audio of a retained video.
    ConvertAudio {
        /// Target codec.
        codec: AudioFormat,
    },
    /// Write title/uploader/description tags.
    Metadata,
    /// Embed the thumbnail as cover art.
    EmbedThumbnail,
    /// Embed subtitle tracks.
    EmbedSubtitles {
        /// Languages to embed.
        langs: Vec<String>,
    },
}

impl PostProcessor {
    /// Stable step name for logs and warnings.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ExtractAudio { .. } => "extract_audio",
            Self::ConvertAudio { .. } => "convert_audio",
            Self::Metadata => "metadata",
            Self::EmbedThumbnail => "embed_thumbnail",
            Self::EmbedSubtitles { .. } => "embed_subtitles",
        }
    }

    /// Whether a failure of this step fails the job.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ExtractAudio { .. } | Self::ConvertAudio { .. })
    }
}

/// Errors from the transcoder.
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// The transcoder binary could not be started.
    #[error("failed to start {binary}: {source}")]
    Spawn {
        /// Binary path.
        binary: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The transcoder exited unsuccessfully.
    #[error("{step} failed (exit code {code:?}): {stderr}")]
    Failed {
        /// Step name.
        step: String,
        /// Exit code, if any.
        code: Option<i32>,
        /// Trimmed stderr.
        stderr: String,
    },

    /// The transcoder did not finish in time.
    #[error("{step} timed out after {secs}s")]
    Timeout {
        /// Step name.
        step: String,
        /// Timeout in seconds.
        secs: u64,
    },

    /// The job needs a transcoder but none was provided.
    #[error("{step} needs a transcoder, none is available")]
    Unavailable {
        /// Step name.
        step: String,
    },

    /// The step reported success but produced no output.
    #[error("{step} produced no output at {path}")]
    MissingOutput {
        /// Step name.
        step: String,
        /// Expected output.
        path: PathBuf,
    },

    /// Filesystem error around a step.
    #[error("IO error on {path}: {source}")]
    Io {
        /// Affected path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl TranscodeError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Runs transcoder invocations. The argument list ends with the output path.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Runs one invocation for `step`.
    async fn transcode(&self, step: &str, args: &[String]) -> Result<(), TranscodeError>;
}

/// [`Transcoder`] backed by an `ffmpeg` executable.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    binary: PathBuf,
}

impl FfmpegTranscoder {
    /// Creates a transcoder for the given executable.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    #[instrument(level = "debug", skip(self, args), fields(binary = %self.binary.display()))]
    async fn transcode(&self, step: &str, args: &[String]) -> Result<(), TranscodeError> {
        let mut command = Command::new(&self.binary);
        command
            .args(["-hide_banner", "-nostdin", "-loglevel", "error", "-y"])
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(TRANSCODE_TIMEOUT, command.output())
            .await
            .map_err(|_| TranscodeError::Timeout {
                step: step.to_string(),
                secs: TRANSCODE_TIMEOUT.as_secs(),
            })?
            .map_err(|source| TranscodeError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr: String = stderr.trim().chars().take(2000).collect();
        Err(TranscodeError::Failed {
            step: step.to_string(),
            code: output.status.code(),
            stderr,
        })
    }
}

/// Per-entry values the chain needs besides the media file.
#[derive(Debug, Clone, Default)]
pub struct MediaContext<'a> {
    /// Title tag.
    pub title: Option<&'a str>,
    /// Artist tag.
    pub uploader: Option<&'a str>,
    /// Comment tag.
    pub description: Option<&'a str>,
    /// Fetched thumbnail, if any.
    pub thumbnail: Option<&'a Path>,
    /// Fetched subtitle tracks `(lang, path)`.
    pub subtitles: &'a [(String, PathBuf)],
}

/// Result of running the chain on one media file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainOutcome {
    /// Final primary media file.
    pub primary: PathBuf,
    /// Additional media kept by the chain (video kept after extraction).
    pub extra_media: Vec<PathBuf>,
    /// Non-fatal step failures.
    pub warnings: Vec<String>,
}

/// Merges separate video and audio files into `output`, removing the inputs.
///
/// # Errors
///
/// Returns the transcoder failure; merge failures are fatal.
#[instrument(level = "debug", skip(transcoder))]
pub async fn merge_streams(
    transcoder: &dyn Transcoder,
    video: &Path,
    audio: &Path,
    output: &Path,
) -> Result<(), TranscodeError> {
    transcoder
        .transcode("merge", &args::merge_args(video, audio, output))
        .await?;
    ensure_output("merge", output).await?;
    for input in [video, audio] {
        if let Err(e) = tokio::fs::remove_file(input).await {
            warn!(path = %input.display(), error = %e, "failed to remove merged input");
        }
    }
    Ok(())
}

/// Runs `steps` in order on `media`.
///
/// # Errors
///
/// Returns the first failure of a fatal step. Non-fatal failures are
/// collected in [`ChainOutcome::warnings`].
#[instrument(level = "debug", skip(transcoder, steps, ctx), fields(media = %media.display()))]
pub async fn run_chain(
    transcoder: &dyn Transcoder,
    steps: &[PostProcessor],
    media: PathBuf,
    ctx: &MediaContext<'_>,
) -> Result<ChainOutcome, TranscodeError> {
    let mut outcome = ChainOutcome {
        primary: media,
        extra_media: Vec::new(),
        warnings: Vec::new(),
    };

    for step in steps {
        debug!(step = step.name(), "running post-processor");
        let result = run_step(transcoder, step, &mut outcome, ctx).await;
        match result {
            Ok(()) => {}
            Err(e) if step.is_fatal() => return Err(e),
            Err(e) => {
                warn!(step = step.name(), error = %e, "post-processor failed, keeping media");
                outcome.warnings.push(format!("{}: {e}", step.name()));
            }
        }
    }

    info!(primary = %outcome.primary.display(), warnings = outcome.warnings.len(), "post-processing complete");
    Ok(outcome)
}

async fn run_step(
    transcoder: &dyn Transcoder,
    step: &PostProcessor,
    outcome: &mut ChainOutcome,
    ctx: &MediaContext<'_>,
) -> Result<(), TranscodeError> {
    let input = outcome.primary.clone();
    let ext = extension_of(&input);

    match step {
        PostProcessor::ExtractAudio {
            codec,
            quality,
            keep_video,
        } => {
            let target_ext = args::audio_extension(*codec, &ext);
            let target = input.with_extension(target_ext);
            let temp = temp_path(&target);
            let result = transcoder
                .transcode(step.name(), &args::extract_audio_args(&input, &temp, *codec, quality))
                .await;
            commit(step.name(), result, &temp, &target).await?;
            if target != input {
                if *keep_video {
                    outcome.extra_media.push(input);
                } else if let Err(e) = tokio::fs::remove_file(&input).await {
                    warn!(path = %input.display(), error = %e, "failed to remove source video");
                }
            }
            outcome.primary = target;
        }
        PostProcessor::ConvertAudio { codec } => {
            if *codec == AudioFormat::Best {
                return Ok(());
            }
            let temp = temp_path(&input);
            let result = transcoder
                .transcode(step.name(), &args::convert_audio_args(&input, &temp, *codec))
                .await;
            commit(step.name(), result, &temp, &input).await?;
        }
        PostProcessor::Metadata => {
            let tags = [
                ("title", ctx.title.unwrap_or_default()),
                ("artist", ctx.uploader.unwrap_or_default()),
                ("comment", ctx.description.unwrap_or_default()),
            ];
            let temp = temp_path(&input);
            let Some(step_args) = args::metadata_args(&input, &temp, &tags) else {
                return Ok(());
            };
            let result = transcoder.transcode(step.name(), &step_args).await;
            commit(step.name(), result, &temp, &input).await?;
        }
        PostProcessor::EmbedThumbnail => {
            let Some(thumbnail) = ctx.thumbnail else {
                outcome
                    .warnings
                    .push("embed_thumbnail: no thumbnail available".to_string());
                return Ok(());
            };
            if !args::supports_cover_art(&ext) {
                outcome
                    .warnings
                    .push(format!("embed_thumbnail: .{ext} cannot carry cover art"));
                return Ok(());
            }
            let temp = temp_path(&input);
            let result = transcoder
                .transcode(
                    step.name(),
                    &args::embed_thumbnail_args(&input, thumbnail, &temp, &ext),
                )
                .await;
            commit(step.name(), result, &temp, &input).await?;
        }
        PostProcessor::EmbedSubtitles { langs } => {
            let tracks: Vec<(String, &Path)> = ctx
                .subtitles
                .iter()
                .filter(|(lang, _)| langs.is_empty() || langs.contains(lang))
                .map(|(lang, path)| (lang.clone(), path.as_path()))
                .collect();
            if tracks.is_empty() {
                outcome
                    .warnings
                    .push("embed_subtitles: no subtitle tracks available".to_string());
                return Ok(());
            }
            let Some(codec) = args::subtitle_codec(&ext) else {
                outcome
                    .warnings
                    .push(format!("embed_subtitles: .{ext} cannot carry subtitles"));
                return Ok(());
            };
            let temp = temp_path(&input);
            let result = transcoder
                .transcode(
                    step.name(),
                    &args::embed_subtitles_args(&input, &tracks, &temp, codec),
                )
                .await;
            commit(step.name(), result, &temp, &input).await?;
        }
    }
    Ok(())
}

/// Moves a finished temporary output over `target`, or discards it on failure.
async fn commit(
    step: &str,
    result: Result<(), TranscodeError>,
    temp: &Path,
    target: &Path,
) -> Result<(), TranscodeError> {
    if let Err(e) = result {
        let _ = tokio::fs::remove_file(temp).await;
        return Err(e);
    }
    ensure_output(step, temp).await?;
    tokio::fs::rename(temp, target)
        .await
        .map_err(|e| TranscodeError::io(target, e))
}

async fn ensure_output(step: &str, path: &Path) -> Result<(), TranscodeError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.len() > 0 => Ok(()),
        _ => Err(TranscodeError::MissingOutput {
            step: step.to_string(),
            path: path.to_path_buf(),
        }),
    }
}

/// `dir/name.ext` becomes `dir/name.temp.ext`.
fn temp_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (stem, ext) = split_extension(&name);
    target.with_file_name(format!("{stem}.temp{ext}"))
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}
