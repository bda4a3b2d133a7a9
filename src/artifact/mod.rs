//! Artifact lifecycle: working directories, collection and handoff metadata.

mod workdir;

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument};

pub use workdir::WorkDir;

/// Errors from working-directory management and collection.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// Filesystem failure.
    #[error("IO error at {path}: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The job finished without producing a media file.
    #[error("no media file found in {dir}")]
    NoMedia {
        /// Working directory scanned.
        dir: PathBuf,
    },
}

impl ArtifactError {
    /// Creates an IO error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// One file produced by a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    /// Absolute path inside the working directory.
    pub path: PathBuf,
    /// File name.
    pub file_name: String,
    /// Declared content type.
    pub content_type: &'static str,
    /// Size in bytes.
    pub size: u64,
}

/// Everything a completed job hands off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactSet {
    /// Primary media file.
    pub primary: Artifact,
    /// Further media files (other playlist entries, kept video).
    pub extra_media: Vec<Artifact>,
    /// Side files: description, info JSON, thumbnail, subtitles.
    pub side_files: Vec<Artifact>,
}

impl ArtifactSet {
    /// All artifacts, primary first.
    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        std::iter::once(&self.primary)
            .chain(&self.extra_media)
            .chain(&self.side_files)
    }

    /// Total size of all artifacts.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.iter().map(|a| a.size).sum()
    }
}

/// Content type by file extension.
#[must_use]
pub fn content_type_for(path: &Path) -> &'static str {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    if name.ends_with(".info.json") || name.ends_with(".json") {
        return "application/json";
    }
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "opus" => "audio/opus",
        "ogg" | "oga" => "audio/ogg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "vtt" => "text/vtt",
        "srt" => "application/x-subrip",
        "description" => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Whether a file is media (as opposed to a side file).
#[must_use]
pub fn is_media_file(path: &Path) -> bool {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    matches!(
        ext.as_str(),
        "mp4" | "m4v" | "webm" | "mkv" | "mov" | "flv" | "avi" | "ts" | "mp3" | "m4a" | "opus"
            | "ogg" | "oga" | "wav" | "flac" | "aac" | "mka"
    )
}

/// Leftovers of interrupted steps that are never handed off.
fn is_transient_file(name: &str) -> bool {
    name.ends_with(".part") || name.ends_with(".ytdl") || name.contains(".temp.")
}

/// `Content-Disposition` value with an ASCII fallback and an RFC 5987 `filename*`.
#[must_use]
pub fn content_disposition(file_name: &str) -> String {
    let fallback: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
        urlencoding::encode(file_name)
    )
}

/// Scans a working directory into an [`ArtifactSet`].
///
/// `preferred` lists the engine's media outputs in order; the first one that
/// exists becomes the primary artifact. Other media files become extra
/// media, everything else a side file. Partial and temporary files are
/// skipped.
///
/// # Errors
///
/// Returns [`ArtifactError::NoMedia`] when no media file exists, or
/// [`ArtifactError::Io`] when the directory cannot be read.
#[instrument(level = "debug", skip(preferred), fields(dir = %dir.display()))]
pub async fn collect(dir: &Path, preferred: &[PathBuf]) -> Result<ArtifactSet, ArtifactError> {
    let mut media = Vec::new();
    let mut side_files = Vec::new();

    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| ArtifactError::io(dir, e))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| ArtifactError::io(dir, e))?
    {
        let path = entry.path();
        let metadata = entry
            .metadata()
            .await
            .map_err(|e| ArtifactError::io(&path, e))?;
        if !metadata.is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if is_transient_file(&file_name) {
            debug!(file = %file_name, "skipping partial file");
            continue;
        }
        let artifact = Artifact {
            content_type: content_type_for(&path),
            path,
            file_name,
            size: metadata.len(),
        };
        if is_media_file(&artifact.path) {
            media.push(artifact);
        } else {
            side_files.push(artifact);
        }
    }

    // Engine order first, then anything else by name.
    media.sort_by(|a, b| {
        let rank = |p: &Path| preferred.iter().position(|q| q == p).unwrap_or(usize::MAX);
        rank(&a.path)
            .cmp(&rank(&b.path))
            .then_with(|| a.file_name.cmp(&b.file_name))
    });
    side_files.sort_by(|a, b| a.file_name.cmp(&b.file_name));

    let mut media = media.into_iter();
    let primary = media.next().ok_or_else(|| ArtifactError::NoMedia {
        dir: dir.to_path_buf(),
    })?;
    let set = ArtifactSet {
        primary,
        extra_media: media.collect(),
        side_files,
    };
    debug!(
        primary = %set.primary.file_name,
        extra = set.extra_media.len(),
        side_files = set.side_files.len(),
        "artifacts collected"
    );
    Ok(set)
}
