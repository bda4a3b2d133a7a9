//! Per-job progress tracking.
//!
//! [`ProgressTracker`] maps job identifiers to progress entries. Each entry is
//! a set of atomic counters, so readers take snapshots without ever blocking
//! the job that writes them, and jobs never contend with each other on a
//! global lock (entries live in a sharded [`DashMap`]).
//!
//! Writes go through a [`ProgressReporter`], handed out once per job by
//! [`ProgressTracker::register`] and deliberately not `Clone`: the engine
//! task that owns it is the only writer for that job.

use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, trace};

use crate::error::ErrorKind;
use crate::job::JobId;

/// Engine state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum JobState {
    /// Registered, waiting for a job slot.
    Pending = 0,
    /// Extracting or transferring media.
    Fetching = 1,
    /// Waiting to retry after a transient failure.
    Retrying = 2,
    /// Running post-processors.
    PostProcessing = 3,
    /// Finished successfully.
    Complete = 4,
    /// Finished with an error.
    Failed = 5,
}

impl JobState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Pending,
            1 => Self::Fetching,
            2 => Self::Retrying,
            3 => Self::PostProcessing,
            4 => Self::Complete,
            _ => Self::Failed,
        }
    }

    /// Whether no further transitions are possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Coarse phase exposed to status callers.
    #[must_use]
    pub fn phase(self) -> Phase {
        match self {
            Self::Pending | Self::Fetching | Self::Retrying => Phase::Downloading,
            Self::PostProcessing => Phase::PostProcessing,
            Self::Complete => Phase::Done,
            Self::Failed => Phase::Failed,
        }
    }
}

/// Coarse job phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    /// Extraction or transfer in progress.
    Downloading,
    /// Post-processors running.
    PostProcessing,
    /// Complete.
    Done,
    /// Failed.
    Failed,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Downloading => "downloading",
            Self::PostProcessing => "post-processing",
            Self::Done => "done",
            Self::Failed => "failed",
        })
    }
}

/// One progress update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressDelta {
    /// State transition.
    State(JobState),
    /// Current attempt number (1-based).
    Attempt(u32),
    /// Current playlist entry (1-based) out of the selected entries.
    Entry {
        /// Entry being processed.
        index: u32,
        /// Selected entries.
        total: u32,
    },
    /// Fragments written so far for the current stream.
    Fragments {
        /// Fragments written.
        done: u64,
        /// Fragments in the stream, when known.
        total: Option<u64>,
    },
    /// Bytes transferred so far for the job, and the expected total if known.
    Bytes {
        /// Bytes written.
        transferred: u64,
        /// Expected bytes.
        total: Option<u64>,
    },
    /// Terminal failure with its classification.
    Failed {
        /// Error classification.
        kind: ErrorKind,
        /// Error message.
        message: String,
    },
}

/// Point-in-time view of a job's progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    /// Job identifier.
    pub job_id: JobId,
    /// Engine state.
    pub state: JobState,
    /// Coarse phase.
    pub phase: Phase,
    /// Current attempt (1-based, 0 before the first attempt).
    pub attempt: u32,
    /// Current playlist entry (1-based, 0 before the first entry).
    pub entry_index: u32,
    /// Selected playlist entries (0 until extraction finished).
    pub entry_total: u32,
    /// Fragments written for the current stream.
    pub fragment_index: u64,
    /// Fragments in the current stream, when fragmented.
    pub fragment_total: Option<u64>,
    /// Bytes transferred.
    pub bytes_transferred: u64,
    /// Expected bytes, when declared.
    pub bytes_total: Option<u64>,
    /// Failure classification, once failed.
    pub error_kind: Option<ErrorKind>,
    /// Failure message, once failed.
    pub error: Option<String>,
    /// Time since registration.
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    /// Completed fraction in `0.0..=1.0`, when the total is known.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> Option<f64> {
        if let Some(total) = self.fragment_total.filter(|t| *t > 0) {
            return Some((self.fragment_index as f64 / total as f64).min(1.0));
        }
        self.bytes_total
            .filter(|t| *t > 0)
            .map(|total| (self.bytes_transferred as f64 / total as f64).min(1.0))
    }
}

fn serialize_secs<S: serde::Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(value.as_secs_f64())
}

/// Errors from tracker lookups and registration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProgressError {
    /// The job is unknown or was already removed.
    #[error("job {0} not found")]
    NotFound(JobId),

    /// A reporter was already handed out for this job.
    #[error("job {0} is already registered")]
    AlreadyRegistered(JobId),
}

/// Sentinel for "unknown" in the optional counters.
const UNKNOWN: u64 = u64::MAX;

#[derive(Debug)]
struct ProgressEntry {
    state: AtomicU8,
    attempt: AtomicU32,
    entry_index: AtomicU32,
    entry_total: AtomicU32,
    fragment_index: AtomicU64,
    fragment_total: AtomicU64,
    bytes_transferred: AtomicU64,
    bytes_total: AtomicU64,
    failure: OnceLock<(ErrorKind, String)>,
    started: Instant,
}

impl ProgressEntry {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(JobState::Pending as u8),
            attempt: AtomicU32::new(0),
            entry_index: AtomicU32::new(0),
            entry_total: AtomicU32::new(0),
            fragment_index: AtomicU64::new(0),
            fragment_total: AtomicU64::new(UNKNOWN),
            bytes_transferred: AtomicU64::new(0),
            bytes_total: AtomicU64::new(UNKNOWN),
            failure: OnceLock::new(),
            started: Instant::now(),
        }
    }

    fn state(&self) -> JobState {
        JobState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn apply(&self, delta: ProgressDelta) -> bool {
        if self.state().is_terminal() {
            return false;
        }
        match delta {
            ProgressDelta::State(state) => {
                self.state.store(state as u8, Ordering::Release);
            }
            ProgressDelta::Attempt(attempt) => self.attempt.store(attempt, Ordering::Release),
            ProgressDelta::Entry { index, total } => {
                self.entry_index.store(index, Ordering::Release);
                self.entry_total.store(total, Ordering::Release);
                self.fragment_index.store(0, Ordering::Release);
                self.fragment_total.store(UNKNOWN, Ordering::Release);
            }
            ProgressDelta::Fragments { done, total } => {
                self.fragment_index.store(done, Ordering::Release);
                self.fragment_total
                    .store(total.unwrap_or(UNKNOWN), Ordering::Release);
            }
            ProgressDelta::Bytes { transferred, total } => {
                self.bytes_transferred.store(transferred, Ordering::Release);
                self.bytes_total
                    .store(total.unwrap_or(UNKNOWN), Ordering::Release);
            }
            ProgressDelta::Failed { kind, message } => {
                let _ = self.failure.set((kind, message));
                self.state.store(JobState::Failed as u8, Ordering::Release);
            }
        }
        true
    }

    fn snapshot(&self, job_id: &JobId) -> ProgressSnapshot {
        let state = self.state();
        let known = |value: u64| (value != UNKNOWN).then_some(value);
        let failure = self.failure.get();
        ProgressSnapshot {
            job_id: job_id.clone(),
            state,
            phase: state.phase(),
            attempt: self.attempt.load(Ordering::Acquire),
            entry_index: self.entry_index.load(Ordering::Acquire),
            entry_total: self.entry_total.load(Ordering::Acquire),
            fragment_index: self.fragment_index.load(Ordering::Acquire),
            fragment_total: known(self.fragment_total.load(Ordering::Acquire)),
            bytes_transferred: self.bytes_transferred.load(Ordering::Acquire),
            bytes_total: known(self.bytes_total.load(Ordering::Acquire)),
            error_kind: failure.map(|(kind, _)| *kind),
            error: failure.map(|(_, message)| message.clone()),
            elapsed: self.started.elapsed(),
        }
    }
}

/// Concurrency-safe map from job identifier to progress.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    entries: DashMap<JobId, Arc<ProgressEntry>>,
}

impl ProgressTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a job and returns its single writer.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::AlreadyRegistered`] when the identifier is in use.
    pub fn register(self: &Arc<Self>, job_id: JobId) -> Result<ProgressReporter, ProgressError> {
        match self.entries.entry(job_id.clone()) {
            MapEntry::Occupied(_) => Err(ProgressError::AlreadyRegistered(job_id)),
            MapEntry::Vacant(vacant) => {
                let entry = Arc::new(ProgressEntry::new());
                vacant.insert(Arc::clone(&entry));
                debug!(job_id = %job_id, "progress entry registered");
                Ok(ProgressReporter {
                    entry,
                    tracker: Arc::clone(self),
                    job_id,
                })
            }
        }
    }

    /// Applies `delta` to a job. Returns `false` for unknown or terminal jobs.
    pub fn update(&self, job_id: &JobId, delta: ProgressDelta) -> bool {
        let Some(entry) = self.entries.get(job_id).map(|e| Arc::clone(e.value())) else {
            return false;
        };
        entry.apply(delta)
    }

    /// Current snapshot of a job.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::NotFound`] once the job was removed.
    pub fn snapshot(&self, job_id: &JobId) -> Result<ProgressSnapshot, ProgressError> {
        self.entries
            .get(job_id)
            .map(|entry| entry.snapshot(job_id))
            .ok_or_else(|| ProgressError::NotFound(job_id.clone()))
    }

    /// Snapshots of every tracked job, ordered by identifier.
    #[must_use]
    pub fn list(&self) -> Vec<ProgressSnapshot> {
        let mut all: Vec<_> = self
            .entries
            .iter()
            .map(|item| item.value().snapshot(item.key()))
            .collect();
        all.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        all
    }

    /// Removes a job. Returns whether it was present.
    pub fn remove(&self, job_id: &JobId) -> bool {
        let removed = self.entries.remove(job_id).is_some();
        if removed {
            debug!(job_id = %job_id, "progress entry removed");
        }
        removed
    }

    /// Number of tracked jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no job is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The single writer of one job's progress.
#[derive(Debug)]
pub struct ProgressReporter {
    entry: Arc<ProgressEntry>,
    tracker: Arc<ProgressTracker>,
    job_id: JobId,
}

impl ProgressReporter {
    /// Job this reporter writes for.
    #[must_use]
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Tracker this reporter writes into.
    #[must_use]
    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.tracker
    }

    /// Applies a delta. Writes after removal are dropped.
    pub fn report(&self, delta: ProgressDelta) {
        trace!(job_id = %self.job_id, ?delta, "progress");
        self.entry.apply(delta);
    }

    /// Records a state transition.
    pub fn state(&self, state: JobState) {
        self.report(ProgressDelta::State(state));
    }

    /// Records the terminal failure.
    pub fn fail(&self, kind: ErrorKind, message: impl Into<String>) {
        self.report(ProgressDelta::Failed {
            kind,
            message: message.into(),
        });
    }

    /// Current state of the job.
    #[must_use]
    pub fn current_state(&self) -> JobState {
        self.entry.state()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn tracker() -> Arc<ProgressTracker> {
        Arc::new(ProgressTracker::new())
    }

    #[test]
    fn test_register_and_snapshot() {
        let tracker = tracker();
        let reporter = tracker.register(JobId::from("a")).unwrap();
        reporter.state(JobState::Fetching);
        reporter.report(ProgressDelta::Fragments { done: 3, total: Some(12) });
        reporter.report(ProgressDelta::Bytes { transferred: 300, total: None });

        let snapshot = tracker.snapshot(&JobId::from("a")).unwrap();
        assert_eq!(snapshot.state, JobState::Fetching);
        assert_eq!(snapshot.phase, Phase::Downloading);
        assert_eq!(snapshot.fragment_index, 3);
        assert_eq!(snapshot.fragment_total, Some(12));
        assert_eq!(snapshot.bytes_total, None);
        assert!((snapshot.fraction().unwrap() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_second_registration_rejected() {
        let tracker = tracker();
        let _reporter = tracker.register(JobId::from("a")).unwrap();
        assert_eq!(
            tracker.register(JobId::from("a")).unwrap_err(),
            ProgressError::AlreadyRegistered(JobId::from("a"))
        );
    }

    #[test]
    fn test_terminal_state_is_final() {
        let tracker = tracker();
        let reporter = tracker.register(JobId::from("a")).unwrap();
        reporter.fail(ErrorKind::Content, "gone");
        reporter.state(JobState::Fetching);
        assert!(!tracker.update(&JobId::from("a"), ProgressDelta::Attempt(2)));

        let snapshot = tracker.snapshot(&JobId::from("a")).unwrap();
        assert_eq!(snapshot.state, JobState::Failed);
        assert_eq!(snapshot.phase, Phase::Failed);
        assert_eq!(snapshot.error_kind, Some(ErrorKind::Content));
        assert_eq!(snapshot.error.as_deref(), Some("gone"));
    }

    #[test]
    fn test_removed_job_is_not_found() {
        let tracker = tracker();
        let reporter = tracker.register(JobId::from("a")).unwrap();
        assert!(tracker.remove(&JobId::from("a")));
        assert!(!tracker.remove(&JobId::from("a")));
        assert_eq!(
            tracker.snapshot(&JobId::from("a")).unwrap_err(),
            ProgressError::NotFound(JobId::from("a"))
        );
        // A late write from the engine is harmless.
        reporter.state(JobState::Complete);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_list_is_ordered() {
        let tracker = tracker();
        let _b = tracker.register(JobId::from("b")).unwrap();
        let _a = tracker.register(JobId::from("a")).unwrap();
        let ids: Vec<_> = tracker.list().into_iter().map(|s| s.job_id.to_string()).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[tokio::test]
    async fn test_readers_observe_writer_concurrently() {
        let tracker = tracker();
        let reporter = tracker.register(JobId::from("job")).unwrap();
        let writer = tokio::spawn(async move {
            for done in 1..=1000u64 {
                reporter.report(ProgressDelta::Fragments { done, total: Some(1000) });
                tokio::task::yield_now().await;
            }
            reporter.state(JobState::Complete);
        });

        let mut last = 0;
        loop {
            let snapshot = tracker.snapshot(&JobId::from("job")).unwrap();
            assert!(snapshot.fragment_index >= last, "progress went backwards");
            last = snapshot.fragment_index;
            if snapshot.state == JobState::Complete {
                break;
            }
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();
        assert_eq!(last, 1000);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(JobState::PostProcessing.phase().to_string(), "post-processing");
        assert_eq!(JobState::Retrying.phase().to_string(), "downloading");
    }
}
