//! Progress UI (spinner) for a running job.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use unidl_core::{JobId, JobState, ProgressSnapshot, ProgressTracker};

/// Spawns the progress UI (spinner) when requested.
/// Returns (handle, stop) so the caller can signal stop and await the handle.
/// When `use_spinner` is false, returns (None, stop) with stop already true.
pub(crate) fn spawn_progress_ui(
    use_spinner: bool,
    tracker: Arc<ProgressTracker>,
    job_id: JobId,
) -> (Option<tokio::task::JoinHandle<()>>, Arc<AtomicBool>) {
    if !use_spinner {
        return (None, Arc::new(AtomicBool::new(true)));
    }
    let stop = Arc::new(AtomicBool::new(false));
    let handle = spawn_spinner_inner(tracker, job_id, Arc::clone(&stop));
    (Some(handle), stop)
}

fn spawn_spinner_inner(
    tracker: Arc<ProgressTracker>,
    job_id: JobId,
    stop: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(Duration::from_millis(100));

        while !stop.load(Ordering::SeqCst) {
            if let Ok(snapshot) = tracker.snapshot(&job_id) {
                spinner.set_message(describe(&snapshot));
            }
            tokio::time::sleep(Duration::from_millis(120)).await;
        }

        spinner.finish_and_clear();
    })
}

fn describe(snapshot: &ProgressSnapshot) -> String {
    let entry = if snapshot.entry_total > 1 {
        format!("[{}/{}] ", snapshot.entry_index, snapshot.entry_total)
    } else {
        String::new()
    };
    let percent = snapshot
        .fraction()
        .map(|f| format!(" {:.0}%", f * 100.0))
        .unwrap_or_default();
    let action = match snapshot.state {
        JobState::Pending => "Waiting for a job slot",
        JobState::Fetching => "Downloading",
        JobState::Retrying => "Retrying",
        JobState::PostProcessing => "Post-processing",
        JobState::Complete => "Done",
        JobState::Failed => "Failed",
    };
    let attempt = if snapshot.attempt > 1 {
        format!(" (attempt {})", snapshot.attempt)
    } else {
        String::new()
    };
    format!(
        "{entry}{action}{percent}{attempt} - {:.1} MiB",
        mib(snapshot.bytes_transferred)
    )
}

#[allow(clippy::cast_precision_loss)]
fn mib(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}
