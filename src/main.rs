//! CLI entry point for unidl.

use std::io::{self, IsTerminal};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use unidl_core::{BootstrappedToolchain, EngineConfig, MediaService};

mod cli;
mod progress_ui;

use cli::Args;
use progress_ui::spawn_progress_ui;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let mut config = EngineConfig::from_env().context("invalid UNIDL_* configuration")?;
    if let Some(retries) = args.retries {
        config.retry_attempts = retries;
    }
    if args.no_check_internet {
        config.check_internet = false;
    }

    let toolchain = Arc::new(BootstrappedToolchain::from_config(&config)?);

    if args.check_deps {
        return check_deps(&toolchain).await;
    }

    let service = MediaService::new(config, toolchain);

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            ctrl_c_cancel.cancel();
        }
    });

    let handle = service.start(args.to_request(), &cancel).await?;
    info!(job_id = %handle.job_id(), "Job started");

    let use_spinner = !args.quiet && io::stderr().is_terminal();
    let (ui, stop) = spawn_progress_ui(
        use_spinner,
        Arc::clone(service.tracker()),
        handle.job_id().clone(),
    );

    let result = handle.wait().await;
    stop.store(true, Ordering::SeqCst);
    if let Some(ui) = ui {
        let _ = ui.await;
    }

    let handoff = match result {
        Ok(handoff) => handoff,
        Err(e) => {
            error!(kind = ?e.kind(), error = %e, "Download failed");
            return Err(e.into());
        }
    };

    for warning in handoff.warnings() {
        warn!(warning = %warning, "Job warning");
    }

    let copied = handoff.persist_to(&args.output_dir).await;
    let quality = handoff.quality_label().to_string();
    let attempts = handoff.attempts();
    handoff.release().await;
    let copied = copied.context("failed to copy artifacts to the output directory")?;

    for path in &copied {
        info!(path = %path.display(), "Saved");
    }
    info!(
        quality = %quality,
        attempts,
        files = copied.len(),
        "Download complete"
    );

    Ok(())
}

async fn check_deps(toolchain: &BootstrappedToolchain) -> Result<()> {
    for bootstrapper in [toolchain.ytdlp(), toolchain.ffmpeg()] {
        let ready = bootstrapper.ensure_ready().await?;
        info!(
            binary = bootstrapper.spec().name(),
            path = %ready.path.display(),
            version = %ready.version,
            "Dependency ready"
        );
    }
    Ok(())
}
