use anyhow::{Context, Result};
use std::fs;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info};

use crate::config::{JobSettings, Settings};
use crate::ticket;

#[tokio::main]
pub async fn entry(settings: Settings) -> Result<()> {
    run(settings).await
}

/// Drain the ticket queue until interrupted: one ticket, one job run, oldest
/// first, never two jobs at once.
pub async fn run(settings: Settings) -> Result<()> {
    fs::create_dir_all(&settings.queue_dir).with_context(|| {
        format!("Failed to create queue dir {}", settings.queue_dir.display())
    })?;
    info!("Watching queue: {}", settings.queue_dir.display());
    info!("Each ticket runs the job once");

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    loop {
        if let Err(e) = drain_one(&settings).await {
            error!("Runner loop error: {e:#}");
            sleep(Duration::from_secs(2)).await;
        }
        tokio::select! {
            _ = &mut interrupt => break,
            _ = sleep(settings.timing.consumer_poll()) => {}
        }
    }
    info!("Stopping runner");
    Ok(())
}

/// Take at most one ticket and run the downstream job for it. The ticket is
/// deleted before the job starts so a crash mid-job cannot replay it.
pub async fn drain_one(settings: &Settings) -> Result<()> {
    let Some(path) = ticket::next(&settings.queue_dir)? else {
        return Ok(());
    };
    info!(
        "Ticket detected: {}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("?")
    );
    if !ticket::claim(&path) {
        // someone else consumed it first
        return Ok(());
    }
    run_job(&settings.job).await;
    Ok(())
}

/// Invoke the downstream job synchronously and report its exit code. A missing
/// executable is logged and the iteration skipped; the ticket is already
/// consumed by then, which is the accepted work-loss case.
async fn run_job(job: &JobSettings) {
    if !job.program.exists() {
        error!("Job executable not found: {}", job.program.display());
        return;
    }
    info!("Running job: {}", job.program.display());
    let mut cmd = tokio::process::Command::new(&job.program);
    cmd.args(&job.args);
    // bare program names have an empty parent; leave the cwd alone then
    if let Some(cwd) = job.cwd.as_deref().or_else(|| job.program.parent()) {
        if !cwd.as_os_str().is_empty() {
            cmd.current_dir(cwd);
        }
    }
    match cmd.status().await {
        Ok(status) => info!("Job exit code: {}", status.code().unwrap_or(-1)),
        Err(e) => error!("Failed to run job: {e:#}"),
    }
}
