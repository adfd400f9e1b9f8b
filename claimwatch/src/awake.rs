use anyhow::Result;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::Settings;

/// Capability for holding the system awake while the suite runs.
///
/// The real thing needs an OS execution-state API; where none exists the hold
/// is a no-op and the service only documents its absence.
pub trait SleepHold {
    fn acquire(&mut self) -> Result<()>;
    fn release(&mut self);
}

/// No-op hold for platforms without an execution-state API.
#[derive(Default)]
pub struct NoopHold {
    held: bool,
}

impl SleepHold for NoopHold {
    fn acquire(&mut self) -> Result<()> {
        if !self.held {
            debug!("No execution-state API on this platform; hold is a no-op");
            self.held = true;
        }
        Ok(())
    }

    fn release(&mut self) {
        self.held = false;
    }
}

#[tokio::main]
pub async fn entry(settings: Settings) -> Result<()> {
    let mut hold = NoopHold::default();
    run_with(&mut hold, settings.timing.awake_refresh()).await
}

/// Hold the system awake, re-asserting every `refresh`, until interrupted.
pub async fn run_with<H: SleepHold>(hold: &mut H, refresh: Duration) -> Result<()> {
    info!("Keep-awake: ON (system + display held awake)");
    if let Err(e) = hold.acquire() {
        warn!("Failed to acquire sleep hold: {e:#}");
    }
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    loop {
        tokio::select! {
            _ = &mut interrupt => break,
            _ = sleep(refresh) => {
                // re-assert in case the hold was dropped externally
                if let Err(e) = hold.acquire() {
                    warn!("Failed to refresh sleep hold: {e:#}");
                }
            }
        }
    }
    hold.release();
    info!("Keep-awake: OFF");
    Ok(())
}
