pub mod probe;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::console::Console;
use crate::supervisor::{ManagedService, ServiceDescriptor};
use probe::{HostEvent, HostProbe};

/// Watches the host mail client and ties the conditional worker's lifetime to
/// its presence.
///
/// The monitor is the only owner of the conditional worker's handle and the
/// only writer of the shared presence flag. Push events give fast reactions;
/// the per-iteration enumeration poll is ground truth and self-heals any
/// missed event within one interval.
pub struct LifecycleMonitor<P: HostProbe> {
    probe: P,
    worker: ServiceDescriptor,
    presence: Arc<AtomicBool>,
    shutdown: watch::Receiver<bool>,
    console: Console,
    poll: Duration,
    backoff: Duration,
    stop_grace: Duration,
    child: Option<ManagedService>,
}

impl<P: HostProbe> LifecycleMonitor<P> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        probe: P,
        worker: ServiceDescriptor,
        presence: Arc<AtomicBool>,
        shutdown: watch::Receiver<bool>,
        console: Console,
        poll: Duration,
        backoff: Duration,
        stop_grace: Duration,
    ) -> Self {
        LifecycleMonitor {
            probe,
            worker,
            presence,
            shutdown,
            console,
            poll,
            backoff,
            stop_grace,
            child: None,
        }
    }

    /// Run until the shutdown signal flips. Never panics the process; any
    /// failure is logged and the loop keeps going.
    pub async fn run(mut self) {
        if self.probe.subscribed() {
            info!("Host event subscription active (instant notifications)");
        } else {
            info!("Host event subscription unavailable; falling back to polling only");
        }

        // initial state sync
        match self.probe.enumerate() {
            Ok(up) => {
                self.set_presence(up);
                info!(
                    "Initial host state: {}",
                    if up { "RUNNING" } else { "NOT RUNNING" }
                );
                if up {
                    self.start_worker();
                }
            }
            Err(e) => warn!("Initial host check failed: {e:#}"),
        }

        'main: while !*self.shutdown.borrow() {
            // push events first; a stop always wins immediately
            let mut drained = 0;
            while let Some(event) = self.probe.try_event() {
                match event {
                    HostEvent::Stopped => {
                        info!("Host STOP detected (event)");
                        self.set_presence(false);
                        self.stop_worker().await;
                    }
                    HostEvent::Started => {
                        info!("Host START detected (event)");
                        self.set_presence(true);
                        if self.child.is_none() {
                            self.start_worker();
                        }
                    }
                }
                drained += 1;
                if drained >= 16 {
                    break;
                }
            }

            // enumeration is ground truth; reconcile even when events arrived
            match self.probe.enumerate() {
                Ok(up) if up != self.presence.load(Ordering::SeqCst) => {
                    self.set_presence(up);
                    if up {
                        info!("Host RUNNING detected (poll)");
                        if self.child.is_none() {
                            self.start_worker();
                        }
                    } else {
                        info!("Host NOT RUNNING detected (poll)");
                        self.stop_worker().await;
                    }
                }
                Ok(_) => {}
                Err(e) => debug!("Host enumeration failed, assuming unchanged: {e:#}"),
            }

            // worker crash handling: backoff, re-check presence, then relaunch
            let exited = self.child.as_mut().and_then(ManagedService::try_wait);
            if let Some(status) = exited {
                warn!("Worker exited with code {:?}", status.code());
                self.child = None;
                if self.presence.load(Ordering::SeqCst) {
                    info!("Restarting worker in {:?} (host is up)...", self.backoff);
                    tokio::select! {
                        _ = sleep(self.backoff) => {}
                        _ = self.shutdown.changed() => {}
                    }
                    if *self.shutdown.borrow() {
                        break 'main;
                    }
                    match self.probe.enumerate() {
                        Ok(false) => {
                            info!("Skipped worker restart - host went down");
                            self.set_presence(false);
                        }
                        // Ok(true), or unknown which means "assume unchanged"
                        _ => self.start_worker(),
                    }
                }
            }

            tokio::select! {
                _ = sleep(self.poll) => {}
                result = self.shutdown.changed() => {
                    if result.is_err() {
                        break 'main;
                    }
                }
            }
        }

        self.stop_worker().await;
        info!("Lifecycle monitor stopped");
    }

    fn set_presence(&self, up: bool) {
        self.presence.store(up, Ordering::SeqCst);
    }

    fn start_worker(&mut self) {
        match ManagedService::spawn(&self.worker, &self.console) {
            Ok(service) => {
                info!(
                    "Launched {} (pid {})",
                    self.worker.name,
                    service.pid().unwrap_or(0)
                );
                self.child = Some(service);
            }
            Err(e) => error!("Failed to launch {}: {e:#}", self.worker.name),
        }
    }

    async fn stop_worker(&mut self) {
        if let Some(child) = self.child.take() {
            child.stop(self.stop_grace, &self.console).await;
        }
    }
}
