pub mod service;

pub use service::{ManagedService, ServiceDescriptor};

use anyhow::{Result, bail};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::config::Settings;
use crate::console::Console;
use crate::monitor::LifecycleMonitor;
use crate::monitor::probe::SysinfoProbe;

pub const CONSUMER_SERVICE: &str = "ticket-reader";
pub const AWAKE_SERVICE: &str = "keep-awake";
pub const PRODUCER_SERVICE: &str = "mail-watcher";

/// Top-level process: owns the always-on services and the lifecycle monitor
/// task, and keeps both alive until an operator shutdown.
pub struct Supervisor {
    settings: Settings,
    /// Config file forwarded to every child so the whole suite reads one file.
    config_path: Option<PathBuf>,
    console: Console,
}

#[tokio::main]
pub async fn entry(settings: Settings, config_path: Option<PathBuf>) -> Result<()> {
    Supervisor::new(settings, config_path).run().await
}

impl Supervisor {
    pub fn new(settings: Settings, config_path: Option<PathBuf>) -> Self {
        Supervisor {
            settings,
            config_path,
            console: Console::new(),
        }
    }

    fn descriptor(&self, name: &str, subcommand: &str) -> Result<ServiceDescriptor> {
        let mut descriptor = ServiceDescriptor::subcommand(name, &[subcommand])?;
        if let Some(path) = &self.config_path {
            descriptor.args.push("--config".to_string());
            descriptor.args.push(path.display().to_string());
        }
        Ok(descriptor)
    }

    fn spawn_monitor(
        &self,
        presence: Arc<AtomicBool>,
        shutdown: watch::Receiver<bool>,
        worker: ServiceDescriptor,
    ) -> JoinHandle<()> {
        let timing = &self.settings.timing;
        let monitor = LifecycleMonitor::new(
            SysinfoProbe::new(&self.settings.host_process),
            worker,
            presence,
            shutdown,
            self.console.clone(),
            timing.monitor_poll(),
            timing.restart_backoff(),
            timing.stop_grace(),
        );
        tokio::spawn(monitor.run())
    }

    pub async fn run(self) -> Result<()> {
        let console = self.console.clone();
        console.line("system", "launching background services in a single console");
        console.line("system", &format!("  [{CONSUMER_SERVICE}]  drains the ticket queue and runs the job"));
        console.line("system", &format!("  [{AWAKE_SERVICE}]    holds the system awake"));
        console.line("system", &format!("  [{PRODUCER_SERVICE}]  watches mail while the host client runs"));

        let descriptors: HashMap<String, ServiceDescriptor> = [
            (
                CONSUMER_SERVICE.to_string(),
                self.descriptor(CONSUMER_SERVICE, "read")?,
            ),
            (
                AWAKE_SERVICE.to_string(),
                self.descriptor(AWAKE_SERVICE, "awake")?,
            ),
        ]
        .into();
        let worker = self.descriptor(PRODUCER_SERVICE, "watch")?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        });

        self.supervise(descriptors, worker, shutdown_rx).await
    }

    /// Launch the always-on services and run the health loop until `shutdown`
    /// flips. The conditional worker is handed to the lifecycle monitor and
    /// never touched here.
    pub async fn supervise(
        &self,
        descriptors: HashMap<String, ServiceDescriptor>,
        worker: ServiceDescriptor,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let console = self.console.clone();

        // launch every always-on service; a failed launch leaves the service
        // absent from the managed set rather than aborting the others
        let mut running: HashMap<String, ManagedService> = HashMap::new();
        for (name, descriptor) in &descriptors {
            match ManagedService::spawn(descriptor, &console) {
                Ok(service) => {
                    running.insert(name.clone(), service);
                }
                Err(e) => error!("Failed to launch {name}: {e:#}"),
            }
        }
        if running.is_empty() {
            bail!("no always-on service could be launched");
        }

        let presence = Arc::new(AtomicBool::new(false));
        let mut monitor =
            self.spawn_monitor(presence.clone(), shutdown.clone(), worker.clone());

        console.line("system", "all services launched; press Ctrl+C to stop");

        let mut tick = tokio::time::interval(self.settings.timing.health_tick());
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    // a closed channel counts as a shutdown request too
                    console.line("system", "shutdown requested");
                    break;
                }
                _ = tick.tick() => {
                    // a dead monitor task gets restarted; the conditional
                    // worker stays the monitor's job alone
                    if monitor.is_finished() {
                        warn!(
                            "Lifecycle monitor task died (host presence: {}); restarting it",
                            presence.load(Ordering::SeqCst)
                        );
                        monitor = self.spawn_monitor(
                            presence.clone(),
                            shutdown.clone(),
                            worker.clone(),
                        );
                    }

                    let dead: Vec<String> = running
                        .iter_mut()
                        .filter_map(|(name, service)| {
                            service.try_wait().map(|status| {
                                warn!(
                                    "{name} exited unexpectedly with code {:?}",
                                    status.code()
                                );
                                name.clone()
                            })
                        })
                        .collect();
                    for name in dead {
                        running.remove(&name);
                        let Some(descriptor) = descriptors.get(&name) else {
                            continue;
                        };
                        match ManagedService::spawn(descriptor, &console) {
                            Ok(service) => {
                                console.line(
                                    "system",
                                    &format!(
                                        "{name} restarted (pid {})",
                                        service.pid().unwrap_or(0)
                                    ),
                                );
                                running.insert(name, service);
                            }
                            Err(e) => error!("Failed to restart {name}: {e:#}"),
                        }
                    }
                }
            }
        }

        // ordered teardown: the monitor shares the shutdown channel, so it is
        // already stopping the conditional worker; wait for it, then stop each
        // always-on service
        if tokio::time::timeout(std::time::Duration::from_secs(10), monitor)
            .await
            .is_err()
        {
            warn!("Lifecycle monitor did not stop in time");
        }
        let grace = self.settings.timing.stop_grace();
        for (_, service) in running.drain() {
            service.stop(grace, &console).await;
        }
        console.line("system", "all services stopped");
        Ok(())
    }
}

/// Resolves when the operator requests shutdown (Ctrl+C, or SIGTERM on unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
