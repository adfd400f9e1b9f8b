use claimwatch::console::Console;
use claimwatch::monitor::LifecycleMonitor;
use claimwatch::monitor::probe::{ChannelProbe, HostEvent};
use claimwatch::supervisor::ServiceDescriptor;
use serial_test::serial;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

const POLL: Duration = Duration::from_millis(20);
const BACKOFF: Duration = Duration::from_millis(40);
const GRACE: Duration = Duration::from_millis(300);

/// Worker that records each launch in `log`, then stays alive.
fn long_worker(log: &Path) -> ServiceDescriptor {
    ServiceDescriptor::new(
        "worker",
        "/bin/sh",
        vec![
            "-c".to_string(),
            format!("echo launched >> {}; exec sleep 30", log.display()),
        ],
    )
}

/// Worker that records its launch and exits immediately (a "crash").
fn crashing_worker(log: &Path) -> ServiceDescriptor {
    ServiceDescriptor::new(
        "worker",
        "/bin/sh",
        vec![
            "-c".to_string(),
            format!("echo launched >> {}; exit 3", log.display()),
        ],
    )
}

fn launches(log: &Path) -> usize {
    fs::read_to_string(log)
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

struct Harness {
    presence: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

fn start_monitor(probe: ChannelProbe, worker: ServiceDescriptor) -> Harness {
    let presence = Arc::new(AtomicBool::new(false));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor = LifecycleMonitor::new(
        probe,
        worker,
        presence.clone(),
        shutdown_rx,
        Console::new(),
        POLL,
        BACKOFF,
        GRACE,
    );
    Harness {
        presence,
        shutdown: shutdown_tx,
        task: tokio::spawn(monitor.run()),
    }
}

impl Harness {
    async fn finish(self) {
        let _ = self.shutdown.send(true);
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("monitor did not stop in time")
            .expect("monitor task panicked");
    }
}

#[tokio::test]
#[serial]
async fn worker_launches_only_once_host_appears() {
    let tmp = tempfile::tempdir().unwrap();
    let log = tmp.path().join("launches");
    let (probe, handle) = ChannelProbe::new();

    let harness = start_monitor(probe, long_worker(&log));

    // host absent at startup: nothing launched
    sleep(Duration::from_millis(100)).await;
    assert_eq!(launches(&log), 0);
    assert!(!harness.presence.load(Ordering::SeqCst));

    // enumeration flips to present: launched within one poll interval
    handle.set_running(true);
    sleep(Duration::from_millis(200)).await;
    assert_eq!(launches(&log), 1);
    assert!(harness.presence.load(Ordering::SeqCst));

    harness.finish().await;
}

#[tokio::test]
#[serial]
async fn presence_converges_to_ground_truth_despite_bad_events() {
    let tmp = tempfile::tempdir().unwrap();
    let log = tmp.path().join("launches");
    let (probe, handle) = ChannelProbe::new();
    handle.set_running(true);

    let harness = start_monitor(probe, long_worker(&log));
    sleep(Duration::from_millis(150)).await;
    assert_eq!(launches(&log), 1);

    // a spurious STOP event while the process table still shows the host:
    // the poll reconciliation must win within one interval
    handle.push(HostEvent::Stopped);
    sleep(Duration::from_millis(300)).await;
    assert!(harness.presence.load(Ordering::SeqCst));
    assert!(launches(&log) >= 2, "worker should have been relaunched");

    harness.finish().await;
}

#[tokio::test]
#[serial]
async fn missed_stop_event_heals_through_polling() {
    let tmp = tempfile::tempdir().unwrap();
    let log = tmp.path().join("launches");
    let (probe, handle) = ChannelProbe::new();
    handle.set_running(true);

    let harness = start_monitor(probe, long_worker(&log));
    sleep(Duration::from_millis(150)).await;
    assert!(harness.presence.load(Ordering::SeqCst));

    // the host dies but no stop event is ever delivered
    handle.set_running(false);
    sleep(Duration::from_millis(400)).await;
    assert!(!harness.presence.load(Ordering::SeqCst));
    assert_eq!(launches(&log), 1, "no relaunch while the host is down");

    harness.finish().await;
}

#[tokio::test]
#[serial]
async fn crashed_worker_is_relaunched_after_backoff_while_host_is_up() {
    let tmp = tempfile::tempdir().unwrap();
    let log = tmp.path().join("launches");
    let (probe, handle) = ChannelProbe::new();
    handle.set_running(true);

    let harness = start_monitor(probe, crashing_worker(&log));
    sleep(Duration::from_millis(500)).await;
    assert!(
        launches(&log) >= 2,
        "worker should be relaunched after each crash"
    );

    harness.finish().await;
}

#[tokio::test]
#[serial]
async fn shutdown_stops_worker_and_loop() {
    let tmp = tempfile::tempdir().unwrap();
    let log = tmp.path().join("launches");
    let (probe, handle) = ChannelProbe::new();
    handle.set_running(true);

    let harness = start_monitor(probe, long_worker(&log));
    sleep(Duration::from_millis(150)).await;
    assert_eq!(launches(&log), 1);

    // finish() asserts the loop exits promptly, which requires the worker
    // to have been stopped
    harness.finish().await;
}
