use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use sysinfo::System;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// A host-application presence transition delivered over the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    Started,
    Stopped,
}

/// The two ways the monitor observes the host application: an optional push
/// channel and a ground-truth process-table scan.
pub trait HostProbe: Send {
    /// Whether a push subscription could be opened. Purely informational;
    /// the poll reconciliation runs either way.
    fn subscribed(&self) -> bool {
        false
    }

    /// Non-blocking check of the push channel. None when no event is pending
    /// or no subscription exists.
    fn try_event(&mut self) -> Option<HostEvent>;

    /// Direct process-table enumeration. An error means "unknown, assume
    /// unchanged".
    fn enumerate(&mut self) -> Result<bool>;
}

/// Real probe backed by sysinfo process enumeration.
///
/// This platform exposes no process start/stop trace feed, so the push channel
/// is always empty and the monitor runs in poll-only mode; the enumeration
/// poll is the ground truth regardless.
pub struct SysinfoProbe {
    system: System,
    process_name: String,
}

impl SysinfoProbe {
    pub fn new(process_name: impl Into<String>) -> Self {
        SysinfoProbe {
            system: System::new(),
            process_name: process_name.into(),
        }
    }
}

impl HostProbe for SysinfoProbe {
    fn try_event(&mut self) -> Option<HostEvent> {
        None
    }

    fn enumerate(&mut self) -> Result<bool> {
        self.system.refresh_processes();
        Ok(self
            .system
            .processes_by_name(&self.process_name)
            .next()
            .is_some())
    }
}

/// Channel-backed probe for tests and for frontends that can push start/stop
/// events. Enumeration reads a shared flag standing in for the process table,
/// so pushed events and ground truth can be driven independently.
pub struct ChannelProbe {
    events: UnboundedReceiver<HostEvent>,
    ground_truth: Arc<AtomicBool>,
}

/// Driver side of a [`ChannelProbe`].
#[derive(Clone)]
pub struct ProbeHandle {
    events: UnboundedSender<HostEvent>,
    ground_truth: Arc<AtomicBool>,
}

impl ChannelProbe {
    pub fn new() -> (Self, ProbeHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ground_truth = Arc::new(AtomicBool::new(false));
        (
            ChannelProbe {
                events: rx,
                ground_truth: ground_truth.clone(),
            },
            ProbeHandle {
                events: tx,
                ground_truth,
            },
        )
    }
}

impl ProbeHandle {
    /// Set the ground-truth process-table state.
    pub fn set_running(&self, up: bool) {
        self.ground_truth.store(up, Ordering::SeqCst);
    }

    /// Push one event on the subscription channel. Events and ground truth
    /// are deliberately independent so dropped/duplicated events can be
    /// simulated.
    pub fn push(&self, event: HostEvent) {
        let _ = self.events.send(event);
    }
}

impl HostProbe for ChannelProbe {
    fn subscribed(&self) -> bool {
        true
    }

    fn try_event(&mut self) -> Option<HostEvent> {
        self.events.try_recv().ok()
    }

    fn enumerate(&mut self) -> Result<bool> {
        Ok(self.ground_truth.load(Ordering::SeqCst))
    }
}
