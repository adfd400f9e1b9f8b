use anyhow::{Context, Result};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::console::Console;

/// Static description of one managed service: how to launch it and how to
/// label its output. Immutable after startup.
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    pub name: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        ServiceDescriptor {
            name: name.into(),
            program: program.into(),
            args,
            cwd: None,
            env: Vec::new(),
        }
    }

    /// Descriptor that re-invokes this binary with a subcommand, so every
    /// service runs out of the same executable.
    pub fn subcommand(name: &str, args: &[&str]) -> Result<Self> {
        let exe = std::env::current_exe().context("Failed to resolve current executable")?;
        Ok(ServiceDescriptor::new(
            name,
            exe,
            args.iter().map(|a| a.to_string()).collect(),
        ))
    }
}

/// A live child process plus its dedicated output pump tasks.
///
/// Every handle is owned by exactly one manager: the supervisor for always-on
/// services, the lifecycle monitor for the conditional worker. `kill_on_drop`
/// is set so a dropped handle can never leak an unmanaged process.
pub struct ManagedService {
    pub descriptor: ServiceDescriptor,
    child: Child,
    pumps: Vec<JoinHandle<()>>,
    exit: Option<ExitStatus>,
}

impl ManagedService {
    pub fn spawn(descriptor: &ServiceDescriptor, console: &Console) -> Result<Self> {
        let mut cmd = Command::new(&descriptor.program);
        cmd.args(&descriptor.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &descriptor.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &descriptor.env {
            cmd.env(key, value);
        }
        let mut child = cmd.spawn().with_context(|| {
            format!(
                "Failed to launch {} ({})",
                descriptor.name,
                descriptor.program.display()
            )
        })?;

        let mut pumps = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            pumps.push(pump_lines(stdout, descriptor.name.clone(), console.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(pump_lines(stderr, descriptor.name.clone(), console.clone()));
        }

        console.line(
            &descriptor.name,
            &format!("service started (pid {})", child.id().unwrap_or(0)),
        );
        Ok(ManagedService {
            descriptor: descriptor.clone(),
            child,
            pumps,
            exit: None,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Non-blocking exit check. The status is remembered once observed.
    pub fn try_wait(&mut self) -> Option<ExitStatus> {
        if self.exit.is_none() {
            match self.child.try_wait() {
                Ok(status) => self.exit = status,
                Err(e) => warn!("{}: failed to poll child: {e}", self.descriptor.name),
            }
        }
        self.exit
    }

    /// Ordered stop: graceful terminate, bounded wait, then force kill.
    pub async fn stop(mut self, grace: Duration, console: &Console) {
        let name = self.descriptor.name.clone();
        if self.try_wait().is_some() {
            self.drain_pumps().await;
            return;
        }
        console.line(&name, "stopping...");
        if let Some(pid) = self.child.id() {
            if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                warn!("{name}: failed to signal: {e}");
            }
        }
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(_)) => console.line(&name, "gracefully stopped"),
            Ok(Err(e)) => warn!("{name}: wait failed: {e}"),
            Err(_) => {
                console.line(&name, "didn't exit in time - killing");
                if let Err(e) = self.child.kill().await {
                    warn!("{name}: kill failed: {e}");
                }
                console.line(&name, "force killed");
            }
        }
        self.drain_pumps().await;
    }

    async fn drain_pumps(&mut self) {
        for pump in self.pumps.drain(..) {
            // pumps finish at stream EOF, which the child's exit produces
            if tokio::time::timeout(Duration::from_secs(1), pump).await.is_err() {
                // reader stuck on a stream that never closed; abandon it
            }
        }
    }
}

/// Read one child stream line-by-line and emit it to the shared console with
/// the service prefix. At most one consecutive blank line is forwarded; a
/// double blank is appended when the stream closes to visually separate runs.
fn pump_lines<R>(stream: R, name: String, console: Console) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        let mut prev_blank = false;
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim_end();
                    if line.is_empty() {
                        if !prev_blank {
                            console.blank();
                            prev_blank = true;
                        }
                    } else {
                        console.line(&name, line);
                        prev_blank = false;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("{name}: error reading output: {e}");
                    break;
                }
            }
        }
        console.blank();
        console.blank();
    })
}
