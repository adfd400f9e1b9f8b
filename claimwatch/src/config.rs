use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_PATH: &str = "claimwatch.yaml";

/// All settings for the service suite. Every field has a default so a partial
/// (or absent) config file still yields a runnable configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Directory the producer drops tickets into and the consumer drains.
    #[serde(default = "default_queue_dir")]
    pub queue_dir: PathBuf,
    /// Root of the mail store directory tree (folders are subdirectories).
    #[serde(default = "default_mail_root")]
    pub mail_root: PathBuf,
    /// Executable name of the host mail client as it appears in the process table.
    #[serde(default = "default_host_process")]
    pub host_process: String,
    /// Sender addresses allowed to trigger claim processing. Compared
    /// case-insensitively.
    #[serde(default)]
    pub whitelist: Vec<String>,
    /// Folder path the original submission is moved into. Must start at "Inbox".
    #[serde(default = "default_target_folder")]
    pub target_folder: Vec<String>,
    #[serde(default)]
    pub job: JobSettings,
    #[serde(default)]
    pub timing: TimingSettings,
}

/// The downstream job the consumer runs once per ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSettings {
    #[serde(default = "default_job_program")]
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory for the job. Defaults to the program's parent directory.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

/// Loop cadences and timeouts, in one place so tests can shrink them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingSettings {
    /// Lifecycle monitor loop cadence.
    #[serde(default = "default_monitor_poll_ms")]
    pub monitor_poll_ms: u64,
    /// Backoff before relaunching the conditional worker after a crash.
    #[serde(default = "default_restart_backoff_secs")]
    pub restart_backoff_secs: u64,
    /// Supervisor health loop cadence.
    #[serde(default = "default_health_tick_ms")]
    pub health_tick_ms: u64,
    /// Ticket consumer poll cadence.
    #[serde(default = "default_consumer_poll_ms")]
    pub consumer_poll_ms: u64,
    /// Producer pending-item drain cadence.
    #[serde(default = "default_producer_drain_ms")]
    pub producer_drain_ms: u64,
    /// New-item scanner cadence for the mail store watch folder.
    #[serde(default = "default_scan_poll_ms")]
    pub scan_poll_ms: u64,
    /// Grace period before a stopping service is force-killed.
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
    /// How often the keep-awake service re-asserts its hold.
    #[serde(default = "default_awake_refresh_secs")]
    pub awake_refresh_secs: u64,
}

fn default_queue_dir() -> PathBuf {
    PathBuf::from("queue")
}

fn default_mail_root() -> PathBuf {
    PathBuf::from("mail")
}

fn default_host_process() -> String {
    "outlook".to_string()
}

fn default_target_folder() -> Vec<String> {
    vec!["Inbox".to_string(), "Claims".to_string()]
}

fn default_job_program() -> PathBuf {
    PathBuf::from("./wop22")
}

fn default_monitor_poll_ms() -> u64 {
    1000
}

fn default_restart_backoff_secs() -> u64 {
    10
}

fn default_health_tick_ms() -> u64 {
    500
}

fn default_consumer_poll_ms() -> u64 {
    1000
}

fn default_producer_drain_ms() -> u64 {
    100
}

fn default_scan_poll_ms() -> u64 {
    500
}

fn default_stop_grace_secs() -> u64 {
    5
}

fn default_awake_refresh_secs() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            queue_dir: default_queue_dir(),
            mail_root: default_mail_root(),
            host_process: default_host_process(),
            whitelist: Vec::new(),
            target_folder: default_target_folder(),
            job: JobSettings::default(),
            timing: TimingSettings::default(),
        }
    }
}

impl Default for JobSettings {
    fn default() -> Self {
        JobSettings {
            program: default_job_program(),
            args: Vec::new(),
            cwd: None,
        }
    }
}

impl Default for TimingSettings {
    fn default() -> Self {
        TimingSettings {
            monitor_poll_ms: default_monitor_poll_ms(),
            restart_backoff_secs: default_restart_backoff_secs(),
            health_tick_ms: default_health_tick_ms(),
            consumer_poll_ms: default_consumer_poll_ms(),
            producer_drain_ms: default_producer_drain_ms(),
            scan_poll_ms: default_scan_poll_ms(),
            stop_grace_secs: default_stop_grace_secs(),
            awake_refresh_secs: default_awake_refresh_secs(),
        }
    }
}

impl TimingSettings {
    pub fn monitor_poll(&self) -> Duration {
        Duration::from_millis(self.monitor_poll_ms)
    }

    pub fn restart_backoff(&self) -> Duration {
        Duration::from_secs(self.restart_backoff_secs)
    }

    pub fn health_tick(&self) -> Duration {
        Duration::from_millis(self.health_tick_ms)
    }

    pub fn consumer_poll(&self) -> Duration {
        Duration::from_millis(self.consumer_poll_ms)
    }

    pub fn producer_drain(&self) -> Duration {
        Duration::from_millis(self.producer_drain_ms)
    }

    pub fn scan_poll(&self) -> Duration {
        Duration::from_millis(self.scan_poll_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn awake_refresh(&self) -> Duration {
        Duration::from_secs(self.awake_refresh_secs)
    }
}

pub fn load_config(path: &Path) -> Result<Settings> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    let settings: Settings =
        serde_yaml::from_str(&content).context("Failed to parse YAML config")?;
    Ok(settings)
}

/// Load the given config, or the default config file if it exists, or built-in
/// defaults otherwise. An explicitly given path that fails to load is an error.
pub fn load_or_default(path: Option<&Path>) -> Result<Settings> {
    match path {
        Some(p) => load_config(p),
        None => {
            let p = Path::new(DEFAULT_CONFIG_PATH);
            if p.exists() {
                load_config(p)
            } else {
                Ok(Settings::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_complete() {
        let settings = Settings::default();
        assert_eq!(settings.queue_dir, PathBuf::from("queue"));
        assert_eq!(settings.host_process, "outlook");
        assert!(settings.whitelist.is_empty());
        assert_eq!(settings.target_folder[0], "Inbox");
        assert_eq!(settings.timing.health_tick(), Duration::from_millis(500));
        assert_eq!(settings.timing.restart_backoff(), Duration::from_secs(10));
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = r#"
whitelist:
  - PM@company.com
timing:
  consumer_poll_ms: 50
"#;
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.whitelist, vec!["PM@company.com".to_string()]);
        assert_eq!(settings.timing.consumer_poll_ms, 50);
        // untouched fields keep their defaults
        assert_eq!(settings.timing.monitor_poll_ms, 1000);
        assert_eq!(settings.queue_dir, PathBuf::from("queue"));
    }
}
