use chrono::Local;
use std::io::Write;
use std::sync::{Arc, Mutex};

/// Human-readable timestamp used on every console line: MM/DD/YYYY HH:MMAM.
pub fn timestamp() -> String {
    Local::now().format("%m/%d/%Y %I:%M%p").to_string()
}

/// The single annotated output stream every managed service writes through.
///
/// All writes go through one lock so interleaved child output never splits
/// mid-line. Cloning is cheap; clones share the lock.
#[derive(Clone, Default)]
pub struct Console {
    guard: Arc<Mutex<()>>,
}

impl Console {
    pub fn new() -> Self {
        Console::default()
    }

    /// Emit one line as `[timestamp] [service] text`.
    pub fn line(&self, service: &str, text: &str) {
        let _held = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "[{}] [{}] {}", timestamp(), service, text);
        let _ = out.flush();
    }

    /// Emit a bare blank line (used for separating service output blocks).
    pub fn blank(&self) {
        let _held = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out);
        let _ = out.flush();
    }
}
