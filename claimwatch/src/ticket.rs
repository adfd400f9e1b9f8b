use anyhow::{Context, Result, anyhow};
use rand::Rng;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

pub const TICKET_PREFIX: &str = "ticket_";
pub const TICKET_EXT: &str = ".txt";

/// Tickets are pure wake-up signals; the body is never parsed.
const TICKET_BODY: &str = "run";

/// Drop one ticket into the queue directory.
///
/// The filename embeds the creation time plus a random disambiguator
/// (`ticket_<unix-seconds>_<4-digit>.txt`) so two concurrent writers never
/// collide; creation is atomic via `create_new`.
pub fn create(queue_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(queue_dir)
        .with_context(|| format!("Failed to create queue dir {}", queue_dir.display()))?;
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let mut rng = rand::thread_rng();
    for _ in 0..16 {
        let tag: u32 = rng.gen_range(1000..10000);
        let path = queue_dir.join(format!("{TICKET_PREFIX}{secs}_{tag}{TICKET_EXT}"));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(TICKET_BODY.as_bytes())
                    .with_context(|| format!("Failed to write ticket {}", path.display()))?;
                return Ok(path);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to create ticket {}", path.display()));
            }
        }
    }
    Err(anyhow!(
        "could not pick an unused ticket name in {}",
        queue_dir.display()
    ))
}

/// The oldest pending ticket by name, or None. Name order embeds creation order.
pub fn next(queue_dir: &Path) -> Result<Option<PathBuf>> {
    let entries = match fs::read_dir(queue_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e)
                .with_context(|| format!("Failed to read queue dir {}", queue_dir.display()));
        }
    };
    let mut tickets: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| is_ticket(p))
        .collect();
    tickets.sort();
    Ok(tickets.into_iter().next())
}

/// Delete a ticket before its job runs, so a crash mid-job cannot replay it.
/// Returns false when the file was already gone (claimed by someone else).
pub fn claim(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => {
            warn!("Failed to remove ticket {}: {e}", path.display());
            false
        }
    }
}

fn is_ticket(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with(TICKET_PREFIX) && n.ends_with(TICKET_EXT))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn create_writes_sentinel_body() {
        let dir = tempfile::tempdir().unwrap();
        let path = create(dir.path()).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "run");

        let name_re = Regex::new(r"^ticket_\d+_\d{4}\.txt$").unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name_re.is_match(name), "unexpected ticket name: {name}");
    }

    #[test]
    fn next_returns_oldest_name_first() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ticket_1700000001_0001.txt"), "run").unwrap();
        fs::write(dir.path().join("ticket_1700000000_9999.txt"), "run").unwrap();
        fs::write(dir.path().join("not_a_ticket.txt"), "x").unwrap();

        let first = next(dir.path()).unwrap().unwrap();
        assert_eq!(
            first.file_name().unwrap().to_str().unwrap(),
            "ticket_1700000000_9999.txt"
        );
    }

    #[test]
    fn next_on_missing_dir_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(next(&missing).unwrap().is_none());
    }

    #[test]
    fn claim_is_at_most_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = create(dir.path()).unwrap();
        assert!(claim(&path));
        assert!(!path.exists());
        assert!(!claim(&path));
    }
}
