use anyhow::Result;
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::mailbox::{self, DirStore, MailItem, MailStore};
use crate::ticket;

/// The acknowledgement a project manager replies with: "received", alone on
/// the first real line, with optional trailing punctuation.
static ACK_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)^\s*received\s*[.!?"]*\s*$"#).expect("valid regex"));

#[tokio::main]
pub async fn entry(settings: Settings) -> Result<()> {
    run(settings).await
}

/// Watch the mail store and queue one ticket per accepted submission, until
/// interrupted.
pub async fn run(settings: Settings) -> Result<()> {
    if settings.whitelist.is_empty() {
        warn!("Whitelist is empty; no mail will ever trigger a ticket");
    }
    let mut store = DirStore::open(settings.mail_root.clone())?;
    let dest = store.resolve_folder(&settings.target_folder)?;
    let inbox = store.resolve_folder(&["Inbox".to_string()])?;
    let whitelist: HashSet<String> = settings
        .whitelist
        .iter()
        .map(|s| s.to_lowercase())
        .collect();

    info!("Monitoring mail...");
    info!(" - Destination folder: {}", dest.display());
    info!(" - Whitelist size: {}", whitelist.len());
    info!(" - Queue folder: {}", settings.queue_dir.display());

    let mut pending = mailbox::watch_new(inbox, settings.timing.scan_poll());
    let mut processed: HashSet<String> = HashSet::new();

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    loop {
        // drain everything the feed enqueued, then idle briefly
        while let Ok(id) = pending.try_recv() {
            process_item(
                &mut store,
                &id,
                &whitelist,
                &dest,
                &settings.queue_dir,
                &mut processed,
            );
        }
        tokio::select! {
            _ = &mut interrupt => break,
            _ = sleep(settings.timing.producer_drain()) => {}
        }
    }
    info!("Stopping mail watcher");
    Ok(())
}

/// Run one observed item through the full filter pipeline. Every step is
/// defensive: a malformed item is logged and skipped, never propagated, so one
/// bad item cannot halt the watch loop.
pub fn process_item<S: MailStore>(
    store: &mut S,
    id: &str,
    whitelist: &HashSet<String>,
    dest: &Path,
    queue_dir: &Path,
    processed: &mut HashSet<String>,
) {
    let item = match store.load(id) {
        Ok(item) => item,
        Err(e) => {
            debug!("Item {id} could not be loaded: {e:#}");
            return;
        }
    };
    if !item.is_mail() {
        return;
    }

    let sender = if item.sender.is_empty() {
        "unknown".to_string()
    } else {
        item.sender.to_lowercase()
    };
    info!("[NewMail] From: {sender} | Subject: \"{}\"", item.subject.trim());

    if !whitelist.contains(&sender) {
        info!("  SKIP: sender not in whitelist");
        return;
    }

    let first = first_real_line(&item.body);
    if !is_ack_line(first) {
        info!("  SKIP: first line is not \"received\" -> {:?}", first.unwrap_or(""));
        return;
    }

    if !is_reply(&item) {
        info!("  SKIP: not a reply (no in-reply-to and no RE:)");
        return;
    }

    let members = match store.conversation(&item) {
        Ok(members) if !members.is_empty() => members,
        Ok(_) => {
            info!("  SKIP: no conversation available");
            return;
        }
        Err(e) => {
            info!("  SKIP: no conversation available ({e:#})");
            return;
        }
    };

    let Some(original) = pick_oldest_with_attachments(&members) else {
        info!("  SKIP: no original with attachments found in the conversation");
        return;
    };
    info!(
        "  Selecting original with attachments -> Subject: \"{}\" | Received: {}",
        original.subject.trim(),
        original.received
    );

    if processed.contains(&original.id) {
        info!("  SKIP: original already processed in this session");
        return;
    }

    if let Ok(src) = store.folder_of(&original.id) {
        info!("  Original folder before move: {}", src.display());
    }

    if let Err(e) = relocate(store, original, dest) {
        warn!("  Move failed, no ticket queued: {e:#}");
        return;
    }
    processed.insert(original.id.clone());

    match ticket::create(queue_dir) {
        Ok(path) => info!(
            "  -> Queued run: {}",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("?")
        ),
        Err(e) => error!("  Failed to queue run: {e:#}"),
    }
}

/// Move the original into the destination folder. Already sitting there counts
/// as success (the move is skipped, the ticket is still queued).
fn relocate<S: MailStore>(store: &mut S, original: &MailItem, dest: &Path) -> Result<()> {
    if store
        .folder_of(&original.id)
        .map(|folder| folder == dest)
        .unwrap_or(false)
    {
        info!("  Original already in target folder; skipping move");
        return Ok(());
    }
    store.move_item(&original.id, dest)?;
    info!("  Moved original with attachments to: {}", dest.display());
    Ok(())
}

/// First non-blank, non-quoted line of a message body.
pub fn first_real_line(body: &str) -> Option<&str> {
    body.lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('>'))
}

pub fn is_ack_line(line: Option<&str>) -> bool {
    line.map(|l| ACK_LINE.is_match(l)).unwrap_or(false)
}

/// A reply carries a threading header or a reply-prefixed subject.
pub fn is_reply(item: &MailItem) -> bool {
    item.in_reply_to
        .as_deref()
        .map(|header| !header.is_empty())
        .unwrap_or(false)
        || item.subject.trim().to_lowercase().starts_with("re:")
}

/// The earliest mail item with attachments: the original submission. Ties on
/// the timestamp keep the first item in enumeration order (`min_by_key`
/// returns the first of equal keys).
pub fn pick_oldest_with_attachments(items: &[MailItem]) -> Option<&MailItem> {
    items
        .iter()
        .filter(|item| item.is_mail() && !item.attachments.is_empty())
        .min_by_key(|item| item.received)
}
