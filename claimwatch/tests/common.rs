use chrono::{DateTime, Utc};
use claimwatch::mailbox::{MAIL_KIND, MailItem};
use std::fs;
use std::path::Path;

#[allow(dead_code)]
pub fn mail_item(
    id: &str,
    sender: &str,
    subject: &str,
    body: &str,
    conversation: Option<&str>,
    attachments: &[&str],
    received_offset_secs: i64,
) -> MailItem {
    MailItem {
        id: id.to_string(),
        kind: MAIL_KIND.to_string(),
        sender: sender.to_string(),
        subject: subject.to_string(),
        body: body.to_string(),
        in_reply_to: None,
        conversation: conversation.map(str::to_string),
        attachments: attachments.iter().map(|s| s.to_string()).collect(),
        received: DateTime::<Utc>::from_timestamp(1_700_000_000 + received_offset_secs, 0)
            .expect("valid timestamp"),
    }
}

#[allow(dead_code)]
pub fn write_item(folder: &Path, item: &MailItem) {
    fs::write(
        folder.join(format!("{}.yaml", item.id)),
        serde_yaml::to_string(item).unwrap(),
    )
    .unwrap();
}

#[allow(dead_code)]
pub fn count_tickets(queue_dir: &Path) -> usize {
    match fs::read_dir(queue_dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name()
                    .to_str()
                    .map(|n| n.starts_with("ticket_"))
                    .unwrap_or(false)
            })
            .count(),
        Err(_) => 0,
    }
}
