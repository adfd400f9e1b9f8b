use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, warn};

pub const MAIL_KIND: &str = "mail";

/// One item in the mail store, with exactly the properties the producer reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailItem {
    /// Store-wide unique id. Derived from the file name by `DirStore`.
    #[serde(default)]
    pub id: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    /// Threading header of the message this one replies to, if any.
    #[serde(default)]
    pub in_reply_to: Option<String>,
    /// Conversation (thread) key shared by every member of the thread.
    #[serde(default)]
    pub conversation: Option<String>,
    #[serde(default)]
    pub attachments: Vec<String>,
    pub received: DateTime<Utc>,
}

fn default_kind() -> String {
    MAIL_KIND.to_string()
}

impl MailItem {
    pub fn is_mail(&self) -> bool {
        self.kind == MAIL_KIND
    }
}

/// The few operations this subsystem needs from the host mail store.
///
/// The desktop client itself is an external collaborator; everything the
/// producer does goes through this seam so the pipeline is testable against
/// any implementation.
pub trait MailStore {
    /// Resolve a named folder path. The path must be rooted at "Inbox".
    fn resolve_folder(&self, path: &[String]) -> Result<PathBuf>;
    /// Load one item by id.
    fn load(&self, id: &str) -> Result<MailItem>;
    /// Flatten the item's conversation into every member item, in store
    /// enumeration order.
    fn conversation(&self, item: &MailItem) -> Result<Vec<MailItem>>;
    /// The folder an item currently sits in.
    fn folder_of(&self, id: &str) -> Result<PathBuf>;
    /// Relocate an item into `dest`.
    fn move_item(&mut self, id: &str, dest: &Path) -> Result<()>;
}

/// Directory-tree mail store: folders are subdirectories under the root,
/// items are YAML files named `<id>.yaml`.
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Open a store rooted at `root`, creating the Inbox folder if absent so
    /// the watcher can start before the first item arrives.
    pub fn open(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(root.join("Inbox"))
            .with_context(|| format!("Failed to create mail root {}", root.display()))?;
        Ok(DirStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn find_item_file(&self, id: &str) -> Option<PathBuf> {
        let mut files = Vec::new();
        collect_item_files(&self.root, &mut files);
        let wanted = format!("{id}.yaml");
        files
            .into_iter()
            .find(|p| p.file_name().and_then(|n| n.to_str()) == Some(wanted.as_str()))
    }

    fn load_file(path: &Path) -> Result<MailItem> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read item {}", path.display()))?;
        let mut item: MailItem = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse item {}", path.display()))?;
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            item.id = stem.to_string();
        }
        Ok(item)
    }
}

impl MailStore for DirStore {
    fn resolve_folder(&self, path: &[String]) -> Result<PathBuf> {
        if path.is_empty() || !path[0].eq_ignore_ascii_case("inbox") {
            bail!("folder path must start with \"Inbox\"");
        }
        let mut dir = self.root.clone();
        for part in path {
            dir = dir.join(part);
        }
        if !dir.is_dir() {
            bail!("folder {} does not exist in the store", path.join("/"));
        }
        Ok(dir)
    }

    fn load(&self, id: &str) -> Result<MailItem> {
        let path = self
            .find_item_file(id)
            .ok_or_else(|| anyhow!("item {id} not found"))?;
        Self::load_file(&path)
    }

    fn conversation(&self, item: &MailItem) -> Result<Vec<MailItem>> {
        let key = item
            .conversation
            .as_deref()
            .ok_or_else(|| anyhow!("item {} has no conversation", item.id))?;
        let mut files = Vec::new();
        collect_item_files(&self.root, &mut files);
        let mut members = Vec::new();
        for path in files {
            match Self::load_file(&path) {
                Ok(member) => {
                    if member.conversation.as_deref() == Some(key) {
                        members.push(member);
                    }
                }
                Err(e) => warn!("Skipping unreadable item {}: {e:#}", path.display()),
            }
        }
        Ok(members)
    }

    fn folder_of(&self, id: &str) -> Result<PathBuf> {
        let path = self
            .find_item_file(id)
            .ok_or_else(|| anyhow!("item {id} not found"))?;
        path.parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| anyhow!("item {id} has no parent folder"))
    }

    fn move_item(&mut self, id: &str, dest: &Path) -> Result<()> {
        let src = self
            .find_item_file(id)
            .ok_or_else(|| anyhow!("item {id} not found"))?;
        let name = src
            .file_name()
            .ok_or_else(|| anyhow!("item {id} has no file name"))?;
        fs::rename(&src, dest.join(name)).with_context(|| {
            format!("Failed to move item {id} into {}", dest.display())
        })?;
        Ok(())
    }
}

fn collect_item_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Failed to read folder {}: {e}", dir.display());
            return;
        }
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.is_dir() {
            collect_item_files(&path, out);
        } else if path.extension().and_then(|e| e.to_str()) == Some("yaml") {
            out.push(path);
        }
    }
}

/// Enqueue-only new-item feed for one folder.
///
/// A scanner task pushes ids of newly arrived items into the channel and does
/// no other work, so the feed can never stall the store. Items already present
/// when the feed starts are treated as seen, matching new-mail notification
/// semantics.
pub fn watch_new(folder: PathBuf, poll: Duration) -> UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut seen: HashSet<String> = HashSet::new();
        let mut primed = false;
        loop {
            match list_ids(&folder) {
                Ok(ids) => {
                    for id in ids {
                        if seen.insert(id.clone()) && primed && tx.send(id).is_err() {
                            // receiver dropped, feed is done
                            return;
                        }
                    }
                    primed = true;
                }
                Err(e) => debug!("Watch folder scan failed: {e:#}"),
            }
            tokio::time::sleep(poll).await;
        }
    });
    rx
}

fn list_ids(folder: &Path) -> Result<Vec<String>> {
    let entries = fs::read_dir(folder)
        .with_context(|| format!("Failed to read watch folder {}", folder.display()))?;
    let mut ids = Vec::new();
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            ids.push(stem.to_string());
        }
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item(conv: Option<&str>) -> MailItem {
        MailItem {
            id: String::new(),
            kind: MAIL_KIND.to_string(),
            sender: "pm@company.com".to_string(),
            subject: "Claim 1".to_string(),
            body: "hello".to_string(),
            in_reply_to: None,
            conversation: conv.map(str::to_string),
            attachments: vec![],
            received: Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap(),
        }
    }

    fn write_item(dir: &Path, id: &str, item: &MailItem) {
        fs::write(
            dir.join(format!("{id}.yaml")),
            serde_yaml::to_string(item).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn resolve_folder_requires_inbox_root() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DirStore::open(tmp.path().to_path_buf()).unwrap();
        assert!(store.resolve_folder(&["Drafts".to_string()]).is_err());
        assert!(store.resolve_folder(&[]).is_err());
        assert!(store.resolve_folder(&["Inbox".to_string()]).is_ok());
    }

    #[test]
    fn load_sets_id_from_file_name() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DirStore::open(tmp.path().to_path_buf()).unwrap();
        let inbox = store.resolve_folder(&["Inbox".to_string()]).unwrap();
        write_item(&inbox, "msg-1", &item(Some("c1")));

        let loaded = store.load("msg-1").unwrap();
        assert_eq!(loaded.id, "msg-1");
        assert_eq!(loaded.conversation.as_deref(), Some("c1"));
    }

    #[test]
    fn conversation_collects_members_across_folders() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = DirStore::open(tmp.path().to_path_buf()).unwrap();
        let inbox = store.resolve_folder(&["Inbox".to_string()]).unwrap();
        fs::create_dir_all(inbox.join("Claims")).unwrap();
        write_item(&inbox, "msg-1", &item(Some("c1")));
        write_item(&inbox.join("Claims"), "msg-2", &item(Some("c1")));
        write_item(&inbox, "msg-3", &item(Some("other")));
        write_item(&inbox, "msg-4", &item(None));

        let loaded = store.load("msg-1").unwrap();
        let members = store.conversation(&loaded).unwrap();
        let mut ids: Vec<_> = members.iter().map(|m| m.id.clone()).collect();
        ids.sort();
        assert_eq!(ids, vec!["msg-1", "msg-2"]);

        let orphan = store.load("msg-4").unwrap();
        assert!(store.conversation(&orphan).is_err());

        // move keeps the item findable in the new folder
        let claims = store
            .resolve_folder(&["Inbox".to_string(), "Claims".to_string()])
            .unwrap();
        store.move_item("msg-1", &claims).unwrap();
        assert_eq!(store.folder_of("msg-1").unwrap(), claims);
    }
}
