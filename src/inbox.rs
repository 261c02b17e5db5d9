//! Inbox enumeration. Turns storage listings into `InboxItem`s.
//!
//! Only recognised text documents are candidates. Order is by path so
//! repeated runs see items in the same sequence.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{PipelineError, StorageError};
use crate::storage::{Storage, StorageEntry, file_name};

/// Accepted extensions (compared case-insensitively).
pub const TEXT_EXTENSIONS: &[&str] = &["txt", "md"];

/// A text document read from the inbox. Immutable once read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxItem {
    /// Stable identifier: the logical storage path.
    pub path: String,
    /// File name (last path component).
    pub name: String,
    /// Full text content (lossy UTF-8).
    pub content: String,
    /// Lowercase hex SHA-256 of the raw bytes.
    pub content_hash: String,
}

impl InboxItem {
    /// Build an item from raw bytes, computing its hash.
    pub fn from_bytes(path: impl Into<String>, bytes: &[u8]) -> Self {
        let path = path.into();
        Self {
            name: file_name(&path).to_string(),
            content: String::from_utf8_lossy(bytes).into_owned(),
            content_hash: content_hash(bytes),
            path,
        }
    }
}

/// SHA-256 of `bytes` as 64 lowercase hex chars.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

// ── Routing ─────────────────────────────────────────────────────────

/// Inbox sub-folder an item was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// `<inbox>/papers/**`
    Papers,
    /// `<inbox>/patents/**`
    Patents,
    /// `<inbox>/misc/**`
    Misc,
    /// Directly in the inbox folder.
    Root,
    /// Any other sub-folder.
    Other,
}

impl Route {
    /// Derive the route from the item path relative to the inbox root.
    pub fn from_path(inbox_root: &str, path: &str) -> Self {
        let root = inbox_root.trim_end_matches('/').to_lowercase();
        let p = path.to_lowercase();

        let Some(rel) = p.strip_prefix(&format!("{root}/")) else {
            return Self::Other;
        };

        match rel.split_once('/') {
            None => Self::Root,
            Some(("papers", _)) => Self::Papers,
            Some(("patents", _)) => Self::Patents,
            Some(("misc", _)) => Self::Misc,
            Some(_) => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Papers => "papers",
            Self::Patents => "patents",
            Self::Misc => "misc",
            Self::Root => "root",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Lister ──────────────────────────────────────────────────────────

/// Lists candidate documents under the inbox location.
pub struct ItemLister {
    storage: Arc<dyn Storage>,
    inbox: String,
}

impl ItemLister {
    pub fn new(storage: Arc<dyn Storage>, inbox: impl Into<String>) -> Self {
        Self {
            storage,
            inbox: inbox.into(),
        }
    }

    /// Whether the file name carries an accepted extension.
    pub fn is_recognized(&self, name: &str) -> bool {
        name.rsplit_once('.')
            .map(|(stem, ext)| !stem.is_empty() && TEXT_EXTENSIONS.iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }

    /// List recognised entries without reading their content.
    ///
    /// A listing failure is run-scoped: the caller cannot know its
    /// candidates.
    pub async fn list_entries(&self) -> Result<Vec<StorageEntry>, StorageError> {
        let mut entries: Vec<StorageEntry> = self
            .storage
            .list(&self.inbox)
            .await?
            .into_iter()
            .filter(|e| self.is_recognized(&e.name))
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(inbox = %self.inbox, count = entries.len(), "Listed inbox candidates");
        Ok(entries)
    }

    /// Read one entry into an item. Failures are item-scoped.
    pub async fn read_item(&self, entry: &StorageEntry) -> Result<InboxItem, PipelineError> {
        let bytes = self
            .storage
            .read(&entry.path)
            .await
            .map_err(|source| PipelineError::Read {
                path: entry.path.clone(),
                source,
            })?;
        Ok(InboxItem::from_bytes(entry.path.clone(), &bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn hash_is_hex_sha256() {
        let h = content_hash(b"abc");
        assert_eq!(
            h,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(h.len(), 64);
    }

    #[test]
    fn routes_by_subfolder() {
        let root = "/0-Inbox";
        assert_eq!(Route::from_path(root, "/0-Inbox/papers/a.md"), Route::Papers);
        assert_eq!(Route::from_path(root, "/0-inbox/Patents/x/b.txt"), Route::Patents);
        assert_eq!(Route::from_path(root, "/0-Inbox/misc/c.txt"), Route::Misc);
        assert_eq!(Route::from_path(root, "/0-Inbox/d.txt"), Route::Root);
        assert_eq!(Route::from_path(root, "/0-Inbox/drafts/e.txt"), Route::Other);
        assert_eq!(Route::from_path(root, "/elsewhere/f.txt"), Route::Other);
    }

    #[test]
    fn recognizes_text_extensions_only() {
        let lister = ItemLister::new(Arc::new(MemoryStorage::new()), "/in");
        assert!(lister.is_recognized("note1.txt"));
        assert!(lister.is_recognized("NOTE2.MD"));
        assert!(!lister.is_recognized("paper.pdf"));
        assert!(!lister.is_recognized("README"));
        assert!(!lister.is_recognized(".md"));
    }

    #[tokio::test]
    async fn lists_in_path_order_and_reads() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert("/in/b.md", "lab result summary");
        storage.insert("/in/a.txt", "refill request for X");
        storage.insert("/in/scan.pdf", vec![0u8, 1, 2]);
        storage.insert("/out/a.out.md", "not an input");

        let lister = ItemLister::new(storage, "/in");
        let mut items = Vec::new();
        for entry in lister.list_entries().await.unwrap() {
            items.push(lister.read_item(&entry).await.unwrap());
        }
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].path, "/in/a.txt");
        assert_eq!(items[0].name, "a.txt");
        assert_eq!(items[0].content, "refill request for X");
        assert_eq!(items[1].path, "/in/b.md");
        assert_eq!(items[0].content_hash, content_hash(b"refill request for X"));
    }
}
