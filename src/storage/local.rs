//! Filesystem-backed storage rooted at a local directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use super::{Storage, StorageEntry, normalize_path};
use crate::error::StorageError;

/// Storage over a directory on disk. Logical `/a/b.txt` maps to
/// `<base>/a/b.txt`.
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    /// Create a storage rooted at `base_path`.
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    /// Resolve a logical path to an absolute filesystem path.
    pub fn resolve_path(&self, logical: &str) -> Result<PathBuf, StorageError> {
        let normalized = normalize_path(logical)?;
        Ok(self.base_path.join(normalized.trim_start_matches('/')))
    }

    fn to_logical(&self, full: &Path) -> Option<String> {
        let rel = full.strip_prefix(&self.base_path).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(format!("/{}", parts.join("/")))
    }
}

#[async_trait]
impl Storage for LocalStorage {
    fn name(&self) -> &str {
        "local"
    }

    async fn list(&self, root: &str) -> Result<Vec<StorageEntry>, StorageError> {
        let start = self.resolve_path(root)?;
        if !start.is_dir() {
            return Err(StorageError::NotFound(root.to_string()));
        }

        let mut entries = Vec::new();
        let mut pending = vec![start];
        while let Some(dir) = pending.pop() {
            let mut reader = fs::read_dir(&dir).await?;
            while let Some(entry) = reader.next_entry().await? {
                let file_type = entry.file_type().await?;
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    // Skip our own in-flight temp files.
                    if path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.ends_with(".partial"))
                    {
                        continue;
                    }
                    let size = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
                    if let Some(logical) = self.to_logical(&path) {
                        entries.push(StorageEntry::new(logical, size));
                    }
                }
            }
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(root, count = entries.len(), "Listed local folder");
        Ok(entries)
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let full_path = self.resolve_path(path)?;
        match fs::read(&full_path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Writes go to a sibling temp file first and are renamed into place, so
    /// readers never observe a half-written document.
    async fn write(&self, path: &str, data: &[u8]) -> Result<(), StorageError> {
        let full_path = self.resolve_path(path)?;
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = full_path.with_file_name(format!(
            "{}.{}.partial",
            full_path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("file"),
            uuid::Uuid::new_v4().simple()
        ));
        fs::write(&tmp, data).await?;
        if let Err(e) = fs::rename(&tmp, &full_path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> (tempfile::TempDir, LocalStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().to_path_buf());
        (dir, storage)
    }

    #[tokio::test]
    async fn write_then_read() {
        let (_dir, storage) = storage();
        storage.write("/0-Outbox/a.md", b"hello").await.unwrap();
        assert_eq!(storage.read("/0-Outbox/a.md").await.unwrap(), b"hello");
        assert_eq!(storage.read_text("0-Outbox/a.md").await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn overwrite_replaces_content() {
        let (_dir, storage) = storage();
        storage.write("/s.json", b"one").await.unwrap();
        storage.write("/s.json", b"two").await.unwrap();
        assert_eq!(storage.read_text("/s.json").await.unwrap(), "two");
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let (_dir, storage) = storage();
        assert!(matches!(
            storage.read("/nope.txt").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(storage.read_optional("/nope.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_is_recursive_and_sorted() {
        let (_dir, storage) = storage();
        storage.write("/in/b.txt", b"b").await.unwrap();
        storage.write("/in/papers/a.md", b"a").await.unwrap();
        storage.write("/in/a.txt", b"a").await.unwrap();
        storage.write("/other/x.txt", b"x").await.unwrap();

        let entries = storage.list("/in").await.unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["/in/a.txt", "/in/b.txt", "/in/papers/a.md"]);
        assert_eq!(entries[0].size, 1);
    }

    #[tokio::test]
    async fn list_missing_root_is_not_found() {
        let (_dir, storage) = storage();
        assert!(matches!(
            storage.list("/missing").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn resolve_rejects_escape() {
        let (_dir, storage) = storage();
        assert!(storage.resolve_path("/../etc/passwd").is_err());
    }
}
