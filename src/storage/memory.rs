//! In-memory storage for tests and dry runs.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{Storage, StorageEntry, normalize_path};
use crate::error::StorageError;

/// Map-backed storage. Supports injecting failures: writes by path prefix,
/// reads by exact path, and whole listings.
#[derive(Default)]
pub struct MemoryStorage {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    failing_prefixes: Mutex<HashSet<String>>,
    failing_reads: Mutex<HashSet<String>>,
    fail_list: AtomicBool,
    fold_case: bool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage that lowercases every path, like Dropbox's `path_lower`.
    pub fn case_folding() -> Self {
        Self {
            fold_case: true,
            ..Self::default()
        }
    }

    /// Seed a file (test helper).
    pub fn insert(&self, path: &str, content: impl Into<Vec<u8>>) {
        let path = self.key(path).unwrap_or_else(|_| path.to_string());
        self.lock_files().insert(path, content.into());
    }

    /// Remove a file, returning whether it existed.
    pub fn remove(&self, path: &str) -> bool {
        let path = self.fold(path.to_string());
        self.lock_files().remove(&path).is_some()
    }

    /// Fetch a file as text (test helper).
    pub fn get_text(&self, path: &str) -> Option<String> {
        let path = self.fold(path.to_string());
        self.lock_files()
            .get(&path)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// All stored paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.lock_files().keys().cloned().collect()
    }

    /// Make every write under `prefix` fail.
    pub fn fail_writes_under(&self, prefix: &str) {
        lock(&self.failing_prefixes).insert(self.fold(prefix.to_string()));
    }

    /// Make reads of exactly `path` fail.
    pub fn fail_reads_of(&self, path: &str) {
        let path = self.key(path).unwrap_or_else(|_| path.to_string());
        lock(&self.failing_reads).insert(path);
    }

    /// Make every listing fail.
    pub fn fail_listing(&self) {
        self.fail_list.store(true, Ordering::SeqCst);
    }

    /// Clear injected failures.
    pub fn clear_failures(&self) {
        lock(&self.failing_prefixes).clear();
        lock(&self.failing_reads).clear();
        self.fail_list.store(false, Ordering::SeqCst);
    }

    fn fold(&self, path: String) -> String {
        if self.fold_case { path.to_lowercase() } else { path }
    }

    fn key(&self, path: &str) -> Result<String, StorageError> {
        Ok(self.fold(normalize_path(path)?))
    }

    fn lock_files(&self) -> MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        lock(&self.files)
    }

    fn injected(reason: String) -> StorageError {
        StorageError::RequestFailed {
            backend: "memory".into(),
            reason,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl Storage for MemoryStorage {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list(&self, root: &str) -> Result<Vec<StorageEntry>, StorageError> {
        let root = self.key(root)?;
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(Self::injected(format!("injected list failure for {root}")));
        }
        let prefix = if root == "/" {
            "/".to_string()
        } else {
            format!("{root}/")
        };
        Ok(self
            .lock_files()
            .iter()
            .filter(|(path, _)| path.starts_with(&prefix))
            .map(|(path, data)| StorageEntry::new(path.clone(), data.len() as u64))
            .collect())
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.key(path)?;
        if lock(&self.failing_reads).contains(&path) {
            return Err(Self::injected(format!("injected read failure for {path}")));
        }
        self.lock_files()
            .get(&path)
            .cloned()
            .ok_or(StorageError::NotFound(path))
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<(), StorageError> {
        let path = self.key(path)?;
        let failing = lock(&self.failing_prefixes)
            .iter()
            .any(|p| path.starts_with(p.as_str()));
        if failing {
            return Err(Self::injected(format!("injected write failure for {path}")));
        }
        self.lock_files().insert(path, data.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_filters_by_folder_prefix() {
        let storage = MemoryStorage::new();
        storage.insert("/in/a.txt", "a");
        storage.insert("/inbox-other/b.txt", "b");
        storage.insert("/in/sub/c.md", "c");

        let entries = storage.list("/in").await.unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["/in/a.txt", "/in/sub/c.md"]);
    }

    #[tokio::test]
    async fn injected_failures_only_hit_prefix() {
        let storage = MemoryStorage::new();
        storage.fail_writes_under("/out");
        assert!(storage.write("/out/x.md", b"x").await.is_err());
        assert!(storage.write("/state.json", b"{}").await.is_ok());

        storage.clear_failures();
        assert!(storage.write("/out/x.md", b"x").await.is_ok());
    }

    #[tokio::test]
    async fn injected_read_and_list_failures() {
        let storage = MemoryStorage::new();
        storage.insert("/in/a.txt", "a");
        storage.insert("/in/b.txt", "b");
        storage.fail_reads_of("/in/b.txt");
        assert!(storage.read("/in/a.txt").await.is_ok());
        assert!(storage.read("/in/b.txt").await.is_err());

        storage.fail_listing();
        assert!(storage.list("/in").await.is_err());

        storage.clear_failures();
        assert_eq!(storage.list("/in").await.unwrap().len(), 2);
        assert!(storage.read("/in/b.txt").await.is_ok());
    }

    #[tokio::test]
    async fn case_folding_lowercases_paths() {
        let storage = MemoryStorage::case_folding();
        storage.write("/0-Inbox/Note.TXT", b"x").await.unwrap();
        let entries = storage.list("/0-INBOX").await.unwrap();
        assert_eq!(entries[0].path, "/0-inbox/note.txt");
        assert_eq!(storage.read("/0-Inbox/NOTE.txt").await.unwrap(), b"x");
        assert_eq!(storage.get_text("/0-Inbox/Note.TXT").as_deref(), Some("x"));
    }
}
