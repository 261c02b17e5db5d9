//! Storage backends for inbox, outbox, state and logs.
//!
//! All paths are logical, slash-separated and rooted (`/0-Inbox/a.txt`).
//! Each backend maps them onto its own namespace:
//! - `LocalStorage`: a directory on disk
//! - `DropboxStorage`: a Dropbox account via HTTP API v2
//! - `MemoryStorage`: an in-process map (tests, dry runs)

pub mod dropbox;
pub mod local;
pub mod memory;

pub use dropbox::DropboxStorage;
pub use local::LocalStorage;
pub use memory::MemoryStorage;

use async_trait::async_trait;

use crate::error::StorageError;

/// A file found while listing a folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEntry {
    /// Logical path, e.g. `/0-Inbox/papers/x.md`.
    pub path: String,
    /// Last path component.
    pub name: String,
    /// Size in bytes (0 when the backend does not report it).
    pub size: u64,
}

impl StorageEntry {
    pub fn new(path: impl Into<String>, size: u64) -> Self {
        let path = path.into();
        let name = file_name(&path).to_string();
        Self { path, name, size }
    }
}

/// Narrow storage interface the pipeline depends on.
///
/// Retries, auth refresh and transport details belong to the backend.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Backend name for logs ("local", "dropbox", "memory").
    fn name(&self) -> &str;

    /// Recursively list files (not folders) under `root`.
    async fn list(&self, root: &str) -> Result<Vec<StorageEntry>, StorageError>;

    /// Read a file's bytes. Missing files are `StorageError::NotFound`.
    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    /// Write (overwrite) a file, creating parent folders as needed.
    async fn write(&self, path: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Read a file, mapping `NotFound` to `None`.
    async fn read_optional(&self, path: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match self.read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Read a file as UTF-8 text.
    async fn read_text(&self, path: &str) -> Result<String, StorageError> {
        let bytes = self.read(path).await?;
        String::from_utf8(bytes).map_err(|_| StorageError::InvalidUtf8 {
            path: path.to_string(),
        })
    }
}

/// Normalize a logical path: leading `/`, no trailing `/`, no empty or `.`
/// segments. `..` is rejected.
pub fn normalize_path(path: &str) -> Result<String, StorageError> {
    let mut parts = Vec::new();
    for segment in path.trim().split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => return Err(StorageError::InvalidPath(path.to_string())),
            s => parts.push(s),
        }
    }
    Ok(format!("/{}", parts.join("/")))
}

/// Join a folder and a file name into a logical path.
pub fn join_path(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if dir.is_empty() {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Last component of a logical path.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Parent folder of a logical path (`/` for top-level files).
pub fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}
