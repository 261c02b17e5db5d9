//! Processed-item state, the single source of truth for "already handled".
//!
//! The store is loaded once at run start, updated in memory only after an
//! item's output is persisted, and flushed after every recorded item.

pub mod json;
pub mod memory;

pub use json::JsonStateStore;
pub use memory::MemoryStateStore;

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;
use crate::inbox::InboxItem;

/// Durable marker that an item completed the pipeline.
///
/// Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    /// Key the record is stored under (path or content hash).
    #[serde(default)]
    pub item_key: String,
    /// Inbox path at processing time.
    #[serde(default)]
    pub input_path: String,
    pub processed_at: DateTime<Utc>,
    /// Outbox document written for the item.
    pub output_path: String,
    /// Mode label (`paper`, `memo`, ...).
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

/// How inbox items are keyed in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ItemKeyStrategy {
    /// Lowercased logical path (matches Dropbox `path_lower`).
    #[default]
    Path,
    /// SHA-256 of the content; renamed files stay processed, edited files
    /// are new.
    ContentHash,
}

impl ItemKeyStrategy {
    /// Key for a fully read item.
    pub fn key_for(&self, item: &InboxItem) -> String {
        match self {
            Self::Path => item.path.to_lowercase(),
            Self::ContentHash => item.content_hash.clone(),
        }
    }

    /// Key derivable from the path alone, without reading content.
    pub fn key_for_path(&self, path: &str) -> Option<String> {
        match self {
            Self::Path => Some(path.to_lowercase()),
            Self::ContentHash => None,
        }
    }
}

impl FromStr for ItemKeyStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "path" => Ok(Self::Path),
            "content_hash" | "hash" => Ok(Self::ContentHash),
            other => Err(format!("unknown key strategy '{other}' (expected path or content_hash)")),
        }
    }
}

/// Scoped store of processed records.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read the backing document. Must be called before anything else.
    async fn load(&mut self) -> Result<(), PersistenceError>;

    /// Whether `item_key` has a record.
    fn is_processed(&self, item_key: &str) -> bool;

    /// Look up a record.
    fn get(&self, item_key: &str) -> Option<&ProcessedRecord>;

    /// Add a record in memory. Existing records are never overwritten.
    fn mark_processed(&mut self, record: ProcessedRecord) -> Result<(), PersistenceError>;

    /// Drop a record so the item is processed again on the next run.
    fn remove(&mut self, item_key: &str) -> Option<ProcessedRecord>;

    /// All records, ordered by key.
    fn records(&self) -> Vec<&ProcessedRecord>;

    /// Persist the in-memory records.
    async fn flush(&mut self) -> Result<(), PersistenceError>;

    fn len(&self) -> usize {
        self.records().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
