//! JSON state document stored through a `Storage` backend.
//!
//! Shape:
//! ```json
//! { "version": 1, "processed": { "<item key>": { ...ProcessedRecord } } }
//! ```
//! The older `{ "processed": { "<key>": "<rev>" } }` shape is upgraded on
//! load. Anything else is rejected rather than reset.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{ProcessedRecord, StateStore};
use crate::error::PersistenceError;
use crate::storage::Storage;

/// Current document version.
pub const STATE_VERSION: u32 = 1;

#[derive(Serialize)]
struct StateDocument<'a> {
    version: u32,
    processed: &'a BTreeMap<String, ProcessedRecord>,
}

/// State store backed by a single JSON document.
pub struct JsonStateStore {
    storage: Arc<dyn Storage>,
    path: String,
    records: BTreeMap<String, ProcessedRecord>,
    loaded: bool,
    dirty: bool,
}

impl JsonStateStore {
    pub fn new(storage: Arc<dyn Storage>, path: impl Into<String>) -> Self {
        Self {
            storage,
            path: path.into(),
            records: BTreeMap::new(),
            loaded: false,
            dirty: false,
        }
    }

    /// Location of the backing document.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn corrupt(&self, reason: impl Into<String>) -> PersistenceError {
        PersistenceError::Corrupt {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }
}

/// Parse a state document. Exposed for tooling and tests.
pub fn parse_state_document(
    path: &str,
    raw: &[u8],
) -> Result<BTreeMap<String, ProcessedRecord>, PersistenceError> {
    let corrupt = |reason: String| PersistenceError::Corrupt {
        path: path.to_string(),
        reason,
    };

    let value: serde_json::Value =
        serde_json::from_slice(raw).map_err(|e| corrupt(format!("invalid JSON: {e}")))?;
    let obj = value
        .as_object()
        .ok_or_else(|| corrupt("top level is not an object".into()))?;

    if let Some(version) = obj.get("version").and_then(|v| v.as_u64())
        && version > STATE_VERSION as u64
    {
        return Err(corrupt(format!(
            "document version {version} is newer than supported {STATE_VERSION}"
        )));
    }

    let processed = obj
        .get("processed")
        .ok_or_else(|| corrupt("missing \"processed\" map".into()))?
        .as_object()
        .ok_or_else(|| corrupt("\"processed\" is not an object".into()))?;

    let mut records = BTreeMap::new();
    for (key, entry) in processed {
        let record = match entry {
            // Legacy shape: key -> revision string.
            serde_json::Value::String(_) => ProcessedRecord {
                item_key: key.clone(),
                input_path: key.clone(),
                processed_at: DateTime::<Utc>::UNIX_EPOCH,
                output_path: String::new(),
                mode: "unknown".into(),
                content_hash: None,
                prompt_id: None,
                prompt_hash: None,
                confidence: None,
            },
            serde_json::Value::Object(_) => {
                let mut record: ProcessedRecord = serde_json::from_value(entry.clone())
                    .map_err(|e| corrupt(format!("record {key}: {e}")))?;
                if record.item_key.is_empty() {
                    record.item_key = key.clone();
                } else if record.item_key != *key {
                    return Err(corrupt(format!(
                        "record stored under {key} claims key {}",
                        record.item_key
                    )));
                }
                record
            }
            other => {
                return Err(corrupt(format!("record {key} has unexpected type: {other}")));
            }
        };
        records.insert(key.clone(), record);
    }
    Ok(records)
}

#[async_trait]
impl StateStore for JsonStateStore {
    async fn load(&mut self) -> Result<(), PersistenceError> {
        let raw = self
            .storage
            .read_optional(&self.path)
            .await
            .map_err(|source| PersistenceError::Read {
                path: self.path.clone(),
                source,
            })?;

        self.records = match raw {
            None => {
                info!(path = %self.path, "No state document yet, starting empty");
                BTreeMap::new()
            }
            Some(bytes) if bytes.iter().all(|b| b.is_ascii_whitespace()) => {
                return Err(self.corrupt("document is empty"));
            }
            Some(bytes) => parse_state_document(&self.path, &bytes)?,
        };

        self.loaded = true;
        self.dirty = false;
        info!(
            path = %self.path,
            backend = self.storage.name(),
            records = self.records.len(),
            "State loaded"
        );
        Ok(())
    }

    fn is_processed(&self, item_key: &str) -> bool {
        self.records.contains_key(item_key)
    }

    fn get(&self, item_key: &str) -> Option<&ProcessedRecord> {
        self.records.get(item_key)
    }

    fn mark_processed(&mut self, record: ProcessedRecord) -> Result<(), PersistenceError> {
        if !self.loaded {
            return Err(PersistenceError::NotLoaded);
        }
        if self.records.contains_key(&record.item_key) {
            return Err(PersistenceError::DuplicateRecord(record.item_key));
        }
        debug!(key = %record.item_key, output = %record.output_path, "Recording processed item");
        self.records.insert(record.item_key.clone(), record);
        self.dirty = true;
        Ok(())
    }

    fn remove(&mut self, item_key: &str) -> Option<ProcessedRecord> {
        let removed = self.records.remove(item_key);
        if removed.is_some() {
            warn!(key = item_key, "Removed processed record");
            self.dirty = true;
        }
        removed
    }

    fn records(&self) -> Vec<&ProcessedRecord> {
        self.records.values().collect()
    }

    async fn flush(&mut self) -> Result<(), PersistenceError> {
        if !self.loaded {
            return Err(PersistenceError::NotLoaded);
        }
        if !self.dirty {
            return Ok(());
        }
        let doc = StateDocument {
            version: STATE_VERSION,
            processed: &self.records,
        };
        let mut payload = serde_json::to_vec_pretty(&doc)?;
        payload.push(b'\n');
        self.storage
            .write(&self.path, &payload)
            .await
            .map_err(|source| PersistenceError::Write {
                path: self.path.clone(),
                source,
            })?;
        self.dirty = false;
        debug!(path = %self.path, records = self.records.len(), "State flushed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn record(key: &str) -> ProcessedRecord {
        ProcessedRecord {
            item_key: key.into(),
            input_path: key.into(),
            processed_at: Utc::now(),
            output_path: format!("/out{key}.out.md"),
            mode: "memo".into(),
            content_hash: Some("abc".into()),
            prompt_id: Some("MEMO:CORE".into()),
            prompt_hash: Some("0123456789abcdef".into()),
            confidence: Some(0.5),
        }
    }

    #[tokio::test]
    async fn missing_document_starts_empty() {
        let storage = Arc::new(MemoryStorage::new());
        let mut store = JsonStateStore::new(storage, "/sys/state.json");
        store.load().await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn round_trip_through_storage() {
        let storage = Arc::new(MemoryStorage::new());
        let mut store = JsonStateStore::new(storage.clone(), "/sys/state.json");
        store.load().await.unwrap();
        store.mark_processed(record("/in/a.txt")).unwrap();
        store.flush().await.unwrap();

        let raw = storage.get_text("/sys/state.json").unwrap();
        assert!(raw.contains("\"version\": 1"));
        assert!(raw.contains("/in/a.txt"));

        let mut reloaded = JsonStateStore::new(storage, "/sys/state.json");
        reloaded.load().await.unwrap();
        assert!(reloaded.is_processed("/in/a.txt"));
        assert_eq!(reloaded.get("/in/a.txt").unwrap().mode, "memo");
    }

    #[tokio::test]
    async fn corrupt_document_fails_fast() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert("/sys/state.json", "{\"processed\": {\"/in/a.txt\": ");
        let mut store = JsonStateStore::new(storage, "/sys/state.json");
        let err = store.load().await.unwrap_err();
        assert!(matches!(err, PersistenceError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn empty_document_is_corrupt() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert("/sys/state.json", "  \n");
        let mut store = JsonStateStore::new(storage, "/sys/state.json");
        assert!(matches!(
            store.load().await,
            Err(PersistenceError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn legacy_revision_map_is_upgraded() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert(
            "/sys/state.json",
            r#"{"processed": {"/0-inbox/old.txt": "015f3c9a"}}"#,
        );
        let mut store = JsonStateStore::new(storage, "/sys/state.json");
        store.load().await.unwrap();
        let rec = store.get("/0-inbox/old.txt").unwrap();
        assert_eq!(rec.mode, "unknown");
        assert_eq!(rec.item_key, "/0-inbox/old.txt");
    }

    #[test]
    fn mismatched_record_key_is_corrupt() {
        let raw = serde_json::json!({
            "version": 1,
            "processed": {
                "/a.txt": {
                    "item_key": "/b.txt",
                    "processed_at": "2026-01-01T00:00:00Z",
                    "output_path": "/out/a.md",
                    "mode": "memo"
                }
            }
        });
        let err = parse_state_document("/s.json", raw.to_string().as_bytes()).unwrap_err();
        assert!(err.to_string().contains("claims key"));
    }

    #[test]
    fn newer_version_is_rejected() {
        let raw = br#"{"version": 99, "processed": {}}"#;
        assert!(parse_state_document("/s.json", raw).is_err());
    }

    #[tokio::test]
    async fn duplicate_record_rejected() {
        let storage = Arc::new(MemoryStorage::new());
        let mut store = JsonStateStore::new(storage, "/s.json");
        store.load().await.unwrap();
        store.mark_processed(record("/a.txt")).unwrap();
        assert!(matches!(
            store.mark_processed(record("/a.txt")),
            Err(PersistenceError::DuplicateRecord(_))
        ));
    }

    #[tokio::test]
    async fn use_before_load_is_an_error() {
        let storage = Arc::new(MemoryStorage::new());
        let mut store = JsonStateStore::new(storage, "/s.json");
        assert!(matches!(
            store.mark_processed(record("/a.txt")),
            Err(PersistenceError::NotLoaded)
        ));
        assert!(matches!(store.flush().await, Err(PersistenceError::NotLoaded)));
    }

    #[tokio::test]
    async fn flush_failure_surfaces_as_write_error() {
        let storage = Arc::new(MemoryStorage::new());
        let mut store = JsonStateStore::new(storage.clone(), "/sys/state.json");
        store.load().await.unwrap();
        store.mark_processed(record("/a.txt")).unwrap();
        storage.fail_writes_under("/sys");
        assert!(matches!(
            store.flush().await,
            Err(PersistenceError::Write { .. })
        ));
    }

    #[tokio::test]
    async fn removed_record_is_persisted() {
        let storage = Arc::new(MemoryStorage::new());
        let mut store = JsonStateStore::new(storage.clone(), "/s.json");
        store.load().await.unwrap();
        store.mark_processed(record("/a.txt")).unwrap();
        store.mark_processed(record("/b.txt")).unwrap();
        store.flush().await.unwrap();

        assert!(store.remove("/a.txt").is_some());
        store.flush().await.unwrap();

        let mut reloaded = JsonStateStore::new(storage, "/s.json");
        reloaded.load().await.unwrap();
        assert!(!reloaded.is_processed("/a.txt"));
        assert!(reloaded.is_processed("/b.txt"));
    }
}
