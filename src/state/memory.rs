//! In-memory state store for tests and dry runs.

use std::collections::BTreeMap;

use async_trait::async_trait;

use super::{ProcessedRecord, StateStore};
use crate::error::PersistenceError;

/// Volatile store. Counts flushes and can be told to fail them.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    records: BTreeMap<String, ProcessedRecord>,
    loaded: bool,
    flushes: usize,
    fail_flush: bool,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate with records (already "loaded").
    pub fn with_records(records: impl IntoIterator<Item = ProcessedRecord>) -> Self {
        Self {
            records: records
                .into_iter()
                .map(|r| (r.item_key.clone(), r))
                .collect(),
            loaded: true,
            ..Self::default()
        }
    }

    /// Number of successful `flush()` calls.
    pub fn flush_count(&self) -> usize {
        self.flushes
    }

    /// Make subsequent flushes fail.
    pub fn set_fail_flush(&mut self, fail: bool) {
        self.fail_flush = fail;
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&mut self) -> Result<(), PersistenceError> {
        self.loaded = true;
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
        self.records.insert(record.item_key.clone(), record);
        Ok(())
    }

    fn remove(&mut self, item_key: &str) -> Option<ProcessedRecord> {
        self.records.remove(item_key)
    }

    fn records(&self) -> Vec<&ProcessedRecord> {
        self.records.values().collect()
    }

    async fn flush(&mut self) -> Result<(), PersistenceError> {
        if self.fail_flush {
            return Err(PersistenceError::Write {
                path: "memory".into(),
                source: crate::error::StorageError::RequestFailed {
                    backend: "memory".into(),
                    reason: "flush disabled".into(),
                },
            });
        }
        self.flushes += 1;
        Ok(())
    }
}
