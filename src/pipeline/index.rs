//! Outbox `INDEX.md`: one line per output, appended once.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::StorageError;
use crate::pipeline::types::Mode;
use crate::storage::{Storage, join_path};

pub const INDEX_FILE: &str = "INDEX.md";

const HEADER: &str = "# Outbox Index\n\n\
    Columns: processed_at | mode | confidence | output | input_path\n\n";

/// Fields for one index line.
#[derive(Debug, Clone)]
pub struct IndexEntry<'a> {
    pub processed_at: DateTime<Utc>,
    pub mode: Mode,
    pub confidence: f32,
    pub output_name: &'a str,
    pub input_path: &'a str,
}

impl IndexEntry<'_> {
    pub fn line(&self) -> String {
        format!(
            "- {} | {} | {:.2} | [out](./{}) | {}",
            self.processed_at.format("%Y-%m-%d"),
            self.mode,
            self.confidence,
            self.output_name,
            escape_pipes(self.input_path),
        )
    }
}

/// Append-only index stored next to the outputs.
pub struct OutboxIndex {
    storage: Arc<dyn Storage>,
    path: String,
}

impl OutboxIndex {
    pub fn new(storage: Arc<dyn Storage>, outbox: &str) -> Self {
        Self {
            storage,
            path: join_path(outbox, INDEX_FILE),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Append `entry` unless its output is already listed. Returns whether
    /// a line was written.
    pub async fn append(&self, entry: &IndexEntry<'_>) -> Result<bool, StorageError> {
        let existing = match self.storage.read_optional(&self.path).await? {
            Some(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            None => String::new(),
        };

        if existing.contains(entry.output_name) {
            debug!(output = entry.output_name, "Already indexed");
            return Ok(false);
        }

        let text = if existing.trim().is_empty() {
            format!("{HEADER}{}\n", entry.line())
        } else {
            format!("{}\n{}\n", existing.trim_end(), entry.line())
        };
        self.storage.write(&self.path, text.as_bytes()).await?;
        Ok(true)
    }
}

fn escape_pipes(s: &str) -> String {
    s.replace('|', "/").trim().to_string()
}
