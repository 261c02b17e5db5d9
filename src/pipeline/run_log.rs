//! Per-run JSONL audit log: one line per event, one file per run id.
//!
//! Written through the `Storage` backend so it sits next to the state
//! document. Flushing is best effort and safe to repeat; a crash mid-run
//! still leaves everything up to the last flush.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::pipeline::types::{ItemOutcome, RunReport};
use crate::storage::{Storage, join_path};

/// What happened.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        candidates: usize,
        already_processed: usize,
    },
    ItemSkipped {
        path: String,
    },
    ItemProcessed {
        path: String,
        output_path: String,
        mode: String,
        confidence: f32,
        prompt_id: String,
        prompt_hash: String,
        recovered: bool,
    },
    ItemFailed {
        path: String,
        kind: String,
        state: String,
        error: String,
    },
    /// Best-effort side step (index, copy, mail) that did not complete.
    SideEffectFailed {
        path: String,
        step: String,
        error: String,
    },
    RunFinished {
        processed: usize,
        skipped: usize,
        failed: usize,
        deferred: usize,
    },
    RunAborted {
        error: String,
    },
}

#[derive(Debug, Serialize)]
struct Record<'a> {
    timestamp: String,
    run_id: &'a str,
    #[serde(flatten)]
    event: &'a RunEvent,
}

/// Buffered JSONL writer for a single run.
pub struct RunLog {
    storage: Arc<dyn Storage>,
    path: String,
    run_id: String,
    lines: Vec<String>,
}

impl RunLog {
    pub fn new(storage: Arc<dyn Storage>, log_dir: &str, run_id: impl Into<String>) -> Self {
        let run_id = run_id.into();
        Self {
            storage,
            path: join_path(log_dir, &format!("run_{run_id}.jsonl")),
            run_id,
            lines: Vec::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Buffer an event stamped with the current time.
    pub fn record(&mut self, event: RunEvent) {
        self.record_at(Utc::now(), event);
    }

    pub fn record_at(&mut self, at: DateTime<Utc>, event: RunEvent) {
        let record = Record {
            timestamp: at.to_rfc3339_opts(SecondsFormat::Secs, true),
            run_id: &self.run_id,
            event: &event,
        };
        match serde_json::to_string(&record) {
            Ok(line) => self.lines.push(line),
            Err(e) => warn!(error = %e, "Failed to serialize run log event"),
        }
    }

    /// Record the run summary.
    pub fn record_summary(&mut self, report: &RunReport) {
        self.record(RunEvent::RunFinished {
            processed: report.processed(),
            skipped: report.skipped(),
            failed: report.failed(),
            deferred: report.deferred,
        });
    }

    /// Write all buffered events. Failures are logged, never returned.
    pub async fn flush(&self) {
        if self.lines.is_empty() {
            return;
        }
        let mut data = self.lines.join("\n");
        data.push('\n');
        if let Err(e) = self.storage.write(&self.path, data.as_bytes()).await {
            warn!(path = %self.path, error = %e, "Failed to write run log");
        }
    }
}

/// Event for an item outcome.
pub fn outcome_event(path: &str, outcome: &ItemOutcome) -> Option<RunEvent> {
    match outcome {
        ItemOutcome::Skipped => Some(RunEvent::ItemSkipped {
            path: path.to_string(),
        }),
        ItemOutcome::Failed { kind, state, error } => Some(RunEvent::ItemFailed {
            path: path.to_string(),
            kind: kind.clone(),
            state: state.as_str().to_string(),
            error: error.clone(),
        }),
        // Processed items carry provenance the outcome does not; the
        // orchestrator records those itself.
        ItemOutcome::Processed { .. } => None,
    }
}

/// `gh-<run id>-<attempt>` under GitHub Actions, otherwise
/// `local-<timestamp>-<uuid8>`.
pub fn build_run_id(lookup: impl Fn(&str) -> Option<String>) -> String {
    let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    if let Some(run) = non_empty("GITHUB_RUN_ID") {
        let attempt = non_empty("GITHUB_RUN_ATTEMPT").unwrap_or_else(|| "1".to_string());
        return format!("gh-{run}-{attempt}");
    }
    let uuid = Uuid::new_v4().simple().to_string();
    format!(
        "local-{}-{}",
        Utc::now().format("%Y%m%dT%H%M%SZ"),
        &uuid[..8]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::ItemState;
    use crate::storage::MemoryStorage;

    #[test]
    fn run_id_under_ci() {
        let id = build_run_id(|k| match k {
            "GITHUB_RUN_ID" => Some("123".into()),
            "GITHUB_RUN_ATTEMPT" => Some("2".into()),
            _ => None,
        });
        assert_eq!(id, "gh-123-2");

        let id = build_run_id(|k| (k == "GITHUB_RUN_ID").then(|| "9".to_string()));
        assert_eq!(id, "gh-9-1");
    }

    #[test]
    fn run_id_locally() {
        let id = build_run_id(|_| None);
        assert!(id.starts_with("local-"));
        assert_eq!(id.rsplit('-').next().unwrap().len(), 8);
    }

    #[tokio::test]
    async fn writes_one_json_object_per_line() {
        let storage = Arc::new(MemoryStorage::new());
        let mut log = RunLog::new(storage.clone(), "/0-System/logs", "gh-1-1");
        log.record(RunEvent::RunStarted {
            candidates: 2,
            already_processed: 0,
        });
        log.record(RunEvent::ItemFailed {
            path: "/in/b.txt".into(),
            kind: "api".into(),
            state: "classified".into(),
            error: "HTTP 500".into(),
        });
        log.flush().await;

        let text = storage.get_text("/0-System/logs/run_gh-1-1.jsonl").unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "run_started");
        assert_eq!(lines[0]["run_id"], "gh-1-1");
        assert_eq!(lines[1]["event"], "item_failed");
        assert_eq!(lines[1]["kind"], "api");
        assert!(lines[1]["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn flush_failure_is_swallowed() {
        let storage = Arc::new(MemoryStorage::new());
        storage.fail_writes_under("/logs");
        let mut log = RunLog::new(storage.clone(), "/logs", "r");
        log.record(RunEvent::RunAborted {
            error: "corrupt state".into(),
        });
        log.flush().await;
        assert!(storage.get_text("/logs/run_r.jsonl").is_none());
    }

    #[test]
    fn outcome_events() {
        assert!(matches!(
            outcome_event("/a", &ItemOutcome::Skipped),
            Some(RunEvent::ItemSkipped { .. })
        ));
        let failed = ItemOutcome::Failed {
            kind: "read".into(),
            state: ItemState::Discovered,
            error: "gone".into(),
        };
        match outcome_event("/a", &failed) {
            Some(RunEvent::ItemFailed { state, .. }) => assert_eq!(state, "discovered"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
