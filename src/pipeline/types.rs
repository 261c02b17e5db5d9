//! Shared types for the classify-process-persist pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::inbox::Route;

// ── Mode ────────────────────────────────────────────────────────────

/// Category selecting the prompt template. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Paper,
    Patent,
    Memo,
    Other,
}

impl Mode {
    pub const ALL: [Mode; 4] = [Mode::Paper, Mode::Patent, Mode::Memo, Mode::Other];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paper => "paper",
            Self::Patent => "patent",
            Self::Memo => "memo",
            Self::Other => "other",
        }
    }

    /// Upper-case tag used in output file names (`PAPER`).
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Paper => "PAPER",
            Self::Patent => "PATENT",
            Self::Memo => "MEMO",
            Self::Other => "OTHER",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "paper" => Ok(Self::Paper),
            "patent" => Ok(Self::Patent),
            "memo" => Ok(Self::Memo),
            "other" => Ok(Self::Other),
            other => Err(format!(
                "unknown mode '{other}' (expected paper, patent, memo or other)"
            )),
        }
    }
}

// ── Depth ───────────────────────────────────────────────────────────

/// Template variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Depth {
    #[default]
    Medium,
    Heavy,
}

impl Depth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Medium => "medium",
            Self::Heavy => "heavy",
        }
    }
}

impl fmt::Display for Depth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Depth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "medium" => Ok(Self::Medium),
            "heavy" => Ok(Self::Heavy),
            other => Err(format!("unknown depth '{other}' (expected medium or heavy)")),
        }
    }
}

// ── Classification / processing ─────────────────────────────────────

/// Classifier decision for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub mode: Mode,
    /// Certainty in [0, 1].
    pub confidence: f32,
    /// Short human-readable justification.
    pub reason: String,
    pub route: Route,
}

/// Model answer plus the provenance needed for the audit trailer.
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    pub answer_text: String,
    pub prompt_id: String,
    pub prompt_version: String,
    pub prompt_hash: String,
    pub model: String,
    /// Short hash of the operator memory document, if one was used.
    pub memory_hash: Option<String>,
    /// Advisory note about the input (multiple references, truncation).
    pub warning: Option<String>,
}

// ── Item state machine ──────────────────────────────────────────────

/// Furthest stage an item reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Discovered,
    Classified,
    Processed,
    Persisted,
    Recorded,
}

impl ItemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Classified => "classified",
            Self::Processed => "processed",
            Self::Persisted => "persisted",
            Self::Recorded => "recorded",
        }
    }
}

/// Terminal result for one item in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemOutcome {
    /// Already had a record at run start.
    Skipped,
    /// Output written and record flushed.
    Processed {
        output_path: String,
        mode: Mode,
        /// Completed from an existing output without a model call.
        recovered: bool,
    },
    /// Not recorded; retried on the next run.
    Failed {
        kind: String,
        /// Last state successfully reached.
        state: ItemState,
        error: String,
    },
}

impl ItemOutcome {
    /// `skipped`, `processed`, or `failed:<kind>`.
    pub fn label(&self) -> String {
        match self {
            Self::Skipped => "skipped".to_string(),
            Self::Processed { .. } => "processed".to_string(),
            Self::Failed { kind, .. } => format!("failed:{kind}"),
        }
    }
}

/// One line of the run report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemReport {
    pub path: String,
    #[serde(flatten)]
    pub outcome: ItemOutcome,
}

/// Summary of a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub items: Vec<ItemReport>,
    /// Unprocessed items left for a later run by the per-run cap.
    pub deferred: usize,
}

impl RunReport {
    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Skipped))
    }

    pub fn processed(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Processed { .. }))
    }

    pub fn recovered(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Processed { recovered: true, .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Failed { .. }))
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    /// 0 when every attempted item succeeded, 2 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.has_failures() { 2 } else { 0 }
    }

    /// Outcome recorded for `path`, if the item was seen this run.
    pub fn outcome_for(&self, path: &str) -> Option<&ItemOutcome> {
        self.items.iter().find(|i| i.path == path).map(|i| &i.outcome)
    }

    fn count(&self, pred: impl Fn(&ItemOutcome) -> bool) -> usize {
        self.items.iter().filter(|i| pred(&i.outcome)).count()
    }
}
