//! Audit trailer appended to every output document.
//!
//! ```text
//! <answer body>
//!
//! ---
//!
//! ## Processing metadata (auto-generated)
//!
//! - Mode: memo
//! - Confidence: 0.67
//! - Prompt ID: MEMO:CORE v1.0-medium
//! - Prompt hash: 3f2a…
//! - Processed at: 2026-03-01T10:00:00Z
//! - Input file: /0-Inbox/note1.txt
//! - Input hash: …
//! ```
//!
//! The six required labels always come first and in this order. Values are
//! forced onto a single line so the block stays grep-able, and
//! `parse_trailer` can read it back.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::inbox::InboxItem;
use crate::pipeline::types::{Classification, Depth, Mode, ProcessingResult};

pub const TRAILER_HEADING: &str = "## Processing metadata (auto-generated)";
const SEPARATOR: &str = "\n\n---\n\n";

pub const LABEL_MODE: &str = "Mode";
pub const LABEL_CONFIDENCE: &str = "Confidence";
pub const LABEL_PROMPT_ID: &str = "Prompt ID";
pub const LABEL_PROMPT_HASH: &str = "Prompt hash";
pub const LABEL_PROCESSED_AT: &str = "Processed at";
pub const LABEL_INPUT_FILE: &str = "Input file";
pub const LABEL_INPUT_HASH: &str = "Input hash";
pub const LABEL_ROUTE: &str = "Route";
pub const LABEL_REASON: &str = "Reason";
pub const LABEL_DEPTH: &str = "Depth";
pub const LABEL_MODEL: &str = "Model";
pub const LABEL_MEMORY_HASH: &str = "Memory hash";
pub const LABEL_WARNING: &str = "Warning";
pub const LABEL_OUTPUT_FILE: &str = "Output file";

/// Labels every trailer must carry, in order.
pub const REQUIRED_LABELS: [&str; 6] = [
    LABEL_MODE,
    LABEL_CONFIDENCE,
    LABEL_PROMPT_ID,
    LABEL_PROMPT_HASH,
    LABEL_PROCESSED_AT,
    LABEL_INPUT_FILE,
];

/// Optional context for the extra trailer fields.
#[derive(Debug, Clone, Default)]
pub struct TrailerExtras {
    pub depth: Option<Depth>,
    pub output_file: Option<String>,
}

/// Render the full output document: trimmed answer plus trailer.
pub fn format_output(
    answer_text: &str,
    classification: &Classification,
    result: &ProcessingResult,
    item: &InboxItem,
    now: DateTime<Utc>,
    extras: &TrailerExtras,
) -> String {
    let mut fields: Vec<(&str, String)> = vec![
        (LABEL_MODE, classification.mode.to_string()),
        (LABEL_CONFIDENCE, format!("{:.2}", classification.confidence)),
        (
            LABEL_PROMPT_ID,
            format!("{} v{}", result.prompt_id, result.prompt_version),
        ),
        (LABEL_PROMPT_HASH, result.prompt_hash.clone()),
        (
            LABEL_PROCESSED_AT,
            now.to_rfc3339_opts(SecondsFormat::Secs, true),
        ),
        (LABEL_INPUT_FILE, item.path.clone()),
        (LABEL_INPUT_HASH, item.content_hash.clone()),
        (LABEL_ROUTE, classification.route.to_string()),
        (LABEL_REASON, classification.reason.clone()),
    ];
    if let Some(depth) = extras.depth {
        fields.push((LABEL_DEPTH, depth.to_string()));
    }
    fields.push((LABEL_MODEL, result.model.clone()));
    fields.push((
        LABEL_MEMORY_HASH,
        result.memory_hash.clone().unwrap_or_else(|| "(none)".into()),
    ));
    if let Some(warning) = &result.warning {
        fields.push((LABEL_WARNING, warning.clone()));
    }
    if let Some(output) = &extras.output_file {
        fields.push((LABEL_OUTPUT_FILE, output.clone()));
    }

    let mut doc = String::with_capacity(answer_text.len() + 512);
    doc.push_str(answer_text.trim());
    doc.push_str(SEPARATOR);
    doc.push_str(TRAILER_HEADING);
    doc.push_str("\n\n");
    for (label, value) in fields {
        doc.push_str(&format!("- {label}: {}\n", single_line(&value)));
    }
    doc
}

/// Collapse a value onto one line.
pub fn single_line(value: &str) -> String {
    let joined = value
        .split(|c: char| c.is_control())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if joined.is_empty() {
        "(none)".to_string()
    } else {
        joined
    }
}

// ── Parsing ─────────────────────────────────────────────────────────

/// A trailer read back from an output document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedTrailer {
    /// `(label, value)` pairs in document order.
    pub fields: Vec<(String, String)>,
}

impl ParsedTrailer {
    pub fn get(&self, label: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, v)| v.as_str())
    }

    /// All required labels present, first, in order.
    pub fn is_complete(&self) -> bool {
        self.fields.len() >= REQUIRED_LABELS.len()
            && self
                .fields
                .iter()
                .zip(REQUIRED_LABELS)
                .all(|((label, value), required)| label == required && !value.is_empty())
    }

    pub fn mode(&self) -> Option<Mode> {
        self.get(LABEL_MODE)?.parse().ok()
    }

    pub fn confidence(&self) -> Option<f32> {
        self.get(LABEL_CONFIDENCE)?.parse().ok()
    }

    /// `(id, version)` from `"<id> v<version>"`.
    pub fn prompt_id(&self) -> Option<(&str, &str)> {
        self.get(LABEL_PROMPT_ID)?.rsplit_once(" v")
    }

    pub fn processed_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(self.get(LABEL_PROCESSED_AT)?)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

/// Read the last trailer block in `document`, if any.
pub fn parse_trailer(document: &str) -> Option<ParsedTrailer> {
    let start = document.rfind(TRAILER_HEADING)?;
    let block = &document[start + TRAILER_HEADING.len()..];

    let mut fields = Vec::new();
    for line in block.lines() {
        let line = line.trim();
        if line.is_empty() {
            if fields.is_empty() {
                continue;
            }
            break;
        }
        let Some(entry) = line.strip_prefix("- ") else {
            break;
        };
        if let Some((label, value)) = entry.split_once(": ") {
            fields.push((label.trim().to_string(), value.trim().to_string()));
        }
    }

    if fields.is_empty() {
        None
    } else {
        Some(ParsedTrailer { fields })
    }
}
