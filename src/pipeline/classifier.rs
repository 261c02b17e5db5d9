//! Content classifier. Assigns each inbox item a `Mode` without an LLM.
//!
//! Decision order:
//! 1. Inbox sub-folder (`papers/`, `patents/`, `misc/`) wins outright
//! 2. Weighted regex signals score every mode; best score wins
//! 3. No signal at all → default mode at the configured floor confidence
//!
//! Pure and deterministic: same content and route, same answer.

use regex::Regex;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::inbox::{InboxItem, Route};
use crate::pipeline::types::{Classification, Mode};

/// Confidence assigned to folder-routed items.
pub const ROUTED_CONFIDENCE: f32 = 0.95;

/// Bounds for content-scored confidence.
const MIN_SCORED_CONFIDENCE: f32 = 0.35;
const MAX_SCORED_CONFIDENCE: f32 = 0.9;

/// Default floor used when nothing matches.
pub const DEFAULT_CONFIDENCE_FLOOR: f32 = 0.3;

/// Tie-break order: earlier wins on equal scores.
const PRIORITY: [Mode; 3] = [Mode::Patent, Mode::Paper, Mode::Memo];

const DOI_PATTERN: &str = r"(?i)\b10\.\d{4,9}/[^\s]+";

/// `(pattern, mode, weight, label)`
const DEFAULT_SIGNALS: &[(&str, Mode, u32, &str)] = &[
    // Patent identifiers and vocabulary
    (r"(?i)\bWO\s?\d{4}/\d{6,}\b", Mode::Patent, 3, "wo-publication"),
    (r"(?i)\bUS\s?\d{4}/\d{7,}\b", Mode::Patent, 3, "us-publication"),
    (r"(?i)\bEP\s?\d{6,}\b", Mode::Patent, 2, "ep-publication"),
    (r"(?i)\bclaims?\b", Mode::Patent, 2, "claims"),
    (r"請求項", Mode::Patent, 3, "claims-ja"),
    (r"特許", Mode::Patent, 2, "patent-ja"),
    (
        r"(?i)\b(patent|inventors?|assignee|applicants?|embodiments?)\b",
        Mode::Patent,
        2,
        "patent-terms",
    ),
    // Paper identifiers and section headings
    (DOI_PATTERN, Mode::Paper, 3, "doi"),
    (r"(?i)\babstract\b", Mode::Paper, 2, "abstract"),
    (r"(?i)\bintroduction\b", Mode::Paper, 1, "introduction"),
    (r"(?i)\breferences\b", Mode::Paper, 1, "references"),
    (r"(?i)\btables?\b", Mode::Paper, 1, "table"),
    (r"図", Mode::Paper, 1, "figure-ja"),
    (r"(?i)\bresults?\b", Mode::Paper, 1, "results"),
    (
        r"(?i)\b(methods?|study|studies|cohort|assays?|lab|laboratory)\b",
        Mode::Paper,
        1,
        "study-terms",
    ),
    (r"(?i)\b(et al\.|journal)", Mode::Paper, 2, "citation"),
    // Notes, requests, errands
    (
        r"(?i)\b(requests?|refills?|reminders?|todo|to-do|errands?)\b",
        Mode::Memo,
        2,
        "request",
    ),
    (
        r"(?i)\b(meeting|agenda|call|appointment|follow[- ]up|notes?)\b",
        Mode::Memo,
        1,
        "note-terms",
    ),
];

/// A weighted content signal.
#[derive(Debug, Clone)]
pub struct Signal {
    /// Compiled regex for matching.
    pub regex: Regex,
    /// Mode this signal votes for.
    pub mode: Mode,
    pub weight: u32,
    /// Short name used in the classification reason.
    pub label: String,
}

/// Rule-based classifier.
pub struct Classifier {
    signals: Vec<Signal>,
    default_mode: Mode,
    floor: f32,
}

impl Classifier {
    /// Create a classifier with the built-in signals.
    pub fn default_rules() -> Self {
        let signals = DEFAULT_SIGNALS
            .iter()
            .filter_map(|(pattern, mode, weight, label)| {
                compile(pattern).map(|regex| Signal {
                    regex,
                    mode: *mode,
                    weight: *weight,
                    label: (*label).to_string(),
                })
            })
            .collect();
        Self {
            signals,
            default_mode: Mode::Other,
            floor: DEFAULT_CONFIDENCE_FLOOR,
        }
    }

    /// Create a classifier with no signals (for testing).
    pub fn empty() -> Self {
        Self {
            signals: Vec::new(),
            default_mode: Mode::Other,
            floor: DEFAULT_CONFIDENCE_FLOOR,
        }
    }

    /// Mode used when nothing matches.
    pub fn with_default_mode(mut self, mode: Mode) -> Self {
        self.default_mode = mode;
        self
    }

    /// Confidence reported for defaulted items.
    pub fn with_floor(mut self, floor: f32) -> Self {
        self.floor = floor.clamp(0.0, 1.0);
        self
    }

    /// Add a custom signal.
    pub fn add_signal(
        &mut self,
        pattern: &str,
        mode: Mode,
        weight: u32,
        label: &str,
    ) -> Result<(), regex::Error> {
        self.signals.push(Signal {
            regex: Regex::new(pattern)?,
            mode,
            weight,
            label: label.into(),
        });
        Ok(())
    }

    /// Classify an item, degrading ambiguity to the default mode.
    pub fn classify(&self, item: &InboxItem, route: Route) -> Classification {
        match self.try_classify(item, route) {
            Ok(c) => c,
            Err(e) => {
                debug!(path = %item.path, error = %e, default = %self.default_mode, "Falling back to default mode");
                Classification {
                    mode: self.default_mode,
                    confidence: self.floor,
                    reason: format!("no content signals; defaulted to {}", self.default_mode),
                    route,
                }
            }
        }
    }

    /// Classify an item, reporting `ClassificationAmbiguous` when no rule
    /// applies.
    pub fn try_classify(
        &self,
        item: &InboxItem,
        route: Route,
    ) -> Result<Classification, PipelineError> {
        if let Some(mode) = routed_mode(route) {
            return Ok(Classification {
                mode,
                confidence: ROUTED_CONFIDENCE,
                reason: format!("inbox folder {route}"),
                route,
            });
        }

        let mut scores = [0u32; PRIORITY.len()];
        let mut hits: Vec<&str> = Vec::new();
        for signal in &self.signals {
            if signal.regex.is_match(&item.content)
                && let Some(i) = PRIORITY.iter().position(|m| *m == signal.mode)
            {
                scores[i] += signal.weight;
                hits.push(&signal.label);
            }
        }

        let mut ranked: Vec<(Mode, u32)> = PRIORITY.iter().copied().zip(scores).collect();
        // Stable sort keeps PRIORITY order for ties.
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        let (best_mode, best) = ranked[0];
        let runner_up = ranked[1].1;

        if best == 0 {
            return Err(PipelineError::ClassificationAmbiguous(item.path.clone()));
        }

        let confidence = (best as f32 / (best + runner_up + 1) as f32)
            .clamp(MIN_SCORED_CONFIDENCE, MAX_SCORED_CONFIDENCE);
        let reason = format!(
            "signals: {} ({best_mode} {best} vs {runner_up})",
            hits.join(", ")
        );
        debug!(path = %item.path, mode = %best_mode, confidence, reason = %reason, "Classified by content");

        Ok(Classification {
            mode: best_mode,
            confidence,
            reason,
            route,
        })
    }
}

fn routed_mode(route: Route) -> Option<Mode> {
    match route {
        Route::Papers => Some(Mode::Paper),
        Route::Patents => Some(Mode::Patent),
        Route::Misc => Some(Mode::Memo),
        Route::Root | Route::Other => None,
    }
}

fn compile(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(r) => Some(r),
        Err(e) => {
            warn!(pattern, error = %e, "Skipping invalid classifier pattern");
            None
        }
    }
}

// ── DOI scanning ────────────────────────────────────────────────────

/// Finds DOI references in free text.
pub struct DoiScanner {
    regex: Option<Regex>,
}

impl DoiScanner {
    pub fn new() -> Self {
        Self {
            regex: compile(DOI_PATTERN),
        }
    }

    /// Distinct DOIs in order of first appearance, lowercased and without
    /// trailing punctuation.
    pub fn distinct(&self, text: &str) -> Vec<String> {
        let Some(regex) = &self.regex else {
            return Vec::new();
        };
        let mut seen: Vec<String> = Vec::new();
        for m in regex.find_iter(text) {
            let doi = m
                .as_str()
                .trim_end_matches(['.', ',', ';', ':', ')', ']', '}', '>', '"', '\''])
                .to_lowercase();
            if !seen.contains(&doi) {
                seen.push(doi);
            }
        }
        seen
    }
}

impl Default for DoiScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(content: &str) -> InboxItem {
        InboxItem::from_bytes("/0-Inbox/x.txt", content.as_bytes())
    }

    #[test]
    fn refill_request_is_memo() {
        let c = Classifier::default_rules().classify(&item("refill request for X"), Route::Root);
        assert_eq!(c.mode, Mode::Memo);
        assert!(c.confidence >= 0.35 && c.confidence <= 0.9);
        assert!(c.reason.contains("request"));
    }

    #[test]
    fn lab_result_summary_is_paper() {
        let c = Classifier::default_rules().classify(&item("lab result summary"), Route::Root);
        assert_eq!(c.mode, Mode::Paper);
    }

    #[test]
    fn patent_identifiers_win() {
        let c = Classifier::default_rules().classify(
            &item("WO 2021/123456 A1\nClaims\n1. A compound of formula (I)..."),
            Route::Root,
        );
        assert_eq!(c.mode, Mode::Patent);
        assert!(c.confidence > 0.5);
    }

    #[test]
    fn japanese_claims_are_patent() {
        let c = Classifier::default_rules().classify(&item("【請求項1】化合物"), Route::Root);
        assert_eq!(c.mode, Mode::Patent);
    }

    #[test]
    fn doi_and_sections_are_paper() {
        let c = Classifier::default_rules().classify(
            &item("Abstract\nWe report...\nIntroduction\n...\ndoi: 10.1021/acs.jmedchem.0c01234"),
            Route::Root,
        );
        assert_eq!(c.mode, Mode::Paper);
        assert!(c.confidence <= 0.9);
    }

    #[test]
    fn folder_route_overrides_content() {
        let c = Classifier::default_rules()
            .classify(&item("refill request for X"), Route::Patents);
        assert_eq!(c.mode, Mode::Patent);
        assert_eq!(c.confidence, ROUTED_CONFIDENCE);

        let c = Classifier::default_rules().classify(&item("anything"), Route::Misc);
        assert_eq!(c.mode, Mode::Memo);
    }

    #[test]
    fn no_signal_is_ambiguous_then_defaults() {
        let classifier = Classifier::default_rules()
            .with_default_mode(Mode::Memo)
            .with_floor(0.25);
        let it = item("xyzzy plugh");
        assert!(matches!(
            classifier.try_classify(&it, Route::Root),
            Err(PipelineError::ClassificationAmbiguous(_))
        ));
        let c = classifier.classify(&it, Route::Root);
        assert_eq!(c.mode, Mode::Memo);
        assert_eq!(c.confidence, 0.25);
    }

    #[test]
    fn deterministic() {
        let classifier = Classifier::default_rules();
        let it = item("Meeting notes: results table attached");
        assert_eq!(
            classifier.classify(&it, Route::Root),
            classifier.classify(&it, Route::Root)
        );
    }

    #[test]
    fn ties_follow_priority_order() {
        let mut classifier = Classifier::empty();
        classifier.add_signal(r"alpha", Mode::Memo, 1, "a").unwrap();
        classifier.add_signal(r"alpha", Mode::Paper, 1, "b").unwrap();
        let c = classifier.classify(&item("alpha"), Route::Root);
        assert_eq!(c.mode, Mode::Paper);
        assert_eq!(c.confidence, 0.35);
    }

    #[test]
    fn invalid_custom_signal_is_an_error() {
        let mut classifier = Classifier::empty();
        assert!(classifier.add_signal("(", Mode::Memo, 1, "bad").is_err());
    }

    #[test]
    fn distinct_dois() {
        let scanner = DoiScanner::new();
        let dois = scanner.distinct(
            "see 10.1000/ABC.1, also (10.1000/abc.1) and 10.5555/xyz-2.",
        );
        assert_eq!(dois, vec!["10.1000/abc.1", "10.5555/xyz-2"]);
        assert!(scanner.distinct("no references here").is_empty());
    }
}
