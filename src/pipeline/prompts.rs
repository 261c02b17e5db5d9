//! Versioned prompt templates keyed by `(Mode, Depth)`.
//!
//! Every template carries an id and version that end up in the audit
//! trailer, together with a short digest of the exact text sent.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::pipeline::types::{Depth, Mode};

/// Hex chars kept from the SHA-256 digest.
const PROMPT_HASH_LEN: usize = 16;

/// A single prompt template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    /// Family identifier, e.g. `PAPER:CORE`.
    pub id: String,
    /// Version including depth, e.g. `2.1-heavy`.
    pub version: String,
    pub text: String,
}

impl PromptTemplate {
    pub fn new(id: impl Into<String>, version: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            text: text.into(),
        }
    }

    /// Stable digest over id, version and text.
    pub fn hash(&self) -> String {
        prompt_hash(&self.id, &self.version, &self.text)
    }

    /// `<id> v<version>` as shown in the trailer.
    pub fn label(&self) -> String {
        format!("{} v{}", self.id, self.version)
    }
}

/// First 16 hex chars of SHA-256 over `id \n version \n text`.
pub fn prompt_hash(id: &str, version: &str, text: &str) -> String {
    let digest = Sha256::digest(format!("{id}\n{version}\n{text}").as_bytes());
    let mut hex = format!("{digest:x}");
    hex.truncate(PROMPT_HASH_LEN);
    hex
}

/// Lookup table of templates.
pub struct PromptRegistry {
    templates: HashMap<(Mode, Depth), PromptTemplate>,
}

impl PromptRegistry {
    /// Registry with the built-in template set.
    pub fn builtin() -> Self {
        let mut templates = HashMap::new();
        for (mode, id, base_version, medium, heavy_extra) in BUILTIN {
            templates.insert(
                (*mode, Depth::Medium),
                PromptTemplate::new(*id, format!("{base_version}-medium"), *medium),
            );
            templates.insert(
                (*mode, Depth::Heavy),
                PromptTemplate::new(
                    *id,
                    format!("{base_version}-heavy"),
                    format!("{medium}\nAdditions (heavy):\n{heavy_extra}"),
                ),
            );
        }
        Self { templates }
    }

    /// Replace or add a template.
    pub fn insert(&mut self, mode: Mode, depth: Depth, template: PromptTemplate) {
        self.templates.insert((mode, depth), template);
    }

    /// Template for `(mode, depth)`, falling back to the medium variant.
    pub fn get(&self, mode: Mode, depth: Depth) -> Option<&PromptTemplate> {
        self.templates
            .get(&(mode, depth))
            .or_else(|| self.templates.get(&(mode, Depth::Medium)))
    }
}

/// `(mode, id, base version, medium text, heavy additions)`
const BUILTIN: &[(Mode, &str, &str, &str, &str)] = &[
    (
        Mode::Paper,
        "PAPER:CORE",
        "2.1",
        "You are a research assistant reviewing a scientific paper or lab report.\n\
         Requirements:\n\
         - Start with bibliographic metadata: title, journal, year, DOI, authors, affiliations.\n\
         - Give a plain-language explanation before the technical review.\n\
         - Separate FACTS stated in the document from HYPOTHESES.\n\
         - Cover key points, positioning, strengths, limitations and actionable implications.\n\
         - Never invent numbers, claims or results that are not present.\n",
        "- Add critical reading: alternative explanations, confounders, assay artifacts, missing controls.\n\
         - Add a reproducibility checklist and a 'what would change our mind' section.\n\
         - Suggest follow-up experiments ordered by cost.\n",
    ),
    (
        Mode::Patent,
        "PATENT:CORE",
        "2.1",
        "You are an assistant for patent analysis.\n\
         Requirements:\n\
         - Extract header metadata: publication number, kind code, date, applicants, inventors.\n\
         - Explain in plain language what is protected and why.\n\
         - Analyze claim scope (independent claim elements), supporting examples, gaps and risks.\n\
         - Separate FACTS from HYPOTHESES.\n\
         - Give practical implications without asserting legal certainty.\n",
        "- Build a claim-element checklist.\n\
         - Highlight breadth that is under-supported by the exemplified embodiments.\n\
         - Map each key point to where it appears in the document.\n",
    ),
    (
        Mode::Memo,
        "MEMO:CORE",
        "1.0",
        "You are an assistant organizing personal notes and requests.\n\
         - Provide a clear structured summary.\n\
         - List any explicit requests or deadlines.\n",
        "- Extract action items, risks and open questions, and propose next steps.\n",
    ),
    (
        Mode::Other,
        "OTHER:CORE",
        "1.0",
        "You are an assistant. The input may be a paper, a patent or general notes.\n\
         - If it looks like a paper, review it as a paper.\n\
         - If it looks like a patent, analyze it as a patent.\n\
         - Otherwise summarize it as a memo.\n\
         - Start with best-effort header metadata.\n",
        "- Add critical reading and decision-oriented risks.\n",
    ),
];
