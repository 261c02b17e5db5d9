//! Item processor. Builds the mode-specific prompt and calls the model once.
//!
//! Flow:
//! 1. Pick the template for `(mode, depth)`
//! 2. System prompt = operator memory (optional) + template + output constraints
//! 3. User prompt = item content, truncated around the middle if too long
//! 4. Exactly one `LlmProvider::complete` call
//!
//! Retries live inside the provider; from here a failed call is an item
//! failure that the next run will retry.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{LlmError, PipelineError};
use crate::inbox::InboxItem;
use crate::llm::provider::{ChatMessage, CompletionRequest, FinishReason, LlmProvider};
use crate::pipeline::classifier::DoiScanner;
use crate::pipeline::prompts::{PromptRegistry, PromptTemplate};
use crate::pipeline::types::{Classification, Depth, ProcessingResult};
use crate::storage::Storage;

/// Marker placed where the middle of an oversized input was cut.
pub const TRUNCATION_MARKER: &str = "\n\n[...TRUNCATED...]\n\n";

/// Default input cap in characters.
pub const DEFAULT_MAX_INPUT_CHARS: usize = 80_000;

/// Memory documents larger than this are ignored.
const MAX_MEMORY_BYTES: usize = 200_000;

const OUTPUT_CONSTRAINTS: &str = "\n\nOutput constraints:\n\
    - Answer in Markdown.\n\
    - Begin with a one-line title.\n\
    - Do not fabricate bibliographic facts; leave unknown fields blank.\n\
    - Do not add a processing metadata section; it is appended automatically.\n";

/// Processor settings.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub depth: Depth,
    pub max_input_chars: usize,
    /// Per-request output cap. `None` leaves it to the provider default.
    pub max_output_tokens: Option<u32>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            depth: Depth::Medium,
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
            max_output_tokens: None,
        }
    }
}

/// Operator-provided standing instructions prepended to every system prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorMemory {
    pub text: String,
    /// First 8 hex chars of SHA-256 over the text.
    pub hash: String,
}

impl OperatorMemory {
    /// `None` for blank text.
    pub fn new(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let mut hash = format!("{:x}", Sha256::digest(text.as_bytes()));
        hash.truncate(8);
        Some(Self {
            text: text.to_string(),
            hash,
        })
    }

    /// Load from storage. Missing, oversized or unreadable documents are
    /// logged and ignored.
    pub async fn load(storage: &dyn Storage, path: &str) -> Option<Self> {
        match storage.read_optional(path).await {
            Ok(Some(bytes)) if bytes.len() > MAX_MEMORY_BYTES => {
                warn!(path, bytes = bytes.len(), "Memory document too large, ignoring");
                None
            }
            Ok(Some(bytes)) => {
                let memory = Self::new(&String::from_utf8_lossy(&bytes));
                if let Some(m) = &memory {
                    info!(path, hash = %m.hash, "Loaded operator memory");
                }
                memory
            }
            Ok(None) => {
                debug!(path, "No memory document");
                None
            }
            Err(e) => {
                warn!(path, error = %e, "Failed to read memory document, continuing without it");
                None
            }
        }
    }
}

/// Turns a classified item into a model answer.
pub struct Processor {
    llm: Arc<dyn LlmProvider>,
    prompts: PromptRegistry,
    config: ProcessorConfig,
    memory: Option<OperatorMemory>,
    dois: DoiScanner,
}

impl Processor {
    pub fn new(llm: Arc<dyn LlmProvider>, config: ProcessorConfig) -> Self {
        Self {
            llm,
            prompts: PromptRegistry::builtin(),
            config,
            memory: None,
            dois: DoiScanner::new(),
        }
    }

    pub fn with_prompts(mut self, prompts: PromptRegistry) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_memory(mut self, memory: Option<OperatorMemory>) -> Self {
        self.memory = memory;
        self
    }

    pub fn depth(&self) -> Depth {
        self.config.depth
    }

    pub fn model_name(&self) -> &str {
        self.llm.model_name()
    }

    /// Process one item with a single model call.
    pub async fn process(
        &self,
        item: &InboxItem,
        classification: &Classification,
    ) -> Result<ProcessingResult, PipelineError> {
        let template = self.template_for(classification)?;
        let (user_prompt, truncated) = truncate_middle(&item.content, self.config.max_input_chars);
        let system_prompt = compose_system_prompt(
            &template.text,
            self.memory.as_ref().map(|m| m.text.as_str()),
        );

        let mut request = CompletionRequest::new(vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(user_prompt),
        ]);
        if let Some(max) = self.config.max_output_tokens {
            request = request.with_max_tokens(max);
        }

        info!(
            path = %item.path,
            mode = %classification.mode,
            prompt = %template.label(),
            truncated,
            "Calling model"
        );

        let response = self.llm.complete(request).await?;

        let answer = response.content.trim();
        if answer.is_empty() {
            return Err(PipelineError::Api(LlmError::InvalidResponse {
                provider: self.llm.model_name().to_string(),
                reason: "empty completion".into(),
            }));
        }
        if response.finish_reason == FinishReason::Length {
            warn!(path = %item.path, "Completion hit the output token cap");
        }

        Ok(ProcessingResult {
            answer_text: answer.to_string(),
            prompt_id: template.id.clone(),
            prompt_version: template.version.clone(),
            prompt_hash: template.hash(),
            model: self.llm.model_name().to_string(),
            memory_hash: self.memory.as_ref().map(|m| m.hash.clone()),
            warning: self.warning_for(item, truncated),
        })
    }

    fn template_for(&self, classification: &Classification) -> Result<&PromptTemplate, PipelineError> {
        self.prompts
            .get(classification.mode, self.config.depth)
            .ok_or_else(|| PipelineError::MissingPrompt {
                mode: classification.mode.to_string(),
                depth: self.config.depth.to_string(),
            })
    }

    fn warning_for(&self, item: &InboxItem, truncated: bool) -> Option<String> {
        let mut notes = Vec::new();
        let dois = self.dois.distinct(&item.content);
        if dois.len() >= 2 {
            notes.push(format!(
                "multiple references detected ({} DOIs); the output may mix sources",
                dois.len()
            ));
        }
        if truncated {
            notes.push(format!(
                "input truncated to {} characters",
                self.config.max_input_chars
            ));
        }
        if notes.is_empty() {
            None
        } else {
            Some(notes.join("; "))
        }
    }
}

// ── Prompt construction ─────────────────────────────────────────────

/// Memory (if any) + template + fixed output constraints.
pub fn compose_system_prompt(template_text: &str, memory: Option<&str>) -> String {
    match memory {
        Some(memory) if !memory.trim().is_empty() => format!(
            "### Memory / Operating Principles (user-provided)\n{}\n\n### Task Prompt\n{template_text}{OUTPUT_CONSTRAINTS}",
            memory.trim()
        ),
        _ => format!("{template_text}{OUTPUT_CONSTRAINTS}"),
    }
}

/// Keep the head and tail halves of `text` around `TRUNCATION_MARKER` when it
/// exceeds `max_chars`. Returns the text and whether it was cut.
pub fn truncate_middle(text: &str, max_chars: usize) -> (String, bool) {
    let total = text.chars().count();
    if max_chars == 0 || total <= max_chars {
        return (text.to_string(), false);
    }
    let head_len = max_chars / 2;
    let tail_len = max_chars - head_len;
    let head: String = text.chars().take(head_len).collect();
    let tail: String = text.chars().skip(total - tail_len).collect();
    (format!("{head}{TRUNCATION_MARKER}{tail}"), true)
}
