//! Bridge from rig's `CompletionModel` to our `LlmProvider`.
//!
//! rig owns the HTTP transport and wire format. The adapter adds what the
//! pipeline needs on top: a per-attempt timeout, retries for transient
//! failures, and a provider error mapped onto `LlmError`.

use std::time::Duration;

use async_trait::async_trait;
use rig::completion::{CompletionError, CompletionModel};
use rig::message::{AssistantContent, Message};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role,
};
use crate::llm::retry::{RetryPolicy, with_retry};

/// Wraps any rig completion model as an `LlmProvider`.
pub struct RigAdapter<M> {
    model: M,
    model_name: String,
    provider: &'static str,
    timeout: Duration,
    retry: RetryPolicy,
    default_max_tokens: Option<u32>,
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(model: M, model_name: &str, provider: &'static str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
            provider,
            timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
            default_max_tokens: None,
        }
    }

    /// Bound on each attempt, not on the retried whole.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Output token cap used when a request does not set one.
    pub fn with_default_max_tokens(mut self, max_tokens: u32) -> Self {
        self.default_max_tokens = Some(max_tokens);
        self
    }
}

impl<M> RigAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
    M::Response: Serialize,
{
    async fn send_once(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let Prepared {
            preamble,
            history,
            prompt,
        } = prepare(&request.messages, self.provider)?;

        let mut builder = self.model.completion_request(prompt).messages(history);
        if let Some(preamble) = preamble {
            builder = builder.preamble(preamble);
        }
        if let Some(max_tokens) = request.max_tokens.or(self.default_max_tokens) {
            builder = builder.max_tokens(u64::from(max_tokens));
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(f64::from(temperature));
        }

        let response = match tokio::time::timeout(self.timeout, builder.send()).await {
            Ok(result) => result.map_err(|e| map_completion_error(self.provider, e))?,
            Err(_) => {
                return Err(LlmError::RequestFailed {
                    provider: self.provider.to_string(),
                    reason: format!("timed out after {}s", self.timeout.as_secs()),
                });
            }
        };

        let content = response
            .choice
            .iter()
            .filter_map(|c| match c {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        let raw = serde_json::to_value(&response.raw_response).unwrap_or_default();
        Ok(CompletionResponse {
            content,
            input_tokens: clamp_tokens(response.usage.input_tokens),
            output_tokens: clamp_tokens(response.usage.output_tokens),
            finish_reason: finish_reason(&raw),
            response_id: raw.get("id").and_then(|v| v.as_str()).map(str::to_string),
        })
    }
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
    M::Response: Serialize,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        debug!(model = %self.model_name, messages = request.messages.len(), "Sending completion request");

        let response = with_retry(&self.retry, self.provider, || self.send_once(&request)).await?;

        info!(
            model = %self.model_name,
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            response_id = response.response_id.as_deref().unwrap_or("-"),
            "Completion received"
        );
        Ok(response)
    }
}

// ── Request mapping ─────────────────────────────────────────────────

/// Our flat message list split the way rig's builder takes it.
struct Prepared {
    preamble: Option<String>,
    history: Vec<Message>,
    prompt: Message,
}

/// System messages become the preamble; the last non-system message is
/// the prompt and everything before it is history.
fn prepare(messages: &[ChatMessage], provider: &str) -> Result<Prepared, LlmError> {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    let mut turns: Vec<Message> = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| match m.role {
            Role::Assistant => Message::assistant(m.content.clone()),
            _ => Message::user(m.content.clone()),
        })
        .collect();

    let prompt = turns.pop().ok_or_else(|| LlmError::InvalidResponse {
        provider: provider.to_string(),
        reason: "request has no user message".to_string(),
    })?;

    Ok(Prepared {
        preamble: (!system.is_empty()).then(|| system.join("\n\n")),
        history: turns,
        prompt,
    })
}

fn clamp_tokens(n: u64) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

// ── Response mapping ────────────────────────────────────────────────

/// Responses API bodies report a token-capped answer as
/// `status: incomplete` with `incomplete_details.reason`.
fn finish_reason(raw: &serde_json::Value) -> FinishReason {
    let status = raw.get("status").and_then(|v| v.as_str());
    let reason = raw
        .pointer("/incomplete_details/reason")
        .and_then(|v| v.as_str());
    match (status, reason) {
        (Some("incomplete"), Some("max_output_tokens")) => FinishReason::Length,
        (Some("incomplete"), _) => FinishReason::Other,
        _ => FinishReason::Stop,
    }
}

fn map_completion_error(provider: &str, e: CompletionError) -> LlmError {
    match e {
        CompletionError::ProviderError(body) => map_provider_error(provider, &body),
        CompletionError::ResponseError(reason) => LlmError::InvalidResponse {
            provider: provider.to_string(),
            reason,
        },
        other => LlmError::RequestFailed {
            provider: provider.to_string(),
            reason: other.to_string(),
        },
    }
}

/// Classify an error body of the form
/// `{"error": {"type": ..., "code": ..., "message": ...}}`.
fn map_provider_error(provider: &str, body: &str) -> LlmError {
    let value: serde_json::Value = serde_json::from_str(body).unwrap_or_default();
    let field = |name: &str| {
        value
            .pointer(&format!("/error/{name}"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };
    let (kind, code, message) = (field("type"), field("code"), field("message"));
    let reason = if message.is_empty() {
        truncate(body, 300)
    } else {
        message
    };

    match (kind.as_str(), code.as_str()) {
        (_, "rate_limit_exceeded") | ("rate_limit_error", _) => LlmError::RateLimited {
            provider: provider.to_string(),
            retry_after: None,
        },
        (_, "invalid_api_key") | ("authentication_error", _) => LlmError::AuthFailed {
            provider: provider.to_string(),
        },
        (_, "insufficient_quota") | ("insufficient_quota", _) => LlmError::Rejected {
            provider: provider.to_string(),
            status: 429,
            reason,
        },
        ("invalid_request_error", _) => LlmError::Rejected {
            provider: provider.to_string(),
            status: 400,
            reason,
        },
        _ => LlmError::RequestFailed {
            provider: provider.to_string(),
            reason,
        },
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
