//! Error types for the inbox pipeline.
//!
//! Item-scoped failures (`PipelineError`) are caught by the orchestrator and
//! reported per item. Run-scoped failures (`PersistenceError`, listing
//! failures) abort the run.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Storage backend errors (local filesystem, Dropbox, memory).
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Storage backend {backend} request failed: {reason}")]
    RequestFailed { backend: String, reason: String },

    #[error("Storage backend {backend} rejected credentials")]
    AuthFailed { backend: String },

    #[error("Content of {path} is not valid UTF-8")]
    InvalidUtf8 { path: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Provider {provider} rejected the request (HTTP {status}): {reason}")]
    Rejected {
        provider: String,
        status: u16,
        reason: String,
    },

    #[error("Provider {provider} gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        provider: String,
        attempts: u32,
        last: String,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::RequestFailed { .. })
    }
}

/// State store errors. Always fatal to the run: continuing without a
/// trustworthy store risks duplicate model spend.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("State document {path} is corrupt: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("Failed to read state document {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: StorageError,
    },

    #[error("Failed to write state document {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: StorageError,
    },

    #[error("Item {0} already has a processed record")]
    DuplicateRecord(String),

    #[error("State store used before load()")]
    NotLoaded,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Item-scoped pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// No usable signal in the content. Never surfaced as a failure: the
    /// classifier degrades to the default mode.
    #[error("Classification ambiguous: {0}")]
    ClassificationAmbiguous(String),

    #[error("Failed to read item {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: StorageError,
    },

    #[error("No prompt template for mode {mode} at depth {depth}")]
    MissingPrompt { mode: String, depth: String },

    #[error("Model call failed: {0}")]
    Api(#[from] LlmError),

    #[error("Failed to write output {path}: {source}")]
    OutputWrite {
        path: String,
        #[source]
        source: StorageError,
    },
}

impl PipelineError {
    /// Short kind label used in run summaries (`failed:<kind>`).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ClassificationAmbiguous(_) => "classification_ambiguous",
            Self::Read { .. } => "read",
            Self::MissingPrompt { .. } => "prompt",
            Self::Api(_) => "api",
            Self::OutputWrite { .. } => "output_write",
        }
    }
}

/// Mail notification errors (best effort, never fatal).
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("SMTP send failed: {0}")]
    Send(String),
}

/// Result type alias for the pipeline.
pub type Result<T> = std::result::Result<T, Error>;
