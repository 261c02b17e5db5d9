//! Configuration types.
//!
//! Everything is read from environment variables once at startup.
//! `from_lookup` variants take any key → value function so tests never
//! touch the process environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::LlmConfig;
use crate::notify::{MailConfig, is_truthy};
use crate::pipeline::types::{Depth, Mode};
use crate::state::ItemKeyStrategy;
use crate::storage::normalize_path;

const DEFAULT_MODEL: &str = "gpt-4.1-mini";

/// Full runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub llm: LlmConfig,
    pub storage: StorageConfig,
    pub pipeline: PipelineConfig,
    /// `None` when mail is disabled.
    pub mail: Option<MailConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            llm: llm_from_lookup(&lookup)?,
            storage: StorageConfig::from_lookup(&lookup)?,
            pipeline: PipelineConfig::from_lookup(&lookup)?,
            mail: MailConfig::from_lookup(&lookup)?,
        })
    }
}

// ── LLM ─────────────────────────────────────────────────────────────

fn llm_from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<LlmConfig, ConfigError> {
    let api_key = value(lookup, "OPENAI_API_KEY")
        .ok_or_else(|| ConfigError::MissingEnvVar("OPENAI_API_KEY".to_string()))?;

    Ok(LlmConfig {
        api_key: SecretString::from(api_key),
        model: value(lookup, "OPENAI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        timeout: Duration::from_secs(parsed(lookup, "OPENAI_TIMEOUT", 120u64)?),
        max_retries: parsed(lookup, "OPENAI_MAX_RETRIES", 2u32)?,
        max_output_tokens: parsed(lookup, "OPENAI_MAX_OUTPUT_TOKENS", 5000u32)?,
    })
}

// ── Storage ─────────────────────────────────────────────────────────

/// Which backend holds inbox, outbox, state and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageBackend {
    #[default]
    Local,
    Dropbox,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "dropbox" => Ok(Self::Dropbox),
            other => Err(format!("unknown backend '{other}' (expected local or dropbox)")),
        }
    }
}

/// Storage backend settings.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Root directory for the local backend.
    pub root: PathBuf,
    pub dropbox_token: Option<SecretString>,
}

impl StorageConfig {
    pub fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let backend: StorageBackend = parsed(lookup, "STORAGE_BACKEND", StorageBackend::Local)?;
        let dropbox_token = value(lookup, "DROPBOX_ACCESS_TOKEN").map(SecretString::from);
        if backend == StorageBackend::Dropbox && dropbox_token.is_none() {
            return Err(ConfigError::MissingRequired {
                key: "DROPBOX_ACCESS_TOKEN".into(),
                hint: "required when STORAGE_BACKEND=dropbox".into(),
            });
        }
        Ok(Self {
            backend,
            root: PathBuf::from(value(lookup, "STORAGE_ROOT").unwrap_or_else(|| ".".into())),
            dropbox_token,
        })
    }
}

// ── Pipeline ────────────────────────────────────────────────────────

/// Pipeline behavior and locations (logical storage paths).
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub inbox_path: String,
    pub outbox_path: String,
    pub state_path: String,
    pub log_dir: String,
    /// Operator memory document prepended to every system prompt.
    pub memory_path: Option<String>,
    pub key_strategy: ItemKeyStrategy,
    pub depth: Depth,
    /// Cap on attempted (not skipped) items per run. 0 = unlimited.
    pub max_files_per_run: usize,
    pub max_input_chars: usize,
    pub confidence_floor: f32,
    pub default_mode: Mode,
    pub copy_input_to_outbox: bool,
    /// Watch mode when > 0.
    pub poll_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            inbox_path: "/0-Inbox".to_string(),
            outbox_path: "/0-Outbox".to_string(),
            state_path: "/0-System/state.json".to_string(),
            log_dir: "/0-System/logs".to_string(),
            memory_path: None,
            key_strategy: ItemKeyStrategy::Path,
            depth: Depth::Medium,
            max_files_per_run: 10,
            max_input_chars: 80_000,
            confidence_floor: 0.3,
            default_mode: Mode::Other,
            copy_input_to_outbox: false,
            poll_interval_secs: 0,
        }
    }
}

impl PipelineConfig {
    pub fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let d = Self::default();

        let confidence_floor: f32 = parsed(lookup, "CLASSIFIER_CONFIDENCE_FLOOR", d.confidence_floor)?;
        if !(0.0..=1.0).contains(&confidence_floor) {
            return Err(ConfigError::InvalidValue {
                key: "CLASSIFIER_CONFIDENCE_FLOOR".into(),
                message: format!("{confidence_floor} is outside [0, 1]"),
            });
        }

        Ok(Self {
            inbox_path: path(lookup, "INBOX_PATH", &d.inbox_path)?,
            outbox_path: path(lookup, "OUTBOX_PATH", &d.outbox_path)?,
            state_path: path(lookup, "STATE_PATH", &d.state_path)?,
            log_dir: path(lookup, "LOG_DIR", &d.log_dir)?,
            memory_path: match value(lookup, "MEMORY_PATH") {
                Some(p) => Some(normalized("MEMORY_PATH", &p)?),
                None => None,
            },
            key_strategy: parsed(lookup, "STATE_KEY", d.key_strategy)?,
            depth: parsed(lookup, "DEPTH", d.depth)?,
            max_files_per_run: parsed(lookup, "MAX_FILES_PER_RUN", d.max_files_per_run)?,
            max_input_chars: parsed(lookup, "MAX_INPUT_CHARS", d.max_input_chars)?,
            confidence_floor,
            default_mode: parsed(lookup, "DEFAULT_MODE", d.default_mode)?,
            copy_input_to_outbox: value(lookup, "COPY_INPUT_TO_OUTBOX").is_some_and(|v| is_truthy(&v)),
            poll_interval_secs: parsed(lookup, "POLL_INTERVAL_SECS", d.poll_interval_secs)?,
        })
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Trimmed, non-empty value.
fn value(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Parse a value, falling back to `default` when unset. Garbage is an error.
fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value(lookup, key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{raw}': {e}"),
        }),
        None => Ok(default),
    }
}

fn path(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> Result<String, ConfigError> {
    normalized(key, &value(lookup, key).unwrap_or_else(|| default.to_string()))
}

fn normalized(key: &str, raw: &str) -> Result<String, ConfigError> {
    normalize_path(raw).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}
