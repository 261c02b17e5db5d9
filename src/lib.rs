//! Inbox pipeline: idempotent classify-process-persist over an LLM.

pub mod config;
pub mod error;
pub mod inbox;
pub mod llm;
pub mod notify;
pub mod pipeline;
pub mod state;
pub mod storage;
