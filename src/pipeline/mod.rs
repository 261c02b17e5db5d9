//! Inbox processing pipeline.
//!
//! Every unrecorded inbox item flows through:
//! 1. `Classifier::classify()`: folder routing and regex signals (no LLM)
//! 2. `Processor::process()`: one model call with a versioned prompt
//! 3. `audit::format_output()`: answer plus metadata trailer
//! 4. Output write, then `StateStore::mark_processed()` + flush
//!
//! **A record is never written before its output.** A crash in between is
//! repaired on the next run from the output's trailer, without a second
//! model call.

pub mod audit;
pub mod classifier;
pub mod index;
pub mod naming;
pub mod orchestrator;
pub mod processor;
pub mod prompts;
pub mod run_log;
pub mod types;
pub mod watch;

pub use orchestrator::Orchestrator;
pub use types::{Classification, Depth, ItemOutcome, Mode, ProcessingResult, RunReport};
