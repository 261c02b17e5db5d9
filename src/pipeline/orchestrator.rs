//! Orchestrator: one pipeline pass over the inbox.
//!
//! Per unrecorded item:
//! 1. Read (`Discovered`)
//! 2. Classify and derive the deterministic output path (`Classified`)
//! 3. Recover from a previous partial write, or call the model (`Processed`)
//! 4. Write output document with audit trailer (`Persisted`)
//! 5. Add record and flush the store (`Recorded`)
//! 6. Best-effort side steps: outbox index, input copy, mail
//!
//! Item failures are reported and the pass continues. Store failures and
//! inbox listing failures abort the pass.
//!
//! Removing a record alone does not buy a new model call: while the output
//! with a matching trailer is still there, step 3 recovers the record from
//! it. Delete the output as well to force a fresh answer.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::error::{Error, PersistenceError, PipelineError};
use crate::inbox::{InboxItem, ItemLister, Route};
use crate::notify::{Notifier, OutputNotice};
use crate::pipeline::audit::{
    LABEL_INPUT_FILE, LABEL_INPUT_HASH, LABEL_PROMPT_HASH, LABEL_PROMPT_ID, TrailerExtras,
    format_output, parse_trailer,
};
use crate::pipeline::classifier::Classifier;
use crate::pipeline::index::{IndexEntry, OutboxIndex};
use crate::pipeline::naming::{extension, output_file_name, same_base_name};
use crate::pipeline::processor::Processor;
use crate::pipeline::run_log::{RunEvent, RunLog, outcome_event};
use crate::pipeline::types::{
    Classification, ItemOutcome, ItemReport, ItemState, Mode, RunReport,
};
use crate::state::{ProcessedRecord, StateStore};
use crate::storage::{Storage, join_path};

/// Drives items through classify → process → persist → record.
pub struct Orchestrator {
    storage: Arc<dyn Storage>,
    lister: ItemLister,
    classifier: Classifier,
    processor: Processor,
    index: OutboxIndex,
    notifier: Option<Arc<dyn Notifier>>,
    config: PipelineConfig,
}

/// What a successfully recorded item produced, for the side steps.
struct Recorded<'a> {
    item: &'a InboxItem,
    mode: Mode,
    confidence: f32,
    output_name: String,
    output_path: String,
    document: String,
}

impl Orchestrator {
    pub fn new(storage: Arc<dyn Storage>, processor: Processor, config: PipelineConfig) -> Self {
        let classifier = Classifier::default_rules()
            .with_default_mode(config.default_mode)
            .with_floor(config.confidence_floor);
        Self {
            lister: ItemLister::new(Arc::clone(&storage), config.inbox_path.clone()),
            index: OutboxIndex::new(Arc::clone(&storage), &config.outbox_path),
            storage,
            classifier,
            processor,
            notifier: None,
            config,
        }
    }

    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one pass. `store` is (re)loaded first, so records removed by an
    /// operator between passes take effect.
    pub async fn run(&self, store: &mut dyn StateStore, run_id: &str) -> Result<RunReport, Error> {
        let started_at = Utc::now();
        let mut log = RunLog::new(Arc::clone(&self.storage), &self.config.log_dir, run_id);

        if let Err(e) = store.load().await {
            error!(run_id, error = %e, "Failed to load state, aborting run");
            return Err(abort(&mut log, e.into()).await);
        }

        let entries = match self.lister.list_entries().await {
            Ok(entries) => entries,
            Err(e) => {
                error!(run_id, inbox = %self.config.inbox_path, error = %e, "Failed to list inbox, aborting run");
                return Err(abort(&mut log, e.into()).await);
            }
        };
        // An outbox nested inside the inbox must not feed outputs back in.
        let entries: Vec<_> = entries
            .into_iter()
            .filter(|e| !self.in_outbox(&e.path))
            .collect();

        info!(
            run_id,
            candidates = entries.len(),
            already_processed = store.len(),
            "Run started"
        );
        log.record(RunEvent::RunStarted {
            candidates: entries.len(),
            already_processed: store.len(),
        });

        let mut items = Vec::with_capacity(entries.len());
        let mut attempted = 0usize;
        let mut deferred = 0usize;

        for entry in &entries {
            let path_key = self.config.key_strategy.key_for_path(&entry.path);
            if let Some(key) = &path_key
                && store.is_processed(key)
            {
                debug!(path = %entry.path, "Already processed, skipping");
                push(&mut items, &mut log, &entry.path, ItemOutcome::Skipped);
                continue;
            }
            if path_key.is_some() && self.cap_reached(attempted) {
                deferred += 1;
                continue;
            }

            let item = match self.lister.read_item(entry).await {
                Ok(item) => item,
                Err(e) => {
                    if self.cap_reached(attempted) {
                        deferred += 1;
                        continue;
                    }
                    attempted += 1;
                    warn!(path = %entry.path, error = %e, "Failed to read item");
                    push(&mut items, &mut log, &entry.path, failed(&e, ItemState::Discovered));
                    log.flush().await;
                    continue;
                }
            };

            // Content-hash keys are only known after reading.
            let key = self.config.key_strategy.key_for(&item);
            if store.is_processed(&key) {
                debug!(path = %item.path, "Content already processed, skipping");
                push(&mut items, &mut log, &item.path, ItemOutcome::Skipped);
                continue;
            }
            if self.cap_reached(attempted) {
                deferred += 1;
                continue;
            }
            attempted += 1;

            let outcome = match self.process_item(store, &mut log, &item, key).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(path = %item.path, error = %e, "State flush failed, aborting run");
                    return Err(abort(&mut log, e.into()).await);
                }
            };
            push(&mut items, &mut log, &item.path, outcome);
            log.flush().await;
        }

        if deferred > 0 {
            info!(deferred, cap = self.config.max_files_per_run, "Per-run cap reached, remaining items deferred");
        }

        let report = RunReport {
            run_id: run_id.to_string(),
            started_at,
            finished_at: Utc::now(),
            items,
            deferred,
        };
        log.record_summary(&report);
        log.flush().await;

        info!(
            run_id,
            processed = report.processed(),
            recovered = report.recovered(),
            skipped = report.skipped(),
            failed = report.failed(),
            deferred,
            "Run finished"
        );
        Ok(report)
    }

    /// Backends may report paths case-folded (Dropbox returns `path_lower`),
    /// so the outbox prefix is compared the way path keys are.
    fn in_outbox(&self, path: &str) -> bool {
        let prefix = format!("{}/", self.config.outbox_path.trim_end_matches('/').to_lowercase());
        path.to_lowercase().starts_with(&prefix)
    }

    fn cap_reached(&self, attempted: usize) -> bool {
        self.config.max_files_per_run > 0 && attempted >= self.config.max_files_per_run
    }

    /// Take one unrecorded item to a terminal outcome. `Err` only for store
    /// failures, which end the run.
    async fn process_item(
        &self,
        store: &mut dyn StateStore,
        log: &mut RunLog,
        item: &InboxItem,
        key: String,
    ) -> Result<ItemOutcome, PersistenceError> {
        let route = Route::from_path(&self.config.inbox_path, &item.path);
        let classification = self.classifier.classify(item, route);
        let output_name = output_file_name(classification.mode, &item.path);
        let output_path = join_path(&self.config.outbox_path, &output_name);

        debug!(
            path = %item.path,
            mode = %classification.mode,
            confidence = classification.confidence,
            reason = %classification.reason,
            "Classified"
        );

        if let Some((record, document)) = self.recover(item, &key, &classification, &output_path).await {
            let prompt_id = record.prompt_id.clone().unwrap_or_default();
            let prompt_hash = record.prompt_hash.clone().unwrap_or_default();
            store.mark_processed(record)?;
            store.flush().await?;

            info!(path = %item.path, output = %output_path, "Recovered record from existing output");
            log.record(RunEvent::ItemProcessed {
                path: item.path.clone(),
                output_path: output_path.clone(),
                mode: classification.mode.to_string(),
                confidence: classification.confidence,
                prompt_id,
                prompt_hash,
                recovered: true,
            });
            let recorded = Recorded {
                item,
                mode: classification.mode,
                confidence: classification.confidence,
                output_name,
                output_path: output_path.clone(),
                document,
            };
            // Mail may already have gone out before the interruption.
            self.index_output(log, &recorded).await;
            self.copy_input(log, &recorded).await;

            return Ok(ItemOutcome::Processed {
                output_path,
                mode: classification.mode,
                recovered: true,
            });
        }

        let result = match self.processor.process(item, &classification).await {
            Ok(result) => result,
            Err(e) => {
                warn!(path = %item.path, kind = e.kind(), error = %e, "Processing failed");
                return Ok(failed(&e, ItemState::Classified));
            }
        };

        let now = Utc::now();
        let extras = TrailerExtras {
            depth: Some(self.processor.depth()),
            output_file: Some(output_path.clone()),
        };
        let document = format_output(&result.answer_text, &classification, &result, item, now, &extras);

        if let Err(source) = self.storage.write(&output_path, document.as_bytes()).await {
            let e = PipelineError::OutputWrite {
                path: output_path.clone(),
                source,
            };
            warn!(path = %item.path, error = %e, "Output write failed");
            return Ok(failed(&e, ItemState::Processed));
        }

        let prompt_id = format!("{} v{}", result.prompt_id, result.prompt_version);
        store.mark_processed(ProcessedRecord {
            item_key: key,
            input_path: item.path.clone(),
            processed_at: now,
            output_path: output_path.clone(),
            mode: classification.mode.to_string(),
            content_hash: Some(item.content_hash.clone()),
            prompt_id: Some(prompt_id.clone()),
            prompt_hash: Some(result.prompt_hash.clone()),
            confidence: Some(classification.confidence),
        })?;
        store.flush().await?;

        info!(
            path = %item.path,
            mode = %classification.mode,
            output = %output_path,
            prompt = %prompt_id,
            "Item processed"
        );
        log.record(RunEvent::ItemProcessed {
            path: item.path.clone(),
            output_path: output_path.clone(),
            mode: classification.mode.to_string(),
            confidence: classification.confidence,
            prompt_id,
            prompt_hash: result.prompt_hash.clone(),
            recovered: false,
        });

        let recorded = Recorded {
            item,
            mode: classification.mode,
            confidence: classification.confidence,
            output_name,
            output_path: output_path.clone(),
            document,
        };
        self.index_output(log, &recorded).await;
        self.copy_input(log, &recorded).await;
        self.send_notice(log, &recorded).await;

        Ok(ItemOutcome::Processed {
            output_path,
            mode: classification.mode,
            recovered: false,
        })
    }

    /// Complete a record from an output an interrupted run already wrote.
    ///
    /// Only a complete trailer naming this exact input (path and hash)
    /// counts; anything else is overwritten by a fresh run.
    async fn recover(
        &self,
        item: &InboxItem,
        key: &str,
        classification: &Classification,
        output_path: &str,
    ) -> Option<(ProcessedRecord, String)> {
        let bytes = match self.storage.read_optional(output_path).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(path = output_path, error = %e, "Could not read existing output, reprocessing");
                return None;
            }
        };
        let document = String::from_utf8_lossy(&bytes).into_owned();

        let matches = parse_trailer(&document).filter(|t| {
            t.is_complete()
                && t.get(LABEL_INPUT_FILE) == Some(item.path.as_str())
                && t.get(LABEL_INPUT_HASH) == Some(item.content_hash.as_str())
        });
        let Some(trailer) = matches else {
            warn!(path = %item.path, output = output_path, "Existing output does not match item, overwriting");
            return None;
        };

        let record = ProcessedRecord {
            item_key: key.to_string(),
            input_path: item.path.clone(),
            processed_at: trailer.processed_at().unwrap_or_else(Utc::now),
            output_path: output_path.to_string(),
            mode: trailer
                .mode()
                .unwrap_or(classification.mode)
                .to_string(),
            content_hash: Some(item.content_hash.clone()),
            prompt_id: trailer.get(LABEL_PROMPT_ID).map(str::to_string),
            prompt_hash: trailer.get(LABEL_PROMPT_HASH).map(str::to_string),
            confidence: Some(trailer.confidence().unwrap_or(classification.confidence)),
        };
        Some((record, document))
    }

    // ── Best-effort side steps ──────────────────────────────────────

    async fn index_output(&self, log: &mut RunLog, recorded: &Recorded<'_>) {
        let entry = IndexEntry {
            processed_at: Utc::now(),
            mode: recorded.mode,
            confidence: recorded.confidence,
            output_name: &recorded.output_name,
            input_path: &recorded.item.path,
        };
        if let Err(e) = self.index.append(&entry).await {
            warn!(index = %self.index.path(), error = %e, "Failed to update outbox index");
            side_effect_failed(log, &recorded.item.path, "index", e.to_string());
        }
    }

    async fn copy_input(&self, log: &mut RunLog, recorded: &Recorded<'_>) {
        if !self.config.copy_input_to_outbox {
            return;
        }
        let name = same_base_name(&recorded.output_name, extension(&recorded.item.name));
        let path = join_path(&self.config.outbox_path, &name);
        if let Err(e) = self
            .storage
            .write(&path, recorded.item.content.as_bytes())
            .await
        {
            warn!(path = %path, error = %e, "Failed to copy input to outbox");
            side_effect_failed(log, &recorded.item.path, "copy_input", e.to_string());
        }
    }

    async fn send_notice(&self, log: &mut RunLog, recorded: &Recorded<'_>) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        let notice = OutputNotice {
            mode: recorded.mode.to_string(),
            title: recorded.item.name.clone(),
            output_name: recorded.output_name.clone(),
            output_path: recorded.output_path.clone(),
            input_path: recorded.item.path.clone(),
            document: recorded.document.clone(),
        };
        if let Err(e) = notifier.notify(&notice).await {
            warn!(path = %recorded.item.path, error = %e, "Failed to send notification");
            side_effect_failed(log, &recorded.item.path, "notify", e.to_string());
        }
    }
}

fn failed(e: &PipelineError, state: ItemState) -> ItemOutcome {
    ItemOutcome::Failed {
        kind: e.kind().to_string(),
        state,
        error: e.to_string(),
    }
}

fn push(items: &mut Vec<ItemReport>, log: &mut RunLog, path: &str, outcome: ItemOutcome) {
    if let Some(event) = outcome_event(path, &outcome) {
        log.record(event);
    }
    items.push(ItemReport {
        path: path.to_string(),
        outcome,
    });
}

fn side_effect_failed(log: &mut RunLog, path: &str, step: &str, error: String) {
    log.record(RunEvent::SideEffectFailed {
        path: path.to_string(),
        step: step.to_string(),
        error,
    });
}

async fn abort(log: &mut RunLog, e: Error) -> Error {
    log.record(RunEvent::RunAborted {
        error: e.to_string(),
    });
    log.flush().await;
    e
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{LlmError, NotifyError};
    use crate::llm::provider::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
    use crate::pipeline::audit::REQUIRED_LABELS;
    use crate::pipeline::processor::ProcessorConfig;
    use crate::state::{ItemKeyStrategy, MemoryStateStore};
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers with a fixed body; fails when the prompt contains `FAIL`.
    struct ScriptedLlm {
        calls: AtomicUsize,
    }

    impl ScriptedLlm {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn model_name(&self) -> &str {
            "mock-model"
        }

        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let user = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            if user.contains("FAIL") {
                return Err(LlmError::RequestFailed {
                    provider: "mock".into(),
                    reason: "HTTP 500".into(),
                });
            }
            Ok(CompletionResponse {
                content: format!("# Summary\n\n{}", user.lines().next().unwrap_or_default()),
                input_tokens: 10,
                output_tokens: 5,
                finish_reason: FinishReason::Stop,
                response_id: None,
            })
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, notice: &OutputNotice) -> Result<(), NotifyError> {
            if self.fail {
                return Err(NotifyError::Send("connection refused".into()));
            }
            self.sent.lock().unwrap().push(notice.output_name.clone());
            Ok(())
        }
    }

    fn setup(config: PipelineConfig) -> (Arc<MemoryStorage>, Arc<ScriptedLlm>, Orchestrator) {
        let storage = Arc::new(MemoryStorage::new());
        let llm = ScriptedLlm::new();
        let processor = Processor::new(llm.clone(), ProcessorConfig::default());
        let orchestrator = Orchestrator::new(storage.clone(), processor, config);
        (storage, llm, orchestrator)
    }

    fn outputs(storage: &MemoryStorage) -> Vec<String> {
        storage
            .paths()
            .into_iter()
            .filter(|p| p.starts_with("/0-Outbox/") && p.ends_with(".out.md"))
            .collect()
    }

    #[tokio::test]
    async fn processes_then_skips() {
        let (storage, llm, orch) = setup(PipelineConfig::default());
        storage.insert("/0-Inbox/note1.txt", "refill request for X");
        let mut store = MemoryStateStore::new();

        let report = orch.run(&mut store, "r1").await.unwrap();
        assert_eq!(report.processed(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.flush_count(), 1);

        let out = &outputs(&storage)[0];
        let doc = storage.get_text(out).unwrap();
        let trailer = parse_trailer(&doc).unwrap();
        assert!(trailer.is_complete());
        assert_eq!(trailer.get(REQUIRED_LABELS[0]), Some("memo"));

        let report = orch.run(&mut store, "r2").await.unwrap();
        assert_eq!(report.skipped(), 1);
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn nested_outbox_is_ignored_when_backend_folds_case() {
        let storage = Arc::new(MemoryStorage::case_folding());
        let llm = ScriptedLlm::new();
        let processor = Processor::new(llm.clone(), ProcessorConfig::default());
        let config = PipelineConfig {
            outbox_path: "/0-Inbox/Out".into(),
            ..PipelineConfig::default()
        };
        let orch = Orchestrator::new(storage.clone(), processor, config);
        storage.insert("/0-Inbox/a.txt", "refill request A");
        let mut store = MemoryStateStore::new();

        let first = orch.run(&mut store, "r1").await.unwrap();
        assert_eq!(first.processed(), 1);
        assert!(storage.paths().iter().any(|p| p.starts_with("/0-inbox/out/") && p.ends_with(".out.md")));
        assert!(storage.get_text("/0-inbox/out/index.md").is_some());

        let second = orch.run(&mut store, "r2").await.unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.skipped(), 1);
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn api_failure_is_isolated() {
        let (storage, llm, orch) = setup(PipelineConfig::default());
        storage.insert("/0-Inbox/a.txt", "refill request A");
        storage.insert("/0-Inbox/b.txt", "FAIL request B");
        storage.insert("/0-Inbox/c.txt", "refill request C");
        let mut store = MemoryStateStore::new();

        let report = orch.run(&mut store, "r").await.unwrap();
        assert_eq!(llm.calls(), 3);
        assert_eq!(report.processed(), 2);
        assert_eq!(report.exit_code(), 2);
        match report.outcome_for("/0-Inbox/b.txt") {
            Some(ItemOutcome::Failed { kind, state, .. }) => {
                assert_eq!(kind, "api");
                assert_eq!(*state, ItemState::Classified);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!store.is_processed("/0-inbox/b.txt"));
    }

    #[tokio::test]
    async fn output_write_failure_leaves_no_record() {
        let (storage, _llm, orch) = setup(PipelineConfig::default());
        storage.insert("/0-Inbox/a.txt", "refill request");
        storage.fail_writes_under("/0-Outbox");
        let mut store = MemoryStateStore::new();

        let report = orch.run(&mut store, "r").await.unwrap();
        assert_eq!(
            report.outcome_for("/0-Inbox/a.txt").map(|o| o.label()),
            Some("failed:output_write".to_string())
        );
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn flush_failure_aborts_run() {
        let (storage, llm, orch) = setup(PipelineConfig::default());
        storage.insert("/0-Inbox/a.txt", "refill request");
        storage.insert("/0-Inbox/b.txt", "refill request");
        let mut store = MemoryStateStore::new();
        store.set_fail_flush(true);

        let err = orch.run(&mut store, "r").await.unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
        assert_eq!(llm.calls(), 1);

        let log = storage.get_text("/0-System/logs/run_r.jsonl").unwrap();
        assert!(log.contains("\"event\":\"run_aborted\""));
    }

    #[tokio::test]
    async fn cap_counts_attempts_not_skips() {
        let config = PipelineConfig {
            max_files_per_run: 1,
            ..PipelineConfig::default()
        };
        let (storage, llm, orch) = setup(config);
        for name in ["a", "b", "c"] {
            storage.insert(&format!("/0-Inbox/{name}.txt"), format!("request {name}"));
        }
        let mut store = MemoryStateStore::new();

        let first = orch.run(&mut store, "r1").await.unwrap();
        assert_eq!((first.processed(), first.deferred), (1, 2));
        let second = orch.run(&mut store, "r2").await.unwrap();
        assert_eq!((second.skipped(), second.processed(), second.deferred), (1, 1, 1));
        assert!(second.outcome_for("/0-Inbox/b.txt").is_some());
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn content_hash_key_skips_renamed_copy() {
        let config = PipelineConfig {
            key_strategy: ItemKeyStrategy::ContentHash,
            ..PipelineConfig::default()
        };
        let (storage, llm, orch) = setup(config);
        storage.insert("/0-Inbox/a.txt", "same text");
        storage.insert("/0-Inbox/b.txt", "same text");
        let mut store = MemoryStateStore::new();

        let report = orch.run(&mut store, "r").await.unwrap();
        assert_eq!((report.processed(), report.skipped()), (1, 1));
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn routed_folder_and_side_steps() {
        let config = PipelineConfig {
            copy_input_to_outbox: true,
            ..PipelineConfig::default()
        };
        let (storage, _llm, orch) = setup(config);
        let notifier = Arc::new(RecordingNotifier::default());
        let orch = orch.with_notifier(notifier.clone());
        storage.insert("/0-Inbox/patents/idea.txt", "plain words");
        let mut store = MemoryStateStore::new();

        let report = orch.run(&mut store, "r").await.unwrap();
        match report.outcome_for("/0-Inbox/patents/idea.txt") {
            Some(ItemOutcome::Processed { mode, output_path, .. }) => {
                assert_eq!(*mode, Mode::Patent);
                assert!(output_path.contains("__PATENT_"));
            }
            other => panic!("unexpected {other:?}"),
        }

        let index = storage.get_text("/0-Outbox/INDEX.md").unwrap();
        assert!(index.contains("| patent | 0.95 |"));
        let copies: Vec<String> = storage
            .paths()
            .into_iter()
            .filter(|p| p.starts_with("/0-Outbox/idea__") && p.ends_with(".txt"))
            .collect();
        assert_eq!(copies.len(), 1);
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn notify_failure_does_not_fail_item() {
        let (storage, _llm, orch) = setup(PipelineConfig::default());
        let orch = orch.with_notifier(Arc::new(RecordingNotifier {
            fail: true,
            ..RecordingNotifier::default()
        }));
        storage.insert("/0-Inbox/a.txt", "refill request");
        let mut store = MemoryStateStore::new();

        let report = orch.run(&mut store, "r").await.unwrap();
        assert_eq!(report.processed(), 1);
        assert_eq!(report.exit_code(), 0);
        let log = storage.get_text("/0-System/logs/run_r.jsonl").unwrap();
        assert!(log.contains("\"step\":\"notify\""));
    }

    #[tokio::test]
    async fn foreign_output_is_overwritten() {
        let (storage, llm, orch) = setup(PipelineConfig::default());
        storage.insert("/0-Inbox/a.txt", "refill request");
        let name = output_file_name(Mode::Memo, "/0-Inbox/a.txt");
        storage.insert(&format!("/0-Outbox/{name}"), "half-written answer");
        let mut store = MemoryStateStore::new();

        let report = orch.run(&mut store, "r").await.unwrap();
        assert_eq!(report.recovered(), 0);
        assert_eq!(llm.calls(), 1);
        let doc = storage.get_text(&format!("/0-Outbox/{name}")).unwrap();
        assert!(parse_trailer(&doc).unwrap().is_complete());
    }

    #[tokio::test]
    async fn outbox_inside_inbox_is_ignored() {
        let config = PipelineConfig {
            outbox_path: "/0-Inbox/out".into(),
            ..PipelineConfig::default()
        };
        let (storage, _llm, orch) = setup(config);
        storage.insert("/0-Inbox/a.txt", "refill request");
        let mut store = MemoryStateStore::new();

        orch.run(&mut store, "r1").await.unwrap();
        let second = orch.run(&mut store, "r2").await.unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.skipped(), 1);
    }
}
