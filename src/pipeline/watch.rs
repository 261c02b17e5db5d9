//! Watch mode: re-run the pipeline on a timer until stopped.
//!
//! Timer-based loop:
//! 1. Tick (the first tick fires immediately)
//! 2. Run one full pass with a fresh run id
//! 3. Log the summary and wait for the next tick
//!
//! Passes run inside a single task, so they never overlap; a pass that
//! outlasts the interval delays the next tick instead of queuing it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::pipeline::orchestrator::Orchestrator;
use crate::state::StateStore;

/// Handle to a running watch loop.
pub struct WatchHandle {
    handle: JoinHandle<()>,
    shutdown: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl WatchHandle {
    /// Ask the loop to stop after the current pass and wait for it.
    pub async fn stop(self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.wake.notify_one();
        if let Err(e) = self.handle.await {
            error!(error = %e, "Watch task ended abnormally");
        }
    }
}

/// Spawn the watch loop. `run_id_base` is suffixed with the pass number.
pub fn spawn_watch(
    orchestrator: Orchestrator,
    mut store: Box<dyn StateStore>,
    interval: Duration,
    run_id_base: String,
) -> WatchHandle {
    let shutdown = Arc::new(AtomicBool::new(false));
    let wake = Arc::new(Notify::new());
    let shutdown_flag = Arc::clone(&shutdown);
    let wake_signal = Arc::clone(&wake);

    let handle = tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "Watch mode started");

        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut pass: u64 = 0;

        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = wake.notified() => {}
            }

            if shutdown.load(Ordering::Relaxed) {
                info!(passes = pass, "Watch mode shutting down");
                return;
            }

            pass += 1;
            let run_id = format!("{run_id_base}-p{pass}");
            match orchestrator.run(store.as_mut(), &run_id).await {
                Ok(report) if report.has_failures() => {
                    info!(run_id = %run_id, failed = report.failed(), "Pass finished with failures; they are retried next pass");
                }
                Ok(_) => {}
                // Run-scoped errors are retried on the next tick.
                Err(e) => error!(run_id = %run_id, error = %e, "Pass aborted"),
            }
        }
    });

    WatchHandle {
        handle,
        shutdown: shutdown_flag,
        wake: wake_signal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::error::LlmError;
    use crate::llm::provider::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
    use crate::pipeline::processor::{Processor, ProcessorConfig};
    use crate::state::JsonStateStore;
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct CountingLlm(AtomicUsize);

    #[async_trait]
    impl LlmProvider for CountingLlm {
        fn model_name(&self) -> &str {
            "mock-model"
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(CompletionResponse {
                content: "answer".into(),
                input_tokens: 1,
                output_tokens: 1,
                finish_reason: FinishReason::Stop,
                response_id: None,
            })
        }
    }

    #[tokio::test]
    async fn picks_up_new_items_between_passes() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert("/0-Inbox/a.txt", "refill request");
        let llm = Arc::new(CountingLlm(AtomicUsize::new(0)));
        let processor = Processor::new(llm.clone(), ProcessorConfig::default());
        let orchestrator = Orchestrator::new(storage.clone(), processor, PipelineConfig::default());
        let store = Box::new(JsonStateStore::new(storage.clone(), "/0-System/state.json"));

        let watch = spawn_watch(orchestrator, store, Duration::from_millis(20), "test".into());
        tokio::time::sleep(Duration::from_millis(50)).await;
        storage.insert("/0-Inbox/b.txt", "refill request");
        tokio::time::sleep(Duration::from_millis(100)).await;
        watch.stop().await;

        assert_eq!(llm.0.load(Ordering::SeqCst), 2);
        let state = storage.get_text("/0-System/state.json").unwrap();
        assert!(state.contains("/0-inbox/a.txt"));
        assert!(state.contains("/0-inbox/b.txt"));
        assert!(storage.get_text("/0-System/logs/run_test-p1.jsonl").is_some());
    }

    #[tokio::test]
    async fn stop_before_first_pass_completes_promptly() {
        let storage = Arc::new(MemoryStorage::new());
        let llm = Arc::new(CountingLlm(AtomicUsize::new(0)));
        let processor = Processor::new(llm, ProcessorConfig::default());
        let orchestrator = Orchestrator::new(storage.clone(), processor, PipelineConfig::default());
        let store = Box::new(JsonStateStore::new(storage, "/0-System/state.json"));

        let watch = spawn_watch(orchestrator, store, Duration::from_secs(3600), "idle".into());
        tokio::time::sleep(Duration::from_millis(20)).await;
        tokio::time::timeout(Duration::from_secs(1), watch.stop())
            .await
            .expect("watch loop should stop without waiting for the next tick");
    }
}
