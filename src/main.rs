use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use inbox_pipeline::config::{Config, StorageBackend, StorageConfig};
use inbox_pipeline::llm::create_provider;
use inbox_pipeline::notify::MailNotifier;
use inbox_pipeline::pipeline::orchestrator::Orchestrator;
use inbox_pipeline::pipeline::processor::{OperatorMemory, Processor, ProcessorConfig};
use inbox_pipeline::pipeline::run_log::build_run_id;
use inbox_pipeline::pipeline::types::RunReport;
use inbox_pipeline::pipeline::watch::spawn_watch;
use inbox_pipeline::state::JsonStateStore;
use inbox_pipeline::storage::{DropboxStorage, LocalStorage, Storage};

const LOG_FILE_PREFIX: &str = "inbox-pipeline.log";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage. Fails only if
    // one is already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = Config::from_env().context("failed to load configuration")?;
    let log_guard = init_tracing(&config.storage, &config.pipeline.log_dir);

    eprintln!("📥 inbox-pipeline v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.llm.model);
    eprintln!("   Storage: {:?}", config.storage.backend);
    eprintln!("   Inbox: {}", config.pipeline.inbox_path);
    eprintln!("   Outbox: {}", config.pipeline.outbox_path);
    eprintln!("   State: {}", config.pipeline.state_path);
    eprintln!(
        "   Mail: {}",
        if config.mail.is_some() { "enabled" } else { "disabled" }
    );

    // ── Storage ─────────────────────────────────────────────────────
    let storage: Arc<dyn Storage> = match config.storage.backend {
        StorageBackend::Local => Arc::new(LocalStorage::new(config.storage.root.clone())),
        StorageBackend::Dropbox => {
            let token = config
                .storage
                .dropbox_token
                .clone()
                .context("DROPBOX_ACCESS_TOKEN is required for the dropbox backend")?;
            Arc::new(DropboxStorage::new(token))
        }
    };

    // ── LLM + processor ─────────────────────────────────────────────
    let llm = create_provider(&config.llm).context("failed to create LLM provider")?;
    let memory = match &config.pipeline.memory_path {
        Some(path) => OperatorMemory::load(storage.as_ref(), path).await,
        None => None,
    };
    let processor = Processor::new(
        llm,
        ProcessorConfig {
            depth: config.pipeline.depth,
            max_input_chars: config.pipeline.max_input_chars,
            max_output_tokens: None,
        },
    )
    .with_memory(memory);

    // ── Orchestrator ────────────────────────────────────────────────
    let mut orchestrator = Orchestrator::new(Arc::clone(&storage), processor, config.pipeline.clone());
    if let Some(mail) = config.mail.clone() {
        orchestrator = orchestrator.with_notifier(Arc::new(MailNotifier::new(mail)));
    }

    let mut store = JsonStateStore::new(Arc::clone(&storage), config.pipeline.state_path.clone());
    let run_id = build_run_id(|key| std::env::var(key).ok());

    if config.pipeline.poll_interval_secs > 0 {
        let interval = Duration::from_secs(config.pipeline.poll_interval_secs);
        eprintln!("   Watch: every {}s (Ctrl-C to stop)\n", interval.as_secs());

        let watch = spawn_watch(orchestrator, Box::new(store), interval, run_id);
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl-C")?;
        info!("Ctrl-C received, finishing current pass");
        watch.stop().await;
        return Ok(());
    }

    eprintln!("   Run: {run_id}\n");
    let report = orchestrator.run(&mut store, &run_id).await?;
    print_report(&report);

    let code = report.exit_code();
    if code != 0 {
        warn!(failed = report.failed(), "Some items failed; they will be retried on the next run");
        // Flush buffered file logs before exiting with a non-zero status.
        drop(log_guard);
        std::process::exit(code);
    }
    Ok(())
}

/// Console logging plus, for local storage, a daily-rolling file under the
/// log directory.
fn init_tracing(storage: &StorageConfig, log_dir: &str) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match storage.backend {
        StorageBackend::Local => {
            let dir: PathBuf = storage.root.join(log_dir.trim_start_matches('/'));
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        StorageBackend::Dropbox => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(file_layer)
        .init();

    guard
}

fn print_report(report: &RunReport) {
    println!("Run {}", report.run_id);
    for item in &report.items {
        println!("  {:<16} {}", item.outcome.label(), item.path);
    }
    println!(
        "processed={} (recovered={}) skipped={} failed={} deferred={}",
        report.processed(),
        report.recovered(),
        report.skipped(),
        report.failed(),
        report.deferred
    );
}
