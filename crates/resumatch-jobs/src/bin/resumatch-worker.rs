//! Worker process: claims match jobs and runs the pipeline until
//! interrupted.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use resumatch_core::defaults;
use resumatch_db::{StoreKind, Stores};
use resumatch_inference::{log_inference_config, FilesystemTextSource, InferenceConfig, ResumeExtractor};
use resumatch_jobs::{ResumeMatchHandler, WorkerBuilder, WorkerConfig, WorkerEvent};

const DEFAULT_LOG_FILTER: &str = "resumatch_jobs=info,resumatch_db=info,resumatch_inference=info";

/// Initialize tracing with configurable output.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, daily rotation)
///   LOG_ANSI    - "true"/"false" override ANSI colors
///   RUST_LOG    - standard env filter
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = log_file {
        let path = Path::new(path);
        let file_dir = path.parent().unwrap_or(Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("resumatch-worker.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );
    guard
}

/// A standalone worker only sees jobs enqueued by other processes, which
/// requires a shared store.
fn ensure_shared_store(kind: StoreKind) -> anyhow::Result<()> {
    if kind == StoreKind::Memory {
        anyhow::bail!(
            "{}=memory cannot be used by the standalone worker: no other process can enqueue \
             into its in-memory queue; embed the worker in the submitting process instead",
            defaults::ENV_STORE
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _log_guard = init_tracing();

    let inference = InferenceConfig::from_env().context("invalid inference configuration")?;
    log_inference_config(&inference);

    let store_kind = StoreKind::from_env()?;
    ensure_shared_store(store_kind)?;
    let database_url = std::env::var(defaults::ENV_DATABASE_URL).ok();
    let stores = Stores::open(store_kind, database_url.as_deref(), inference.dimension)
        .await
        .context("failed to open stores")?;

    let extractor = Arc::new(
        ResumeExtractor::from_config(&inference).context("failed to build extractor")?,
    );
    let text_source = Arc::new(FilesystemTextSource::from_env());
    info!(
        model = extractor.model_name(),
        source_dir = %text_source.base_dir().display(),
        store = ?store_kind,
        "Pipeline configured"
    );

    let handler = ResumeMatchHandler::new(stores.results.clone(), extractor, text_source);
    let handle = WorkerBuilder::new(stores.jobs.clone(), Arc::new(handler))
        .with_config(WorkerConfig::from_env())
        .build()
        .start();

    let mut events = handle.events();
    let event_log = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(WorkerEvent::WorkerStopped) | Err(RecvError::Closed) => break,
                Ok(event) => tracing::debug!(event = ?event, "Worker event"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Worker event log lagged"),
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown requested, draining in-flight jobs");

    handle.shutdown_and_wait().await?;
    event_log.abort();
    info!("Worker exited");
    Ok(())
}
