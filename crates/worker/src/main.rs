//! `reelforge-worker` -- runs one batch of generation jobs to completion.
//!
//! Loads a manifest of job requests, submits each through the
//! orchestrator, follows them over the push channel (when configured)
//! and the poller, and exits once every job is ready or permanently
//! failed, or on SIGINT/SIGTERM.
//!
//! # Environment variables
//!
//! | Variable              | Required | Default   | Description                                  |
//! |-----------------------|----------|-----------|----------------------------------------------|
//! | `ENGINE_API_URL`      | yes      | --        | Engine API base URL, e.g. `http://host:8080` |
//! | `JOB_MANIFEST_PATH`   | yes      | --        | JSON array of job requests                   |
//! | `PUSH_WS_URL`         | no       | --        | Push WebSocket URL; poll only when unset     |
//! | `ENGINE_CATALOG_PATH` | no       | built-in  | JSON engine catalog                          |
//! | `LOG_FORMAT`          | no       | `text`    | `text` or `json`                             |
//!
//! Orchestrator and HTTP client tuning are read by
//! [`OrchestratorConfig::from_env`] and [`ClientConfig::from_env`].

mod config;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reelforge_client::{ClientConfig, EngineApi, HttpArtifactProber, PushListener};
use reelforge_core::catalog::EngineCatalog;
use reelforge_pipeline::{
    Collaborators, NewJobRequest, Orchestrator, OrchestratorConfig, OrchestratorEvent,
};

use crate::config::{LogFormat, WorkerConfig};

/// How long the batch must look settled before the worker exits, so an
/// automatic retry about to be armed is not missed.
const SETTLE_GRACE: Duration = Duration::from_secs(1);

const DEFAULT_LOG_FILTER: &str = "reelforge_worker=info,reelforge_pipeline=info,reelforge_client=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env();
    init_tracing(config.as_ref().map(|c| c.log_format).unwrap_or_default());
    let config = config?;

    let orchestrator_config = OrchestratorConfig::from_env()?;
    let client_config = ClientConfig::from_env()?;
    let catalog = load_catalog(config.engine_catalog_path.as_deref())?;
    let manifest = load_manifest(&config.job_manifest_path)?;

    tracing::info!(
        engine_api_url = %config.engine_api_url,
        push = config.push_ws_url.is_some(),
        jobs = manifest.len(),
        "Starting reelforge-worker",
    );

    let api = Arc::new(EngineApi::new(config.engine_api_url.clone(), &client_config)?);
    let prober = Arc::new(HttpArtifactProber::new(&client_config)?);
    let orchestrator = Orchestrator::start(
        orchestrator_config,
        catalog,
        Collaborators {
            submitter: api.clone(),
            store: api,
            prober,
        },
    )?;
    let mut events = orchestrator.subscribe();

    let _push = match &config.push_ws_url {
        Some(url) => Some(orchestrator.attach_push(Arc::new(PushListener::new(url.clone())))?),
        None => {
            tracing::info!("No PUSH_WS_URL configured, relying on polling");
            None
        }
    };

    for request in manifest {
        match orchestrator.submit(request).await {
            Ok(job) => tracing::debug!(job_id = %job.id, state = %job.readiness_state, "Manifest entry submitted"),
            Err(e) => tracing::error!(error = %e, "Manifest entry rejected"),
        }
    }

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    while !batch_settled(&orchestrator).await {
        tokio::select! {
            () = &mut shutdown => break,
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event stream lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    let status = orchestrator.status();
    tracing::info!(
        total = status.total,
        ready = status.ready_count,
        failed = status.failed_count,
        processing = status.processing_count,
        progress_percent = status.progress_percent,
        complete = status.overall_complete,
        "Batch finished",
    );

    orchestrator.shutdown().await;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Nothing is in flight and no automatic retry is pending. Failed jobs
/// left with budget but no armed retry wait for a manual retry, which
/// this worker never issues.
async fn batch_settled(orchestrator: &Orchestrator) -> bool {
    let idle = || {
        let status = orchestrator.status();
        status.processing_count == 0
            && (status.retryable_failed_count == 0 || orchestrator.scheduler().pending_count() == 0)
    };
    if !idle() {
        return false;
    }
    tokio::time::sleep(SETTLE_GRACE).await;
    idle()
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

fn load_catalog(path: Option<&Path>) -> anyhow::Result<EngineCatalog> {
    let Some(path) = path else {
        tracing::info!("No ENGINE_CATALOG_PATH configured, using built-in catalog");
        return Ok(EngineCatalog::builtin());
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read engine catalog {}", path.display()))?;
    let catalog = EngineCatalog::from_json(&json)?;
    tracing::info!(path = %path.display(), engines = catalog.engines().len(), "Engine catalog loaded");
    Ok(catalog)
}

fn load_manifest(path: &Path) -> anyhow::Result<Vec<NewJobRequest>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read job manifest {}", path.display()))?;
    serde_json::from_str(&json)
        .with_context(|| format!("Invalid job manifest {}", path.display()))
}

/// One line per event, with the event body as JSON.
fn log_event(event: &OrchestratorEvent) {
    let body = serde_json::to_string(event).unwrap_or_else(|e| format!("<unserializable: {e}>"));
    match event {
        OrchestratorEvent::RetriesExhausted { .. } | OrchestratorEvent::PollDegraded { .. } => {
            tracing::warn!(event = %body, "Orchestrator event");
        }
        _ => tracing::info!(event = %body, "Orchestrator event"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
