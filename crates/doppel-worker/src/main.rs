//! Replacement worker binary.
//!
//! Reads the clip named by `DOPPEL_INPUT`, writes `DOPPEL_OUTPUT`, and keeps
//! progress under `DOPPEL_RUN_ROOT/<run id>`. Setting `DOPPEL_RUN_ID` to the
//! id of an earlier failed run resumes it.

use std::sync::Arc;

use doppel_models::RunId;
use tracing::{error, info, warn};

use doppel_worker::telemetry::{init_tracing, install_metrics_exporter};
use doppel_worker::{load_pipeline_config, HttpCollaborators, JobExecutor, WorkerConfig, WorkerError};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    let tls_ready = rustls::crypto::ring::default_provider()
        .install_default()
        .is_ok();

    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();
    if !tls_ready {
        warn!("rustls crypto provider was already installed");
    }
    info!("Starting doppel-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        if let Err(e) = install_metrics_exporter(port) {
            error!("Failed to start metrics exporter: {}", e);
        }
    }

    let pipeline_config = match load_pipeline_config(
        config.pipeline_config_path.as_deref(),
        |key| std::env::var(key).ok(),
    ) {
        Ok(c) => c,
        Err(e) => {
            error!("Invalid pipeline configuration: {}", e);
            std::process::exit(2);
        }
    };

    let (Ok(input), Ok(output)) = (std::env::var("DOPPEL_INPUT"), std::env::var("DOPPEL_OUTPUT")) else {
        error!("DOPPEL_INPUT and DOPPEL_OUTPUT must be set");
        std::process::exit(2);
    };
    let run_id = std::env::var("DOPPEL_RUN_ID")
        .map(RunId::from_string)
        .unwrap_or_else(|_| RunId::new());

    let collaborators = Arc::new(HttpCollaborators::new(config.clone()));
    let executor = match JobExecutor::new(config, pipeline_config, collaborators) {
        Ok(e) => e,
        Err(e) => {
            error!("Failed to create job executor: {}", e);
            std::process::exit(1);
        }
    };

    // Cancel on Ctrl-C; segments already completed stay on disk
    let cancel = executor.cancellation().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, cancelling run");
            cancel.cancel();
        }
    });

    match executor.execute(&input, &output, run_id.clone()).await {
        Ok(summary) => {
            info!(
                run_id = %summary.run_id,
                frames = summary.frame_count,
                segments = summary.segments,
                resumed = summary.resumed_segments,
                "Wrote {}",
                summary.output.display()
            );
        }
        Err(WorkerError::Cancelled) => {
            warn!(run_id = %run_id, "Run cancelled; rerun with DOPPEL_RUN_ID={} to resume", run_id);
            std::process::exit(130);
        }
        Err(e) => {
            error!(run_id = %run_id, retryable = e.is_retryable(), "Run failed: {}", e);
            std::process::exit(1);
        }
    }

    info!("Worker shutdown complete");
}
