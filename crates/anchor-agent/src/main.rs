//! # Anchor Agent Runtime
//!
//! Entry point for the CDC anchoring agent. Resolves configuration from
//! the environment, wires the production adapters into the pipeline, and
//! runs the consume → batch → upload → mint → ack loop until a shutdown
//! signal arrives.
//!
//! Exit codes: 0 after a clean shutdown; 1 on unrecoverable configuration
//! or credential errors at startup, or when the pipeline terminates with
//! an error.

mod config;

use std::sync::Arc;
use std::time::Duration;

use anchor_pipeline::adapters::{ChainCredential, HttpAnchorClient, HttpObjectStore, RedisStreamBroker};
use anchor_pipeline::{Pipeline, PipelineError, PipelineMetrics};
use anyhow::Result;
use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::AgentConfig;

/// Interval between periodic statistics lines.
const STATS_INTERVAL: Duration = Duration::from_secs(60);

fn fail_startup(error: PipelineError) -> ! {
    error!(error = %error, "startup failed");
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!(version = env!("CARGO_PKG_VERSION"), "anchor agent starting");

    let config = AgentConfig::from_env().unwrap_or_else(|e| fail_startup(e));
    info!(
        organization = %config.pipeline.organization_id,
        network = config.network.as_str(),
        bucket = %config.object_store.bucket,
        pattern = %config.pipeline.stream_pattern,
        "configuration resolved"
    );

    let broker = Arc::new(RedisStreamBroker::new(config.broker.clone()));
    let store = Arc::new(
        HttpObjectStore::new(config.object_store.clone()).unwrap_or_else(|e| fail_startup(e)),
    );
    let credential =
        ChainCredential::load(&config.credential_path).unwrap_or_else(|e| fail_startup(e));
    let anchor = Arc::new(
        HttpAnchorClient::new(config.chain.clone(), credential)
            .unwrap_or_else(|e| fail_startup(e)),
    );

    let mut pipeline = Pipeline::new(config.pipeline, broker, store, anchor)
        .unwrap_or_else(|e| fail_startup(e));
    let metrics = pipeline.metrics();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received, draining");
            let _ = shutdown_tx.send(true);
        }
    });

    spawn_stats_reporter(Arc::clone(&metrics), shutdown_rx.clone());

    if let Err(e) = pipeline.run(shutdown_rx).await {
        error!(error = %e, "pipeline terminated");
        std::process::exit(1);
    }

    let snapshot = metrics.snapshot(Utc::now().timestamp_millis());
    info!(
        batches = snapshot.batches_created,
        events = snapshot.events_processed,
        mints = snapshot.mints_succeeded,
        mint_failures = snapshot.mints_failed,
        "agent stopped"
    );
    Ok(())
}

fn spawn_stats_reporter(metrics: Arc<PipelineMetrics>, mut shutdown: watch::Receiver<bool>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(STATS_INTERVAL);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    let snapshot = metrics.snapshot(Utc::now().timestamp_millis());
                    info!(
                        batches = snapshot.batches_created,
                        events = snapshot.events_processed,
                        mints = snapshot.mints_succeeded,
                        mint_failures = snapshot.mints_failed,
                        empty_reads = snapshot.empty_reads,
                        malformed = snapshot.malformed_events,
                        seconds_since_last_batch = snapshot.seconds_since_last_batch,
                        "pipeline statistics"
                    );
                }
            }
        }
    });
}
