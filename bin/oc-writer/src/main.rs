//! OrgCache Writer
//!
//! Drains work units from the queue and upserts the fetched directory entries into the cache.

use std::sync::Arc;

use axum::{routing::get, Json, Router};
use oc_config::AppConfig;
use oc_source::aws::{create_connector, create_credential_broker};
use oc_source::RetryPolicy;
use oc_sync::{CacheWriter, WriterWorker};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info};

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    written_total: u64,
    failed_total: u64,
    /// Absent when the queue backend does not report depth
    queue_pending: Option<u64>,
    queue_in_flight: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    oc_common::logging::init_logging("oc-writer");

    info!("Starting OrgCache writer");

    let config = AppConfig::load()?;
    config.validate()?;
    if !config.dev_mode {
        config.source.validate()?;
    }
    info!(
        queue_type = %config.queue.queue_type,
        cache_type = %config.cache.cache_type,
        batch_size = config.writer.batch_size,
        "Writer configuration loaded"
    );

    let broker = create_credential_broker(&config.source, config.dev_mode).await;
    let connector = create_connector(&config.source).await;
    let retry = RetryPolicy::from_config(&config.source.retry);

    let consumer = oc_queue::create_consumer(&config.queue).await?;
    let store = oc_cache::create_store(&config.cache).await?;
    let writer = Arc::new(CacheWriter::new(broker, connector, store, retry));
    let worker = Arc::new(WriterWorker::new(consumer, writer, config.writer.clone()));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let worker_handle = tokio::spawn(worker.clone().run(shutdown_tx.subscribe()));

    let health_worker = worker.clone();
    let ready_worker = worker.clone();
    let app = Router::new()
        .route("/health", get(move || {
            let w = health_worker.clone();
            async move {
                let depth = w.queue_metrics().await;
                Json(HealthResponse {
                    status: if w.is_healthy() { "UP".to_string() } else { "DOWN".to_string() },
                    written_total: w.written_total(),
                    failed_total: w.failed_total(),
                    queue_pending: depth.as_ref().map(|m| m.pending_messages),
                    queue_in_flight: depth.as_ref().map(|m| m.in_flight_messages),
                })
            }
        }))
        .route("/health/live", get(|| async { Json(serde_json::json!({"status": "UP"})) }))
        .route("/health/ready", get(move || {
            let w = ready_worker.clone();
            async move {
                let status = if w.is_healthy() { "UP" } else { "DOWN" };
                Json(serde_json::json!({"status": status}))
            }
        }));

    let addr = config.http.socket_addr()?;
    info!(?addr, "HTTP server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(());
    if let Err(e) = worker_handle.await {
        error!(error = %e, "Writer task failed");
    }

    info!(
        written = worker.written_total(),
        failed = worker.failed_total(),
        "Writer stopped"
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for CTRL+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
