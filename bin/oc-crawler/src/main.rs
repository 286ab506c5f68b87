//! OrgCache Crawler
//!
//! Walks the source directory on an interval and enqueues one work unit per entry.
//! With `queue.type = "memory"` the writer runs in the same process against the
//! configured cache, which is handy for local runs against LocalStack.

use std::sync::Arc;

use axum::{routing::get, Json, Router};
use oc_config::AppConfig;
use oc_queue::{MemoryQueue, QueueConsumer, QueuePublisher};
use oc_source::aws::{create_connector, create_credential_broker};
use oc_source::RetryPolicy;
use oc_sync::{CacheWriter, CrawlCycle, CrawlScheduler, WorkQueueDispatcher, WriterWorker};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info};

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    scheduler_running: bool,
    last_cycle_id: Option<String>,
    last_cycle_enqueued: Option<usize>,
    last_cycle_failed: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    oc_common::logging::init_logging("oc-crawler");

    info!("Starting OrgCache crawler");

    let config = AppConfig::load()?;
    config.validate()?;
    if !config.dev_mode {
        config.source.validate()?;
    }
    info!(
        enabled = config.crawl.enabled,
        interval_secs = config.crawl.interval_seconds,
        queue_type = %config.queue.queue_type,
        "Crawler configuration loaded"
    );

    let broker = create_credential_broker(&config.source, config.dev_mode).await;
    let connector = create_connector(&config.source).await;
    let retry = RetryPolicy::from_config(&config.source.retry);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut worker_handle = None;

    let publisher: Arc<dyn QueuePublisher> = if config.queue.queue_type == "memory" {
        let queue = Arc::new(MemoryQueue::new("orgcache-units", config.queue.sqlite.visibility_timeout));
        let store = oc_cache::create_store(&config.cache).await?;
        let writer = Arc::new(CacheWriter::new(broker.clone(), connector.clone(), store, retry.clone()));
        let consumer: Arc<dyn QueueConsumer> = queue.clone();
        let worker = Arc::new(WriterWorker::new(consumer, writer, config.writer.clone()));
        info!(cache_type = %config.cache.cache_type, "In-process writer enabled for memory queue");
        worker_handle = Some(tokio::spawn(worker.run(shutdown_tx.subscribe())));
        queue
    } else {
        oc_queue::create_publisher(&config.queue).await?
    };

    let dispatcher = WorkQueueDispatcher::new(publisher, config.crawl.dispatch_batch_size);
    let cycle = Arc::new(CrawlCycle::new(
        broker,
        connector,
        dispatcher,
        retry,
        config.crawl.timeout(),
    ));
    let scheduler = Arc::new(CrawlScheduler::new(cycle, config.crawl.clone()));
    scheduler.start().await;

    let scheduler_clone = scheduler.clone();
    let app = Router::new()
        .route("/health", get(move || {
            let s = scheduler_clone.clone();
            async move {
                let running = s.is_running().await;
                let last = s.last_report();
                Json(HealthResponse {
                    status: if running { "UP".to_string() } else { "DOWN".to_string() },
                    scheduler_running: running,
                    last_cycle_id: last.as_ref().map(|r| r.cycle_id.clone()),
                    last_cycle_enqueued: last.as_ref().map(|r| r.dispatch.enqueued),
                    last_cycle_failed: last.as_ref().map(|r| r.dispatch.failed.len()),
                })
            }
        }))
        .route("/health/live", get(|| async { Json(serde_json::json!({"status": "UP"})) }))
        .route("/health/ready", get(|| async { Json(serde_json::json!({"status": "UP"})) }));

    let addr = config.http.socket_addr()?;
    info!(?addr, "HTTP server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(scheduler))
        .await?;

    let _ = shutdown_tx.send(());
    if let Some(handle) = worker_handle {
        if let Err(e) = handle.await {
            error!(error = %e, "In-process writer task failed");
        }
    }

    info!("Crawler stopped");
    Ok(())
}

async fn shutdown_signal(scheduler: Arc<CrawlScheduler>) {
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
    scheduler.stop().await;
}
