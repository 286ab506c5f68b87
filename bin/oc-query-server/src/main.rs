//! OrgCache Query Server
//!
//! Serves account lookups over the directory cache written by oc-writer.

use oc_config::AppConfig;
use oc_query::api::create_router;
use oc_query::QueryService;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    oc_common::logging::init_logging("oc-query-server");

    info!("Starting OrgCache query server");

    let config = AppConfig::load()?;
    config.validate()?;

    if config.cache.cache_type == "memory" {
        warn!("Nothing writes to a memory cache in this process; lookups will come back empty");
    }
    let store = oc_cache::create_store(&config.cache).await?;
    let service = QueryService::new(store);

    let app = create_router(service)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    let addr = config.http.socket_addr()?;
    info!(?addr, "HTTP server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Query server stopped");
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
