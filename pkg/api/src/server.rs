use axum::{
    Router, middleware,
    routing::{get, post, put},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

use crate::AppState;
use crate::handlers::{health, leases};
use crate::request_id::request_id_middleware;
use pkg_controllers::ExpirySweeper;
use pkg_leases::{LeaseConfig, LeaseManager};
use pkg_metrics::MetricsRegistry;
use pkg_state::{MemoryStore, RedisStore, StoreHandle};
use pkg_types::config::StoreKind;

/// Server configuration passed from the binary's CLI.
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub store: StoreKind,
    pub redis_host: String,
    pub redis_port: u16,
    pub lease: LeaseConfig,
    pub sweep_interval: Duration,
}

/// Lease routes plus health and metrics, with request ids on every response.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/keys",
            post(leases::create_lease).get(leases::checkout_lease),
        )
        .route("/keys/", get(leases::checkout_lease))
        .route(
            "/keys/{id}",
            get(leases::get_lease)
                .put(leases::release_lease)
                .delete(leases::delete_lease),
        )
        .route("/keepalive/{id}", put(leases::keepalive_lease))
        .route("/healthz", get(health::healthz))
        .route("/metrics", get(health::metrics))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

async fn open_store(config: &ServerConfig) -> anyhow::Result<StoreHandle> {
    match config.store {
        StoreKind::Redis => {
            let store = RedisStore::connect(&config.redis_host, config.redis_port).await?;
            Ok(Arc::new(store))
        }
        StoreKind::Memory => {
            info!("Using in-memory store; leases will not survive a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

pub async fn start_server(config: ServerConfig) -> anyhow::Result<()> {
    // Initialize core subsystems
    let store = open_store(&config).await?;
    let manager = Arc::new(LeaseManager::new(store, config.lease.clone()));
    manager
        .ping()
        .await
        .map_err(|e| anyhow::anyhow!("Store is not reachable: {}", e))?;
    let metrics = Arc::new(MetricsRegistry::for_leases());

    let state = AppState {
        manager: manager.clone(),
        metrics: metrics.clone(),
    };

    // Start the ExpirySweeper background task
    let sweeper = ExpirySweeper::new(manager, metrics)
        .with_interval(config.sweep_interval)
        .start();

    let app = router(state);

    info!("Starting API server on {}", config.addr);
    let listener = TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    info!("API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
