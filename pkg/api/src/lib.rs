pub mod handlers;
pub mod request_id;
pub mod server;

use std::sync::Arc;

use pkg_leases::LeaseManager;
use pkg_metrics::MetricsRegistry;

/// Shared application state injected into all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<LeaseManager>,
    pub metrics: Arc<MetricsRegistry>,
}
