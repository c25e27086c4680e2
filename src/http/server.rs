//! HTTP server assembly.

use super::routes;
use crate::health::{HealthMonitor, HealthRefresher};
use crate::provider::ToolProvider;
use crate::types::{Result, ServerConfig};
use crate::views::ViewCatalog;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<dyn ToolProvider>,
    pub views: Arc<ViewCatalog>,
    pub monitor: Option<Arc<HealthMonitor>>,
    /// Bounds concurrent `/run` requests.
    pub run_slots: Arc<Semaphore>,
    pub view_parallelism: usize,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("views", &self.views.len())
            .field("available_run_slots", &self.run_slots.available_permits())
            .field("view_parallelism", &self.view_parallelism)
            .finish_non_exhaustive()
    }
}

impl AppState {
    pub fn new(provider: Arc<dyn ToolProvider>, views: Arc<ViewCatalog>, server: &ServerConfig) -> Self {
        Self {
            provider,
            views,
            monitor: None,
            run_slots: Arc::new(Semaphore::new(server.max_concurrent_runs.max(1))),
            view_parallelism: server.view_parallelism.max(1),
        }
    }

    pub fn with_monitor(mut self, monitor: Arc<HealthMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/health/summary", get(routes::health_summary))
        .route("/views", get(routes::list_views))
        .route("/views/{name}", get(routes::describe_view))
        .route("/run", post(routes::run))
        .fallback(routes::not_found)
        .with_state(state)
}

/// Serve until `shutdown` is cancelled, then drain in-flight requests.
///
/// When the state carries a monitor, the health probe is refreshed in the
/// background for the lifetime of the server.
pub async fn serve(listener: TcpListener, state: AppState, shutdown: CancellationToken) -> Result<()> {
    let mut refresher = state.monitor.clone().map(|monitor| {
        let period = monitor.settings().check_interval();
        HealthRefresher::new(monitor, period)
    });
    let refresh_task = refresher.as_mut().map(HealthRefresher::start);

    let addr = listener.local_addr()?;
    tracing::info!(%addr, views = state.views.len(), "view_service_listening");

    let app = router(state);
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await;

    if let Some(r) = refresher.as_mut() {
        r.stop();
    }
    if let Some(task) = refresh_task {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "health_refresher_join_failed");
        }
    }
    tracing::info!("view_service_stopped");
    result.map_err(Into::into)
}

/// Cancels `token` on Ctrl-C.
pub fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown_requested");
            token.cancel();
        }
    });
}
