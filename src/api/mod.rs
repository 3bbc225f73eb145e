mod errors;
pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::builders::BuilderRegistry;
use crate::engine::dispatch::WorkflowLauncher;
use crate::storage::RunStore;

pub use errors::AppError;

/// Shared application state accessible by all handlers.
pub struct AppState {
    /// Where run requests go; the dispatcher when serving.
    pub launcher: Arc<dyn WorkflowLauncher>,
    pub runs: Arc<dyn RunStore>,
    pub builders: Arc<BuilderRegistry>,
}

/// Build the API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v0/workflows/{id}/run", post(handlers::run_workflow))
        .route("/v0/workflow-runs", get(handlers::list_workflow_runs))
        .route("/v0/workflow-runs/{id}", get(handlers::get_workflow_run))
        .route("/v0/tasks/io-data", get(handlers::get_task_io_data))
        .route("/v0/builders", get(handlers::list_builders))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the REST API server.
pub async fn serve(host: &str, port: u16, state: Arc<AppState>) -> Result<()> {
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Chainflow API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
