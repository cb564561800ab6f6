//! Optional HTTP dashboard
//!
//! Starts runs as child processes, shows their logs, lists output folders
//! with their gaps, serves folders as tar.gz and edits the prompt file.

pub mod archive;
pub mod handlers;
pub mod tasks;

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::error::Result;
use handlers::*;
pub use tasks::{TaskKind, TaskRegistry, TaskStatus, TaskView};

/// Shared state of the dashboard
pub struct AppState {
    pub base_dir: PathBuf,
    pub prompt_path: PathBuf,
    pub tasks: TaskRegistry,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/status", get(status_handler))
        .route("/api/tasks/{name}", get(task_handler).post(start_task_handler))
        .route("/api/outputs", get(outputs_handler))
        .route("/api/outputs/{folder}/missing", get(missing_handler))
        .route("/api/outputs/{folder}/archive", get(archive_handler))
        .route("/api/filters", get(filters_handler).post(update_filters_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the dashboard until `shutdown` completes, then stop running tasks
pub async fn serve(
    state: Arc<AppState>,
    bind: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(addr = %bind, base_dir = %state.base_dir.display(), "Dashboard listening");
    axum::serve(listener, router(Arc::clone(&state)))
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("Dashboard stopped, stopping running tasks");
    state.tasks.stop_all().await;
    Ok(())
}
