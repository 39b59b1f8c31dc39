use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::api::{self, AppState};
use super::db::DbHandle;
use super::store::RunStore;
use super::worker::{Pipeline, WorkerPool};
use super::workspace::GitCloner;
use crate::config::GraderConfig;

const INTERRUPTED_MESSAGE: &str = "Interrupted by process restart; re-enqueue to resume";

/// Configuration for the HTTP server.
pub struct ServerConfig {
    pub port: u16,
    pub db_path: std::path::PathBuf,
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            db_path: std::path::PathBuf::from("data/repograde.db"),
            dev_mode: false,
        }
    }
}

/// Build the application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    api::api_router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Open the store, start the worker pool and serve until Ctrl+C.
pub async fn start_server(config: ServerConfig, grader: GraderConfig) -> Result<()> {
    for warning in grader.validate() {
        tracing::warn!("{}", warning);
    }

    let db = DbHandle::open(&config.db_path).context("Failed to initialize run database")?;
    let store: Arc<dyn RunStore> = Arc::new(db);

    let recovered = store.recover_interrupted(INTERRUPTED_MESSAGE).await?;
    if !recovered.is_empty() {
        tracing::warn!(runs = ?recovered, "Marked interrupted runs as ERROR");
    }

    let provider = grader.provider()?;
    let limiter = grader.rate_limiter();
    let analyzer = grader.analyzer(Arc::clone(&provider), Arc::clone(&limiter))?;
    let scorer = grader.scorer(provider, limiter)?;
    for warning in grader.history_warnings(analyzer.rubric()) {
        tracing::warn!("{}", warning);
    }
    tracing::info!(
        checks = analyzer.rubric().checks.len(),
        model = %grader.ai.model,
        "Pipeline configured"
    );
    let clone_depth = Some(grader.worker.clone_depth);

    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&store),
        Arc::new(GitCloner::new(clone_depth)),
        Arc::new(analyzer),
        Arc::new(scorer),
    ));
    let pool = Arc::new(WorkerPool::start(
        pipeline,
        grader.worker.count,
        grader.worker.queue_capacity,
    ));

    let state = Arc::new(AppState {
        store,
        pool: Arc::clone(&pool),
    });

    let mut app = build_router(state);

    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let host = if config.dev_mode { "0.0.0.0" } else { "127.0.0.1" };
    let addr = format!("{}:{}", host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(addr = %local_addr, db = %config.db_path.display(), "repograde listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    pool.shutdown().await;
    tracing::info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down...");
}
