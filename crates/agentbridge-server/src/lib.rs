//! Agent bridge server: application state, the axum Router, and the
//! top-level serve loop. `agentbridge-cli` is the thin binary wrapper around
//! [`serve`].

pub mod handlers;
pub mod health;
pub mod hub;
pub mod middleware;
pub mod rate_limit;
pub mod router;
pub mod state;
pub mod ws;

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use agentbridge_common::config::ServerConfig;
use agentbridge_engine::{ExecutionEngine, ProjectManager, ResourceGovernor, SubscriptionFabric};

use crate::hub::ConnectionLimiter;
use crate::state::AppState;

/// Loads the project index from disk and wires the engine, governor,
/// subscription fabric, and connection limiter together. Does not bind a
/// socket — callers decide whether to run it under [`app`]/[`serve`] or a
/// test harness.
pub async fn build_state(config: ServerConfig) -> anyhow::Result<AppState> {
    let config = Arc::new(config);
    let projects = Arc::new(
        ProjectManager::load(config.data_dir.clone(), config.limits.max_projects, config.log.clone()).await?,
    );
    let subscriptions = Arc::new(SubscriptionFabric::new());
    let governor = Arc::new(ResourceGovernor::new(config.governor.soft_memory_bytes));
    governor.set_active_projects(projects.list().await.len());
    let shutdown = CancellationToken::new();
    let engine = Arc::new(ExecutionEngine::new(
        config.execution.clone(),
        subscriptions.clone(),
        governor.clone(),
        shutdown.clone(),
    ));
    let limiter = Arc::new(ConnectionLimiter::new(config.limits.max_connections, config.limits.max_connections_per_ip));

    Ok(AppState {
        config,
        projects,
        subscriptions,
        engine,
        governor,
        limiter,
        started_at: chrono::Utc::now(),
        shutdown,
    })
}

/// The axum [`Router`], with tracing and CORS layers applied and `state`
/// bound. Routes: `GET /ws` (the WebSocket upgrade) and `GET /healthz` (a
/// plain-HTTP probe for load balancers).
pub fn app(state: AppState) -> Router {
    let cors = if state.config.network.allowed_origins.is_empty() {
        tower_http::cors::CorsLayer::permissive()
    } else {
        let origins = state
            .config
            .network
            .allowed_origins
            .iter()
            .filter_map(|origin| origin.parse::<axum::http::HeaderValue>().ok())
            .collect::<Vec<_>>();
        tower_http::cors::CorsLayer::new().allow_origin(origins)
    };

    Router::new()
        .route("/ws", get(ws::upgrade))
        .route("/healthz", get(health::http_healthz))
        .layer(axum::middleware::from_fn(middleware::log_requests))
        .layer(middleware::trace_layer())
        .layer(cors)
        .with_state(state)
}

/// Spawns the resource governor's sampling loop and the log retention sweep,
/// binds the configured address, and serves until a shutdown signal fires.
/// Returns once every in-flight connection and execution has either finished
/// or been cancelled, or the shutdown grace period has elapsed.
pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let governor_task = agentbridge_engine::governor::spawn_sampling_task(
        state.governor.clone(),
        Duration::from_secs(state.config.governor.sample_interval_secs),
    );

    let data_dir = state.config.data_dir.clone();
    let retention_task = agentbridge_log::retention::spawn_retention_task(
        move || project_log_dirs(&data_dir),
        Duration::from_secs(state.config.log.retention_days * 24 * 3600),
        Duration::from_secs(3600),
    );

    let addr = format!("{}:{}", state.config.network.host, state.config.network.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "agent bridge server listening");

    let shutdown = state.shutdown.clone();
    let app = app(state).into_make_service_with_connect_info::<std::net::SocketAddr>();

    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown.cancelled().await;
        tracing::info!("graceful shutdown signal received");
    });

    let result = server.into_future().await;

    governor_task.abort();
    retention_task.abort();
    result.map_err(Into::into)
}

/// Lists `<data_dir>/<project-id>/log` for every project directory
/// currently on disk. Reads the directory tree directly rather than going
/// through the in-memory index, so retention keeps sweeping log segments
/// for a project even if its metadata failed to load at startup.
fn project_log_dirs(data_dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    let Ok(entries) = std::fs::read_dir(data_dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|entry| entry.path().join("log"))
        .filter(|path| path.is_dir())
        .collect()
}
