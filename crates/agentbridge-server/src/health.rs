//! Health and stats snapshots.
//!
//! §9 Open Question (c) in the wire spec notes `health_check`/`health_status`
//! appear under slightly different names depending on the document; this
//! crate settles on `health_status` as the server->client type and exposes
//! the same snapshot over plain HTTP at `/healthz` for load balancer probes
//! that don't speak the WebSocket protocol.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};

use agentbridge_wire::envelope::{
    ClaudeAvailability, HealthStatusData, ResourceSnapshotView, ServerMessage, ServerStatsData,
};

use crate::state::AppState;

async fn snapshot(state: &AppState) -> HealthStatusData {
    let resources = state.governor.current_snapshot();
    let claude = claude_availability(&state.config.execution.cli_path).await;
    let uptime_secs = (chrono::Utc::now() - state.started_at).num_seconds().max(0) as u64;
    HealthStatusData {
        status: if resources.over_soft_limit { "degraded".to_string() } else { "ok".to_string() },
        uptime_secs,
        connections: resources.active_connections,
        projects: resources.active_projects,
        resources: ResourceSnapshotView {
            memory_bytes: resources.memory_bytes,
            active_executions: resources.active_executions,
            active_connections: resources.active_connections,
            active_projects: resources.active_projects,
            over_soft_limit: resources.over_soft_limit,
        },
        claude,
    }
}

/// On-demand `health_status` push for a connection's `health_check` request.
pub async fn health_status(state: &AppState) -> ServerMessage {
    ServerMessage::HealthStatus { data: snapshot(state).await }
}

/// On-demand `server_stats` push for a connection's `get_stats` request.
pub fn server_stats(state: &AppState) -> ServerMessage {
    let counters = state.governor.counters();
    ServerMessage::ServerStats {
        data: ServerStatsData {
            connections_total: counters.connections_total,
            connections_current: counters.connections_current,
            projects_total: counters.projects_total,
            executions_total: counters.executions_total,
            executions_failed: counters.executions_failed,
            executions_timed_out: counters.executions_timed_out,
            messages_broadcast: state.subscriptions.messages_broadcast(),
            messages_dropped: state.subscriptions.messages_dropped(),
            log_entries_written: counters.log_entries_written,
            internal_errors: counters.internal_errors,
        },
    }
}

/// `GET /healthz`: the same snapshot, for probes that aren't WebSocket
/// clients. Returns `503` once the governor is rejecting new work.
pub async fn http_healthz(State(state): State<AppState>) -> impl IntoResponse {
    let data = snapshot(&state).await;
    let status = if data.status == "ok" { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(data))
}

async fn claude_availability(cli_path: &str) -> ClaudeAvailability {
    match tokio::process::Command::new(cli_path).arg("--version").output().await {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
            ClaudeAvailability {
                available: true,
                version: (!version.is_empty()).then_some(version),
            }
        }
        _ => ClaudeAvailability { available: false, version: None },
    }
}
