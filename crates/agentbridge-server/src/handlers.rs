//! One function per recognized message type. Each returns the frame(s) to
//! send back to the calling connection; broadcasts to other subscribers go
//! through `state.subscriptions` directly and are not part of the return
//! value — `execute` and `agent_kill` in particular return nothing on
//! success, since their effect is entirely the `project_state`/`agent_message`
//! broadcasts the running (or cancelled) execution produces.

use std::path::Path;

use serde_json::Value;

use agentbridge_common::ids::{ConnectionId, ProjectId};
use agentbridge_engine::subscription::OutboundSender;
use agentbridge_engine::{EngineError, Project, ProjectMetadata};
use agentbridge_wire::envelope::{
    GetMessagesData, LogEntryView, MessagesData, ProjectCreateData, ProjectListData, ProjectView, ServerMessage,
};
use agentbridge_wire::ErrorCode;

use crate::state::AppState;

pub async fn project_create(
    state: &AppState,
    connection_id: ConnectionId,
    outbound: &OutboundSender,
    data: ProjectCreateData,
) -> Vec<ServerMessage> {
    match state.projects.create(&data.path, &state.config.limits.allowed_root_prefixes).await {
        Ok(project) => {
            state.governor.project_created();
            state.subscriptions.join(project.id, connection_id, outbound.clone()).await;
            vec![ServerMessage::ProjectState {
                project_id: project.id.to_string(),
                data: project_view(&project.snapshot().await),
            }]
        }
        Err(err) => vec![engine_error(state, &err)],
    }
}

pub async fn project_list(state: &AppState) -> Vec<ServerMessage> {
    let mut projects = Vec::new();
    for project in state.projects.list().await {
        projects.push(project_view(&project.snapshot().await));
    }
    vec![ServerMessage::ProjectListResponse { data: ProjectListData { projects } }]
}

pub async fn project_delete(state: &AppState, project_id: ProjectId) -> Vec<ServerMessage> {
    match state.projects.delete(project_id).await {
        Ok(()) => {
            let msg = ServerMessage::ProjectDeleted { project_id: project_id.to_string() };
            state.subscriptions.broadcast(project_id, msg.clone()).await;
            state.subscriptions.remove_project(project_id).await;
            state.governor.project_deleted();
            vec![msg]
        }
        Err(err) => vec![engine_error(state, &err)],
    }
}

pub async fn project_join(
    state: &AppState,
    connection_id: ConnectionId,
    outbound: &OutboundSender,
    project_id: ProjectId,
) -> Vec<ServerMessage> {
    let project = match state.projects.get(project_id).await {
        Ok(project) => project,
        Err(err) => return vec![engine_error(state, &err)],
    };
    state.subscriptions.join(project_id, connection_id, outbound.clone()).await;
    vec![
        ServerMessage::ProjectJoined { project_id: project_id.to_string() },
        ServerMessage::ProjectState {
            project_id: project_id.to_string(),
            data: project_view(&project.snapshot().await),
        },
    ]
}

pub async fn project_leave(state: &AppState, connection_id: ConnectionId, project_id: ProjectId) -> Vec<ServerMessage> {
    state.subscriptions.leave(project_id, connection_id).await;
    vec![ServerMessage::ProjectLeft { project_id: project_id.to_string() }]
}

pub async fn execute(
    state: &AppState,
    project_id: ProjectId,
    prompt: String,
    options: serde_json::Map<String, Value>,
) -> Vec<ServerMessage> {
    let project = match state.projects.get(project_id).await {
        Ok(project) => project,
        Err(err) => return vec![engine_error(state, &err)],
    };
    match state.engine.execute(state.projects.clone(), project, prompt, options).await {
        Ok(()) => Vec::new(),
        Err(err) => vec![engine_error(state, &err)],
    }
}

pub async fn agent_kill(state: &AppState, project_id: ProjectId) -> Vec<ServerMessage> {
    let project = match state.projects.get(project_id).await {
        Ok(project) => project,
        Err(err) => return vec![engine_error(state, &err)],
    };
    match state.engine.kill(&project).await {
        Ok(()) => Vec::new(),
        Err(err) => vec![engine_error(state, &err)],
    }
}

pub async fn agent_new_session(state: &AppState, project_id: ProjectId) -> Vec<ServerMessage> {
    let project = match state.projects.get(project_id).await {
        Ok(project) => project,
        Err(err) => return vec![engine_error(state, &err)],
    };
    project.clear_session().await;
    if let Err(err) = state.projects.persist(&project).await {
        tracing::error!(project_id = %project_id, error = %err, "failed to persist project after session reset");
    }
    vec![ServerMessage::SessionReset { project_id: project_id.to_string() }]
}

const DEFAULT_MESSAGES_LIMIT: usize = 500;
const MAX_MESSAGES_LIMIT: usize = 10_000;

pub async fn get_messages(state: &AppState, project_id: ProjectId, data: GetMessagesData) -> Vec<ServerMessage> {
    if state.projects.get(project_id).await.is_err() {
        return vec![engine_error(state, &EngineError::ProjectNotFound(project_id.to_string()))];
    }
    let log_dir = Project::log_dir(state.projects.data_dir(), project_id);
    let since = data.since.unwrap_or(0);
    let limit = data.limit.unwrap_or(DEFAULT_MESSAGES_LIMIT).min(MAX_MESSAGES_LIMIT);

    match agentbridge_log::reader::get_messages(&log_dir, since, limit) {
        Ok(entries) => {
            let messages = entries
                .into_iter()
                .map(|entry| LogEntryView {
                    timestamp: entry.t,
                    direction: entry.d.as_str().to_string(),
                    message: entry.m,
                })
                .collect();
            vec![ServerMessage::MessagesResponse {
                project_id: project_id.to_string(),
                data: MessagesData { messages },
            }]
        }
        Err(err) => {
            tracing::error!(project_id = %project_id, error = %err, "failed to replay project log");
            vec![ServerMessage::error(ErrorCode::InternalError, "failed to read project log")]
        }
    }
}

fn project_view(meta: &ProjectMetadata) -> ProjectView {
    ProjectView {
        id: meta.id.to_string(),
        path: meta.path.to_string_lossy().into_owned(),
        state: meta.state.as_str().to_string(),
        session_id: meta.session_id.clone(),
        created_at: meta.created_at,
        last_active: meta.last_active,
    }
}

/// Converts an engine error into a client-facing error frame, sanitizing any
/// absolute-path substring that falls outside the data root before it
/// reaches the wire.
fn engine_error(state: &AppState, err: &EngineError) -> ServerMessage {
    ServerMessage::error(ErrorCode::from(err), sanitize(&err.to_string(), &state.config.data_dir))
}

pub(crate) fn sanitize(message: &str, data_dir: &Path) -> String {
    message
        .split(' ')
        .map(|word| {
            let trimmed = word.trim_end_matches(|c: char| ",.;:".contains(c));
            if trimmed.starts_with('/') && !Path::new(trimmed).starts_with(data_dir) {
                word.replacen(trimmed, "<path>", 1)
            } else {
                word.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_redacts_absolute_paths_outside_data_dir() {
        let data_dir = Path::new("/var/agentbridge/data");
        let msg = sanitize("project path is invalid: /etc/shadow", data_dir);
        assert_eq!(msg, "project path is invalid: <path>");
    }

    #[test]
    fn sanitize_keeps_paths_under_the_data_root() {
        let data_dir = Path::new("/var/agentbridge/data");
        let msg = sanitize("project not found: /var/agentbridge/data/p1", data_dir);
        assert!(msg.contains("/var/agentbridge/data/p1"));
    }
}
