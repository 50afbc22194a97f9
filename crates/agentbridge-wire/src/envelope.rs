//! Wire envelope: `{ "type": ..., "project_id": ..., "data": ..., "timestamp": ... }`.
//!
//! Client frames are parsed in two phases (see [`crate::validation`]): first
//! as a generic `serde_json::Value` so we can report exactly which field is
//! missing or malformed, then deserialized into [`ClientMessage`] once shape
//! validation passes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error_code::ErrorCode;

/// A decoded, but not yet validated, client frame. Kept distinct from
/// [`ClientMessage`] because `serde`'s internally-tagged enums give poor
/// error messages for a type this externally facing; the router parses the
/// raw `Value` first, runs validation, then converts.
pub type RawFrame = Value;

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectCreateData {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectJoinData {
    pub project_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecuteData {
    pub prompt: String,
    #[serde(default)]
    pub options: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GetMessagesData {
    pub since: Option<i64>,
    pub limit: Option<usize>,
}

/// Client -> server messages, one variant per recognized envelope `type`.
///
/// `health_check` and `get_stats` are not named in the client request list
/// but exist so the `health_status` / `server_stats` server pushes are
/// reachable on demand rather than only on a fixed interval.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    ProjectCreate { data: ProjectCreateData },
    ProjectList,
    ProjectDelete { project_id: String },
    ProjectJoin { data: ProjectJoinData },
    ProjectLeave { project_id: String },
    Execute { project_id: String, data: ExecuteData },
    AgentKill { project_id: String },
    AgentNewSession { project_id: String },
    GetMessages { project_id: String, #[serde(default)] data: GetMessagesData },
    HealthCheck,
    GetStats,
}

impl ClientMessage {
    /// The envelope `type` string, for logging before the message is fully
    /// parsed into a typed variant (or when parsing failed and only the raw
    /// value is available).
    pub fn type_of(raw: &Value) -> Option<&str> {
        raw.get("type").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectView {
    pub id: String,
    pub path: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntryView {
    pub timestamp: i64,
    pub direction: String,
    pub message: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorData {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Server -> client messages. Serializes to the same envelope shape as
/// [`ClientMessage`] deserializes from.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ProjectState { project_id: String, data: ProjectView },
    ProjectListResponse { data: ProjectListData },
    ProjectJoined { project_id: String },
    ProjectLeft { project_id: String },
    ProjectDeleted { project_id: String },
    AgentMessage { project_id: String, data: Value },
    MessagesResponse { project_id: String, data: MessagesData },
    SessionReset { project_id: String },
    Error { data: ErrorData },
    HealthStatus { data: HealthStatusData },
    ServerStats { data: ServerStatsData },
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectListData {
    pub projects: Vec<ProjectView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessagesData {
    pub messages: Vec<LogEntryView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClaudeAvailability {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatusData {
    pub status: String,
    pub uptime_secs: u64,
    pub connections: usize,
    pub projects: usize,
    pub resources: ResourceSnapshotView,
    pub claude: ClaudeAvailability,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceSnapshotView {
    pub memory_bytes: u64,
    pub active_executions: usize,
    pub active_connections: usize,
    pub active_projects: usize,
    pub over_soft_limit: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerStatsData {
    pub connections_total: u64,
    pub connections_current: usize,
    pub projects_total: u64,
    pub executions_total: u64,
    pub executions_failed: u64,
    pub executions_timed_out: u64,
    pub messages_broadcast: u64,
    pub messages_dropped: u64,
    pub log_entries_written: u64,
    pub internal_errors: u64,
}

impl ServerMessage {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            data: ErrorData {
                code,
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn error_with_details(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        ServerMessage::Error {
            data: ErrorData {
                code,
                message: message.into(),
                details: Some(details),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_create_parses_from_envelope_json() {
        let raw = serde_json::json!({
            "type": "project_create",
            "data": { "path": "/tmp/p1" }
        });
        let msg: ClientMessage = serde_json::from_value(raw).unwrap();
        match msg {
            ClientMessage::ProjectCreate { data } => assert_eq!(data.path, "/tmp/p1"),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn execute_defaults_options_when_absent() {
        let raw = serde_json::json!({
            "type": "execute",
            "project_id": "P1",
            "data": { "prompt": "hello" }
        });
        let msg: ClientMessage = serde_json::from_value(raw).unwrap();
        match msg {
            ClientMessage::Execute { project_id, data } => {
                assert_eq!(project_id, "P1");
                assert_eq!(data.prompt, "hello");
                assert!(data.options.is_empty());
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn error_message_serializes_with_snake_case_code() {
        let msg = ServerMessage::error(ErrorCode::ProjectNesting, "nested path");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["data"]["code"], "PROJECT_NESTING");
    }
}
