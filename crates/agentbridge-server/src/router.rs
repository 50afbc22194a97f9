//! Message Router: decode, validate, dispatch, recover.
//!
//! `route` is the single entry point the Connection Hub's reader task calls
//! for every decoded frame. It never panics the task that calls it: handler
//! faults are caught at the `catch_unwind` boundary and turned into an
//! `INTERNAL_ERROR` frame, per the recovery-wrapper contract.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;

use agentbridge_common::ids::ConnectionId;
use agentbridge_engine::subscription::OutboundSender;
use agentbridge_wire::envelope::{ClientMessage, RawFrame, ServerMessage};
use agentbridge_wire::validation::{self, OptionType, ValidationError};
use agentbridge_wire::ErrorCode;

use crate::handlers;
use crate::state::AppState;

/// Decodes, validates, and dispatches one client frame, returning every
/// frame to send back to the calling connection (may be empty — `execute`
/// and `agent_kill` reply only via broadcast).
pub async fn route(
    state: &AppState,
    connection_id: ConnectionId,
    outbound: &OutboundSender,
    raw: RawFrame,
) -> Vec<ServerMessage> {
    let message: ClientMessage = match serde_json::from_value(raw.clone()) {
        Ok(message) => message,
        Err(err) => {
            let type_name = ClientMessage::type_of(&raw).unwrap_or("<missing>");
            tracing::debug!(r#type = %type_name, error = %err, "rejected unparseable client frame");
            return vec![ServerMessage::error(
                ErrorCode::InvalidMessage,
                format!("could not parse '{type_name}' frame: {err}"),
            )];
        }
    };

    match AssertUnwindSafe(dispatch(state, connection_id, outbound, message)).catch_unwind().await {
        Ok(responses) => responses,
        Err(_) => {
            state.governor.internal_error();
            tracing::error!("handler panicked; recovered at router boundary");
            vec![ServerMessage::error(ErrorCode::InternalError, "internal error")]
        }
    }
}

async fn dispatch(
    state: &AppState,
    connection_id: ConnectionId,
    outbound: &OutboundSender,
    message: ClientMessage,
) -> Vec<ServerMessage> {
    match message {
        ClientMessage::ProjectCreate { data } => handlers::project_create(state, connection_id, outbound, data).await,
        ClientMessage::ProjectList => handlers::project_list(state).await,
        ClientMessage::ProjectDelete { project_id } => with_project_id(&project_id, |id| {
            handlers::project_delete(state, id)
        })
        .await,
        ClientMessage::ProjectJoin { data } => with_project_id(&data.project_id, |id| {
            handlers::project_join(state, connection_id, outbound, id)
        })
        .await,
        ClientMessage::ProjectLeave { project_id } => with_project_id(&project_id, |id| {
            handlers::project_leave(state, connection_id, id)
        })
        .await,
        ClientMessage::Execute { project_id, data } => {
            let id = match validation::validate_identifier(&project_id) {
                Ok(id) => id,
                Err(err) => return vec![validation_error(err)],
            };
            if let Err(err) = validation::validate_prompt(&data.prompt, state.config.limits.max_prompt_len) {
                return vec![validation_error(err)];
            }
            if let Err(err) = validation::validate_options(&data.options, &execute_option_whitelist()) {
                return vec![validation_error(err)];
            }
            handlers::execute(state, id, data.prompt, data.options).await
        }
        ClientMessage::AgentKill { project_id } => with_project_id(&project_id, |id| handlers::agent_kill(state, id)).await,
        ClientMessage::AgentNewSession { project_id } => {
            with_project_id(&project_id, |id| handlers::agent_new_session(state, id)).await
        }
        ClientMessage::GetMessages { project_id, data } => with_project_id(&project_id, |id| {
            handlers::get_messages(state, id, data)
        })
        .await,
        ClientMessage::HealthCheck => vec![crate::health::health_status(state).await],
        ClientMessage::GetStats => vec![crate::health::server_stats(state)],
    }
}

/// Validates `raw_id` as a project identifier before running `then`, the
/// one step every project-scoped message type shares.
async fn with_project_id<F, Fut>(raw_id: &str, then: F) -> Vec<ServerMessage>
where
    F: FnOnce(agentbridge_common::ids::ProjectId) -> Fut,
    Fut: std::future::Future<Output = Vec<ServerMessage>>,
{
    match validation::validate_identifier(raw_id) {
        Ok(id) => then(id).await,
        Err(err) => vec![validation_error(err)],
    }
}

fn validation_error(err: ValidationError) -> ServerMessage {
    let code = ErrorCode::from(&err);
    ServerMessage::error(code, err.to_string())
}

/// Whitelisted `execute` options. The agent CLI's own flag surface is an
/// external collaborator (§1); this is the subset the server accepts and
/// forwards as `--key value` arguments.
fn execute_option_whitelist() -> HashMap<&'static str, OptionType> {
    let mut whitelist = HashMap::new();
    whitelist.insert("model", OptionType::String);
    whitelist.insert("permission_mode", OptionType::String);
    whitelist.insert("max_turns", OptionType::Number);
    whitelist.insert("verbose", OptionType::Bool);
    whitelist.insert("allowed_tools", OptionType::String);
    whitelist
}
