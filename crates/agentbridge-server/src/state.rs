//! Shared application state handed to every connection and handler.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use agentbridge_common::config::ServerConfig;
use agentbridge_engine::{ExecutionEngine, ProjectManager, SharedGovernor, SharedSubscriptionFabric};

use crate::hub::ConnectionLimiter;

/// Everything a handler needs to act on a client message. Cloned cheaply
/// (every field is an `Arc` or `Copy`); one instance is built at startup and
/// shared across every connection task.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub projects: Arc<ProjectManager>,
    pub subscriptions: SharedSubscriptionFabric,
    pub engine: Arc<ExecutionEngine>,
    pub governor: SharedGovernor,
    pub limiter: Arc<ConnectionLimiter>,
    pub started_at: DateTime<Utc>,
    pub shutdown: CancellationToken,
}
