//! A project: a stable identifier bound to a directory, plus its execution
//! and log state.
//!
//! All mutation goes through [`Project::transition`], the single
//! serialization point for state changes: one method taking
//! `(new_state, optional_error, optional_session_id)`, serialized per
//! project. Nothing else mutates `state`, `last_error`, or `session_id`
//! directly.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use agentbridge_common::ids::ProjectId;
use agentbridge_log::LogWriterHandle;

/// One of `IDLE`, `EXECUTING`, `ERROR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionState {
    Idle,
    Executing,
    Error,
}

impl ExecutionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionState::Idle => "IDLE",
            ExecutionState::Executing => "EXECUTING",
            ExecutionState::Error => "ERROR",
        }
    }
}

/// A running execution's bookkeeping. Held inside the project's own mutex,
/// never a global lock.
pub struct ExecutionRecord {
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub cancel: CancellationToken,
}

/// The mutable part of a project, serialized by `Project::transition` and
/// the execution-start/accept path.
pub(crate) struct ProjectState {
    pub execution: ExecutionState,
    pub last_error: Option<String>,
    pub session_id: Option<String>,
    pub last_active: DateTime<Utc>,
    pub current_execution: Option<ExecutionRecord>,
}

/// The durable snapshot of a project written to `metadata.json`. Does not
/// carry `current_execution` (a process handle cannot survive a restart) and
/// normalizes `EXECUTING` back to `IDLE` on load — a crash mid-execution must
/// never leave a project stuck `EXECUTING` after restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMetadata {
    pub id: ProjectId,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub state: ExecutionState,
    pub last_error: Option<String>,
    pub session_id: Option<String>,
}

pub struct Project {
    pub id: ProjectId,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub log: LogWriterHandle,
    pub(crate) state: Mutex<ProjectState>,
}

impl Project {
    pub fn new(path: PathBuf, log: LogWriterHandle) -> Self {
        Self::with_id(ProjectId::new(), path, log)
    }

    /// Like [`Project::new`], but with a caller-supplied id. Used when the
    /// id must be known before construction — e.g. to create the project's
    /// on-disk directory and spawn its log writer first.
    pub fn with_id(id: ProjectId, path: PathBuf, log: LogWriterHandle) -> Self {
        let now = Utc::now();
        Self {
            id,
            path,
            created_at: now,
            log,
            state: Mutex::new(ProjectState {
                execution: ExecutionState::Idle,
                last_error: None,
                session_id: None,
                last_active: now,
                current_execution: None,
            }),
        }
    }

    /// Reconstructs a project from a persisted snapshot at startup. Any
    /// `EXECUTING` state on disk is the result of a crash and is normalized
    /// to `IDLE` (no process survives a restart to finish it).
    pub fn from_metadata(meta: ProjectMetadata, log: LogWriterHandle) -> Self {
        let execution = if meta.state == ExecutionState::Executing {
            ExecutionState::Idle
        } else {
            meta.state
        };
        Self {
            id: meta.id,
            path: meta.path,
            created_at: meta.created_at,
            log,
            state: Mutex::new(ProjectState {
                execution,
                last_error: meta.last_error,
                session_id: meta.session_id,
                last_active: meta.last_active,
                current_execution: None,
            }),
        }
    }

    /// Serialized per-project state transition. Every state change in the
    /// project's lifetime (execution start/stop, error, session update)
    /// goes through this one method.
    pub async fn transition(
        &self,
        new_state: ExecutionState,
        error: Option<String>,
        session_id: Option<String>,
    ) {
        let mut state = self.state.lock().await;
        state.execution = new_state;
        state.last_active = Utc::now();
        if new_state != ExecutionState::Executing {
            state.current_execution = None;
        }
        if let Some(error) = error {
            state.last_error = Some(error);
        } else if new_state == ExecutionState::Idle {
            state.last_error = None;
        }
        if let Some(session_id) = session_id {
            state.session_id = Some(session_id);
        }
    }

    pub async fn snapshot(&self) -> ProjectMetadata {
        let state = self.state.lock().await;
        ProjectMetadata {
            id: self.id,
            path: self.path.clone(),
            created_at: self.created_at,
            last_active: state.last_active,
            state: state.execution,
            last_error: state.last_error.clone(),
            session_id: state.session_id.clone(),
        }
    }

    pub async fn touch(&self) {
        self.state.lock().await.last_active = Utc::now();
    }

    /// Clears the continuation session identifier (`agent_new_session`).
    /// Unlike [`Project::transition`] this never touches `execution` or
    /// `last_error` — an explicit session reset is not a state transition.
    pub async fn clear_session(&self) {
        let mut state = self.state.lock().await;
        state.session_id = None;
        state.last_active = Utc::now();
    }

    pub fn log_dir(data_dir: &Path, id: ProjectId) -> PathBuf {
        data_dir.join(id.to_string()).join("log")
    }

    pub fn metadata_path(data_dir: &Path, id: ProjectId) -> PathBuf {
        data_dir.join(id.to_string()).join("metadata.json")
    }

    pub fn dir(data_dir: &Path, id: ProjectId) -> PathBuf {
        data_dir.join(id.to_string())
    }
}
