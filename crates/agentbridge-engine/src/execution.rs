//! Execution Engine: spawns the agent CLI, streams its stdout as
//! newline-delimited JSON, and enforces the deadline/kill/session-continuity
//! contract for a project's execution.
//!
//! Process construction (stdio piping, cwd, env, spawn-then-reap-in-a-task)
//! follows `alfredjeanlab-oddjobs/crates/daemon/src/adapters/agent/coop/spawn.rs`;
//! `execution_manager.rs` elsewhere in this workspace never shells out to a
//! process at all (it drives an in-process `rig` orchestrator), so there is
//! no existing counterpart for the streaming loop itself, which is new code.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use agentbridge_common::config::ExecutionConfig;
use agentbridge_log::{Direction, LogEntry};
use agentbridge_wire::envelope::ServerMessage;
use agentbridge_wire::ErrorCode;

use crate::error::{EngineError, Result};
use crate::governor::SharedGovernor;
use crate::project::{ExecutionRecord, ExecutionState, Project};
use crate::project_manager::ProjectManager;
use crate::subscription::SharedSubscriptionFabric;

pub struct ExecutionEngine {
    config: ExecutionConfig,
    subscriptions: SharedSubscriptionFabric,
    governor: SharedGovernor,
    semaphore: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl ExecutionEngine {
    /// `shutdown` is the server's top-level cancellation token. Every
    /// execution's own token is a child of it, so tripping shutdown cancels
    /// every in-flight child process the same way an explicit kill does,
    /// instead of leaving them to run past the server's own exit.
    pub fn new(
        config: ExecutionConfig,
        subscriptions: SharedSubscriptionFabric,
        governor: SharedGovernor,
        shutdown: CancellationToken,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_executions));
        Self {
            config,
            subscriptions,
            governor,
            semaphore,
            shutdown,
        }
    }

    /// Admits one execution and hands the streaming work off to a background
    /// task. Returns as soon as the project is durably marked `EXECUTING` and
    /// the prompt is on disk — the caller (the router) gets an immediate
    /// answer for every rejection (`CLAUDE_NOT_FOUND`, `PROCESS_ACTIVE`,
    /// `RESOURCE_LIMIT`) without waiting on the child process, and is never
    /// blocked for the duration of a run. Only one execution slot exists per
    /// project, protected by the project's own state mutex: the
    /// check-then-transition below is one locked section so two concurrent
    /// calls on the same project can't both observe `IDLE`.
    pub async fn execute(
        self: &Arc<Self>,
        projects: Arc<ProjectManager>,
        project: Arc<Project>,
        prompt: String,
        options: serde_json::Map<String, Value>,
    ) -> Result<()> {
        if which(&self.config.cli_path).is_none() {
            return Err(EngineError::ClaudeNotFound(self.config.cli_path.clone()));
        }

        let permit = self
            .semaphore
            .clone()
            .try_acquire_owned()
            .map_err(|_| EngineError::ResourceLimit("execution concurrency limit reached".to_string()))?;
        if !self.governor.accepts_new_work() {
            return Err(EngineError::ResourceLimit("memory soft limit exceeded".to_string()));
        }

        let deadline = Utc::now() + chrono::Duration::seconds(self.config.deadline_secs as i64);
        let cancel = self.shutdown.child_token();
        let session_id = {
            let mut state = project.state.lock().await;
            if state.execution != ExecutionState::Idle {
                return Err(EngineError::ProcessActive);
            }
            let session_id = state.session_id.clone();
            state.execution = ExecutionState::Executing;
            state.current_execution = Some(ExecutionRecord {
                started_at: Utc::now(),
                deadline,
                cancel: cancel.clone(),
            });
            session_id
        };
        projects.persist(&project).await?;
        self.governor.execution_started();
        self.broadcast_state(&project).await;

        project
            .log
            .append(LogEntry::new(now_nanos(), Direction::Client, serde_json::json!({ "prompt": prompt })))
            .await?;
        self.governor.log_entry_written();

        let engine = self.clone();
        tokio::spawn(async move {
            engine.run_and_finish(&projects, &project, prompt, options, session_id, cancel, permit).await;
        });
        Ok(())
    }

    /// The long-running half of [`Self::execute`]: stream the child, land on
    /// a terminal state, and persist/broadcast it. Runs on its own task so it
    /// never holds up the connection that requested it.
    async fn run_and_finish(
        &self,
        projects: &ProjectManager,
        project: &Arc<Project>,
        prompt: String,
        options: serde_json::Map<String, Value>,
        session_id: Option<String>,
        cancel: CancellationToken,
        permit: tokio::sync::OwnedSemaphorePermit,
    ) {
        let outcome = self.run_child(project, &prompt, &options, session_id.as_deref(), cancel).await;
        drop(permit);

        let (failed, timed_out) = match &outcome {
            Ok(RunOutcome::Success { .. }) => (false, false),
            Ok(RunOutcome::Failed { .. }) => (true, false),
            Ok(RunOutcome::TimedOut) | Ok(RunOutcome::Killed) => (true, true),
            Err(_) => (true, false),
        };
        self.governor.execution_finished(failed, timed_out);

        match outcome {
            Ok(RunOutcome::Success { session_id }) => {
                project.transition(ExecutionState::Idle, None, session_id).await;
            }
            Ok(RunOutcome::Failed { message }) => {
                self.append_error(project, &message, None).await;
                project.transition(ExecutionState::Error, Some(message), None).await;
                self.broadcast_state(project).await;
                project.transition(ExecutionState::Idle, None, None).await;
            }
            Ok(RunOutcome::TimedOut) => {
                let message = format!("execution exceeded deadline of {}s", self.config.deadline_secs);
                self.append_error(project, &message, Some(ErrorCode::ExecutionTimeout)).await;
                project.transition(ExecutionState::Error, Some(message), None).await;
                self.broadcast_state(project).await;
                project.transition(ExecutionState::Idle, None, None).await;
            }
            Ok(RunOutcome::Killed) => {
                let message = "execution killed by request".to_string();
                self.append_error(project, &message, None).await;
                project.transition(ExecutionState::Error, Some(message), None).await;
                self.broadcast_state(project).await;
                project.transition(ExecutionState::Idle, None, None).await;
            }
            Err(err) => {
                let message = err.to_string();
                self.append_error(project, &message, None).await;
                project.transition(ExecutionState::Error, Some(message), None).await;
                self.broadcast_state(project).await;
                project.transition(ExecutionState::Idle, None, None).await;
            }
        }
        if let Err(err) = projects.persist(project).await {
            tracing::error!(project_id = %project.id, error = %err, "failed to persist project after execution");
        }
        self.broadcast_state(project).await;
    }

    /// Trips the cancellation token of the project's current execution, if
    /// any. The running `execute` call observes it and performs the same
    /// grace-then-force kill sequence as a deadline expiry. A project that
    /// is not executing is a no-op success, per spec: killing an idle
    /// project is not an error.
    pub async fn kill(&self, project: &Project) -> Result<()> {
        let state = project.state.lock().await;
        if let Some(record) = &state.current_execution {
            record.cancel.cancel();
        }
        Ok(())
    }

    async fn append_error(&self, project: &Project, message: &str, code: Option<ErrorCode>) {
        let payload = match code {
            Some(code) => serde_json::json!({ "error": message, "code": code.as_str() }),
            None => serde_json::json!({ "error": message }),
        };
        let entry = LogEntry::new(now_nanos(), Direction::Agent, payload);
        if project.log.append(entry).await.is_ok() {
            self.governor.log_entry_written();
        }
    }

    async fn broadcast_state(&self, project: &Project) {
        let snapshot = project.snapshot().await;
        self.subscriptions
            .broadcast(
                project.id,
                ServerMessage::ProjectState {
                    project_id: project.id.to_string(),
                    data: agentbridge_wire::envelope::ProjectView {
                        id: project.id.to_string(),
                        path: project.path.to_string_lossy().into_owned(),
                        state: snapshot.state.as_str().to_string(),
                        session_id: snapshot.session_id,
                        created_at: snapshot.created_at,
                        last_active: snapshot.last_active,
                    },
                },
            )
            .await;
    }

    async fn run_child(
        &self,
        project: &Project,
        prompt: &str,
        options: &serde_json::Map<String, Value>,
        session_id: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<RunOutcome> {
        let mut cmd = Command::new(&self.config.cli_path);
        cmd.current_dir(&project.path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for arg in &self.config.extra_args {
            cmd.arg(arg);
        }
        for (key, value) in options {
            cmd.arg(format!("--{key}")).arg(value_to_cli_arg(value));
        }
        if let Some(session_id) = session_id {
            cmd.arg("--resume").arg(session_id);
        }
        cmd.arg(prompt);

        let mut child = cmd.spawn().map_err(|err| EngineError::Internal(format!("spawn failed: {err}")))?;
        let stdout = child.stdout.take().expect("stdout piped");
        let mut lines = BufReader::new(stdout).lines();

        let deadline_sleep = tokio::time::sleep(Duration::from_secs(self.config.deadline_secs));
        tokio::pin!(deadline_sleep);

        let mut last_event: Option<Value> = None;
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) if !line.trim().is_empty() => {
                            let payload = match serde_json::from_str::<Value>(&line) {
                                Ok(value) => value,
                                Err(err) => {
                                    tracing::warn!(error = %err, line = %line, "agent stdout line was not valid JSON");
                                    Value::String(line)
                                }
                            };
                            self.governor.log_entry_written();
                            project.log.append(LogEntry::new(now_nanos(), Direction::Agent, payload.clone())).await?;
                            self.subscriptions
                                .broadcast(
                                    project.id,
                                    ServerMessage::AgentMessage { project_id: project.id.to_string(), data: payload.clone() },
                                )
                                .await;
                            last_event = Some(payload);
                        }
                        Ok(Some(_)) => {}
                        Ok(None) => {
                            let status = child.wait().await.map_err(|err| EngineError::Internal(err.to_string()))?;
                            if status.success() {
                                let session_id = last_event.as_ref().and_then(extract_session_id);
                                return Ok(RunOutcome::Success { session_id });
                            }
                            return Ok(RunOutcome::Failed {
                                message: format!("agent process exited with status {status}"),
                            });
                        }
                        Err(err) => return Err(EngineError::Internal(format!("stdout read failed: {err}"))),
                    }
                }
                _ = &mut deadline_sleep => {
                    terminate_with_grace(&mut child, self.config.grace_period_secs).await;
                    return Ok(RunOutcome::TimedOut);
                }
                _ = cancel.cancelled() => {
                    terminate_with_grace(&mut child, self.config.grace_period_secs).await;
                    return Ok(RunOutcome::Killed);
                }
            }
        }
    }
}

enum RunOutcome {
    Success { session_id: Option<String> },
    Failed { message: String },
    TimedOut,
    Killed,
}

/// Extracts a session identifier from the final streamed event: any
/// top-level object key ending in `session_id` (`session_id`,
/// `claude_session_id`, ...), first match wins.
fn extract_session_id(event: &Value) -> Option<String> {
    let object = event.as_object()?;
    object
        .iter()
        .find(|(key, _)| key.ends_with("session_id"))
        .and_then(|(_, value)| value.as_str())
        .map(str::to_string)
}

/// Soft-then-hard termination: `SIGTERM`, wait up to `grace_period_secs` for
/// reap, then `SIGKILL`. Used for both deadline expiry and an explicit kill.
async fn terminate_with_grace(child: &mut tokio::process::Child, grace_period_secs: u64) {
    send_signal(child, nix::sys::signal::Signal::SIGTERM);
    let grace = Duration::from_secs(grace_period_secs);
    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        send_signal(child, nix::sys::signal::Signal::SIGKILL);
        let _ = child.wait().await;
    }
}

fn send_signal(child: &tokio::process::Child, signal: nix::sys::signal::Signal) {
    let Some(pid) = child.id() else { return };
    let pid = nix::unistd::Pid::from_raw(pid as i32);
    if let Err(err) = nix::sys::signal::kill(pid, signal) {
        tracing::warn!(pid = pid.as_raw(), ?signal, error = %err, "failed to signal agent child process");
    }
}

fn value_to_cli_arg(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

/// Checks whether `name` resolves to an executable, either as an absolute
/// path or via `PATH`, without actually spawning it.
fn which(name: &str) -> Option<std::path::PathBuf> {
    let path = std::path::Path::new(name);
    if path.is_absolute() {
        return path.is_file().then(|| path.to_path_buf());
    }
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var).map(|dir| dir.join(name)).find(|candidate| candidate.is_file())
}
