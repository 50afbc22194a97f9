//! End-to-end Execution Engine scenarios against a real child process (a
//! short shell script standing in for the agent CLI), exercising the
//! IDLE -> EXECUTING -> {IDLE | ERROR} -> IDLE transition, log durability,
//! and the deadline/kill grace-then-force path. Mirrors the redis/qdrant
//! integration style in `storage/tests/*_test.rs`: real I/O, no mocks.

use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::time::Duration;

use agentbridge_common::config::ExecutionConfig;
use agentbridge_engine::project::ExecutionState;
use agentbridge_engine::{ExecutionEngine, ProjectManager, ResourceGovernor, SubscriptionFabric};
use agentbridge_wire::envelope::ServerMessage;

fn write_script(dir: &std::path::Path, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

async fn wait_for_idle(projects: &ProjectManager, id: agentbridge_common::ids::ProjectId) -> ExecutionState {
    for _ in 0..100 {
        let project = projects.get(id).await.unwrap();
        let snap = project.snapshot().await;
        if snap.state != ExecutionState::Executing {
            return snap.state;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("project never left EXECUTING");
}

#[tokio::test]
async fn successful_execution_streams_messages_and_returns_to_idle_with_session() {
    let tmp = tempfile::tempdir().unwrap();
    let scripts_dir = tmp.path().join("bin");
    std::fs::create_dir_all(&scripts_dir).unwrap();
    let cli = write_script(
        &scripts_dir,
        "claude",
        r#"echo '{"event":"assistant","text":"hi"}'
echo '{"event":"result","claude_session_id":"sess-123"}'
exit 0"#,
    );

    let project_root = tmp.path().join("proj");
    std::fs::create_dir_all(&project_root).unwrap();
    let projects = Arc::new(ProjectManager::load(tmp.path().join("data"), 10, Default::default()).await.unwrap());
    let project = projects.create(project_root.to_str().unwrap(), &[]).await.unwrap();

    let subscriptions = Arc::new(SubscriptionFabric::new());
    let (tx, mut rx) = tokio::sync::mpsc::channel(32);
    subscriptions
        .join(project.id, agentbridge_common::ids::ConnectionId::new(), tx)
        .await;

    let governor = Arc::new(ResourceGovernor::new(u64::MAX));
    let mut config = ExecutionConfig::default();
    config.cli_path = cli.to_str().unwrap().to_string();
    config.extra_args = Vec::new();
    config.deadline_secs = 30;
    let shutdown = tokio_util::sync::CancellationToken::new();
    let engine = Arc::new(ExecutionEngine::new(config, subscriptions, governor, shutdown));

    engine
        .execute(projects.clone(), project.clone(), "hello".to_string(), Default::default())
        .await
        .unwrap();

    // first broadcast: EXECUTING
    let first = rx.recv().await.unwrap();
    match first {
        ServerMessage::ProjectState { data, .. } => assert_eq!(data.state, "EXECUTING"),
        other => panic!("expected project_state, got {other:?}"),
    }

    let mut saw_agent_message = false;
    let mut saw_idle_with_session = false;
    while let Some(msg) = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap() {
        match msg {
            ServerMessage::AgentMessage { .. } => saw_agent_message = true,
            ServerMessage::ProjectState { data, .. } if data.state == "IDLE" => {
                saw_idle_with_session = data.session_id.as_deref() == Some("sess-123");
                break;
            }
            _ => {}
        }
    }
    assert!(saw_agent_message, "expected at least one agent_message frame");
    assert!(saw_idle_with_session, "expected final IDLE state to carry the session id");

    let final_state = wait_for_idle(&projects, project.id).await;
    assert_eq!(final_state, ExecutionState::Idle);
}

#[tokio::test]
async fn deadline_exceeded_kills_child_and_lands_in_idle_via_error() {
    let tmp = tempfile::tempdir().unwrap();
    let scripts_dir = tmp.path().join("bin");
    std::fs::create_dir_all(&scripts_dir).unwrap();
    let cli = write_script(&scripts_dir, "claude", "sleep 30");

    let project_root = tmp.path().join("proj");
    std::fs::create_dir_all(&project_root).unwrap();
    let projects = Arc::new(ProjectManager::load(tmp.path().join("data"), 10, Default::default()).await.unwrap());
    let project = projects.create(project_root.to_str().unwrap(), &[]).await.unwrap();

    let subscriptions = Arc::new(SubscriptionFabric::new());
    let governor = Arc::new(ResourceGovernor::new(u64::MAX));
    let mut config = ExecutionConfig::default();
    config.cli_path = cli.to_str().unwrap().to_string();
    config.extra_args = Vec::new();
    config.deadline_secs = 1;
    config.grace_period_secs = 1;
    let shutdown = tokio_util::sync::CancellationToken::new();
    let engine = Arc::new(ExecutionEngine::new(config, subscriptions, governor, shutdown));

    engine
        .execute(projects.clone(), project.clone(), "hello".to_string(), Default::default())
        .await
        .unwrap();

    let final_state = wait_for_idle(&projects, project.id).await;
    assert_eq!(final_state, ExecutionState::Idle);

    let messages = agentbridge_log::reader::get_messages(
        &agentbridge_engine::Project::log_dir(projects.data_dir(), project.id),
        0,
        1000,
    )
    .unwrap();
    let saw_timeout_error = messages.iter().any(|entry| {
        entry.m.get("error").and_then(|v| v.as_str()).map(|s| s.contains("deadline")).unwrap_or(false)
    });
    assert!(saw_timeout_error, "expected a deadline error entry in the log");
}

#[tokio::test]
async fn explicit_kill_while_executing_terminates_and_returns_to_idle() {
    let tmp = tempfile::tempdir().unwrap();
    let scripts_dir = tmp.path().join("bin");
    std::fs::create_dir_all(&scripts_dir).unwrap();
    let cli = write_script(&scripts_dir, "claude", "sleep 30");

    let project_root = tmp.path().join("proj");
    std::fs::create_dir_all(&project_root).unwrap();
    let projects = Arc::new(ProjectManager::load(tmp.path().join("data"), 10, Default::default()).await.unwrap());
    let project = projects.create(project_root.to_str().unwrap(), &[]).await.unwrap();

    let subscriptions = Arc::new(SubscriptionFabric::new());
    let governor = Arc::new(ResourceGovernor::new(u64::MAX));
    let mut config = ExecutionConfig::default();
    config.cli_path = cli.to_str().unwrap().to_string();
    config.extra_args = Vec::new();
    config.deadline_secs = 30;
    config.grace_period_secs = 1;
    let shutdown = tokio_util::sync::CancellationToken::new();
    let engine = Arc::new(ExecutionEngine::new(config, subscriptions, governor, shutdown));

    engine
        .execute(projects.clone(), project.clone(), "hello".to_string(), Default::default())
        .await
        .unwrap();

    // give the child a moment to actually spawn before killing it
    tokio::time::sleep(Duration::from_millis(200)).await;
    engine.kill(&project).await.unwrap();

    let final_state = wait_for_idle(&projects, project.id).await;
    assert_eq!(final_state, ExecutionState::Idle);
}

#[tokio::test]
async fn tripping_shutdown_terminates_an_in_flight_execution() {
    let tmp = tempfile::tempdir().unwrap();
    let scripts_dir = tmp.path().join("bin");
    std::fs::create_dir_all(&scripts_dir).unwrap();
    let cli = write_script(&scripts_dir, "claude", "sleep 30");

    let project_root = tmp.path().join("proj");
    std::fs::create_dir_all(&project_root).unwrap();
    let projects = Arc::new(ProjectManager::load(tmp.path().join("data"), 10, Default::default()).await.unwrap());
    let project = projects.create(project_root.to_str().unwrap(), &[]).await.unwrap();

    let subscriptions = Arc::new(SubscriptionFabric::new());
    let governor = Arc::new(ResourceGovernor::new(u64::MAX));
    let mut config = ExecutionConfig::default();
    config.cli_path = cli.to_str().unwrap().to_string();
    config.extra_args = Vec::new();
    config.deadline_secs = 30;
    config.grace_period_secs = 1;
    let shutdown = tokio_util::sync::CancellationToken::new();
    let engine = Arc::new(ExecutionEngine::new(config, subscriptions, governor, shutdown.clone()));

    engine
        .execute(projects.clone(), project.clone(), "hello".to_string(), Default::default())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    // server shutdown, not an explicit per-project kill, must still reach the
    // running child: it should be a child of the shutdown token, not an
    // independent one.
    shutdown.cancel();

    let final_state = wait_for_idle(&projects, project.id).await;
    assert_eq!(final_state, ExecutionState::Idle);
}

#[tokio::test]
async fn kill_while_idle_is_a_noop_success() {
    let tmp = tempfile::tempdir().unwrap();
    let project_root = tmp.path().join("proj");
    std::fs::create_dir_all(&project_root).unwrap();
    let projects = Arc::new(ProjectManager::load(tmp.path().join("data"), 10, Default::default()).await.unwrap());
    let project = projects.create(project_root.to_str().unwrap(), &[]).await.unwrap();

    let subscriptions = Arc::new(SubscriptionFabric::new());
    let governor = Arc::new(ResourceGovernor::new(u64::MAX));
    let engine = ExecutionEngine::new(
        ExecutionConfig::default(),
        subscriptions,
        governor,
        tokio_util::sync::CancellationToken::new(),
    );

    assert!(engine.kill(&project).await.is_ok());
    assert_eq!(projects.get(project.id).await.unwrap().snapshot().await.state, ExecutionState::Idle);
}

#[tokio::test]
async fn concurrent_execute_on_same_project_rejects_second_with_process_active() {
    let tmp = tempfile::tempdir().unwrap();
    let scripts_dir = tmp.path().join("bin");
    std::fs::create_dir_all(&scripts_dir).unwrap();
    let cli = write_script(&scripts_dir, "claude", "sleep 2");

    let project_root = tmp.path().join("proj");
    std::fs::create_dir_all(&project_root).unwrap();
    let projects = Arc::new(ProjectManager::load(tmp.path().join("data"), 10, Default::default()).await.unwrap());
    let project = projects.create(project_root.to_str().unwrap(), &[]).await.unwrap();

    let subscriptions = Arc::new(SubscriptionFabric::new());
    let governor = Arc::new(ResourceGovernor::new(u64::MAX));
    let mut config = ExecutionConfig::default();
    config.cli_path = cli.to_str().unwrap().to_string();
    config.extra_args = Vec::new();
    let shutdown = tokio_util::sync::CancellationToken::new();
    let engine = Arc::new(ExecutionEngine::new(config, subscriptions, governor, shutdown));

    engine
        .execute(projects.clone(), project.clone(), "hello".to_string(), Default::default())
        .await
        .unwrap();
    let err = engine
        .execute(projects.clone(), project.clone(), "hello again".to_string(), Default::default())
        .await
        .unwrap_err();
    assert!(matches!(err, agentbridge_engine::EngineError::ProcessActive));

    engine.kill(&project).await.unwrap();
}

#[tokio::test]
async fn missing_cli_binary_is_rejected_without_changing_state() {
    let tmp = tempfile::tempdir().unwrap();
    let project_root = tmp.path().join("proj");
    std::fs::create_dir_all(&project_root).unwrap();
    let projects = Arc::new(ProjectManager::load(tmp.path().join("data"), 10, Default::default()).await.unwrap());
    let project = projects.create(project_root.to_str().unwrap(), &[]).await.unwrap();

    let subscriptions = Arc::new(SubscriptionFabric::new());
    let governor = Arc::new(ResourceGovernor::new(u64::MAX));
    let mut config = ExecutionConfig::default();
    config.cli_path = "definitely-not-a-real-agent-binary-xyz".to_string();
    let shutdown = tokio_util::sync::CancellationToken::new();
    let engine = Arc::new(ExecutionEngine::new(config, subscriptions, governor, shutdown));

    let err = engine
        .execute(projects.clone(), project.clone(), "hello".to_string(), Default::default())
        .await
        .unwrap_err();
    assert!(matches!(err, agentbridge_engine::EngineError::ClaudeNotFound(_)));
    assert_eq!(projects.get(project.id).await.unwrap().snapshot().await.state, ExecutionState::Idle);
}
