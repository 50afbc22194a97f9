//! Project Manager: in-memory project index, path/nesting validation, and
//! atomic metadata persistence.
//!
//! Corrupt-metadata isolation at startup mirrors the "skip and log, keep
//! going" resilience applied to per-agent state elsewhere
//! (`execution_manager.rs::cleanup_expired_subscriptions` never lets one bad
//! entry abort the whole sweep).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use agentbridge_common::config::LogConfig;
use agentbridge_common::ids::ProjectId;
use agentbridge_log::{metadata, LogWriterHandle};
use agentbridge_wire::validation::{self, ValidationError};

use crate::error::{EngineError, Result};
use crate::project::{ExecutionState, Project, ProjectMetadata};

#[derive(Default)]
struct ProjectIndex {
    by_id: HashMap<ProjectId, Arc<Project>>,
    by_path: HashMap<PathBuf, ProjectId>,
}

pub struct ProjectManager {
    data_dir: PathBuf,
    max_projects: usize,
    log_config: LogConfig,
    index: tokio::sync::RwLock<ProjectIndex>,
}

fn map_validation_err(err: ValidationError) -> EngineError {
    match err {
        ValidationError::NotAbsolute(p) | ValidationError::NotADirectory(p) | ValidationError::OutsideAllowedRoots(p) => {
            EngineError::InvalidPath(p)
        }
        ValidationError::Nesting => EngineError::ProjectNesting,
        other => EngineError::Internal(other.to_string()),
    }
}

impl ProjectManager {
    /// Scans `data_dir` for existing projects and reconstructs the index.
    /// A project whose `metadata.json` is missing, truncated, or not valid
    /// JSON is skipped and logged; every other project still loads.
    pub async fn load(data_dir: PathBuf, max_projects: usize, log_config: LogConfig) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)?;
        let mut by_id = HashMap::new();
        let mut by_path = HashMap::new();

        let entries = std::fs::read_dir(&data_dir)?;
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let meta_path = entry.path().join("metadata.json");
            match metadata::read::<ProjectMetadata>(&meta_path) {
                Ok(meta) => {
                    let log = spawn_log_writer(&data_dir, meta.id, &log_config);
                    let project = Arc::new(Project::from_metadata(meta, log));
                    by_path.insert(project.path.clone(), project.id);
                    by_id.insert(project.id, project);
                }
                Err(err) => {
                    tracing::error!(
                        dir = %entry.path().display(),
                        error = %err,
                        "skipping project with corrupt metadata"
                    );
                }
            }
        }

        tracing::info!(loaded = by_id.len(), data_dir = %data_dir.display(), "project manager startup scan complete");

        Ok(Self {
            data_dir,
            max_projects,
            log_config,
            index: tokio::sync::RwLock::new(ProjectIndex { by_id, by_path }),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Creates a new project for `raw_path`, or returns the existing one if
    /// the canonical path is already registered.
    pub async fn create(&self, raw_path: &str, allowed_roots: &[PathBuf]) -> Result<Arc<Project>> {
        let canonical = validation::validate_path(raw_path, allowed_roots).map_err(map_validation_err)?;

        let mut index = self.index.write().await;
        if let Some(existing_id) = index.by_path.get(&canonical) {
            return Ok(index.by_id[existing_id].clone());
        }
        if index.by_id.len() >= self.max_projects {
            return Err(EngineError::ProjectLimit(self.max_projects));
        }

        let existing_paths: Vec<PathBuf> = index.by_path.keys().cloned().collect();
        validation::validate_nesting(&canonical, &existing_paths).map_err(map_validation_err)?;

        let id = ProjectId::new();
        std::fs::create_dir_all(Project::dir(&self.data_dir, id))?;
        std::fs::create_dir_all(Project::log_dir(&self.data_dir, id))?;
        let log = spawn_log_writer(&self.data_dir, id, &self.log_config);
        let project = Arc::new(Project::with_id(id, canonical.clone(), log));
        metadata::write_atomic(&Project::metadata_path(&self.data_dir, project.id), &project.snapshot().await)?;

        index.by_path.insert(canonical, project.id);
        index.by_id.insert(project.id, project.clone());
        Ok(project)
    }

    pub async fn get(&self, id: ProjectId) -> Result<Arc<Project>> {
        self.index
            .read()
            .await
            .by_id
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::ProjectNotFound(id.to_string()))
    }

    pub async fn list(&self) -> Vec<Arc<Project>> {
        self.index.read().await.by_id.values().cloned().collect()
    }

    pub async fn project_paths(&self) -> Vec<PathBuf> {
        self.index.read().await.by_path.keys().cloned().collect()
    }

    /// Deletes a project and its on-disk directory (metadata + log).
    /// Refuses while `EXECUTING`.
    pub async fn delete(&self, id: ProjectId) -> Result<()> {
        let mut index = self.index.write().await;
        let project = index
            .by_id
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::ProjectNotFound(id.to_string()))?;

        {
            let state = project.state.lock().await;
            if state.execution == ExecutionState::Executing {
                return Err(EngineError::ProcessActive);
            }
        }

        index.by_id.remove(&id);
        index.by_path.remove(&project.path);
        drop(index);

        let dir = Project::dir(&self.data_dir, id);
        if dir.exists() {
            std::fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    /// Persists the project's current snapshot to disk. Callers (the
    /// execution engine's state transition, `project_join`'s touch) call
    /// this after mutating the project's own mutex-protected state.
    pub async fn persist(&self, project: &Project) -> Result<()> {
        let snapshot = project.snapshot().await;
        metadata::write_atomic(&Project::metadata_path(&self.data_dir, project.id), &snapshot)?;
        Ok(())
    }
}

fn spawn_log_writer(data_dir: &Path, id: ProjectId, log_config: &LogConfig) -> LogWriterHandle {
    LogWriterHandle::spawn(
        Project::log_dir(data_dir, id),
        log_config.segment_cap_bytes,
        log_config.segment_cap_entries,
        Duration::from_millis(log_config.flush_interval_ms),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_list_returns_created_project() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let project_root = dir.path().join("proj");
        std::fs::create_dir_all(&project_root).unwrap();

        let manager = ProjectManager::load(data_dir, 10, LogConfig::default()).await.unwrap();
        let created = manager.create(project_root.to_str().unwrap(), &[]).await.unwrap();

        let listed = manager.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, created.id);
        assert_eq!(listed[0].path, created.path);
    }

    #[tokio::test]
    async fn create_is_idempotent_for_same_canonical_path() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let project_root = dir.path().join("proj");
        std::fs::create_dir_all(&project_root).unwrap();

        let manager = ProjectManager::load(data_dir, 10, LogConfig::default()).await.unwrap();
        let first = manager.create(project_root.to_str().unwrap(), &[]).await.unwrap();
        let second = manager.create(project_root.to_str().unwrap(), &[]).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(manager.list().await.len(), 1);
    }

    #[tokio::test]
    async fn nested_path_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let parent = dir.path().join("parent");
        let child = parent.join("child");
        std::fs::create_dir_all(&child).unwrap();

        let manager = ProjectManager::load(data_dir, 10, LogConfig::default()).await.unwrap();
        manager.create(parent.to_str().unwrap(), &[]).await.unwrap();
        let err = manager.create(child.to_str().unwrap(), &[]).await.unwrap_err();
        assert!(matches!(err, EngineError::ProjectNesting));
    }

    #[tokio::test]
    async fn delete_refuses_while_executing() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let project_root = dir.path().join("proj");
        std::fs::create_dir_all(&project_root).unwrap();

        let manager = ProjectManager::load(data_dir, 10, LogConfig::default()).await.unwrap();
        let project = manager.create(project_root.to_str().unwrap(), &[]).await.unwrap();
        project.state.lock().await.execution = ExecutionState::Executing;

        let err = manager.delete(project.id).await.unwrap_err();
        assert!(matches!(err, EngineError::ProcessActive));
        assert_eq!(manager.list().await.len(), 1);
    }

    #[tokio::test]
    async fn project_limit_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let manager = ProjectManager::load(data_dir, 1, LogConfig::default()).await.unwrap();

        let p1 = dir.path().join("p1");
        std::fs::create_dir_all(&p1).unwrap();
        manager.create(p1.to_str().unwrap(), &[]).await.unwrap();

        let p2 = dir.path().join("p2");
        std::fs::create_dir_all(&p2).unwrap();
        let err = manager.create(p2.to_str().unwrap(), &[]).await.unwrap_err();
        assert!(matches!(err, EngineError::ProjectLimit(1)));
    }

    #[tokio::test]
    async fn startup_scan_skips_corrupt_metadata_but_loads_others() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let good_root = dir.path().join("good");
        std::fs::create_dir_all(&good_root).unwrap();

        {
            let manager = ProjectManager::load(data_dir.clone(), 10, LogConfig::default()).await.unwrap();
            manager.create(good_root.to_str().unwrap(), &[]).await.unwrap();
        }

        // plant a corrupt project directory alongside the good one
        let corrupt_dir = data_dir.join("not-a-real-uuid");
        std::fs::create_dir_all(&corrupt_dir).unwrap();
        std::fs::write(corrupt_dir.join("metadata.json"), b"{not json").unwrap();

        let manager = ProjectManager::load(data_dir, 10, LogConfig::default()).await.unwrap();
        let listed = manager.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].path, good_root.canonicalize().unwrap());
    }
}
