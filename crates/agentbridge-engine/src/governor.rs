//! Resource Governor: periodic sampling, gauges/counters, and coarse
//! backpressure.
//!
//! The periodic-sampling shape (tick, act, re-sample) follows the
//! periodic-task idiom in `execution_manager.rs::cleanup_expired_subscriptions`.
//! Rust has no runtime garbage collector, so a generation-of-GC step some
//! systems run under soft memory pressure is a no-op here — we only
//! re-sample once after the soft-limit check before latching the reject
//! flag.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sysinfo::{Pid, ProcessRefreshKind, RefreshKind, System};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy)]
pub struct ResourceSnapshot {
    pub memory_bytes: u64,
    pub active_executions: usize,
    pub active_connections: usize,
    pub active_projects: usize,
    pub over_soft_limit: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ServerCounters {
    pub connections_total: u64,
    pub connections_current: usize,
    pub projects_total: u64,
    pub executions_total: u64,
    pub executions_failed: u64,
    pub executions_timed_out: u64,
    pub log_entries_written: u64,
    pub internal_errors: u64,
}

pub struct ResourceGovernor {
    soft_memory_bytes: AtomicU64,
    pid: Pid,
    system: Mutex<System>,

    active_connections: AtomicUsize,
    active_executions: AtomicUsize,
    active_projects: AtomicUsize,
    over_soft_limit: AtomicBool,
    last_memory_bytes: AtomicU64,

    connections_total: AtomicU64,
    projects_total: AtomicU64,
    executions_total: AtomicU64,
    executions_failed: AtomicU64,
    executions_timed_out: AtomicU64,
    log_entries_written: AtomicU64,
    internal_errors: AtomicU64,
}

impl ResourceGovernor {
    pub fn new(soft_memory_bytes: u64) -> Self {
        let pid = Pid::from_u32(std::process::id());
        let system = System::new_with_specifics(
            RefreshKind::nothing().with_processes(ProcessRefreshKind::nothing().with_memory()),
        );
        Self {
            soft_memory_bytes: AtomicU64::new(soft_memory_bytes),
            pid,
            system: Mutex::new(system),
            active_connections: AtomicUsize::new(0),
            active_executions: AtomicUsize::new(0),
            active_projects: AtomicUsize::new(0),
            over_soft_limit: AtomicBool::new(false),
            last_memory_bytes: AtomicU64::new(0),
            connections_total: AtomicU64::new(0),
            projects_total: AtomicU64::new(0),
            executions_total: AtomicU64::new(0),
            executions_failed: AtomicU64::new(0),
            executions_timed_out: AtomicU64::new(0),
            log_entries_written: AtomicU64::new(0),
            internal_errors: AtomicU64::new(0),
        }
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn project_created(&self) {
        self.active_projects.fetch_add(1, Ordering::Relaxed);
        self.projects_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn project_deleted(&self) {
        self.active_projects.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn set_active_projects(&self, count: usize) {
        self.active_projects.store(count, Ordering::Relaxed);
    }

    pub fn execution_started(&self) {
        self.active_executions.fetch_add(1, Ordering::Relaxed);
        self.executions_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn execution_finished(&self, failed: bool, timed_out: bool) {
        self.active_executions.fetch_sub(1, Ordering::Relaxed);
        if failed {
            self.executions_failed.fetch_add(1, Ordering::Relaxed);
        }
        if timed_out {
            self.executions_timed_out.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn log_entry_written(&self) {
        self.log_entries_written.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one recovery-wrapper catch: a handler fault that was turned
    /// into an `INTERNAL_ERROR` frame instead of propagating.
    pub fn internal_error(&self) {
        self.internal_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// `true` once the last sample was clean; connections and executions
    /// should be rejected with `RESOURCE_LIMIT` while this is `false`.
    pub fn accepts_new_work(&self) -> bool {
        !self.over_soft_limit.load(Ordering::Relaxed)
    }

    /// Applies a reloaded `soft_memory_bytes` value (SIGHUP config reload).
    /// Takes effect on the next sampling tick.
    pub fn set_soft_memory_bytes(&self, soft_memory_bytes: u64) {
        self.soft_memory_bytes.store(soft_memory_bytes, Ordering::Relaxed);
    }

    /// Refreshes memory usage and re-evaluates the soft limit. Rejects new
    /// work only if two consecutive samples both exceed the limit.
    pub async fn sample(&self) -> ResourceSnapshot {
        let memory_bytes = self.read_memory().await;
        self.last_memory_bytes.store(memory_bytes, Ordering::Relaxed);

        let soft_limit = self.soft_memory_bytes.load(Ordering::Relaxed);
        let over = memory_bytes > soft_limit;
        let resample_over = if over {
            // "a generation of garbage collection (where applicable)" — a
            // no-op in Rust; we just re-sample once before latching the
            // reject flag.
            self.read_memory().await > soft_limit
        } else {
            false
        };
        self.over_soft_limit.store(resample_over, Ordering::Relaxed);

        ResourceSnapshot {
            memory_bytes,
            active_executions: self.active_executions.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            active_projects: self.active_projects.load(Ordering::Relaxed),
            over_soft_limit: resample_over,
        }
    }

    /// Builds a snapshot from the last sample without re-reading memory;
    /// used for on-demand `health_status`/`get_stats` responses between
    /// ticks.
    pub fn current_snapshot(&self) -> ResourceSnapshot {
        ResourceSnapshot {
            memory_bytes: self.last_memory_bytes.load(Ordering::Relaxed),
            active_executions: self.active_executions.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            active_projects: self.active_projects.load(Ordering::Relaxed),
            over_soft_limit: self.over_soft_limit.load(Ordering::Relaxed),
        }
    }

    pub fn counters(&self) -> ServerCounters {
        ServerCounters {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_current: self.active_connections.load(Ordering::Relaxed),
            projects_total: self.projects_total.load(Ordering::Relaxed),
            executions_total: self.executions_total.load(Ordering::Relaxed),
            executions_failed: self.executions_failed.load(Ordering::Relaxed),
            executions_timed_out: self.executions_timed_out.load(Ordering::Relaxed),
            log_entries_written: self.log_entries_written.load(Ordering::Relaxed),
            internal_errors: self.internal_errors.load(Ordering::Relaxed),
        }
    }

    async fn read_memory(&self) -> u64 {
        let mut system = self.system.lock().await;
        system.refresh_processes_specifics(
            sysinfo::ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        system.process(self.pid).map_or(0, |p| p.memory())
    }
}

pub type SharedGovernor = Arc<ResourceGovernor>;

/// Spawns the periodic sampling task, logging a structured metrics line on
/// every tick.
pub fn spawn_sampling_task(governor: SharedGovernor, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let snapshot = governor.sample().await;
            tracing::info!(
                memory_bytes = snapshot.memory_bytes,
                active_executions = snapshot.active_executions,
                active_connections = snapshot.active_connections,
                active_projects = snapshot.active_projects,
                over_soft_limit = snapshot.over_soft_limit,
                "resource governor sample"
            );
        }
    })
}
