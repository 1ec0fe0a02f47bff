//! Supervisor trait and the types it exchanges

use crate::{Result, ShutdownSignal, StartReport};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::time::Duration;

/// Supervisor for a fixed set of worker processes
#[async_trait]
pub trait WorkerSupervisor: Send {
    /// Worker identifiers in registration order
    fn worker_ids(&self) -> Vec<String>;

    /// Current lifecycle state of a worker
    fn state(&self, worker_id: &str) -> Option<WorkerState>;

    /// Launch a worker. No-op returning the existing handle if it is already running.
    async fn start(&mut self, worker_id: &str) -> Result<WorkerHandle>;

    /// Non-blocking liveness probe. Never changes the lifecycle state.
    fn health_check(&mut self, worker_id: &str) -> Result<HealthStatus>;

    /// Record that a running worker was found dead
    fn mark_crashed(&mut self, worker_id: &str) -> Result<()>;

    /// Stop a worker gracefully, escalating to a kill after `timeout`
    async fn stop(&mut self, worker_id: &str, timeout: Duration) -> Result<StopOutcome>;

    /// Relaunch a crashed worker after its backoff delay.
    ///
    /// Returns [`RestartOutcome::Abandoned`] if `shutdown` fires during the delay.
    async fn restart(
        &mut self,
        worker_id: &str,
        shutdown: &ShutdownSignal,
    ) -> Result<RestartOutcome>;

    /// Stop every worker with a single shared deadline
    async fn stop_all(&mut self, timeout: Duration) -> Vec<(String, StopOutcome)>;

    /// Point-in-time view of every worker, in registration order
    fn worker_statuses(&self) -> Vec<WorkerStatus>;

    /// Launch every worker once, pausing `stagger` between launches.
    ///
    /// Launch failures are collected, not propagated. Stops early on shutdown.
    async fn start_all(&mut self, stagger: Duration, shutdown: &ShutdownSignal) -> StartReport {
        let mut report = StartReport::default();
        let ids = self.worker_ids();

        for (position, worker_id) in ids.iter().enumerate() {
            if shutdown.is_triggered() {
                break;
            }

            match self.start(worker_id).await {
                Ok(handle) => report.started.push(handle),
                Err(e) => report.failed.push((worker_id.clone(), e.to_string())),
            }

            if position + 1 < ids.len() && !stagger.is_zero() {
                tokio::select! {
                    biased;
                    _ = shutdown.triggered() => break,
                    _ = tokio::time::sleep(stagger) => {}
                }
            }
        }

        report
    }
}

/// Handle to a running worker process
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerHandle {
    /// Worker ID
    pub worker_id: String,
    /// Process ID
    pub pid: u32,
}

/// Lifecycle state of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Never launched
    Unstarted,
    /// Process launched and believed alive
    Running,
    /// Graceful stop in progress
    Stopping,
    /// Deliberately stopped, or the last launch failed
    Stopped,
    /// Exited while running; eligible for restart
    Crashed,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerState::Unstarted => write!(f, "UNSTARTED"),
            WorkerState::Running => write!(f, "RUNNING"),
            WorkerState::Stopping => write!(f, "STOPPING"),
            WorkerState::Stopped => write!(f, "STOPPED"),
            WorkerState::Crashed => write!(f, "CRASHED"),
        }
    }
}

/// Result of a liveness probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Process is still running
    Alive,
    /// Process has exited; `code` is `None` when killed by a signal
    Exited { code: Option<i32> },
    /// No process handle is held for this worker
    NotRunning,
}

impl HealthStatus {
    pub fn is_alive(&self) -> bool {
        matches!(self, HealthStatus::Alive)
    }
}

/// How a stop request concluded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was running
    NotRunning,
    /// Process exited within the grace period
    Graceful,
    /// Grace period elapsed and the process was killed
    ForceKilled,
}

/// How a restart request concluded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartOutcome {
    /// Worker relaunched
    Restarted(WorkerHandle),
    /// Shutdown was requested during the backoff delay; nothing was launched
    Abandoned,
}

/// Snapshot row for a single worker
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub worker_id: String,
    pub description: String,
    pub state: WorkerState,
    pub pid: Option<u32>,
    /// Launch attempts so far, including the initial one
    pub restart_count: u32,
    pub last_started: Option<DateTime<Local>>,
    pub last_exit_code: Option<i32>,
}

impl WorkerStatus {
    pub fn is_running(&self) -> bool {
        self.state == WorkerState::Running
    }

    /// Launches after the initial one
    pub fn restarts(&self) -> u32 {
        self.restart_count.saturating_sub(1)
    }
}
