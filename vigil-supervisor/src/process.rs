//! Process-based supervisor implementation

use crate::config::VigilConfig;
use crate::{
    HealthStatus, RestartOutcome, Result, ShutdownSignal, StopOutcome, SupervisorError,
    WorkerDefinition, WorkerHandle, WorkerRegistry, WorkerState, WorkerStatus, WorkerSupervisor,
};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, error, info, warn};

/// Exponential restart delay, capped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay unit; the n-th delay is `base * 2^n`
    pub base: Duration,
    /// Upper bound on any delay
    pub max: Duration,
}

impl BackoffPolicy {
    /// Delay before relaunching a worker that has been launched `restart_count` times
    pub fn delay_for(&self, restart_count: u32) -> Duration {
        2u32.checked_pow(restart_count)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(60),
        }
    }
}

/// Configuration for process supervisor
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Grace period used by `restart` before relaunching
    pub stop_timeout: Duration,

    /// Restart delay policy
    pub backoff: BackoffPolicy,

    /// Directory receiving `<id>.log` with each worker's stdout and stderr
    pub output_dir: Option<PathBuf>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(5),
            backoff: BackoffPolicy::default(),
            output_dir: None,
        }
    }
}

impl SupervisorConfig {
    /// Derive supervisor settings from the loaded configuration
    pub fn from_vigil_config(config: &VigilConfig, root: &Path) -> Self {
        Self {
            stop_timeout: config.lifecycle.stop_timeout,
            backoff: BackoffPolicy {
                base: config.lifecycle.backoff_base,
                max: config.lifecycle.backoff_max,
            },
            output_dir: config.capture_output.then(|| config.logs_path(root)),
        }
    }
}

#[derive(Debug)]
struct WorkerRuntime {
    state: WorkerState,
    child: Option<Child>,
    pid: Option<u32>,
    restart_count: u32,
    last_started: Option<DateTime<Local>>,
    last_exit_code: Option<i32>,
}

impl WorkerRuntime {
    fn new() -> Self {
        Self {
            state: WorkerState::Unstarted,
            child: None,
            pid: None,
            restart_count: 0,
            last_started: None,
            last_exit_code: None,
        }
    }

    /// Settle bookkeeping once a stop has concluded
    fn mark_stopped(&mut self) {
        self.child = None;
        self.pid = None;
        if self.state != WorkerState::Unstarted {
            self.state = WorkerState::Stopped;
        }
    }
}

/// Supervises workers as OS child processes.
///
/// Owns one runtime record per registry entry, index-aligned with the registry.
pub struct ProcessSupervisor {
    registry: WorkerRegistry,
    workers: Vec<WorkerRuntime>,
    config: SupervisorConfig,
}

impl ProcessSupervisor {
    /// Create a supervisor with every worker `Unstarted`
    pub fn new(registry: WorkerRegistry, config: SupervisorConfig) -> Self {
        let workers = registry.iter().map(|_| WorkerRuntime::new()).collect();
        Self {
            registry,
            workers,
            config,
        }
    }

    /// Launch attempts recorded for a worker
    pub fn restart_count(&self, worker_id: &str) -> Option<u32> {
        self.registry
            .index_of(worker_id)
            .map(|index| self.workers[index].restart_count)
    }

    fn index_of(&self, worker_id: &str) -> Result<usize> {
        self.registry
            .index_of(worker_id)
            .ok_or_else(|| SupervisorError::UnknownWorker(worker_id.to_string()))
    }

    fn spawn_worker(&self, definition: &WorkerDefinition) -> Result<Child> {
        let mut cmd = Command::new(&definition.command);

        if let Some(script) = definition.script_path() {
            if !script.exists() {
                return Err(SupervisorError::launch(
                    &definition.id,
                    format!("script not found: {}", script.display()),
                ));
            }
            cmd.arg(script);
        }

        cmd.args(&definition.args)
            .current_dir(&definition.working_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        match &self.config.output_dir {
            Some(dir) => {
                let log_path = dir.join(format!("{}.log", definition.id));
                let stdout = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&log_path)
                    .map_err(|e| {
                        SupervisorError::launch(
                            &definition.id,
                            format!("cannot open worker log {}: {}", log_path.display(), e),
                        )
                    })?;
                let stderr = stdout.try_clone().map_err(|e| {
                    SupervisorError::launch(
                        &definition.id,
                        format!("cannot share worker log handle: {}", e),
                    )
                })?;
                cmd.stdout(stdout).stderr(stderr);
            }
            None => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }

        cmd.spawn()
            .map_err(|e| SupervisorError::launch(&definition.id, e))
    }
}

/// Ask a child to exit: SIGTERM on unix, a kill elsewhere
fn request_termination(child: &mut Child) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        match child.id() {
            Some(pid) => kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(Into::into),
            // Already reaped
            None => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        child.start_kill()
    }
}

async fn force_kill(worker_id: &str, child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!(worker = worker_id, error = %e, "Kill request failed, process likely exited");
    }
    if let Err(e) = child.wait().await {
        warn!(worker = worker_id, error = %e, "Error reaping killed worker");
    }
}

/// Wait for a terminating child until `deadline`, killing it if the deadline passes
async fn await_exit(worker_id: &str, child: &mut Child, deadline: Instant) -> StopOutcome {
    match timeout_at(deadline, child.wait()).await {
        Ok(Ok(status)) => {
            info!(worker = worker_id, status = %status, "Worker stopped");
            StopOutcome::Graceful
        }
        Ok(Err(e)) => {
            warn!(worker = worker_id, error = %e, "Error waiting for worker shutdown, force killing");
            force_kill(worker_id, child).await;
            StopOutcome::ForceKilled
        }
        Err(_) => {
            warn!(worker = worker_id, "Worker did not stop within its grace period, force killing");
            force_kill(worker_id, child).await;
            StopOutcome::ForceKilled
        }
    }
}

#[async_trait]
impl WorkerSupervisor for ProcessSupervisor {
    fn worker_ids(&self) -> Vec<String> {
        self.registry.ids()
    }

    fn state(&self, worker_id: &str) -> Option<WorkerState> {
        self.registry
            .index_of(worker_id)
            .map(|index| self.workers[index].state)
    }

    async fn start(&mut self, worker_id: &str) -> Result<WorkerHandle> {
        let index = self.index_of(worker_id)?;

        {
            let runtime = &self.workers[index];
            if runtime.state == WorkerState::Running {
                if let Some(pid) = runtime.pid {
                    debug!(worker = worker_id, pid, "Worker already running");
                    return Ok(WorkerHandle {
                        worker_id: worker_id.to_string(),
                        pid,
                    });
                }
            }
        }

        let definition = &self.registry[index];
        info!(worker = worker_id, "Starting {}", definition.description);
        let spawned = self.spawn_worker(definition);

        let runtime = &mut self.workers[index];
        runtime.restart_count += 1;
        runtime.last_started = Some(Local::now());

        let child = match spawned {
            Ok(child) => child,
            Err(e) => {
                runtime.state = WorkerState::Stopped;
                runtime.child = None;
                runtime.pid = None;
                error!(worker = worker_id, error = %e, "Launch failure");
                return Err(e);
            }
        };

        // tokio only reports no pid once the child has been reaped
        let pid = child.id().unwrap_or_default();
        runtime.child = Some(child);
        runtime.pid = Some(pid);
        runtime.state = WorkerState::Running;

        info!(
            worker = worker_id,
            pid,
            launches = runtime.restart_count,
            "Started {}",
            self.registry[index].description
        );

        Ok(WorkerHandle {
            worker_id: worker_id.to_string(),
            pid,
        })
    }

    fn health_check(&mut self, worker_id: &str) -> Result<HealthStatus> {
        let index = self.index_of(worker_id)?;
        let runtime = &mut self.workers[index];

        let Some(child) = runtime.child.as_mut() else {
            return Ok(HealthStatus::NotRunning);
        };

        match child.try_wait() {
            Ok(None) => Ok(HealthStatus::Alive),
            Ok(Some(status)) => Ok(HealthStatus::Exited {
                code: status.code(),
            }),
            Err(e) => {
                warn!(worker = worker_id, error = %e, "Unable to query worker process, treating as dead");
                Ok(HealthStatus::Exited { code: None })
            }
        }
    }

    fn mark_crashed(&mut self, worker_id: &str) -> Result<()> {
        let index = self.index_of(worker_id)?;
        let runtime = &mut self.workers[index];

        if runtime.state != WorkerState::Running {
            return Ok(());
        }

        if let Some(mut child) = runtime.child.take() {
            if let Ok(Some(status)) = child.try_wait() {
                runtime.last_exit_code = status.code();
            }
        }
        runtime.pid = None;
        runtime.state = WorkerState::Crashed;
        Ok(())
    }

    async fn stop(&mut self, worker_id: &str, timeout: Duration) -> Result<StopOutcome> {
        let index = self.index_of(worker_id)?;
        let description = self.registry[index].description.clone();
        let runtime = &mut self.workers[index];

        let Some(mut child) = runtime.child.take() else {
            runtime.mark_stopped();
            return Ok(StopOutcome::NotRunning);
        };

        info!(worker = worker_id, "Stopping {}...", description);
        runtime.state = WorkerState::Stopping;

        if let Err(e) = request_termination(&mut child) {
            warn!(worker = worker_id, error = %e, "Failed to send termination request");
        }

        let outcome = await_exit(worker_id, &mut child, Instant::now() + timeout).await;
        runtime.last_exit_code = child.try_wait().ok().flatten().and_then(|s| s.code());
        runtime.mark_stopped();

        Ok(outcome)
    }

    async fn restart(
        &mut self,
        worker_id: &str,
        shutdown: &ShutdownSignal,
    ) -> Result<RestartOutcome> {
        let index = self.index_of(worker_id)?;
        let description = self.registry[index].description.clone();
        let delay = self
            .config
            .backoff
            .delay_for(self.workers[index].restart_count);

        warn!(worker = worker_id, "{} has died, restarting...", description);
        info!(worker = worker_id, delay_secs = delay.as_secs_f64(), "Waiting before restart");

        tokio::select! {
            biased;
            _ = shutdown.triggered() => {
                info!(worker = worker_id, "Shutdown requested during backoff, abandoning restart");
                return Ok(RestartOutcome::Abandoned);
            }
            _ = tokio::time::sleep(delay) => {}
        }

        // Reap anything left over, e.g. a zombie
        self.stop(worker_id, self.config.stop_timeout).await?;

        match self.start(worker_id).await {
            Ok(handle) => {
                info!(
                    worker = worker_id,
                    pid = handle.pid,
                    "{} restarted successfully (restart #{})",
                    description,
                    self.workers[index].restart_count.saturating_sub(1)
                );
                Ok(RestartOutcome::Restarted(handle))
            }
            Err(e) => {
                self.workers[index].state = WorkerState::Crashed;
                error!(worker = worker_id, error = %e, "Failed to restart {}", description);
                Err(e)
            }
        }
    }

    async fn stop_all(&mut self, timeout: Duration) -> Vec<(String, StopOutcome)> {
        let deadline = Instant::now() + timeout;

        // Signal everything first so the grace periods overlap
        for (definition, runtime) in self.registry.iter().zip(self.workers.iter_mut()) {
            if let Some(child) = runtime.child.as_mut() {
                info!(worker = %definition.id, "Stopping {}...", definition.description);
                runtime.state = WorkerState::Stopping;
                if let Err(e) = request_termination(child) {
                    warn!(worker = %definition.id, error = %e, "Failed to send termination request");
                }
            }
        }

        let mut outcomes = Vec::with_capacity(self.workers.len());
        for (definition, runtime) in self.registry.iter().zip(self.workers.iter_mut()) {
            let outcome = match runtime.child.take() {
                Some(mut child) => {
                    let outcome = await_exit(&definition.id, &mut child, deadline).await;
                    runtime.last_exit_code =
                        child.try_wait().ok().flatten().and_then(|s| s.code());
                    outcome
                }
                None => StopOutcome::NotRunning,
            };
            runtime.mark_stopped();
            outcomes.push((definition.id.clone(), outcome));
        }

        info!("All processes stopped");
        outcomes
    }

    fn worker_statuses(&self) -> Vec<WorkerStatus> {
        self.registry
            .iter()
            .zip(self.workers.iter())
            .map(|(definition, runtime)| WorkerStatus {
                worker_id: definition.id.clone(),
                description: definition.description.clone(),
                state: runtime.state,
                pid: runtime.pid,
                restart_count: runtime.restart_count,
                last_started: runtime.last_started,
                last_exit_code: runtime.last_exit_code,
            })
            .collect()
    }
}
