//! Orchestrator that runs the full supervision lifecycle

use crate::config::VigilConfig;
use crate::monitor::{MonitorConfig, MonitorLoop};
use crate::status::{StatusLevel, StatusReporter};
use crate::{MonitorReport, ShutdownSignal, StartReport, StopOutcome, WorkerSupervisor};
use std::time::Duration;
use tracing::info;

/// Lifecycle timing used by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Pause between consecutive launches
    pub launch_stagger: Duration,
    /// Shared grace period for the final `stop_all`
    pub stop_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            launch_stagger: Duration::from_secs(1),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_vigil_config(config: &VigilConfig) -> Self {
        Self {
            launch_stagger: config.lifecycle.launch_stagger,
            stop_timeout: config.lifecycle.stop_timeout,
        }
    }
}

/// Summary of one supervisor run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub start: StartReport,
    pub monitor: MonitorReport,
    pub stopped: Vec<(String, StopOutcome)>,
}

impl RunSummary {
    /// Workers that had to be killed after their grace period
    pub fn force_killed(&self) -> Vec<&str> {
        self.stopped
            .iter()
            .filter(|(_, outcome)| *outcome == StopOutcome::ForceKilled)
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

/// Starts every worker, monitors them until shutdown, then stops them all
pub struct Orchestrator<S: WorkerSupervisor> {
    supervisor: S,
    monitor: MonitorLoop,
    reporter: StatusReporter,
    shutdown: ShutdownSignal,
    config: OrchestratorConfig,
}

impl<S: WorkerSupervisor> Orchestrator<S> {
    /// Create a new orchestrator
    pub fn new(
        supervisor: S,
        config: OrchestratorConfig,
        monitor_config: MonitorConfig,
        reporter: StatusReporter,
        shutdown: ShutdownSignal,
    ) -> Self {
        let monitor = MonitorLoop::new(monitor_config, shutdown.clone(), reporter.clone());
        Self {
            supervisor,
            monitor,
            reporter,
            shutdown,
            config,
        }
    }

    /// Launch every worker and record the outcome in the status document
    pub async fn start_all(&mut self) -> StartReport {
        info!("{}", "=".repeat(60));
        info!("Vigil supervisor starting {} workers", self.supervisor.worker_ids().len());
        info!("{}", "=".repeat(60));

        let report = self
            .supervisor
            .start_all(self.config.launch_stagger, &self.shutdown)
            .await;

        let total = self.supervisor.worker_ids().len();
        if report.failed.is_empty() && report.started.len() == total {
            info!("All watchers started successfully");
            self.reporter
                .record(StatusLevel::Online, "System Online: All Watchers Active")
                .await;
        } else {
            info!(
                started = report.started.len(),
                failed = report.failed.len(),
                "Some watchers did not start"
            );
            self.reporter
                .record(
                    StatusLevel::Degraded,
                    &format!(
                        "System Online: {}/{} watchers active",
                        report.started.len(),
                        total
                    ),
                )
                .await;
        }

        report
    }

    /// Stop every worker and record the outcome in the status document
    pub async fn stop_all(&mut self) -> Vec<(String, StopOutcome)> {
        info!("{}", "=".repeat(60));
        info!("Shutting down all processes...");
        info!("{}", "=".repeat(60));

        let stopped = self.supervisor.stop_all(self.config.stop_timeout).await;
        self.reporter
            .record(StatusLevel::Offline, "System Offline: Orchestrator Stopped")
            .await;
        stopped
    }

    /// Run the full lifecycle: start all, monitor until shutdown, stop all
    pub async fn run(mut self) -> RunSummary {
        let start = self.start_all().await;
        if !self.shutdown.is_triggered() {
            info!("Press Ctrl+C to stop");
        }

        let monitor = self.monitor.run(&mut self.supervisor).await;
        let stopped = self.stop_all().await;

        info!("{}", self.reporter.snapshot(&self.supervisor));

        RunSummary {
            start,
            monitor,
            stopped,
        }
    }
}
