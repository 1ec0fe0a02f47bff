//! Control loop that detects crashed workers and restarts them

use crate::config::VigilConfig;
use crate::status::{StatusLevel, StatusReporter};
use crate::{MonitorReport, RestartOutcome, ShutdownSignal, WorkerState, WorkerSupervisor};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Shortest tick the loop will sleep
const MIN_TICK: Duration = Duration::from_millis(1);

/// Monitor loop timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Shutdown polling interval
    pub tick: Duration,
    /// Ticks between full health-check passes
    pub health_check_ticks: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            health_check_ticks: 30,
        }
    }
}

impl MonitorConfig {
    pub fn from_vigil_config(config: &VigilConfig) -> Self {
        Self {
            tick: config.monitor.tick,
            health_check_ticks: config.monitor.health_check_ticks,
        }
    }

    pub fn health_check_period(&self) -> Duration {
        self.tick * self.health_check_ticks
    }
}

/// Polls the shutdown flag every tick and health-checks all workers every period
pub struct MonitorLoop {
    config: MonitorConfig,
    shutdown: ShutdownSignal,
    reporter: StatusReporter,
}

impl MonitorLoop {
    /// Create a monitor loop observing `shutdown` and reporting through `reporter`.
    ///
    /// A zero tick or tick count is raised to the minimum so every wait suspends.
    pub fn new(config: MonitorConfig, shutdown: ShutdownSignal, reporter: StatusReporter) -> Self {
        let config = MonitorConfig {
            tick: config.tick.max(MIN_TICK),
            health_check_ticks: config.health_check_ticks.max(1),
        };
        Self {
            config,
            shutdown,
            reporter,
        }
    }

    /// Run until shutdown is requested.
    ///
    /// The wait between passes is split into ticks; each tick also wakes early on
    /// shutdown, so a request is observed within one tick.
    pub async fn run<S>(&self, supervisor: &mut S) -> MonitorReport
    where
        S: WorkerSupervisor + ?Sized,
    {
        let mut report = MonitorReport::default();
        info!(
            period_secs = self.config.health_check_period().as_secs_f64(),
            "Monitor loop started"
        );

        'monitor: while !self.shutdown.is_triggered() {
            for _ in 0..self.config.health_check_ticks {
                if !self.wait_tick().await {
                    break 'monitor;
                }
            }

            self.health_pass(supervisor, &mut report).await;
        }

        info!(
            passes = report.passes,
            crashes = report.crashes_detected,
            restarts = report.restarts,
            "Shutdown requested, monitor loop exiting"
        );
        report
    }

    /// Sleep one tick. Returns `false` if shutdown was requested.
    async fn wait_tick(&self) -> bool {
        if self.shutdown.is_triggered() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.shutdown.triggered() => false,
            _ = tokio::time::sleep(self.config.tick) => !self.shutdown.is_triggered(),
        }
    }

    /// Health-check every worker once, restarting any found dead
    pub async fn health_pass<S>(&self, supervisor: &mut S, report: &mut MonitorReport)
    where
        S: WorkerSupervisor + ?Sized,
    {
        report.passes += 1;

        for worker_id in supervisor.worker_ids() {
            if self.shutdown.is_triggered() {
                break;
            }

            match supervisor.state(&worker_id) {
                Some(WorkerState::Running) => {
                    let health = match supervisor.health_check(&worker_id) {
                        Ok(health) => health,
                        Err(e) => {
                            warn!(worker = %worker_id, error = %e, "Health check failed");
                            continue;
                        }
                    };
                    if health.is_alive() {
                        continue;
                    }

                    error!(worker = %worker_id, ?health, "Worker is not running!");
                    if let Err(e) = supervisor.mark_crashed(&worker_id) {
                        warn!(worker = %worker_id, error = %e, "Unable to record crash");
                        continue;
                    }
                    report.crashes_detected += 1;
                }
                // A previous restart attempt failed
                Some(WorkerState::Crashed) => {
                    debug!(worker = %worker_id, "Retrying restart of crashed worker");
                }
                _ => continue,
            }

            if !self.restart(supervisor, &worker_id, report).await {
                break;
            }
        }

        let snapshot = self.reporter.snapshot(&*supervisor);
        debug!("{}", snapshot);
    }

    /// Restart one worker. Returns `false` if the restart was abandoned for shutdown.
    async fn restart<S>(&self, supervisor: &mut S, worker_id: &str, report: &mut MonitorReport) -> bool
    where
        S: WorkerSupervisor + ?Sized,
    {
        let description = supervisor
            .worker_statuses()
            .into_iter()
            .find(|status| status.worker_id == worker_id)
            .map_or_else(|| worker_id.to_string(), |status| status.description);

        match supervisor.restart(worker_id, &self.shutdown).await {
            Ok(RestartOutcome::Restarted(_)) => {
                report.restarts += 1;
                let restarts = supervisor
                    .worker_statuses()
                    .into_iter()
                    .find(|status| status.worker_id == worker_id)
                    .map_or(0, |status| status.restarts());
                self.reporter
                    .record(
                        StatusLevel::Online,
                        &format!("{} restarted (restart #{})", description, restarts),
                    )
                    .await;
                true
            }
            Ok(RestartOutcome::Abandoned) => {
                report.abandoned_restarts += 1;
                false
            }
            Err(e) => {
                report.failed_restarts += 1;
                warn!(worker = worker_id, error = %e, "Restart failed, will retry on next pass");
                self.reporter
                    .record(
                        StatusLevel::Degraded,
                        &format!("{} restart failed", description),
                    )
                    .await;
                true
            }
        }
    }
}
