//! Vigil Supervisor - process supervisor for long-running vault watchers
//!
//! Launches a fixed, ordered set of worker processes, health-checks them on a
//! fixed period, restarts crashed workers with capped exponential backoff, and
//! tears everything down with a bounded graceful stop when a shutdown signal
//! arrives.
//!
//! ## Components
//!
//! - [`WorkerRegistry`] - the static, ordered list of worker definitions
//! - [`ProcessSupervisor`] - owns each worker's OS process and lifecycle state
//! - [`ShutdownSignal`] - cooperative cancellation flag set by SIGINT/SIGTERM
//! - [`MonitorLoop`] - tick-driven loop that detects crashes and restarts workers
//! - [`StatusReporter`] - status snapshots and the shared Markdown status document
//! - [`Orchestrator`] - composes the above into `start_all → monitor → stop_all`
//!
//! Workers are opaque: any exit while a worker is `Running` counts as a crash,
//! whatever the exit code.

mod config;
mod error;
mod lifecycle;
mod monitor;
mod process;
mod registry;
mod shutdown;
mod status;
mod supervisor;

pub use config::{
    CONFIG_FILE_NAME, LifecycleSettings, MonitorSettings, VigilConfig, WorkerConfig,
    default_workers,
};
pub use error::{Result, SupervisorError};
pub use lifecycle::{Orchestrator, OrchestratorConfig, RunSummary};
pub use monitor::{MonitorConfig, MonitorLoop};
pub use process::{BackoffPolicy, ProcessSupervisor, SupervisorConfig};
pub use registry::{ROOT_PLACEHOLDER, WorkerDefinition, WorkerRegistry};
pub use shutdown::{ShutdownSignal, listen_for_signals};
pub use status::{StatusLevel, StatusReporter, StatusSnapshot, append_status};
pub use supervisor::{
    HealthStatus, RestartOutcome, StopOutcome, WorkerHandle, WorkerState, WorkerStatus,
    WorkerSupervisor,
};

/// Version of the supervisor library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Report of a `start_all` pass
#[derive(Debug, Default, Clone)]
pub struct StartReport {
    /// Workers that were launched (or already running)
    pub started: Vec<WorkerHandle>,
    /// Workers whose launch failed, with the reason
    pub failed: Vec<(String, String)>,
}

/// Counters accumulated by the monitor loop
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MonitorReport {
    /// Completed health-check passes
    pub passes: u64,
    /// Running workers found dead
    pub crashes_detected: u64,
    /// Successful relaunches
    pub restarts: u64,
    /// Relaunches whose start failed
    pub failed_restarts: u64,
    /// Restarts dropped because shutdown arrived during backoff
    pub abandoned_restarts: u64,
}
