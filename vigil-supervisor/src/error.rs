//! Error types for supervisor operations

use thiserror::Error;

/// Result type for supervisor operations
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Error types for supervisor
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Configuration could not be loaded or failed validation
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Operation referenced a worker that is not in the registry
    #[error("Unknown worker: {0}")]
    UnknownWorker(String),

    /// Two workers were registered under the same identifier
    #[error("Duplicate worker id: {0}")]
    DuplicateWorker(String),

    /// The worker's command or script is missing, or the OS refused the spawn
    #[error("Failed to launch worker {worker}: {reason}")]
    LaunchFailure { worker: String, reason: String },

    /// Termination signal handlers could not be installed
    #[error("Signal handler error: {0}")]
    Signal(#[source] std::io::Error),
}

impl SupervisorError {
    pub(crate) fn launch(worker: &str, reason: impl std::fmt::Display) -> Self {
        SupervisorError::LaunchFailure {
            worker: worker.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error is a launch failure
    pub fn is_launch_failure(&self) -> bool {
        matches!(self, SupervisorError::LaunchFailure { .. })
    }
}
