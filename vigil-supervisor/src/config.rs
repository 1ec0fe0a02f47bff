//! Configuration types for the vigil supervisor

use crate::error::{Result, SupervisorError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name looked up inside the supervisor root
pub const CONFIG_FILE_NAME: &str = "vigil.toml";

/// Main configuration for the supervisor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VigilConfig {
    /// Directory for the system log and captured worker output (relative to root)
    pub logs_dir: PathBuf,

    /// Shared status document (relative to root)
    pub status_document: PathBuf,

    /// Append worker stdout/stderr to `<logs_dir>/<id>.log`
    pub capture_output: bool,

    /// Monitor loop timing
    pub monitor: MonitorSettings,

    /// Launch, stop and restart timing
    pub lifecycle: LifecycleSettings,

    /// Managed workers, in launch order
    pub workers: Vec<WorkerConfig>,
}

impl Default for VigilConfig {
    fn default() -> Self {
        Self {
            logs_dir: PathBuf::from("Logs"),
            status_document: PathBuf::from("Dashboard.md"),
            capture_output: true,
            monitor: MonitorSettings::default(),
            lifecycle: LifecycleSettings::default(),
            workers: default_workers(),
        }
    }
}

/// Monitor loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSettings {
    /// Interval at which the shutdown flag is polled
    #[serde(with = "humantime_serde")]
    pub tick: Duration,

    /// Number of ticks between full health-check passes
    pub health_check_ticks: u32,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            health_check_ticks: 30,
        }
    }
}

/// Lifecycle timing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleSettings {
    /// Delay inserted between consecutive launches in `start_all`
    #[serde(with = "humantime_serde")]
    pub launch_stagger: Duration,

    /// Grace period between SIGTERM and force kill
    #[serde(with = "humantime_serde")]
    pub stop_timeout: Duration,

    /// Unit of the exponential restart backoff
    #[serde(with = "humantime_serde")]
    pub backoff_base: Duration,

    /// Upper bound of the restart backoff
    #[serde(with = "humantime_serde")]
    pub backoff_max: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            launch_stagger: Duration::from_secs(1),
            stop_timeout: Duration::from_secs(5),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
        }
    }
}

/// A worker entry as written in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Unique worker identifier
    pub id: String,

    /// Executable to launch
    pub command: String,

    /// Script passed as the first argument, checked for existence before launch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<PathBuf>,

    /// Arguments; `{root}` expands to the supervisor root
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory (defaults to the root)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    /// Human-readable description (defaults to the id)
    #[serde(default)]
    pub description: String,
}

impl WorkerConfig {
    fn python(id: &str, script: &str, args: &[&str], description: &str) -> Self {
        Self {
            id: id.to_string(),
            command: "python3".to_string(),
            script: Some(PathBuf::from(script)),
            args: args.iter().map(|a| a.to_string()).collect(),
            working_dir: None,
            description: description.to_string(),
        }
    }
}

/// The watcher set managed when no configuration file overrides it
pub fn default_workers() -> Vec<WorkerConfig> {
    vec![
        WorkerConfig::python(
            "filesystem",
            "filesystem_watcher.py",
            &["{root}"],
            "File System Watcher",
        ),
        WorkerConfig::python(
            "gmail",
            "gmail_watcher.py",
            &["{root}/credentials", "{root}"],
            "Gmail Inbox Watcher",
        ),
        WorkerConfig::python(
            "whatsapp",
            "whatsapp_watcher.py",
            &["{root}/whatsapp_session", "{root}", "--headless"],
            "WhatsApp Web Watcher",
        ),
        WorkerConfig::python(
            "approval",
            "approval_handler.py",
            &["{root}"],
            "Approval Handler (Safety Valve)",
        ),
    ]
}

impl VigilConfig {
    /// Load configuration for a supervisor root.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. `vigil.toml` inside the root, if present
    /// 3. The explicit configuration file, if given (must exist)
    /// 4. `VIGIL_*` environment overrides, nested keys separated by `__`
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration source is invalid or validation fails.
    pub fn load(root: &Path, explicit: Option<&Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment = Figment::from(Serialized::defaults(VigilConfig::default()))
            .merge(Toml::file(root.join(CONFIG_FILE_NAME)));

        if let Some(path) = explicit {
            if !path.is_file() {
                return Err(SupervisorError::Configuration(format!(
                    "Configuration file not found: {}",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }

        let config: VigilConfig = figment
            .merge(Env::prefixed("VIGIL_").split("__"))
            .extract()
            .map_err(|e| {
                SupervisorError::Configuration(format!("Failed to load configuration: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, without environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Serialized, Toml},
        };

        let config: VigilConfig = Figment::from(Serialized::defaults(VigilConfig::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| {
                SupervisorError::Configuration(format!(
                    "Failed to load configuration file: {}",
                    e
                ))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.workers.is_empty() {
            return Err(SupervisorError::Configuration(
                "No workers configured".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for worker in &self.workers {
            if worker.id.trim().is_empty() {
                return Err(SupervisorError::Configuration(
                    "Worker id must not be empty".to_string(),
                ));
            }
            if worker.command.trim().is_empty() {
                return Err(SupervisorError::Configuration(format!(
                    "Worker {} has an empty command",
                    worker.id
                )));
            }
            if !seen.insert(worker.id.as_str()) {
                return Err(SupervisorError::DuplicateWorker(worker.id.clone()));
            }
        }

        if self.monitor.tick.is_zero() {
            return Err(SupervisorError::Configuration(
                "monitor.tick must be greater than zero".to_string(),
            ));
        }
        if self.monitor.health_check_ticks == 0 {
            return Err(SupervisorError::Configuration(
                "monitor.health_check_ticks must be at least 1".to_string(),
            ));
        }
        if self.lifecycle.backoff_base > self.lifecycle.backoff_max {
            return Err(SupervisorError::Configuration(format!(
                "lifecycle.backoff_base ({:?}) exceeds lifecycle.backoff_max ({:?})",
                self.lifecycle.backoff_base, self.lifecycle.backoff_max
            )));
        }

        Ok(())
    }

    /// Logs directory resolved against the root
    pub fn logs_path(&self, root: &Path) -> PathBuf {
        root.join(&self.logs_dir)
    }

    /// Status document resolved against the root
    pub fn status_document_path(&self, root: &Path) -> PathBuf {
        root.join(&self.status_document)
    }

    /// Health-check period expressed as wall time
    pub fn health_check_period(&self) -> Duration {
        self.monitor.tick * self.monitor.health_check_ticks
    }
}
