//! Static, ordered registry of worker definitions

use crate::config::{VigilConfig, WorkerConfig};
use crate::error::{Result, SupervisorError};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Placeholder expanded to the supervisor root inside worker arguments
pub const ROOT_PLACEHOLDER: &str = "{root}";

/// Launch specification of a single worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerDefinition {
    /// Unique worker identifier
    pub id: String,
    /// Executable to launch
    pub command: String,
    /// Script passed as the first argument, resolved against `working_dir`
    pub script: Option<PathBuf>,
    /// Arguments following the script
    pub args: Vec<String>,
    /// Directory the process runs in
    pub working_dir: PathBuf,
    /// Human-readable description used in logs and status output
    pub description: String,
}

impl WorkerDefinition {
    /// Create a definition with no script, running in `working_dir`
    pub fn new(
        id: impl Into<String>,
        command: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        let id = id.into();
        Self {
            description: id.clone(),
            id,
            command: command.into(),
            script: None,
            args: args.into_iter().map(Into::into).collect(),
            working_dir: working_dir.into(),
        }
    }

    /// Set the script argument
    pub fn with_script(mut self, script: impl Into<PathBuf>) -> Self {
        self.script = Some(script.into());
        self
    }

    /// Script path as it will be passed to the command
    pub fn script_path(&self) -> Option<PathBuf> {
        self.script.as_ref().map(|s| self.working_dir.join(s))
    }

    fn from_config(config: &WorkerConfig, root: &Path) -> Self {
        let root_str = root.display().to_string();
        let description = if config.description.trim().is_empty() {
            config.id.clone()
        } else {
            config.description.clone()
        };

        Self {
            id: config.id.clone(),
            command: config.command.clone(),
            script: config.script.clone(),
            args: config
                .args
                .iter()
                .map(|arg| arg.replace(ROOT_PLACEHOLDER, &root_str))
                .collect(),
            working_dir: config
                .working_dir
                .as_ref()
                .map(|dir| root.join(dir))
                .unwrap_or_else(|| root.to_path_buf()),
            description,
        }
    }
}

/// Ordered collection of worker definitions, immutable once built
#[derive(Debug, Clone, Default)]
pub struct WorkerRegistry {
    workers: Vec<WorkerDefinition>,
}

impl WorkerRegistry {
    /// Build a registry, preserving the given order.
    ///
    /// # Errors
    ///
    /// Returns an error on an empty identifier, an empty command or a duplicate identifier.
    pub fn new(workers: Vec<WorkerDefinition>) -> Result<Self> {
        for (index, worker) in workers.iter().enumerate() {
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
            if workers[..index].iter().any(|w| w.id == worker.id) {
                return Err(SupervisorError::DuplicateWorker(worker.id.clone()));
            }
        }

        Ok(Self { workers })
    }

    /// Build the registry described by a configuration, expanding `{root}`
    pub fn from_config(config: &VigilConfig, root: &Path) -> Result<Self> {
        Self::new(
            config
                .workers
                .iter()
                .map(|worker| WorkerDefinition::from_config(worker, root))
                .collect(),
        )
    }

    /// Position of a worker in registration order
    pub fn index_of(&self, worker_id: &str) -> Option<usize> {
        self.workers.iter().position(|w| w.id == worker_id)
    }

    /// Iterate in registration order
    pub fn iter(&self) -> impl Iterator<Item = &WorkerDefinition> {
        self.workers.iter()
    }

    /// Identifiers in registration order
    pub fn ids(&self) -> Vec<String> {
        self.workers.iter().map(|w| w.id.clone()).collect()
    }
}

impl std::ops::Index<usize> for WorkerRegistry {
    type Output = WorkerDefinition;

    fn index(&self, index: usize) -> &Self::Output {
        &self.workers[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_expands_root_and_keeps_order() {
        let root = PathBuf::from("/srv/vault");
        let registry = WorkerRegistry::from_config(&VigilConfig::default(), &root).unwrap();

        assert_eq!(
            registry.ids(),
            vec!["filesystem", "gmail", "whatsapp", "approval"]
        );

        let gmail = &registry[registry.index_of("gmail").unwrap()];
        assert_eq!(gmail.command, "python3");
        assert_eq!(gmail.args, vec!["/srv/vault/credentials", "/srv/vault"]);
        assert_eq!(gmail.working_dir, root);
        assert_eq!(
            gmail.script_path(),
            Some(PathBuf::from("/srv/vault/gmail_watcher.py"))
        );
        assert_eq!(gmail.description, "Gmail Inbox Watcher");

        let whatsapp = &registry[registry.index_of("whatsapp").unwrap()];
        assert_eq!(whatsapp.args.last().map(String::as_str), Some("--headless"));
    }

    #[test]
    fn test_relative_working_dir_and_default_description() {
        let mut config = VigilConfig::default();
        config.workers = vec![WorkerConfig {
            id: "poller".to_string(),
            command: "sleep".to_string(),
            script: None,
            args: vec!["5".to_string()],
            working_dir: Some(PathBuf::from("jobs")),
            description: String::new(),
        }];

        let registry = WorkerRegistry::from_config(&config, Path::new("/vault")).unwrap();
        let poller = &registry[0];
        assert_eq!(poller.working_dir, PathBuf::from("/vault/jobs"));
        assert_eq!(poller.description, "poller");
        assert_eq!(poller.script_path(), None);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let workers = vec![
            WorkerDefinition::new("a", "sleep", ["1"], "/tmp"),
            WorkerDefinition::new("b", "sleep", ["1"], "/tmp"),
            WorkerDefinition::new("a", "true", Vec::<String>::new(), "/tmp"),
        ];

        let err = WorkerRegistry::new(workers).unwrap_err();
        assert!(matches!(err, SupervisorError::DuplicateWorker(id) if id == "a"));
    }

    #[test]
    fn test_lookup_by_id() {
        let registry = WorkerRegistry::new(vec![
            WorkerDefinition::new("first", "sleep", ["1"], "/tmp"),
            WorkerDefinition::new("second", "sleep", ["1"], "/tmp"),
        ])
        .unwrap();

        assert_eq!(registry.index_of("second"), Some(1));
        assert_eq!(registry[1].id, "second");
        assert!(registry.index_of("third").is_none());
    }
}
