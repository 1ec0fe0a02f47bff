//! Status snapshots and the shared Markdown status document

use crate::{WorkerStatus, WorkerSupervisor};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Header row of the activity table in the status document
pub const TABLE_HEADER: &str = "| Timestamp | Action | Status | Details |";

/// Prefix of the "last updated" line in the status document
pub const LAST_UPDATED_PREFIX: &str = "*Last Updated:";

/// Action label written in every row this supervisor appends
pub const STATUS_LABEL: &str = "System_Status";

/// Timestamp format used in the status document
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Severity of a status entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatusLevel {
    Online,
    Degraded,
    Offline,
}

impl StatusLevel {
    /// Glyph and word written to the status column
    pub fn glyph(&self) -> &'static str {
        match self {
            StatusLevel::Online => "✓ Online",
            StatusLevel::Degraded => "⚠ Degraded",
            StatusLevel::Offline => "✗ Offline",
        }
    }
}

/// Insert one activity row below the table header and refresh the "last updated" line.
///
/// Returns `None`, leaving the document untouched, when either the table header
/// (with its separator row) or the "last updated" line is missing. Every other
/// line is preserved exactly.
pub fn append_status(
    document: &str,
    level: StatusLevel,
    message: &str,
    timestamp: &str,
) -> Option<String> {
    let lines: Vec<&str> = document.split('\n').collect();

    let header = lines
        .iter()
        .position(|line| line.trim() == TABLE_HEADER)?;
    let separator = header + 1;
    if !lines
        .get(separator)
        .is_some_and(|line| line.trim_start().starts_with("|---"))
    {
        return None;
    }
    let last_updated = lines
        .iter()
        .position(|line| line.starts_with(LAST_UPDATED_PREFIX))?;

    // Split on '\n' leaves any '\r' on the line; new lines copy their neighbour's
    let carriage = |line: &str| if line.ends_with('\r') { "\r" } else { "" };
    let updated_line = format!(
        "{} {}*{}",
        LAST_UPDATED_PREFIX,
        timestamp,
        carriage(lines[last_updated])
    );
    let row = format!(
        "| {} | {} | {} | {} |{}",
        timestamp,
        STATUS_LABEL,
        level.glyph(),
        message,
        carriage(lines[separator])
    );

    let mut updated: Vec<&str> = Vec::with_capacity(lines.len() + 1);
    updated.extend_from_slice(&lines[..=separator]);
    updated.push(&row);
    updated.extend_from_slice(&lines[separator + 1..]);
    let last_updated = if last_updated > separator {
        last_updated + 1
    } else {
        last_updated
    };
    updated[last_updated] = &updated_line;

    Some(updated.join("\n"))
}

/// Point-in-time status of every worker
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub taken_at: DateTime<Local>,
    pub workers: Vec<WorkerStatus>,
}

impl StatusSnapshot {
    pub fn running(&self) -> usize {
        self.workers.iter().filter(|w| w.is_running()).count()
    }
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Worker status ({} of {} running)", self.running(), self.workers.len())?;
        for worker in &self.workers {
            let pid = worker
                .pid
                .map_or_else(|| "N/A".to_string(), |pid| pid.to_string());
            write!(
                f,
                "  {}: {} pid={} restarts={}",
                worker.description,
                if worker.is_running() { "RUNNING" } else { "STOPPED" },
                pid,
                worker.restarts()
            )?;
            if let Some(started) = worker.last_started {
                write!(f, " last_start={}", started.format(TIMESTAMP_FORMAT))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Renders snapshots and records status lines in the shared document
#[derive(Debug, Clone, Default)]
pub struct StatusReporter {
    document: Option<PathBuf>,
}

impl StatusReporter {
    /// Reporter writing to the status document at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            document: Some(path.into()),
        }
    }

    /// Reporter that only renders snapshots
    pub fn detached() -> Self {
        Self::default()
    }

    /// Read-only snapshot of a supervisor's workers
    pub fn snapshot<S: WorkerSupervisor + ?Sized>(&self, supervisor: &S) -> StatusSnapshot {
        StatusSnapshot {
            taken_at: Local::now(),
            workers: supervisor.worker_statuses(),
        }
    }

    /// Append a status row to the document, stamped with the current local time.
    ///
    /// Failures are logged and never propagated. Returns whether the document was rewritten.
    pub async fn record(&self, level: StatusLevel, message: &str) -> bool {
        let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        self.record_at(level, message, &timestamp).await
    }

    /// Append a status row with an explicit timestamp
    pub async fn record_at(&self, level: StatusLevel, message: &str, timestamp: &str) -> bool {
        let Some(path) = self.document.as_deref() else {
            return false;
        };

        let current = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(document = %path.display(), "Status document not found, skipping update");
                return false;
            }
            Err(e) => {
                warn!(document = %path.display(), error = %e, "Error reading status document");
                return false;
            }
        };

        let Some(updated) = append_status(&current, level, message, timestamp) else {
            warn!(
                document = %path.display(),
                "Status document has no activity table or last-updated marker, skipping update"
            );
            return false;
        };

        let mut staging = path.as_os_str().to_owned();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);

        if let Err(e) = tokio::fs::write(&staging, updated).await {
            warn!(document = %path.display(), error = %e, "Error writing status document");
            return false;
        }
        if let Err(e) = tokio::fs::rename(&staging, path).await {
            warn!(document = %path.display(), error = %e, "Error replacing status document");
            let _ = tokio::fs::remove_file(&staging).await;
            return false;
        }

        info!("Dashboard updated: {}", message);
        true
    }
}
