/// Audit logging for rule changes on the manager
///
/// Every live disable and every completed sweep is appended to `audit.log`
/// in the state directory. Events of one run share a run id.
use crate::core::stats::{DisabledRule, RunStatistics};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Types of auditable events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RuleDisabled,
    SweepCompleted,
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event occurred (UTC)
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Sweep the event belongs to
    pub run_id: Uuid,

    /// Type of event
    pub event_type: EventType,

    /// Whether the operation succeeded
    pub success: bool,

    /// Additional structured data about the event
    pub details: serde_json::Value,

    /// Error message if operation failed
    pub error: Option<String>,
}

impl AuditEvent {
    /// Creates a new audit event
    pub fn new(
        run_id: Uuid,
        event_type: EventType,
        success: bool,
        details: serde_json::Value,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            run_id,
            event_type,
            success,
            details,
            error,
        }
    }
}

/// Audit log writer
pub struct AuditLog {
    log_path: PathBuf,
}

impl AuditLog {
    /// Creates an audit log in the state directory
    ///
    /// # Errors
    ///
    /// Returns `Err` if state directory cannot be determined
    pub fn new() -> std::io::Result<Self> {
        let mut log_path = crate::utils::get_state_dir().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "State directory not found")
        })?;
        log_path.push("audit.log");

        Ok(Self { log_path })
    }

    /// Creates an audit log at an explicit path
    pub fn at(path: impl AsRef<Path>) -> Self {
        Self {
            log_path: path.as_ref().to_path_buf(),
        }
    }

    /// Appends an event to the audit log
    ///
    /// Events are written as JSON-lines format (one JSON object per line)
    ///
    /// # Errors
    ///
    /// Returns `Err` if file cannot be opened or written
    pub async fn log(&self, event: AuditEvent) -> std::io::Result<()> {
        let json = serde_json::to_string(&event)?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;

        file.write_all(json.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.sync_all().await?;

        Ok(())
    }

    /// Reads the most recent events from the log, newest first
    ///
    /// # Errors
    ///
    /// Returns `Err` if file cannot be read
    pub async fn read_recent(&self, count: usize) -> std::io::Result<Vec<AuditEvent>> {
        let content = tokio::fs::read_to_string(&self.log_path).await?;

        let events: Vec<AuditEvent> = content
            .lines()
            .rev()
            .take(count)
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();

        Ok(events)
    }

    /// Returns the path to the audit log file
    pub fn path(&self) -> &Path {
        &self.log_path
    }
}

fn disabled_event(run_id: Uuid, device: &str, rule: &DisabledRule) -> AuditEvent {
    AuditEvent::new(
        run_id,
        EventType::RuleDisabled,
        true,
        serde_json::json!({
            "device": device,
            "rule_id": rule.id,
            "rule_name": rule.name,
            "reason": rule.reason,
        }),
        None,
    )
}

fn completed_event(run_id: Uuid, stats: &RunStatistics) -> AuditEvent {
    let stopped_early = stats.stop_reason.is_early();
    AuditEvent::new(
        run_id,
        EventType::SweepCompleted,
        !stopped_early,
        serde_json::json!({
            "device": stats.device,
            "dry_run": stats.dry_run,
            "total_rules_analyzed": stats.total_rules_analyzed,
            "zero_hit_rules": stats.zero_hit_rules,
            "rules_disabled": stats.rules_disabled,
            "rules_skipped": stats.rules_skipped,
            "connection_failures": stats.connection_failures,
            "deployment": stats.deployment,
        }),
        stopped_early.then(|| stats.stop_reason.to_string()),
    )
}

/// Records a finished sweep: one event per rule disabled on the manager,
/// then the run summary. Dry runs only record the summary.
///
/// # Errors
///
/// Returns `Err` on the first failed write
pub async fn record_sweep(
    log: &AuditLog,
    run_id: Uuid,
    stats: &RunStatistics,
) -> std::io::Result<()> {
    if !stats.dry_run {
        for rule in &stats.disabled {
            log.log(disabled_event(run_id, &stats.device, rule)).await?;
        }
    }
    log.log(completed_event(run_id, stats)).await
}

/// Records a finished sweep in the default audit log, warning on failure
pub async fn log_sweep(run_id: Uuid, stats: &RunStatistics) {
    if let Ok(audit) = AuditLog::new()
        && let Err(e) = record_sweep(&audit, run_id, stats).await
    {
        tracing::warn!("Failed to write audit log: {}", e);
    }
}
