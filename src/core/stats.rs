//! Run statistics and per-rule outcome records

use serde::Serialize;
use std::fmt;

/// A rule that was disabled, or would have been in a dry run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisabledRule {
    pub name: String,
    pub id: String,
    pub first_comment: String,
    pub reason: String,
}

/// A zero-hit rule that was kept
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IgnoredRule {
    pub name: String,
    pub id: String,
    pub first_comment: String,
    pub reason: String,
    /// Breakdown of what triggered the reason
    pub detail: String,
}

/// Why the processing loop stopped
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum StopReason {
    /// Every candidate was processed
    #[default]
    Exhausted,
    /// The max-disables ceiling was reached
    DisableCeiling,
    /// Too many consecutive connection failures
    CircuitBreaker,
    /// A fetch or update returned no usable data
    Fatal(String),
}

impl StopReason {
    /// Returns `true` if the run stopped before processing every candidate
    pub fn is_early(&self) -> bool {
        !matches!(self, StopReason::Exhausted)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Exhausted => f.write_str("all candidates processed"),
            StopReason::DisableCeiling => f.write_str("maximum number of disables reached"),
            StopReason::CircuitBreaker => f.write_str("too many consecutive connection failures"),
            StopReason::Fatal(message) => write!(f, "fatal error: {message}"),
        }
    }
}

/// Result of pushing the run's changes to the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Deployment {
    /// The manager accepted a deployment request
    Requested { task_id: Option<String> },
    /// The device had no pending changes on the manager
    NotPending,
    Failed { message: String },
}

impl fmt::Display for Deployment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Deployment::Requested { task_id: Some(id) } => write!(f, "requested (task {id})"),
            Deployment::Requested { task_id: None } => f.write_str("requested"),
            Deployment::NotPending => f.write_str("nothing pending for the device"),
            Deployment::Failed { message } => write!(f, "failed: {message}"),
        }
    }
}

/// Counters and detail records of one sweep.
///
/// Every candidate the loop processed lands in exactly one of
/// `rules_disabled`, `rules_skipped` or `connection_failures`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStatistics {
    pub device: String,
    pub dry_run: bool,
    pub total_rules_analyzed: usize,
    pub zero_hit_rules: usize,
    pub rules_disabled: usize,
    pub rules_skipped: usize,
    pub connection_failures: usize,
    pub disabled: Vec<DisabledRule>,
    pub ignored: Vec<IgnoredRule>,
    pub failed_rule_ids: Vec<String>,
    pub stop_reason: StopReason,
    /// Set when changes were deployed after a live run
    pub deployment: Option<Deployment>,
}

impl RunStatistics {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Self::default()
        }
    }

    /// Candidates that reached a final outcome
    pub fn processed(&self) -> usize {
        self.rules_disabled + self.rules_skipped + self.connection_failures
    }

    pub fn record_disabled(&mut self, rule: DisabledRule) {
        self.rules_disabled += 1;
        self.disabled.push(rule);
    }

    pub fn record_ignored(&mut self, rule: IgnoredRule) {
        self.rules_skipped += 1;
        self.ignored.push(rule);
    }

    pub fn record_connection_failure(&mut self, rule_id: &str) {
        self.connection_failures += 1;
        self.failed_rule_ids.push(rule_id.to_string());
    }
}
