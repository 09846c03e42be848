//! Run summary, disabled-rule table and JSON report
//!
//! Console output stays short: the summary block and, on request, the table
//! of disabled rules. Per-rule reasons for kept rules only go to the log and
//! the report file.

use crate::core::stats::{Deployment, DisabledRule, IgnoredRule, RunStatistics, StopReason};
use serde::Serialize;
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::Path;
use uuid::Uuid;

const RULE_ID_WIDTH: usize = "ECF40C21-3F6A-0ed3-0000-000268479583".len();
const MAX_NAME_WIDTH: usize = 35;
const MAX_COMMENT_WIDTH: usize = 55;
const MAX_REASON_WIDTH: usize = 45;
const BANNER_WIDTH: usize = 50;

/// Renders the operation summary block printed after every run
pub fn format_summary(stats: &RunStatistics) -> String {
    let banner = "=".repeat(BANNER_WIDTH);
    let mut out = String::new();

    let _ = writeln!(out, "{banner}");
    let _ = writeln!(out, "OPERATION SUMMARY");
    let _ = writeln!(out, "{banner}");
    if !stats.device.is_empty() {
        let _ = writeln!(out, "Device: {}", stats.device);
    }
    let _ = writeln!(out, "Total rules analyzed: {}", stats.total_rules_analyzed);
    let _ = writeln!(out, "Rules with zero hits: {}", stats.zero_hit_rules);
    let _ = writeln!(out, "Rules disabled: {}", stats.rules_disabled);
    let _ = writeln!(out, "Rules skipped: {}", stats.rules_skipped);
    if stats.connection_failures > 0 {
        let _ = writeln!(out, "Connection failures: {}", stats.connection_failures);
    }
    if stats.stop_reason.is_early() {
        let _ = writeln!(out, "Stopped early: {}", stats.stop_reason);
    }
    if let Some(deployment) = &stats.deployment {
        let _ = writeln!(out, "Deployment: {deployment}");
    }
    if stats.dry_run {
        let _ = writeln!(out, "\nNOTE: This was a dry run - no changes were made to FMC");
    }
    let _ = write!(out, "{banner}");
    out
}

/// Renders disabled rules as a fixed-width text table.
///
/// Name, comment and reason columns grow with their content up to a cap and
/// are cut off beyond it; the id column always fits a full rule id.
pub fn format_disabled_table(rules: &[DisabledRule]) -> String {
    if rules.is_empty() {
        return "No rules were disabled.".to_string();
    }

    let name_w = column_width("Rule Name", MAX_NAME_WIDTH, rules.iter().map(|r| r.name.as_str()));
    let id_w = RULE_ID_WIDTH;
    let comment_w = column_width(
        "First Comment",
        MAX_COMMENT_WIDTH,
        rules.iter().map(|r| r.first_comment.as_str()),
    );
    let reason_w = column_width(
        "Disable Reason",
        MAX_REASON_WIDTH,
        rules.iter().map(|r| r.reason.as_str()),
    );

    let separator = format!(
        "+{}+{}+{}+{}+",
        "-".repeat(name_w + 2),
        "-".repeat(id_w + 2),
        "-".repeat(comment_w + 2),
        "-".repeat(reason_w + 2)
    );

    let mut lines = vec![
        separator.clone(),
        format!(
            "| {:<name_w$} | {:<id_w$} | {:<comment_w$} | {:<reason_w$} |",
            "Rule Name", "Rule ID", "First Comment", "Disable Reason"
        ),
        separator.clone(),
    ];

    for rule in rules {
        lines.push(format!(
            "| {:<name_w$.name_w$} | {:<id_w$} | \
             {:<comment_w$.comment_w$} | {:<reason_w$.reason_w$} |",
            rule.name, rule.id, rule.first_comment, rule.reason
        ));
    }

    lines.push(separator);
    lines.join("\n")
}

fn column_width<'r>(header: &str, max: usize, values: impl Iterator<Item = &'r str>) -> usize {
    values
        .map(|v| v.chars().count())
        .fold(header.chars().count(), usize::max)
        .min(max)
}

#[derive(Debug, Serialize)]
pub struct ReportSummary<'a> {
    pub total_rules_analyzed: usize,
    pub zero_hit_rules: usize,
    pub rules_disabled: usize,
    pub rules_skipped: usize,
    pub connection_failures: usize,
    pub stop_reason: &'a StopReason,
    pub deployment: Option<&'a Deployment>,
}

/// JSON report of one run: summary, disabled rules and ignored rules
#[derive(Debug, Serialize)]
pub struct Report<'a> {
    pub generated_at: chrono::DateTime<chrono::Utc>,
    pub run_id: Uuid,
    pub tool_version: &'a str,
    pub device: &'a str,
    pub dry_run: bool,
    pub summary: ReportSummary<'a>,
    pub disabled_rules: &'a [DisabledRule],
    pub ignored_rules: &'a [IgnoredRule],
    pub failed_rule_ids: &'a [String],
}

impl<'a> Report<'a> {
    pub fn new(run_id: Uuid, tool_version: &'a str, stats: &'a RunStatistics) -> Self {
        Self {
            generated_at: chrono::Utc::now(),
            run_id,
            tool_version,
            device: &stats.device,
            dry_run: stats.dry_run,
            summary: ReportSummary {
                total_rules_analyzed: stats.total_rules_analyzed,
                zero_hit_rules: stats.zero_hit_rules,
                rules_disabled: stats.rules_disabled,
                rules_skipped: stats.rules_skipped,
                connection_failures: stats.connection_failures,
                stop_reason: &stats.stop_reason,
                deployment: stats.deployment.as_ref(),
            },
            disabled_rules: &stats.disabled,
            ignored_rules: &stats.ignored,
            failed_rule_ids: &stats.failed_rule_ids,
        }
    }
}

/// Writes the report using an atomic write pattern.
/// 1. Writes to a temporary file next to `path`.
/// 2. Flushes it to disk.
/// 3. Atomically renames it over `path`.
///
/// # Errors
///
/// Returns `Err` if the directory is not writable or the rename fails.
pub fn write_report(path: &Path, report: &Report<'_>) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(json.as_bytes())?;
    file.write_all(b"\n")?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disabled(name: &str, comment: &str, reason: &str) -> DisabledRule {
        DisabledRule {
            name: name.to_string(),
            id: "005056A1-0000-0ed3-0000-000268435457".to_string(),
            first_comment: comment.to_string(),
            reason: reason.to_string(),
        }
    }

    #[test]
    fn test_empty_table() {
        assert_eq!(format_disabled_table(&[]), "No rules were disabled.");
    }

    #[test]
    fn test_table_layout() {
        let table = format_disabled_table(&[disabled(
            "ftp",
            "No comment history",
            "No comment history found",
        )]);
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], lines[2]);
        assert_eq!(lines[0], lines[4]);
        assert!(lines[1].starts_with("| Rule Name | Rule ID "));
        assert!(lines[3].starts_with("| ftp       | 005056A1-0000-0ed3-0000-000268435457 |"));
        assert!(lines.iter().all(|l| l.chars().count() == lines[0].chars().count()));
    }

    #[test]
    fn test_long_columns_are_cut() {
        let long_name = "n".repeat(50);
        let long_reason = "r".repeat(80);
        let table = format_disabled_table(&[disabled(&long_name, "c", &long_reason)]);
        let row = table.lines().nth(3).unwrap();

        assert!(row.contains(&"n".repeat(MAX_NAME_WIDTH)));
        assert!(!row.contains(&"n".repeat(MAX_NAME_WIDTH + 1)));
        assert!(row.contains(&"r".repeat(MAX_REASON_WIDTH)));
        assert!(!row.contains(&"r".repeat(MAX_REASON_WIDTH + 1)));
        assert_eq!(row.chars().count(), table.lines().next().unwrap().chars().count());
    }

    #[test]
    fn test_summary_mentions_dry_run_and_early_stop() {
        let mut stats = RunStatistics::new(true);
        stats.total_rules_analyzed = 10;
        stats.zero_hit_rules = 4;
        stats.stop_reason = StopReason::DisableCeiling;

        let summary = format_summary(&stats);
        assert!(summary.contains("Total rules analyzed: 10"));
        assert!(summary.contains("Rules with zero hits: 4"));
        assert!(summary.contains("dry run"));
        assert!(summary.contains("Stopped early: maximum number of disables reached"));
        assert!(!summary.contains("Connection failures"));
        assert!(!summary.contains("Deployment"));
    }

    #[test]
    fn test_summary_reports_deployment() {
        let mut stats = RunStatistics::new(false);
        stats.deployment = Some(Deployment::Requested {
            task_id: Some("8589934622".to_string()),
        });
        assert!(format_summary(&stats).contains("Deployment: requested (task 8589934622)"));
    }

    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");

        let mut stats = RunStatistics::new(false);
        stats.device = "fw-1".to_string();
        stats.record_disabled(disabled("ftp", "x", "No comment history found"));
        stats.record_ignored(IgnoredRule {
            name: "dmz".to_string(),
            id: "r2".to_string(),
            first_comment: "x".to_string(),
            reason: "Rule involves excluded zone".to_string(),
            detail: "Zones: source: DMZ".to_string(),
        });

        let run_id = Uuid::new_v4();
        write_report(&path, &Report::new(run_id, "0.4.0", &stats)).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["device"], "fw-1");
        assert_eq!(value["run_id"], run_id.to_string());
        assert_eq!(value["summary"]["rules_disabled"], 1);
        assert_eq!(value["summary"]["stop_reason"]["kind"], "exhausted");
        assert!(value["summary"]["deployment"].is_null());
        assert_eq!(value["ignored_rules"][0]["detail"], "Zones: source: DMZ");

        // Overwrites in place
        write_report(&path, &Report::new(run_id, "0.4.0", &RunStatistics::new(true))).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["dry_run"], true);
    }
}
