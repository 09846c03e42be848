//! Disable-eligibility decisions
//!
//! Checks run in a fixed order and the first one that decides wins:
//!
//! 1. Excluded security zone → keep
//! 2. Excluded IP prefix (literals and resolved objects, both directions) → keep
//! 3. Rule disabled, or action outside the allowed set → keep
//! 4. Comment history:
//!    - no comments → disable
//!    - first comment written by this tool → disable again (idempotent)
//!    - first comment dated before the year threshold → disable
//!    - anything else → keep
//!
//! The first comment is treated as both the creation record and the marker
//! location. Rules whose history was edited after this tool commented on them
//! are not detected as previously flagged.

use crate::core::backend::ObjectDirectory;
use crate::core::prefix::PrefixMatcher;
use crate::core::resolver::NetworkResolver;
use crate::core::rule::{AccessRule, RuleAction, is_audit_comment};
use crate::core::zone::ZoneMatcher;
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

/// Maximum network references listed in a prefix exclusion detail
const DETAIL_NETWORK_LIMIT: usize = 4;

/// Immutable per-run policy
#[derive(Debug, Clone)]
pub struct SweepPolicy {
    pub zones: ZoneMatcher,
    pub prefixes: PrefixMatcher,
    /// Only rules with one of these actions are disable candidates
    pub allowed_actions: Vec<RuleAction>,
    /// Rules first commented before this year are disable candidates
    pub year_threshold: i32,
}

impl SweepPolicy {
    /// Policy with no exclusions, ALLOW rules only
    pub fn new(year_threshold: i32) -> Self {
        Self {
            zones: ZoneMatcher::default(),
            prefixes: PrefixMatcher::default(),
            allowed_actions: vec![RuleAction::Allow],
            year_threshold,
        }
    }

    /// The previous calendar year relative to `now`
    pub fn default_year_threshold(now: chrono::DateTime<chrono::Utc>) -> i32 {
        use chrono::Datelike;
        now.year() - 1
    }
}

/// Why a rule was disabled or kept
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reason {
    ExcludedZone,
    ExcludedPrefix,
    InactiveOrAction {
        enabled: bool,
        action: RuleAction,
        allowed: Vec<RuleAction>,
    },
    NoCommentHistory,
    PreviouslyMarked {
        comment: String,
    },
    CreatedBefore {
        threshold: i32,
        first_comment_date: String,
    },
    CriteriaNotMet,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::ExcludedZone => f.write_str("Rule involves excluded zone"),
            Reason::ExcludedPrefix => f.write_str("Rule involves excluded IP prefix"),
            Reason::InactiveOrAction {
                enabled: false,
                action,
                ..
            } => write!(f, "Rule is not enabled (action '{action}')"),
            Reason::InactiveOrAction {
                action, allowed, ..
            } => write!(
                f,
                "Rule action '{action}' not in allowed actions [{}]",
                join_actions(allowed)
            ),
            Reason::NoCommentHistory => f.write_str("No comment history found"),
            Reason::PreviouslyMarked { comment } => {
                write!(f, "Rule previously marked by script: {comment}")
            }
            Reason::CreatedBefore {
                threshold,
                first_comment_date,
            } => write!(
                f,
                "Rule created before {threshold} (first comment: {first_comment_date})"
            ),
            Reason::CriteriaNotMet => f.write_str("Rule does not meet disable criteria"),
        }
    }
}

fn join_actions(actions: &[RuleAction]) -> String {
    actions
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<&str>>()
        .join(", ")
}

/// Disable-or-keep decision for one rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub disable: bool,
    pub reason: Reason,
}

impl Verdict {
    pub fn disable(reason: Reason) -> Self {
        Self {
            disable: true,
            reason,
        }
    }

    pub fn keep(reason: Reason) -> Self {
        Self {
            disable: false,
            reason,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EligibilityEvaluator {
    policy: SweepPolicy,
}

impl EligibilityEvaluator {
    pub fn new(policy: SweepPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SweepPolicy {
        &self.policy
    }

    /// Full evaluation, resolving named network objects through `directory`.
    pub async fn evaluate<D: ObjectDirectory>(
        &self,
        rule: &AccessRule,
        resolver: &mut NetworkResolver,
        directory: &D,
    ) -> Verdict {
        if let Some(verdict) = self.zone_gate(rule) {
            return verdict;
        }

        if self.uses_excluded_prefix(rule, resolver, directory).await {
            info!("Rule '{}' skipped - involves excluded IP prefix", rule.name);
            return Verdict::keep(Reason::ExcludedPrefix);
        }

        self.state_and_history(rule)
    }

    /// Evaluation without a manager to resolve objects against.
    ///
    /// The prefix check is skipped entirely.
    pub fn evaluate_offline(&self, rule: &AccessRule) -> Verdict {
        self.zone_gate(rule)
            .unwrap_or_else(|| self.state_and_history(rule))
    }

    fn zone_gate(&self, rule: &AccessRule) -> Option<Verdict> {
        if self.policy.zones.in_excluded_zone(rule) {
            info!("Rule '{}' skipped - involves excluded zone", rule.name);
            return Some(Verdict::keep(Reason::ExcludedZone));
        }
        None
    }

    async fn uses_excluded_prefix<D: ObjectDirectory>(
        &self,
        rule: &AccessRule,
        resolver: &mut NetworkResolver,
        directory: &D,
    ) -> bool {
        let prefixes = &self.policy.prefixes;
        if prefixes.is_empty() {
            return false;
        }

        for (direction, side) in rule.network_sides() {
            for literal in &side.literals {
                if prefixes.overlaps_excluded(literal) {
                    info!(
                        "Rule '{}' uses excluded prefix in {} literal: {literal}",
                        rule.name,
                        direction.display_name()
                    );
                    return true;
                }
            }

            for object in &side.objects {
                if object.is_any() {
                    if prefixes.matches_any() {
                        info!(
                            "Rule '{}' uses 'any' in {} which overlaps with excluded prefixes \
                             ({} mode)",
                            rule.name,
                            direction.display_name(),
                            prefixes.mode()
                        );
                        return true;
                    }
                    debug!(
                        "Rule '{}' uses 'any' in {} - ignoring in {} mode",
                        rule.name,
                        direction.display_name(),
                        prefixes.mode()
                    );
                    continue;
                }

                for network in resolver.resolve(directory, object).await {
                    if prefixes.overlaps_excluded(&network) {
                        info!(
                            "Rule '{}' uses excluded prefix in {} object '{}': {network}",
                            rule.name,
                            direction.display_name(),
                            object.label()
                        );
                        return true;
                    }
                }
            }
        }

        false
    }

    fn state_and_history(&self, rule: &AccessRule) -> Verdict {
        if !(rule.enabled && self.policy.allowed_actions.contains(&rule.action)) {
            return Verdict::keep(Reason::InactiveOrAction {
                enabled: rule.enabled,
                action: rule.action,
                allowed: self.policy.allowed_actions.clone(),
            });
        }

        let Some(first) = rule.first_comment() else {
            return Verdict::disable(Reason::NoCommentHistory);
        };

        if is_audit_comment(&first.text) {
            return Verdict::disable(Reason::PreviouslyMarked {
                comment: first.text.clone(),
            });
        }

        match first.year() {
            Some(year) if year < self.policy.year_threshold => {
                Verdict::disable(Reason::CreatedBefore {
                    threshold: self.policy.year_threshold,
                    first_comment_date: first.date.clone(),
                })
            }
            Some(_) => Verdict::keep(Reason::CriteriaNotMet),
            None => {
                warn!(
                    "Could not parse date for rule '{}': {}",
                    rule.name, first.date
                );
                Verdict::keep(Reason::CriteriaNotMet)
            }
        }
    }

    /// Human-readable breakdown of what triggered `reason` on `rule`.
    ///
    /// Presentation only; the verdict itself never depends on this text.
    pub fn explain(&self, rule: &AccessRule, reason: &Reason) -> String {
        match reason {
            Reason::ExcludedZone => {
                let zones: Vec<String> = self
                    .policy
                    .zones
                    .matching_zones(rule)
                    .map(|(direction, zone)| format!("{}: {}", direction.display_name(), zone.name))
                    .collect();
                if zones.is_empty() {
                    "Excluded zone found".to_string()
                } else {
                    format!("Zones: {}", zones.join(", "))
                }
            }
            Reason::ExcludedPrefix => {
                let mut networks = Vec::new();
                for (direction, side) in rule.network_sides() {
                    for literal in &side.literals {
                        networks.push(format!("{}:{literal}", direction.short()));
                    }
                    for object in &side.objects {
                        if object.is_any() {
                            networks.push(format!("{}:ANY", direction.short()));
                        } else {
                            networks.push(format!("{}:{}", direction.short(), object.label()));
                        }
                    }
                }

                let mode = self.policy.prefixes.mode();
                if networks.is_empty() {
                    return format!("mode:{mode} | (network details unavailable)");
                }

                let mut listed = networks
                    .iter()
                    .take(DETAIL_NETWORK_LIMIT)
                    .cloned()
                    .collect::<Vec<String>>()
                    .join(", ");
                if networks.len() > DETAIL_NETWORK_LIMIT {
                    listed.push_str(&format!(
                        " (+{} more)",
                        networks.len() - DETAIL_NETWORK_LIMIT
                    ));
                }
                format!("mode:{mode} | {listed}")
            }
            Reason::InactiveOrAction {
                enabled,
                action,
                allowed,
            } => format!(
                "Enabled: {enabled} | Action: {action} | Required actions: {}",
                join_actions(allowed)
            ),
            Reason::CriteriaNotMet => {
                let threshold = self.policy.year_threshold;
                match rule.first_comment() {
                    Some(first) => match first.year() {
                        Some(year) => {
                            format!("Rule created in {year} (threshold: before {threshold})")
                        }
                        None => format!(
                            "Rule created: {} | Threshold: before {threshold}",
                            first.date
                        ),
                    },
                    None => format!(
                        "Rule does not meet age criteria (threshold: before {threshold})"
                    ),
                }
            }
            other => other.to_string(),
        }
    }
}
