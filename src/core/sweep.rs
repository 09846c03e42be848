//! Rule processing loop
//!
//! Walks the zero-hit candidates of one device strictly one at a time:
//! fetch the rule (with bounded retries), evaluate it, then disable it or
//! record why it was kept.
//!
//! # Failure handling
//!
//! - Transient fetch failures are retried after each delay of the
//!   [`RetryPolicy`]. A rule whose retries run out is counted as a connection
//!   failure and left untouched.
//! - A global consecutive-failure counter spans rules. It resets on every
//!   successful fetch; reaching the ceiling halts the whole run.
//! - A fetch or update with no usable result stops the run at once.
//!
//! With `autodeploy`, a live run that disabled at least one rule deploys the
//! pending changes to the device afterwards, even when the loop stopped early.
//!
//! Statistics collected up to the stop are always returned.

use crate::core::backend::{FetchOutcome, PolicyManager};
use crate::core::eligibility::{EligibilityEvaluator, Verdict};
use crate::core::error::{Error, Result};
use crate::core::resolver::NetworkResolver;
use crate::core::rule::{AccessRule, HitCountRecord, audit_comment};
use crate::core::stats::{Deployment, DisabledRule, IgnoredRule, RunStatistics, StopReason};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default disable ceiling per run
pub const DEFAULT_MAX_DISABLES: usize = 1000;

/// Timestamp format of the audit comment
const COMMENT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Backoff schedule and circuit-breaker ceiling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wait before each re-attempt; one re-attempt follows every delay
    pub delays: Vec<Duration>,
    /// Consecutive transient failures (across rules) that halt the run
    pub consecutive_failure_limit: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delays: [60, 90, 120, 240]
                .into_iter()
                .map(Duration::from_secs)
                .collect(),
            consecutive_failure_limit: 10,
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> usize {
        self.delays.len() + 1
    }
}

#[derive(Debug, Clone)]
pub struct SweepOptions {
    /// Record intent without mutating the manager
    pub dry_run: bool,
    pub max_disables: usize,
    pub retry: RetryPolicy,
    /// Deploy to the device after a live run that disabled rules
    pub autodeploy: bool,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            max_disables: DEFAULT_MAX_DISABLES,
            retry: RetryPolicy::default(),
            autodeploy: false,
        }
    }
}

/// Progress callbacks from the processing loop. All methods default to no-ops.
pub trait SweepObserver {
    fn started(&mut self, _candidates: usize) {}
    fn rule_processed(&mut self, _rule_name: &str, _stats: &RunStatistics) {}
    fn retrying(&mut self, _rule_name: &str, _attempt: usize, _delay: Duration) {}
    fn finished(&mut self, _stats: &RunStatistics) {}
}

impl SweepObserver for () {}

/// Result of fetching one rule through the retry loop
enum Fetch {
    Rule(AccessRule),
    /// Retries exhausted
    Failed,
    /// Consecutive-failure ceiling reached
    CircuitOpen,
    Fatal(String),
}

/// Result of applying a disable verdict
enum Applied {
    Done,
    Failed,
    CircuitOpen,
    Fatal(String),
}

/// Owns the run state of one sweep: resolver cache, failure counter and statistics
pub struct Sweeper<'m, M> {
    manager: &'m M,
    evaluator: EligibilityEvaluator,
    options: SweepOptions,
    resolver: NetworkResolver,
    consecutive_failures: usize,
    stats: RunStatistics,
}

impl<'m, M: PolicyManager> Sweeper<'m, M> {
    pub fn new(manager: &'m M, evaluator: EligibilityEvaluator, options: SweepOptions) -> Self {
        let stats = RunStatistics::new(options.dry_run);
        Self {
            manager,
            evaluator,
            options,
            resolver: NetworkResolver::new(),
            consecutive_failures: 0,
            stats,
        }
    }

    /// Looks up `device_name`, fetches its hit counts and processes the zero-hit
    /// rules, then deploys if `autodeploy` is set.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the device, its access policy or its hit counts cannot
    /// be retrieved. Failures inside the loop end up in the statistics instead.
    pub async fn sweep_device<O: SweepObserver>(
        mut self,
        device_name: &str,
        observer: &mut O,
    ) -> Result<RunStatistics> {
        let device = self.manager.device_by_name(device_name).await?;
        let access_policy_id = device.access_policy_id.clone().ok_or_else(|| {
            Error::NotFound(format!("access policy assigned to device '{}'", device.name))
        })?;
        info!(
            "Device '{}' ({}) uses access policy {access_policy_id}",
            device.name, device.id
        );

        let hits = self
            .manager
            .hit_counts(&access_policy_id, &device.id)
            .await?;

        let manager = self.manager;
        let autodeploy = self.options.autodeploy;
        self.stats.device = device.name;
        let mut stats = self.run(&access_policy_id, &hits, observer).await;

        if autodeploy {
            if stats.dry_run {
                info!("DRY RUN MODE - Skipping deployment");
            } else if stats.rules_disabled == 0 {
                info!("No rules disabled, nothing to deploy");
            } else {
                stats.deployment = Some(deploy(manager, &device.id).await);
            }
        }
        Ok(stats)
    }

    /// Processes the zero-hit access rules among `hits`.
    pub async fn run<O: SweepObserver>(
        mut self,
        access_policy_id: &str,
        hits: &[HitCountRecord],
        observer: &mut O,
    ) -> RunStatistics {
        self.stats.total_rules_analyzed = hits.len();
        let candidates: Vec<&HitCountRecord> = hits.iter().filter(|h| h.is_candidate()).collect();
        self.stats.zero_hit_rules = candidates.len();
        info!(
            "Found {} rules with zero hits out of {} analyzed",
            candidates.len(),
            hits.len()
        );
        if self.options.dry_run {
            info!("DRY RUN MODE - No changes will be made");
        }

        observer.started(candidates.len());

        for candidate in candidates {
            if self.stats.rules_disabled >= self.options.max_disables {
                warn!(
                    "Reached maximum number of rules to disable ({})",
                    self.options.max_disables
                );
                self.stats.stop_reason = StopReason::DisableCeiling;
                break;
            }

            let rule = match self.fetch_with_retry(access_policy_id, candidate, observer).await {
                Fetch::Rule(rule) => rule,
                Fetch::Failed => {
                    self.stats.record_connection_failure(&candidate.rule_id);
                    observer.rule_processed(&candidate.rule_name, &self.stats);
                    continue;
                }
                Fetch::CircuitOpen => {
                    self.stats.record_connection_failure(&candidate.rule_id);
                    self.stats.stop_reason = StopReason::CircuitBreaker;
                    break;
                }
                Fetch::Fatal(message) => {
                    self.stats.stop_reason = StopReason::Fatal(message);
                    break;
                }
            };

            let verdict = self
                .evaluator
                .evaluate(&rule, &mut self.resolver, self.manager)
                .await;

            if verdict.disable {
                match self.apply(access_policy_id, &rule, &verdict).await {
                    Applied::Done => {}
                    Applied::Failed => self.stats.record_connection_failure(&rule.id),
                    Applied::CircuitOpen => {
                        self.stats.record_connection_failure(&rule.id);
                        self.stats.stop_reason = StopReason::CircuitBreaker;
                        break;
                    }
                    Applied::Fatal(message) => {
                        self.stats.stop_reason = StopReason::Fatal(message);
                        break;
                    }
                }
            } else {
                debug!("Rule '{}' kept: {}", rule.name, verdict.reason);
                let detail = self.evaluator.explain(&rule, &verdict.reason);
                self.stats.record_ignored(IgnoredRule {
                    name: rule.name.clone(),
                    id: rule.id.clone(),
                    first_comment: rule.first_comment_display(),
                    reason: verdict.reason.to_string(),
                    detail,
                });
            }

            observer.rule_processed(&rule.name, &self.stats);
        }

        debug!(
            "Resolved network objects with {} manager lookups",
            self.resolver.lookups()
        );
        if self.stats.stop_reason.is_early() {
            warn!("Sweep stopped early: {}", self.stats.stop_reason);
        }
        observer.finished(&self.stats);
        self.stats
    }

    async fn fetch_with_retry<O: SweepObserver>(
        &mut self,
        access_policy_id: &str,
        candidate: &HitCountRecord,
        observer: &mut O,
    ) -> Fetch {
        let retry = &self.options.retry;
        let attempts = retry.max_attempts();

        for attempt in 0..attempts {
            match self
                .manager
                .fetch_rule(access_policy_id, &candidate.rule_id)
                .await
            {
                FetchOutcome::Success(rule) => {
                    self.consecutive_failures = 0;
                    return Fetch::Rule(rule);
                }
                FetchOutcome::Fatal(message) => {
                    error!(
                        "Failed to get details for rule {} ({}): {message}",
                        candidate.rule_name, candidate.rule_id
                    );
                    return Fetch::Fatal(message);
                }
                FetchOutcome::Retryable(message) => {
                    self.consecutive_failures += 1;
                    warn!(
                        "Connection error fetching rule {} (attempt {}/{attempts}): {message}",
                        candidate.rule_name,
                        attempt + 1
                    );

                    if self.consecutive_failures >= retry.consecutive_failure_limit {
                        error!(
                            "Too many consecutive connection failures ({}). Stopping.",
                            self.consecutive_failures
                        );
                        return Fetch::CircuitOpen;
                    }

                    if let Some(&delay) = retry.delays.get(attempt) {
                        info!("Waiting {}s before retry...", delay.as_secs());
                        observer.retrying(&candidate.rule_name, attempt + 1, delay);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        warn!(
            "Failed to fetch rule {} after {attempts} attempts, skipping",
            candidate.rule_name
        );
        Fetch::Failed
    }

    async fn apply(
        &mut self,
        access_policy_id: &str,
        rule: &AccessRule,
        verdict: &Verdict,
    ) -> Applied {
        let reason = verdict.reason.to_string();
        let record = DisabledRule {
            name: rule.name.clone(),
            id: rule.id.clone(),
            first_comment: rule.first_comment_display(),
            reason: reason.clone(),
        };

        if self.options.dry_run {
            info!("[DRY RUN] Would disable rule '{}': {reason}", rule.name);
            self.stats.record_disabled(record);
            return Applied::Done;
        }

        let timestamp = chrono::Local::now()
            .format(COMMENT_TIMESTAMP_FORMAT)
            .to_string();
        let comment = audit_comment(&timestamp, &reason);

        match self
            .manager
            .disable_rule(access_policy_id, rule, &comment)
            .await
        {
            FetchOutcome::Success(()) => {
                info!("Disabled rule '{}': {reason}", rule.name);
                self.stats.record_disabled(record);
                Applied::Done
            }
            FetchOutcome::Retryable(message) => {
                self.consecutive_failures += 1;
                warn!("Connection error disabling rule '{}': {message}", rule.name);
                if self.consecutive_failures >= self.options.retry.consecutive_failure_limit {
                    error!(
                        "Too many consecutive connection failures ({}). Stopping.",
                        self.consecutive_failures
                    );
                    Applied::CircuitOpen
                } else {
                    Applied::Failed
                }
            }
            FetchOutcome::Fatal(message) => {
                error!("Failed to disable rule '{}': {message}", rule.name);
                Applied::Fatal(message)
            }
        }
    }
}

async fn deploy<M: PolicyManager>(manager: &M, device_id: &str) -> Deployment {
    info!("Deploying changes to device {device_id}");
    match manager.deploy(device_id).await {
        Ok(deployment) => {
            info!("Deployment {deployment}");
            deployment
        }
        Err(e) => {
            error!("Deployment to device {device_id} failed: {e}");
            Deployment::Failed {
                message: e.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::eligibility::SweepPolicy;
    use crate::core::rule::{AUDIT_MARKER, Comment, ZoneRef};
    use crate::core::test_helpers::{FakeManager, create_test_rule, hit_record};
    use crate::core::zone::ZoneMatcher;

    fn fast_options(dry_run: bool) -> SweepOptions {
        SweepOptions {
            dry_run,
            max_disables: DEFAULT_MAX_DISABLES,
            retry: RetryPolicy {
                delays: vec![Duration::ZERO; 4],
                consecutive_failure_limit: 10,
            },
            autodeploy: false,
        }
    }

    fn evaluator() -> EligibilityEvaluator {
        let mut policy = SweepPolicy::new(2024);
        policy.zones = ZoneMatcher::new(["DMZ"]);
        EligibilityEvaluator::new(policy)
    }

    fn old_rule(id: &str) -> AccessRule {
        let mut rule = create_test_rule(id, &format!("rule-{id}"));
        rule.comments.push(Comment::new("2019-01-01", "created"));
        rule
    }

    fn recent_rule(id: &str) -> AccessRule {
        let mut rule = create_test_rule(id, &format!("rule-{id}"));
        rule.comments.push(Comment::new("2024-05-01", "created"));
        rule
    }

    fn zoned_rule(id: &str) -> AccessRule {
        let mut rule = old_rule(id);
        rule.source_zones.push(ZoneRef::new("z", "DMZ"));
        rule
    }

    async fn sweep(fake: &FakeManager, options: SweepOptions) -> RunStatistics {
        Sweeper::new(fake, evaluator(), options)
            .sweep_device("fw-1", &mut ())
            .await
            .unwrap()
    }

    fn manager() -> FakeManager {
        FakeManager::new().with_device("dev-1", "fw-1", Some("acp-1"))
    }

    #[tokio::test]
    async fn test_outcomes_are_counted() {
        let fake = manager()
            .with_rule(old_rule("1"), 0)
            .with_rule(recent_rule("2"), 0)
            .with_rule(zoned_rule("3"), 0)
            .with_rule(old_rule("4"), 12)
            .with_rule(old_rule("5"), 0)
            .with_fetch_outcomes(
                "5",
                std::iter::repeat_n(FetchOutcome::Retryable("timeout".to_string()), 5),
            );

        let stats = sweep(&fake, fast_options(false)).await;

        assert_eq!(stats.device, "fw-1");
        assert_eq!(stats.total_rules_analyzed, 5);
        assert_eq!(stats.zero_hit_rules, 4);
        assert_eq!(stats.rules_disabled, 1);
        assert_eq!(stats.rules_skipped, 2);
        assert_eq!(stats.connection_failures, 1);
        assert_eq!(stats.processed(), stats.zero_hit_rules);
        assert_eq!(stats.failed_rule_ids, vec!["5"]);
        assert_eq!(stats.stop_reason, StopReason::Exhausted);

        let calls = fake.disable_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].rule_id, "1");
        assert_eq!(calls[0].access_policy_id, "acp-1");
        assert!(calls[0].comment.starts_with(AUDIT_MARKER));
        assert!(calls[0].comment.ends_with("Rule created before 2024 (first comment: 2019-01-01)"));

        let ignored: Vec<&str> = stats.ignored.iter().map(|r| r.detail.as_str()).collect();
        assert_eq!(
            ignored,
            vec![
                "Rule created in 2024 (threshold: before 2024)",
                "Zones: source: DMZ"
            ]
        );
    }

    #[tokio::test]
    async fn test_dry_run_matches_live_without_mutations() {
        let build = || {
            manager()
                .with_rule(old_rule("1"), 0)
                .with_rule(recent_rule("2"), 0)
                .with_rule(create_test_rule("3", "uncommented"), 0)
        };

        let dry_fake = build();
        let dry = sweep(&dry_fake, fast_options(true)).await;
        let live_fake = build();
        let live = sweep(&live_fake, fast_options(false)).await;

        assert!(dry_fake.disable_calls().is_empty());
        assert_eq!(live_fake.disable_calls().len(), 2);

        assert!(dry.dry_run);
        assert_eq!(dry.rules_disabled, live.rules_disabled);
        assert_eq!(dry.rules_skipped, live.rules_skipped);
        assert_eq!(dry.connection_failures, live.connection_failures);
        assert_eq!(dry.disabled, live.disabled);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let fake = manager().with_rule(old_rule("1"), 0).with_fetch_outcomes(
            "1",
            [
                FetchOutcome::Retryable("reset".to_string()),
                FetchOutcome::Retryable("reset".to_string()),
            ],
        );

        let stats = sweep(&fake, fast_options(false)).await;
        assert_eq!(stats.rules_disabled, 1);
        assert_eq!(stats.connection_failures, 0);
        assert_eq!(fake.fetch_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_backoff_waits_between_attempts() {
        let fake = manager()
            .with_rule(old_rule("1"), 0)
            .with_fetch_outcomes("1", [FetchOutcome::Retryable("timeout".to_string())]);
        let options = SweepOptions {
            dry_run: true,
            ..SweepOptions::default()
        };

        let start = tokio::time::Instant::now();
        let stats = sweep(&fake, options).await;

        assert_eq!(stats.rules_disabled, 1);
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert!(start.elapsed() < Duration::from_secs(90));
    }

    #[tokio::test]
    async fn test_circuit_breaker_halts_run() {
        // Two rules exhaust their five attempts, the third trips the breaker
        let mut fake = manager();
        for id in ["1", "2", "3", "4"] {
            fake = fake.with_rule(old_rule(id), 0).with_fetch_outcomes(
                id,
                std::iter::repeat_n(FetchOutcome::Retryable("refused".to_string()), 5),
            );
        }
        let mut options = fast_options(false);
        options.retry.consecutive_failure_limit = 12;

        let stats = sweep(&fake, options).await;

        assert_eq!(stats.stop_reason, StopReason::CircuitBreaker);
        assert_eq!(stats.connection_failures, 3);
        assert_eq!(stats.failed_rule_ids, vec!["1", "2", "3"]);
        assert_eq!(fake.fetch_calls(), 12);
        assert!(fake.disable_calls().is_empty());
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let fake = manager()
            .with_rule(old_rule("1"), 0)
            .with_rule(old_rule("2"), 0)
            .with_fetch_outcomes(
                "1",
                std::iter::repeat_n(FetchOutcome::Retryable("timeout".to_string()), 2),
            )
            .with_fetch_outcomes(
                "2",
                std::iter::repeat_n(FetchOutcome::Retryable("timeout".to_string()), 2),
            );
        let mut options = fast_options(true);
        options.retry.consecutive_failure_limit = 3;

        let stats = sweep(&fake, options).await;
        assert_eq!(stats.rules_disabled, 2);
        assert_eq!(stats.stop_reason, StopReason::Exhausted);
    }

    #[tokio::test]
    async fn test_disable_ceiling_stops_before_fetch() {
        let fake = manager()
            .with_rule(old_rule("1"), 0)
            .with_rule(old_rule("2"), 0)
            .with_rule(old_rule("3"), 0);
        let mut options = fast_options(true);
        options.max_disables = 2;

        let stats = sweep(&fake, options).await;
        assert_eq!(stats.rules_disabled, 2);
        assert_eq!(stats.stop_reason, StopReason::DisableCeiling);
        assert_eq!(fake.fetch_calls(), 2);
    }

    #[tokio::test]
    async fn test_fatal_fetch_keeps_statistics() {
        let fake = manager()
            .with_rule(old_rule("1"), 0)
            .with_rule(old_rule("2"), 0)
            .with_rule(old_rule("3"), 0)
            .with_fetch_outcomes("2", [FetchOutcome::Fatal("empty response".to_string())]);

        let stats = sweep(&fake, fast_options(false)).await;
        assert_eq!(stats.rules_disabled, 1);
        assert_eq!(
            stats.stop_reason,
            StopReason::Fatal("empty response".to_string())
        );
        assert_eq!(fake.disable_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_update_counts_as_connection_failure() {
        let fake = manager()
            .with_rule(old_rule("1"), 0)
            .with_rule(old_rule("2"), 0)
            .with_disable_outcomes([FetchOutcome::Retryable("timeout".to_string())]);

        let stats = sweep(&fake, fast_options(false)).await;
        assert_eq!(stats.connection_failures, 1);
        assert_eq!(stats.failed_rule_ids, vec!["1"]);
        assert_eq!(stats.rules_disabled, 1);
        assert_eq!(fake.disable_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_fatal_update_stops_run() {
        let fake = manager()
            .with_rule(old_rule("1"), 0)
            .with_rule(old_rule("2"), 0)
            .with_rule(old_rule("3"), 0)
            .with_disable_outcomes([FetchOutcome::Fatal("rule body rejected".to_string())]);

        let stats = sweep(&fake, fast_options(false)).await;
        assert_eq!(
            stats.stop_reason,
            StopReason::Fatal("rule body rejected".to_string())
        );
        assert_eq!(stats.rules_disabled, 0);
        assert_eq!(stats.connection_failures, 0);
        assert!(fake.disable_calls().is_empty());
        // Rules 2 and 3 are never fetched
        assert_eq!(fake.fetch_calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_update_can_trip_circuit_breaker() {
        let fake = manager()
            .with_rule(old_rule("1"), 0)
            .with_rule(old_rule("2"), 0)
            .with_disable_outcomes([FetchOutcome::Retryable("timeout".to_string())]);
        let mut options = fast_options(false);
        options.retry.consecutive_failure_limit = 1;

        let stats = sweep(&fake, options).await;
        assert_eq!(stats.stop_reason, StopReason::CircuitBreaker);
        assert_eq!(stats.failed_rule_ids, vec!["1"]);
        assert_eq!(stats.connection_failures, 1);
        assert_eq!(stats.rules_disabled, 0);
        assert_eq!(fake.fetch_calls(), 1);
    }

    fn autodeploy_options(dry_run: bool) -> SweepOptions {
        SweepOptions {
            autodeploy: true,
            ..fast_options(dry_run)
        }
    }

    #[tokio::test]
    async fn test_autodeploy_after_live_disables() {
        let fake = manager()
            .with_rule(old_rule("1"), 0)
            .with_rule(recent_rule("2"), 0);

        let stats = sweep(&fake, autodeploy_options(false)).await;
        assert_eq!(fake.deploy_calls(), vec!["dev-1"]);
        assert_eq!(
            stats.deployment,
            Some(Deployment::Requested {
                task_id: Some("task-dev-1".to_string())
            })
        );
    }

    #[tokio::test]
    async fn test_autodeploy_skipped_without_live_disables() {
        let dry = manager().with_rule(old_rule("1"), 0);
        let stats = sweep(&dry, autodeploy_options(true)).await;
        assert_eq!(stats.rules_disabled, 1);
        assert!(dry.deploy_calls().is_empty());
        assert!(stats.deployment.is_none());

        let nothing_disabled = manager().with_rule(recent_rule("1"), 0);
        let stats = sweep(&nothing_disabled, autodeploy_options(false)).await;
        assert!(nothing_disabled.deploy_calls().is_empty());
        assert!(stats.deployment.is_none());

        let not_requested = manager().with_rule(old_rule("1"), 0);
        let stats = sweep(&not_requested, fast_options(false)).await;
        assert!(not_requested.deploy_calls().is_empty());
        assert!(stats.deployment.is_none());
    }

    #[tokio::test]
    async fn test_autodeploy_after_early_stop() {
        let fake = manager()
            .with_rule(old_rule("1"), 0)
            .with_rule(old_rule("2"), 0)
            .with_fetch_outcomes("2", [FetchOutcome::Fatal("empty response".to_string())]);

        let stats = sweep(&fake, autodeploy_options(false)).await;
        assert!(stats.stop_reason.is_early());
        assert_eq!(stats.rules_disabled, 1);
        assert_eq!(fake.deploy_calls(), vec!["dev-1"]);
    }

    #[tokio::test]
    async fn test_failed_deployment_keeps_statistics() {
        let fake = manager()
            .with_rule(old_rule("1"), 0)
            .with_failing_deploy();

        let stats = sweep(&fake, autodeploy_options(false)).await;
        assert_eq!(stats.rules_disabled, 1);
        let Some(Deployment::Failed { message }) = stats.deployment else {
            panic!("expected failed deployment");
        };
        assert!(message.contains("deployment refused"));
    }

    #[tokio::test]
    async fn test_missing_access_policy_is_an_error() {
        let fake = FakeManager::new().with_device("dev-1", "fw-1", None);
        let result = Sweeper::new(&fake, evaluator(), fast_options(true))
            .sweep_device("fw-1", &mut ())
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));

        let result = Sweeper::new(&fake, evaluator(), fast_options(true))
            .sweep_device("fw-2", &mut ())
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_non_access_rules_are_not_candidates() {
        use crate::core::rule::RuleType;
        let mut prefilter = hit_record("9", "prefilter", 0);
        prefilter.rule_type = RuleType::Other("PrefilterRule".to_string());
        let fake = manager().with_hit(prefilter);

        let stats = sweep(&fake, fast_options(false)).await;
        assert_eq!(stats.total_rules_analyzed, 1);
        assert_eq!(stats.zero_hit_rules, 0);
        assert_eq!(fake.fetch_calls(), 0);
    }

    #[derive(Default)]
    struct Recorder {
        started: usize,
        processed: Vec<String>,
        retries: usize,
        finished: bool,
    }

    impl SweepObserver for Recorder {
        fn started(&mut self, candidates: usize) {
            self.started = candidates;
        }
        fn rule_processed(&mut self, rule_name: &str, _stats: &RunStatistics) {
            self.processed.push(rule_name.to_string());
        }
        fn retrying(&mut self, _rule_name: &str, _attempt: usize, _delay: Duration) {
            self.retries += 1;
        }
        fn finished(&mut self, _stats: &RunStatistics) {
            self.finished = true;
        }
    }

    #[tokio::test]
    async fn test_observer_sees_progress() {
        let fake = manager()
            .with_rule(old_rule("1"), 0)
            .with_rule(recent_rule("2"), 0)
            .with_fetch_outcomes("2", [FetchOutcome::Retryable("timeout".to_string())]);
        let mut recorder = Recorder::default();

        Sweeper::new(&fake, evaluator(), fast_options(true))
            .sweep_device("fw-1", &mut recorder)
            .await
            .unwrap();

        assert_eq!(recorder.started, 2);
        assert_eq!(recorder.processed, vec!["rule-1", "rule-2"]);
        assert_eq!(recorder.retries, 1);
        assert!(recorder.finished);
    }
}
