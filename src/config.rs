//! Sweep configuration
//!
//! Settings come from `config.json` (in the XDG config dir or a path given on
//! the command line). Command-line flags override file values field by field.
//! The password is never stored in the file.

use crate::core::eligibility::{EligibilityEvaluator, SweepPolicy};
use crate::core::error::{Error, Result};
use crate::core::prefix::{MatchMode, PrefixMatcher};
use crate::core::rule::RuleAction;
use crate::core::sweep::{DEFAULT_MAX_DISABLES, RetryPolicy, SweepOptions};
use crate::core::zone::ZoneMatcher;
use crate::fmc::ClientConfig;
use crate::utils::get_config_dir;
use crate::validators;
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete sweep configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Manager host name or base URL
    pub host: Option<String>,
    pub username: Option<String>,
    /// Target device (cluster or HA pair name for clustered devices)
    pub device: Option<String>,
    /// Accept the manager's self-signed certificate
    pub insecure: bool,
    pub timeout_secs: u64,
    pub page_limit: usize,
    pub dry_run: bool,
    pub max_disables: usize,
    /// Deploy to the device after a live run that disabled rules
    pub autodeploy: bool,
    pub exclude_zones: Vec<String>,
    pub exclude_prefixes: Vec<String>,
    pub prefix_match_mode: MatchMode,
    pub rule_actions: Vec<RuleAction>,
    /// Defaults to the previous calendar year
    pub year_threshold: Option<i32>,
    pub retry_delays_secs: Vec<u64>,
    pub consecutive_failure_limit: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            host: None,
            username: None,
            device: None,
            insecure: false,
            timeout_secs: 10,
            page_limit: 500,
            dry_run: false,
            max_disables: DEFAULT_MAX_DISABLES,
            autodeploy: false,
            exclude_zones: Vec::new(),
            exclude_prefixes: Vec::new(),
            prefix_match_mode: MatchMode::default(),
            rule_actions: vec![RuleAction::Allow],
            year_threshold: None,
            retry_delays_secs: retry.delays.iter().map(Duration::as_secs).collect(),
            consecutive_failure_limit: retry.consecutive_failure_limit,
        }
    }
}

impl SweepConfig {
    /// Checks every field that can be validated without contacting the manager.
    ///
    /// Invalid exclusion prefixes are not errors; they are skipped with a
    /// warning when the policy is built.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first invalid field.
    pub fn validate(&self, current_year: i32) -> Result<()> {
        if let Some(host) = &self.host {
            validators::validate_host(host).map_err(|e| Error::config("host", e))?;
        }
        for zone in &self.exclude_zones {
            validators::validate_zone_name(zone).map_err(|e| Error::config("exclude_zones", e))?;
        }
        validators::validate_rule_actions(&self.rule_actions)
            .map_err(|e| Error::config("rule_actions", e))?;
        if let Some(year) = self.year_threshold {
            validators::validate_year_threshold(year, current_year)
                .map_err(|e| Error::config("year_threshold", e))?;
        }
        if self.max_disables == 0 {
            return Err(Error::config("max_disables", "must be at least 1"));
        }
        if self.page_limit == 0 {
            return Err(Error::config("page_limit", "must be at least 1"));
        }
        if self.consecutive_failure_limit == 0 {
            return Err(Error::config(
                "consecutive_failure_limit",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    /// Year threshold, resolved against `now` when not configured
    pub fn resolved_year_threshold(&self, now: chrono::DateTime<chrono::Utc>) -> i32 {
        self.year_threshold
            .unwrap_or_else(|| SweepPolicy::default_year_threshold(now))
    }

    /// Builds the immutable per-run policy.
    pub fn policy(&self, now: chrono::DateTime<chrono::Utc>) -> SweepPolicy {
        SweepPolicy {
            zones: ZoneMatcher::new(self.exclude_zones.iter().cloned()),
            prefixes: PrefixMatcher::new(
                validators::parse_exclusion_prefixes(&self.exclude_prefixes),
                self.prefix_match_mode,
            ),
            allowed_actions: self.rule_actions.clone(),
            year_threshold: self.resolved_year_threshold(now),
        }
    }

    pub fn evaluator(&self, now: chrono::DateTime<chrono::Utc>) -> EligibilityEvaluator {
        EligibilityEvaluator::new(self.policy(now))
    }

    pub fn sweep_options(&self) -> SweepOptions {
        SweepOptions {
            dry_run: self.dry_run,
            max_disables: self.max_disables,
            retry: RetryPolicy {
                delays: self
                    .retry_delays_secs
                    .iter()
                    .copied()
                    .map(Duration::from_secs)
                    .collect(),
                consecutive_failure_limit: self.consecutive_failure_limit,
            },
            autodeploy: self.autodeploy,
        }
    }

    /// Connection settings for the REST client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the host or username is missing.
    pub fn client_config(&self, password: &str) -> Result<ClientConfig> {
        let host = self
            .host
            .as_deref()
            .ok_or_else(|| Error::config("host", "no manager host configured"))?;
        let username = self
            .username
            .as_deref()
            .ok_or_else(|| Error::config("username", "no username configured"))?;

        let mut config = ClientConfig::new(host, username, password);
        config.insecure = self.insecure;
        config.timeout = Duration::from_secs(self.timeout_secs);
        config.page_limit = self.page_limit;
        Ok(config)
    }

    /// Target device name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no device is configured.
    pub fn device_name(&self) -> Result<&str> {
        self.device
            .as_deref()
            .ok_or_else(|| Error::config("device", "no target device configured"))
    }
}

/// Default location of `config.json`
pub fn default_config_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join("config.json"))
}

/// Loads the sweep config.
///
/// An explicit `path` must exist. Without one the default location is tried
/// and a missing file yields the defaults.
///
/// # Errors
///
/// Returns [`Error::Config`] if the file cannot be read or parsed.
pub async fn load_config(path: Option<&Path>) -> Result<SweepConfig> {
    let (path, required) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => match default_config_path() {
            Some(path) => (path, false),
            None => return Ok(SweepConfig::default()),
        },
    };

    let json = match tokio::fs::read_to_string(&path).await {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
            return Ok(SweepConfig::default());
        }
        Err(e) => {
            return Err(Error::config(
                "config",
                format!("cannot read {}: {e}", path.display()),
            ));
        }
    };

    serde_json::from_str(&json)
        .map_err(|e| Error::config("config", format!("{}: {e}", path.display())))
}

/// The current year, for validation
pub fn current_year() -> i32 {
    chrono::Utc::now().year()
}
