//! Input validation for sweep settings
//!
//! Everything here runs on values coming from the command line or the config
//! file, before any request is sent to the manager.

use crate::core::rule::RuleAction;
use ipnetwork::IpNetwork;
use tracing::warn;

/// FMC limits security zone names to 48 characters
const MAX_ZONE_NAME_LEN: usize = 48;

/// Oldest year accepted as a threshold
const MIN_YEAR_THRESHOLD: i32 = 2000;

/// Actions a sweep may be configured to disable
pub const DISABLEABLE_ACTIONS: [RuleAction; 2] = [RuleAction::Allow, RuleAction::Block];

/// Validates an exclusion prefix in CIDR notation.
///
/// A bare address is accepted as a single-host prefix. Host bits below the
/// mask are allowed and ignored.
///
/// # Examples
///
/// ```
/// use rulesweep::validators::validate_exclusion_prefix;
///
/// assert!(validate_exclusion_prefix("10.0.0.0/8").is_ok());
/// assert!(validate_exclusion_prefix("2001:db8::/32").is_ok());
/// assert!(validate_exclusion_prefix("10.0.0.0/33").is_err());
/// ```
///
/// # Errors
///
/// Returns `Err` if the input is not an IPv4 or IPv6 prefix.
pub fn validate_exclusion_prefix(input: &str) -> Result<IpNetwork, String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err("Prefix is empty".to_string());
    }
    trimmed
        .parse::<IpNetwork>()
        .map_err(|e| format!("Invalid prefix '{trimmed}': {e}"))
}

/// Parses exclusion prefixes, warning about and skipping invalid entries.
pub fn parse_exclusion_prefixes<S: AsRef<str>>(inputs: &[S]) -> Vec<IpNetwork> {
    inputs
        .iter()
        .filter_map(|input| match validate_exclusion_prefix(input.as_ref()) {
            Ok(network) => {
                if let Some(warning) = check_broad_prefix(network) {
                    warn!("Exclusion prefix {network}: {warning}");
                }
                Some(network)
            }
            Err(e) => {
                warn!("{e} - skipping");
                None
            }
        })
        .collect()
}

/// Validates a security zone name.
///
/// # Errors
///
/// Returns `Err` if the name is empty, too long or contains control characters.
pub fn validate_zone_name(name: &str) -> Result<String, String> {
    if name.trim().is_empty() {
        return Err("Zone name is empty".to_string());
    }

    if name.len() > MAX_ZONE_NAME_LEN {
        return Err(format!(
            "Zone name too long (max {MAX_ZONE_NAME_LEN} characters)"
        ));
    }

    if name.chars().any(char::is_control) {
        return Err("Zone name contains control characters".to_string());
    }

    Ok(name.to_string())
}

/// Validates the creation-year threshold against the current year.
///
/// # Errors
///
/// Returns `Err` if `year` is before 2000 or after next year.
pub fn validate_year_threshold(year: i32, current_year: i32) -> Result<i32, String> {
    if year < MIN_YEAR_THRESHOLD {
        return Err(format!(
            "Year threshold {year} is before {MIN_YEAR_THRESHOLD}"
        ));
    }

    if year > current_year + 1 {
        return Err(format!(
            "Year threshold {year} is in the future (current year {current_year})"
        ));
    }

    Ok(year)
}

/// Validates the set of actions considered for disabling.
///
/// # Errors
///
/// Returns `Err` if the set is empty or contains an action other than ALLOW or BLOCK.
pub fn validate_rule_actions(actions: &[RuleAction]) -> Result<(), String> {
    if actions.is_empty() {
        return Err("At least one rule action is required".to_string());
    }

    if let Some(action) = actions.iter().find(|a| !DISABLEABLE_ACTIONS.contains(a)) {
        return Err(format!(
            "Rule action '{action}' cannot be swept (allowed: ALLOW, BLOCK)"
        ));
    }

    Ok(())
}

/// Validates the manager host, with or without an `http(s)://` scheme.
///
/// # Errors
///
/// Returns `Err` if the host is empty, has another scheme or contains
/// characters outside host names, IP literals and ports.
pub fn validate_host(host: &str) -> Result<String, String> {
    let host = host.trim();
    let bare = host
        .strip_prefix("https://")
        .or_else(|| host.strip_prefix("http://"))
        .unwrap_or(host)
        .trim_end_matches('/');

    if bare.is_empty() {
        return Err("Host is empty".to_string());
    }

    if bare.contains("://") {
        return Err("Only http and https URLs are supported".to_string());
    }

    if !bare
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':' | '[' | ']'))
    {
        return Err(format!("Host '{bare}' contains invalid characters"));
    }

    Ok(host.to_string())
}

/// Returns an informational warning for prefixes wide enough to exclude most rules.
pub fn check_broad_prefix(network: IpNetwork) -> Option<String> {
    match network {
        IpNetwork::V4(_) | IpNetwork::V6(_) if network.prefix() == 0 => Some(
            "covers every address - every rule with a network match will be skipped".to_string(),
        ),
        IpNetwork::V4(_) if network.prefix() < 8 => {
            Some("very broad IPv4 prefix - most rules will be skipped".to_string())
        }
        IpNetwork::V6(_) if network.prefix() < 16 => {
            Some("very broad IPv6 prefix - most rules will be skipped".to_string())
        }
        _ => None,
    }
}
