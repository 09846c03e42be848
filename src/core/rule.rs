//! Access rule data structures
//!
//! This module defines the typed entities the decision engine works on. The FMC
//! client decodes wire JSON into these types at the boundary (see [`crate::fmc::wire`]),
//! so nothing in [`crate::core`] branches on untyped maps.
//!
//! # Rule Structure
//!
//! An [`AccessRule`] carries:
//! - Enable/disable state and the rule [`RuleAction`]
//! - Source/destination security zones
//! - Source/destination networks, each split into literals and named object references
//! - The ordered comment history (earliest first)
//!
//! # Example
//!
//! ```
//! use rulesweep::core::rule::{AccessRule, Comment, RuleAction};
//!
//! let mut rule = AccessRule::new("005056A1-0000-0ed3-0000-000268434433", "Legacy SMTP");
//! rule.action = RuleAction::Allow;
//! rule.comments.push(Comment::new("2019-03-01T10:00:00Z", "created for migration"));
//!
//! assert_eq!(rule.first_comment_display(), "created for migration (2019-03-01T10:00:00Z)");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Marker token embedded in every comment this tool writes.
///
/// Later runs recognise a rule they already flagged by finding this token in the
/// rule's first comment, so the string must never change.
pub const AUDIT_MARKER: &str = "DisabledByHitCountScript";

/// Hit-count rule type tag for regular access rules.
pub const ACCESS_RULE_TYPE: &str = "AccessRule";

/// Builds the audit comment written onto a disabled rule.
///
/// Format: `<marker> <YYYY-mm-dd HH:MM:SS> - <reason>`
pub fn audit_comment(timestamp: &str, reason: &str) -> String {
    format!("{AUDIT_MARKER} {timestamp} - {reason}")
}

/// Returns `true` if a comment was written by this tool.
pub fn is_audit_comment(text: &str) -> bool {
    text.contains(AUDIT_MARKER)
}

/// Access rule action as reported by the manager
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    Default,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum RuleAction {
    #[default]
    Allow,
    Trust,
    Block,
    BlockReset,
    BlockInteractive,
    BlockResetInteractive,
    Monitor,
    /// Anything the manager adds in later releases
    #[serde(other)]
    Unknown,
}

/// Security zone attached to a rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneRef {
    pub id: String,
    pub name: String,
}

impl ZoneRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Network object type tag
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Host,
    Network,
    Range,
    NetworkGroup,
    /// Types the resolver cannot flatten (FQDN, geolocation, ...)
    Other(String),
}

impl ObjectKind {
    pub fn as_str(&self) -> &str {
        match self {
            ObjectKind::Host => "Host",
            ObjectKind::Network => "Network",
            ObjectKind::Range => "Range",
            ObjectKind::NetworkGroup => "NetworkGroup",
            ObjectKind::Other(other) => other,
        }
    }
}

impl From<&str> for ObjectKind {
    fn from(value: &str) -> Self {
        match value {
            "Host" => ObjectKind::Host,
            "Network" => ObjectKind::Network,
            "Range" => ObjectKind::Range,
            "NetworkGroup" => ObjectKind::NetworkGroup,
            other => ObjectKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference from a rule (or a group) to a named network object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkObjectRef {
    pub id: String,
    pub kind: ObjectKind,
    pub name: Option<String>,
}

impl NetworkObjectRef {
    pub fn new(id: impl Into<String>, kind: ObjectKind, name: Option<&str>) -> Self {
        Self {
            id: id.into(),
            kind,
            name: name.map(String::from),
        }
    }

    /// Returns the display name, falling back to the id
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// The built-in `any` object stands for every address
    pub fn is_any(&self) -> bool {
        self.name
            .as_deref()
            .is_some_and(|n| n.eq_ignore_ascii_case("any"))
    }
}

/// A fetched network object, flattened one level
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkObject {
    Host { value: String },
    Network { value: String },
    Range { value: String },
    Group {
        literals: Vec<String>,
        objects: Vec<NetworkObjectRef>,
    },
}

/// One side (source or destination) of a rule's network match
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkSide {
    pub literals: Vec<String>,
    pub objects: Vec<NetworkObjectRef>,
}

impl NetworkSide {
    pub fn is_empty(&self) -> bool {
        self.literals.is_empty() && self.objects.is_empty()
    }
}

/// Traffic direction of a zone or network reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Source,
    Destination,
}

impl Direction {
    /// Short prefix used in report details
    pub const fn short(self) -> &'static str {
        match self {
            Direction::Source => "src",
            Direction::Destination => "dst",
        }
    }

    pub const fn display_name(self) -> &'static str {
        match self {
            Direction::Source => "source",
            Direction::Destination => "destination",
        }
    }
}

/// A rule comment history entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    /// Date as sent by the manager, e.g. `2019-03-01T10:00:00Z`
    pub date: String,
    pub text: String,
}

impl Comment {
    pub fn new(date: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            text: text.into(),
        }
    }

    /// Year of the comment date, if the date starts with one
    pub fn year(&self) -> Option<i32> {
        self.date.split('-').next()?.trim().parse().ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRule {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub action: RuleAction,
    pub source_zones: Vec<ZoneRef>,
    pub destination_zones: Vec<ZoneRef>,
    pub source_networks: NetworkSide,
    pub destination_networks: NetworkSide,
    /// Comment history, earliest first
    pub comments: Vec<Comment>,
}

impl AccessRule {
    /// Creates an enabled ALLOW rule with no zones, networks or comments
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            enabled: true,
            action: RuleAction::Allow,
            source_zones: Vec::new(),
            destination_zones: Vec::new(),
            source_networks: NetworkSide::default(),
            destination_networks: NetworkSide::default(),
            comments: Vec::new(),
        }
    }

    pub fn first_comment(&self) -> Option<&Comment> {
        self.comments.first()
    }

    /// First comment rendered as `text (date)` for reports
    pub fn first_comment_display(&self) -> String {
        match self.first_comment() {
            Some(c) if !c.text.is_empty() && !c.date.is_empty() => {
                format!("{} ({})", c.text, c.date)
            }
            Some(c) if !c.text.is_empty() => c.text.clone(),
            _ => "No comment history".to_string(),
        }
    }

    /// Zones of both directions, source first
    pub fn zones(&self) -> impl Iterator<Item = (Direction, &ZoneRef)> {
        self.source_zones
            .iter()
            .map(|z| (Direction::Source, z))
            .chain(
                self.destination_zones
                    .iter()
                    .map(|z| (Direction::Destination, z)),
            )
    }

    /// Network sides of both directions, source first
    pub fn network_sides(&self) -> [(Direction, &NetworkSide); 2] {
        [
            (Direction::Source, &self.source_networks),
            (Direction::Destination, &self.destination_networks),
        ]
    }
}

/// Rule type tag carried by a hit-count record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleType {
    AccessRule,
    /// Default action, prefilter and other informational entries
    Other(String),
}

impl From<&str> for RuleType {
    fn from(value: &str) -> Self {
        if value == ACCESS_RULE_TYPE {
            RuleType::AccessRule
        } else {
            RuleType::Other(value.to_string())
        }
    }
}

/// Hit counter for one rule on one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HitCountRecord {
    pub rule_id: String,
    pub rule_name: String,
    pub rule_type: RuleType,
    pub hit_count: u64,
}

impl HitCountRecord {
    /// Zero-hit regular access rules are the only disable candidates
    pub fn is_candidate(&self) -> bool {
        self.hit_count == 0 && self.rule_type == RuleType::AccessRule
    }
}

/// Managed device as returned by the device lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub id: String,
    pub name: String,
    pub access_policy_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_audit_comment_is_recognised() {
        let comment = audit_comment("2025-01-02 03:04:05", "No comment history found");
        assert!(comment.starts_with(AUDIT_MARKER));
        assert!(comment.contains("2025-01-02 03:04:05 - No comment history found"));
        assert!(is_audit_comment(&comment));
        assert!(!is_audit_comment("created by change 4411"));
    }

    #[test]
    fn test_rule_action_parsing() {
        assert_eq!(RuleAction::from_str("ALLOW").unwrap(), RuleAction::Allow);
        assert_eq!(RuleAction::from_str("block").unwrap(), RuleAction::Block);
        assert_eq!(
            RuleAction::from_str("BLOCK_RESET").unwrap(),
            RuleAction::BlockReset
        );
        assert_eq!(RuleAction::Allow.to_string(), "ALLOW");
    }

    #[test]
    fn test_rule_action_unknown_wire_value() {
        let action: RuleAction = serde_json::from_str("\"RATE_LIMIT\"").unwrap();
        assert_eq!(action, RuleAction::Unknown);
    }

    #[test]
    fn test_object_kind_from_str() {
        assert_eq!(ObjectKind::from("NetworkGroup"), ObjectKind::NetworkGroup);
        assert_eq!(
            ObjectKind::from("FQDN"),
            ObjectKind::Other("FQDN".to_string())
        );
        assert_eq!(ObjectKind::from("FQDN").to_string(), "FQDN");
    }

    #[test]
    fn test_comment_year() {
        assert_eq!(Comment::new("2019-03-01", "x").year(), Some(2019));
        assert_eq!(Comment::new("2021-12-31T23:59:59Z", "x").year(), Some(2021));
        assert_eq!(Comment::new("", "x").year(), None);
        assert_eq!(Comment::new("yesterday", "x").year(), None);
    }

    #[test]
    fn test_first_comment_display() {
        let mut rule = AccessRule::new("1", "r");
        assert_eq!(rule.first_comment_display(), "No comment history");

        rule.comments.push(Comment::new("2020-01-01", "first"));
        rule.comments.push(Comment::new("2024-01-01", "second"));
        assert_eq!(rule.first_comment_display(), "first (2020-01-01)");
    }

    #[test]
    fn test_any_object_detection() {
        let any = NetworkObjectRef::new("1", ObjectKind::Network, Some("ANY"));
        let named = NetworkObjectRef::new("2", ObjectKind::Network, Some("any-ipv4-dmz"));
        let unnamed = NetworkObjectRef::new("3", ObjectKind::Network, None);
        assert!(any.is_any());
        assert!(!named.is_any());
        assert!(!unnamed.is_any());
        assert_eq!(unnamed.label(), "3");
    }

    #[test]
    fn test_candidate_selection() {
        let record = |hits, kind: &str| HitCountRecord {
            rule_id: "1".to_string(),
            rule_name: "r".to_string(),
            rule_type: RuleType::from(kind),
            hit_count: hits,
        };
        assert!(record(0, "AccessRule").is_candidate());
        assert!(!record(3, "AccessRule").is_candidate());
        assert!(!record(0, "DefaultAction").is_candidate());
    }
}
