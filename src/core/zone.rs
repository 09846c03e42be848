//! Security zone exclusion

use crate::core::rule::{AccessRule, Direction, ZoneRef};
use std::collections::HashSet;

/// Matches rule zones against the excluded zone names of a run
#[derive(Debug, Clone, Default)]
pub struct ZoneMatcher {
    excluded: HashSet<String>,
}

impl ZoneMatcher {
    pub fn new<I, S>(zones: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            excluded: zones.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.excluded.is_empty()
    }

    /// Returns `true` if any source or destination zone of `rule` is excluded
    pub fn in_excluded_zone(&self, rule: &AccessRule) -> bool {
        !self.is_empty() && rule.zones().any(|(_, zone)| self.excluded.contains(&zone.name))
    }

    /// Excluded zones attached to `rule`, in rule order
    pub fn matching_zones<'r>(
        &self,
        rule: &'r AccessRule,
    ) -> impl Iterator<Item = (Direction, &'r ZoneRef)> {
        rule.zones()
            .filter(move |(_, zone)| self.excluded.contains(&zone.name))
    }
}
