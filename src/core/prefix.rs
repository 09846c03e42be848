//! IP prefix exclusion matching
//!
//! Tests rule network literals against the configured exclusion prefixes.
//! A literal is one of:
//!
//! - CIDR: `10.1.0.0/16`, `2001:db8::/32` (host bits are ignored)
//! - Bare address: `10.1.2.3`, treated as a host (`/32` or `/128`)
//! - Range: `10.1.1.1-10.1.1.10`
//! - The `any` sentinel
//!
//! # Match Modes
//!
//! - [`MatchMode::Overlap`]: the literal shares at least one address with an
//!   excluded prefix. Supersets match too, so a rule scoped to `any` is excluded.
//! - [`MatchMode::Subnet`]: the literal lies entirely inside an excluded prefix.
//!   Supersets never match.
//!
//! Ranges are matched address by address. Ranges wider than
//! [`RANGE_EXPANSION_LIMIT`] addresses only have their first and last address
//! tested.
//!
//! Malformed literals never match; they are logged and the rest of the rule is
//! still evaluated.

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use tracing::{debug, warn};

/// Largest range tested address by address
pub const RANGE_EXPANSION_LIMIT: u128 = 256;

/// Strategy for matching literals against excluded prefixes
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Default,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MatchMode {
    /// Any shared address excludes the rule
    #[default]
    Overlap,
    /// Only literals fully contained in an excluded prefix exclude the rule
    Subnet,
}

/// Inclusive numeric address span of one family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AddrSpan {
    v6: bool,
    start: u128,
    end: u128,
}

impl AddrSpan {
    fn from_network(network: IpNetwork) -> Self {
        match network {
            IpNetwork::V4(net) => {
                let bits = u32::from(net.ip());
                let prefix = u32::from(net.prefix());
                let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
                let start = bits & mask;
                Self {
                    v6: false,
                    start: u128::from(start),
                    end: u128::from(start | !mask),
                }
            }
            IpNetwork::V6(net) => {
                let bits = u128::from(net.ip());
                let prefix = u32::from(net.prefix());
                let mask = if prefix == 0 { 0 } else { u128::MAX << (128 - prefix) };
                let start = bits & mask;
                Self {
                    v6: true,
                    start,
                    end: start | !mask,
                }
            }
        }
    }

    fn host(addr: IpAddr) -> Self {
        let (v6, value) = addr_bits(addr);
        Self {
            v6,
            start: value,
            end: value,
        }
    }

    fn overlaps(&self, other: &AddrSpan) -> bool {
        self.v6 == other.v6 && self.start <= other.end && other.start <= self.end
    }

    fn within(&self, other: &AddrSpan) -> bool {
        self.v6 == other.v6 && self.start >= other.start && self.end <= other.end
    }
}

fn addr_bits(addr: IpAddr) -> (bool, u128) {
    match addr {
        IpAddr::V4(v4) => (false, u128::from(u32::from(v4))),
        IpAddr::V6(v6) => (true, u128::from(v6)),
    }
}

/// A parsed network literal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Literal {
    Any,
    Span(AddrSpan),
    Range { v6: bool, start: u128, end: u128 },
}

fn parse_literal(token: &str) -> Result<Literal, String> {
    let token = token.trim();

    if token.eq_ignore_ascii_case("any") {
        return Ok(Literal::Any);
    }

    if let Some((start, end)) = token.split_once('-') {
        let start: IpAddr = start
            .trim()
            .parse()
            .map_err(|e| format!("invalid range start: {e}"))?;
        let end: IpAddr = end
            .trim()
            .parse()
            .map_err(|e| format!("invalid range end: {e}"))?;
        let (start_v6, start) = addr_bits(start);
        let (end_v6, end) = addr_bits(end);
        if start_v6 != end_v6 {
            return Err("range mixes IPv4 and IPv6".to_string());
        }
        if start > end {
            return Err("range start is after range end".to_string());
        }
        return Ok(Literal::Range {
            v6: start_v6,
            start,
            end,
        });
    }

    if let Ok(addr) = token.parse::<IpAddr>() {
        return Ok(Literal::Span(AddrSpan::host(addr)));
    }

    token
        .parse::<IpNetwork>()
        .map(|net| Literal::Span(AddrSpan::from_network(net)))
        .map_err(|e| e.to_string())
}

/// Matches network literals against the excluded prefixes of a run
#[derive(Debug, Clone, Default)]
pub struct PrefixMatcher {
    excluded: Vec<IpNetwork>,
    spans: Vec<AddrSpan>,
    mode: MatchMode,
}

impl PrefixMatcher {
    pub fn new(excluded: Vec<IpNetwork>, mode: MatchMode) -> Self {
        let spans = excluded.iter().copied().map(AddrSpan::from_network).collect();
        Self {
            excluded,
            spans,
            mode,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.excluded.is_empty()
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    pub fn excluded(&self) -> &[IpNetwork] {
        &self.excluded
    }

    /// Whether a reference to `any` counts as excluded under the current mode
    pub fn matches_any(&self) -> bool {
        self.mode == MatchMode::Overlap && !self.is_empty()
    }

    /// Returns `true` if `token` hits an excluded prefix under the current mode.
    ///
    /// Unparsable tokens are logged and never match.
    pub fn overlaps_excluded(&self, token: &str) -> bool {
        if self.is_empty() {
            return false;
        }

        match parse_literal(token) {
            Ok(Literal::Any) => self.matches_any(),
            Ok(Literal::Span(span)) => self.matches_span(&span),
            Ok(Literal::Range { v6, start, end }) => self.matches_range(token, v6, start, end),
            Err(e) => {
                warn!("Invalid IP/network '{token}': {e}");
                false
            }
        }
    }

    fn matches_span(&self, span: &AddrSpan) -> bool {
        self.spans.iter().any(|excluded| match self.mode {
            MatchMode::Overlap => span.overlaps(excluded),
            MatchMode::Subnet => span.within(excluded),
        })
    }

    fn matches_range(&self, token: &str, v6: bool, start: u128, end: u128) -> bool {
        let host = |value| AddrSpan {
            v6,
            start: value,
            end: value,
        };

        // end - start >= limit means more than `limit` addresses
        if end - start >= RANGE_EXPANSION_LIMIT {
            warn!(
                "IP range {token} spans more than {RANGE_EXPANSION_LIMIT} addresses, \
                 checking start and end only"
            );
            return self.matches_span(&host(start)) || self.matches_span(&host(end));
        }

        let hit = (start..=end).any(|value| self.matches_span(&host(value)));
        if hit {
            debug!("IP range {token} has an address inside an excluded prefix");
        }
        hit
    }
}
