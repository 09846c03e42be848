//! Core rule sweep functionality
//!
//! This module contains the manager-independent types and the decision engine.
//! It provides:
//!
//! - [`rule`]: Access rules, network objects and hit-count records
//! - [`backend`]: Traits the engine uses to talk to the manager
//! - [`zone`]: Security zone exclusion
//! - [`prefix`]: IP prefix exclusion with overlap and subnet matching
//! - [`resolver`]: Cycle-safe flattening of named network objects
//! - [`eligibility`]: Ordered disable-or-keep decisions with reasons
//! - [`sweep`]: The retrying, circuit-breaking rule processing loop
//! - [`stats`]: Run statistics and per-rule outcome records
//! - [`error`]: Error types for manager and configuration failures

pub mod backend;
pub mod eligibility;
pub mod error;
pub mod prefix;
pub mod resolver;
pub mod rule;
pub mod stats;
pub mod sweep;
pub mod zone;

#[cfg(test)]
pub mod test_helpers;
