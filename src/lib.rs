//! rulesweep - unused access rule cleanup for FMC
//!
//! Finds access rules with zero hits on a managed device and disables the ones
//! no exclusion protects, leaving an audit comment on each.
//!
//! # Architecture
//!
//! - [`core`] - Rule model, exclusion matchers, eligibility engine and sweep loop
//! - [`fmc`] - REST client for the management center
//! - [`config`] - Configuration file and per-run policy
//! - [`report`] - Console summary, disabled-rule table and JSON report
//! - [`audit`] - Audit log of every change made on the manager
//! - [`validators`] - Input validation
//! - [`utils`] - Utility functions (XDG directories, text truncation)
//!
//! # Safety Features
//!
//! - Dry-run mode with identical statistics and no mutations
//! - Per-run ceiling on disabled rules
//! - Circuit breaker on sustained connection failures
//! - Zone and prefix exclusions checked before any age or comment test
//! - Disable and audit comment applied in a single update

// Allow pedantic clippy warnings that are not worth fixing for this codebase
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_errors_doc)]

pub mod audit;
pub mod config;
pub mod core;
pub mod fmc;
pub mod report;
pub mod utils;
pub mod validators;

// Re-export commonly used types
pub use core::backend::{FetchOutcome, ObjectDirectory, PolicyManager};
pub use core::eligibility::{EligibilityEvaluator, Reason, SweepPolicy, Verdict};
pub use core::error::{Error, Result};
pub use core::stats::RunStatistics;
pub use core::sweep::{RetryPolicy, SweepObserver, SweepOptions, Sweeper};
