//! Boundary traits for the network-policy manager
//!
//! The sweep engine only talks to the manager through these traits. The REST
//! implementation lives in [`crate::fmc`]; tests use an in-memory fake.
//!
//! Calls are awaited one at a time. The manager rate-limits per user, so the
//! engine never issues requests concurrently.

#![allow(async_fn_in_trait)]

use crate::core::error::{Error, Result};
use crate::core::rule::{AccessRule, DeviceRecord, HitCountRecord, NetworkObject, NetworkObjectRef};
use crate::core::stats::Deployment;

/// Result of a rule fetch or update, classified for the retry loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome<T> {
    Success(T),
    /// Connection-level failure worth retrying after a backoff
    Retryable(String),
    /// Authentication-style failure or unusable payload: stop the run
    Fatal(String),
}

impl<T> FetchOutcome<T> {
    /// Classifies a library error. Transient transport errors are retryable,
    /// everything else is fatal.
    pub fn from_error(err: &Error) -> Self {
        if err.is_transient() {
            FetchOutcome::Retryable(err.to_string())
        } else {
            FetchOutcome::Fatal(err.to_string())
        }
    }
}

impl<T> From<Result<T>> for FetchOutcome<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => FetchOutcome::Success(value),
            Err(e) => FetchOutcome::from_error(&e),
        }
    }
}

/// Named-object lookups used by the network resolver
pub trait ObjectDirectory {
    /// Fetches one network object by reference.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the object cannot be fetched or decoded.
    async fn network_object(&self, reference: &NetworkObjectRef) -> Result<NetworkObject>;
}

/// Device, hit-count and rule operations on the manager
pub trait PolicyManager: ObjectDirectory {
    /// Looks up a managed device by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no device carries that name.
    async fn device_by_name(&self, name: &str) -> Result<DeviceRecord>;

    /// Fetches the hit counters of every rule of `access_policy_id` on `device_id`.
    ///
    /// # Errors
    ///
    /// Returns `Err` on transport or decoding failures.
    async fn hit_counts(
        &self,
        access_policy_id: &str,
        device_id: &str,
    ) -> Result<Vec<HitCountRecord>>;

    /// Fetches a rule's details.
    async fn fetch_rule(&self, access_policy_id: &str, rule_id: &str) -> FetchOutcome<AccessRule>;

    /// Disables a rule and appends `comment` to its history in one update.
    async fn disable_rule(
        &self,
        access_policy_id: &str,
        rule: &AccessRule,
        comment: &str,
    ) -> FetchOutcome<()>;

    /// Deploys the manager's pending changes to `device_id`.
    ///
    /// Returns [`Deployment::NotPending`] when the device has nothing to deploy.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the pending list cannot be read or the request is refused.
    async fn deploy(&self, device_id: &str) -> Result<Deployment>;
}
