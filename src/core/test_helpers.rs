//! Shared test utilities for core module tests
//!
//! Provides an in-memory policy manager and rule builders so engine tests
//! never touch the network. This module is only compiled in test mode.

use crate::core::backend::{FetchOutcome, ObjectDirectory, PolicyManager};
use crate::core::error::{Error, Result};
use crate::core::rule::{
    AccessRule, DeviceRecord, HitCountRecord, NetworkObject, NetworkObjectRef, ObjectKind,
    RuleType,
};
use crate::core::stats::Deployment;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};

/// A disable call recorded by [`FakeManager`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisableCall {
    pub access_policy_id: String,
    pub rule_id: String,
    pub comment: String,
}

/// In-memory manager with scripted fetch and update outcomes.
///
/// Rule fetches first drain any scripted outcomes for that rule id, then fall
/// back to the stored rule. Unknown rule ids are fatal.
#[derive(Debug, Default)]
pub struct FakeManager {
    devices: Vec<DeviceRecord>,
    hits: Vec<HitCountRecord>,
    rules: HashMap<String, AccessRule>,
    objects: HashMap<String, NetworkObject>,
    fetch_script: RefCell<HashMap<String, VecDeque<FetchOutcome<AccessRule>>>>,
    disable_script: RefCell<VecDeque<FetchOutcome<()>>>,
    object_calls: RefCell<HashMap<String, usize>>,
    fetch_calls: Cell<usize>,
    disabled: RefCell<Vec<DisableCall>>,
    deploy_fails: bool,
    deployed: RefCell<Vec<String>>,
}

impl FakeManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, id: &str, name: &str, access_policy_id: Option<&str>) -> Self {
        self.devices.push(DeviceRecord {
            id: id.to_string(),
            name: name.to_string(),
            access_policy_id: access_policy_id.map(String::from),
        });
        self
    }

    /// Stores `rule` and reports it with `hit_count` hits
    pub fn with_rule(mut self, rule: AccessRule, hit_count: u64) -> Self {
        self.hits.push(hit_record(&rule.id, &rule.name, hit_count));
        self.rules.insert(rule.id.clone(), rule);
        self
    }

    pub fn with_hit(mut self, record: HitCountRecord) -> Self {
        self.hits.push(record);
        self
    }

    pub fn with_object(mut self, id: &str, object: NetworkObject) -> Self {
        self.objects.insert(id.to_string(), object);
        self
    }

    /// Queues outcomes returned by the next fetches of `rule_id`
    pub fn with_fetch_outcomes(
        self,
        rule_id: &str,
        outcomes: impl IntoIterator<Item = FetchOutcome<AccessRule>>,
    ) -> Self {
        self.fetch_script
            .borrow_mut()
            .entry(rule_id.to_string())
            .or_default()
            .extend(outcomes);
        self
    }

    /// Queues outcomes returned by the next disable calls, in call order
    pub fn with_disable_outcomes(
        self,
        outcomes: impl IntoIterator<Item = FetchOutcome<()>>,
    ) -> Self {
        self.disable_script.borrow_mut().extend(outcomes);
        self
    }

    /// Makes every deployment request fail
    pub fn with_failing_deploy(mut self) -> Self {
        self.deploy_fails = true;
        self
    }

    pub fn object_lookups(&self, id: &str) -> usize {
        self.object_calls.borrow().get(id).copied().unwrap_or(0)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.get()
    }

    pub fn disable_calls(&self) -> Vec<DisableCall> {
        self.disabled.borrow().clone()
    }

    /// Device ids deployments were requested for
    pub fn deploy_calls(&self) -> Vec<String> {
        self.deployed.borrow().clone()
    }
}

impl ObjectDirectory for FakeManager {
    async fn network_object(&self, reference: &NetworkObjectRef) -> Result<NetworkObject> {
        *self
            .object_calls
            .borrow_mut()
            .entry(reference.id.clone())
            .or_default() += 1;
        self.objects
            .get(&reference.id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("network object {}", reference.id)))
    }
}

impl PolicyManager for FakeManager {
    async fn device_by_name(&self, name: &str) -> Result<DeviceRecord> {
        self.devices
            .iter()
            .find(|d| d.name == name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("device '{name}'")))
    }

    async fn hit_counts(
        &self,
        _access_policy_id: &str,
        _device_id: &str,
    ) -> Result<Vec<HitCountRecord>> {
        Ok(self.hits.clone())
    }

    async fn fetch_rule(&self, _access_policy_id: &str, rule_id: &str) -> FetchOutcome<AccessRule> {
        self.fetch_calls.set(self.fetch_calls.get() + 1);
        if let Some(outcome) = self
            .fetch_script
            .borrow_mut()
            .get_mut(rule_id)
            .and_then(VecDeque::pop_front)
        {
            return outcome;
        }
        match self.rules.get(rule_id) {
            Some(rule) => FetchOutcome::Success(rule.clone()),
            None => FetchOutcome::Fatal(format!("no rule {rule_id}")),
        }
    }

    async fn disable_rule(
        &self,
        access_policy_id: &str,
        rule: &AccessRule,
        comment: &str,
    ) -> FetchOutcome<()> {
        let outcome = self
            .disable_script
            .borrow_mut()
            .pop_front()
            .unwrap_or(FetchOutcome::Success(()));
        if outcome == FetchOutcome::Success(()) {
            self.disabled.borrow_mut().push(DisableCall {
                access_policy_id: access_policy_id.to_string(),
                rule_id: rule.id.clone(),
                comment: comment.to_string(),
            });
        }
        outcome
    }

    async fn deploy(&self, device_id: &str) -> Result<Deployment> {
        self.deployed.borrow_mut().push(device_id.to_string());
        if self.deploy_fails {
            return Err(Error::Api {
                status: 400,
                message: "deployment refused".to_string(),
            });
        }
        Ok(Deployment::Requested {
            task_id: Some(format!("task-{device_id}")),
        })
    }
}

/// Creates an enabled ALLOW rule with no zones, networks or comments.
pub fn create_test_rule(id: &str, name: &str) -> AccessRule {
    AccessRule::new(id, name)
}

pub fn hit_record(rule_id: &str, rule_name: &str, hit_count: u64) -> HitCountRecord {
    HitCountRecord {
        rule_id: rule_id.to_string(),
        rule_name: rule_name.to_string(),
        rule_type: RuleType::AccessRule,
        hit_count,
    }
}

pub fn host(value: &str) -> NetworkObject {
    NetworkObject::Host {
        value: value.to_string(),
    }
}

pub fn network(value: &str) -> NetworkObject {
    NetworkObject::Network {
        value: value.to_string(),
    }
}

/// Group with literal members and `(id, type)` object members
pub fn group(literals: &[&str], objects: &[(&str, &str)]) -> NetworkObject {
    NetworkObject::Group {
        literals: literals.iter().map(ToString::to_string).collect(),
        objects: objects
            .iter()
            .map(|(id, kind)| NetworkObjectRef::new(*id, ObjectKind::from(*kind), None))
            .collect(),
    }
}
