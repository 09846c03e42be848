//! FMC REST payloads
//!
//! Only the fields the sweep reads are modelled; everything else in the
//! manager's JSON is ignored. Payloads are converted into core types right
//! here so nothing past the client sees raw JSON.

use crate::core::error::{Error, Result};
use crate::core::rule::{
    AccessRule, Comment, DeviceRecord, HitCountRecord, NetworkObject, NetworkObjectRef,
    NetworkSide, ObjectKind, RuleAction, RuleType, ZoneRef,
};
use serde::Deserialize;
use serde_json::Value;

/// Fields the manager refuses on update
const READ_ONLY_RULE_FIELDS: [&str; 3] = ["metadata", "links", "commentHistoryList"];

/// One page of a collection endpoint
#[derive(Debug, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(default)]
    pub paging: Paging,
}

#[derive(Debug, Default, Deserialize)]
pub struct Paging {
    /// Total number of items across all pages
    #[serde(default)]
    pub count: usize,
}

#[derive(Debug, Deserialize)]
pub struct IdRef {
    pub id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireDevice {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub access_policy: Option<IdRef>,
}

impl From<WireDevice> for DeviceRecord {
    fn from(device: WireDevice) -> Self {
        DeviceRecord {
            id: device.id,
            name: device.name,
            access_policy_id: device.access_policy.map(|p| p.id),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireHitCount {
    #[serde(default)]
    pub hit_count: u64,
    pub rule: WireHitRule,
}

#[derive(Debug, Deserialize)]
pub struct WireHitRule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

impl From<WireHitCount> for HitCountRecord {
    fn from(record: WireHitCount) -> Self {
        HitCountRecord {
            rule_type: RuleType::from(record.rule.kind.as_deref().unwrap_or("Unknown")),
            rule_id: record.rule.id,
            rule_name: record.rule.name,
            hit_count: record.hit_count,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ObjectList<T> {
    #[serde(default = "Vec::new")]
    pub objects: Vec<T>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WireZone {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct WireObjectRef {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl From<WireObjectRef> for NetworkObjectRef {
    fn from(object: WireObjectRef) -> Self {
        NetworkObjectRef {
            kind: ObjectKind::from(object.kind.as_str()),
            id: object.id,
            name: object.name,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WireLiteral {
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct WireNetworks {
    #[serde(default)]
    pub objects: Vec<WireObjectRef>,
    #[serde(default)]
    pub literals: Vec<WireLiteral>,
}

impl From<WireNetworks> for NetworkSide {
    fn from(networks: WireNetworks) -> Self {
        NetworkSide {
            literals: networks
                .literals
                .into_iter()
                .map(|l| l.value)
                .filter(|v| !v.is_empty())
                .collect(),
            objects: networks.objects.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WireComment {
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireAccessRule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "missing_action")]
    pub action: RuleAction,
    #[serde(default)]
    pub source_zones: ObjectList<WireZone>,
    #[serde(default)]
    pub destination_zones: ObjectList<WireZone>,
    #[serde(default)]
    pub source_networks: WireNetworks,
    #[serde(default)]
    pub destination_networks: WireNetworks,
    #[serde(default)]
    pub comment_history_list: Vec<WireComment>,
}

/// A rule without an action never passes the action gate
fn missing_action() -> RuleAction {
    RuleAction::Unknown
}

impl From<WireAccessRule> for AccessRule {
    fn from(rule: WireAccessRule) -> Self {
        let zones = |list: ObjectList<WireZone>| -> Vec<ZoneRef> {
            list.objects
                .into_iter()
                .map(|z| ZoneRef::new(z.id, z.name))
                .collect()
        };

        AccessRule {
            id: rule.id,
            name: rule.name,
            enabled: rule.enabled,
            action: rule.action,
            source_zones: zones(rule.source_zones),
            destination_zones: zones(rule.destination_zones),
            source_networks: rule.source_networks.into(),
            destination_networks: rule.destination_networks.into(),
            comments: rule
                .comment_history_list
                .into_iter()
                .map(|c| Comment::new(c.date, c.comment))
                .collect(),
        }
    }
}

/// Host, network, range or group object body
#[derive(Debug, Deserialize)]
pub struct WireNetworkObject {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub literals: Vec<WireLiteral>,
    #[serde(default)]
    pub objects: Vec<WireObjectRef>,
}

impl WireNetworkObject {
    /// Converts the body of an object fetched as `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if a host, network or range has no value,
    /// or if `kind` cannot be flattened.
    pub fn into_network_object(self, kind: &ObjectKind) -> Result<NetworkObject> {
        let value = || {
            self.value
                .clone()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| Error::Internal(format!("{kind} object has no value")))
        };

        match kind {
            ObjectKind::Host => Ok(NetworkObject::Host { value: value()? }),
            ObjectKind::Network => Ok(NetworkObject::Network { value: value()? }),
            ObjectKind::Range => Ok(NetworkObject::Range { value: value()? }),
            ObjectKind::NetworkGroup => Ok(NetworkObject::Group {
                literals: self
                    .literals
                    .into_iter()
                    .map(|l| l.value)
                    .filter(|v| !v.is_empty())
                    .collect(),
                objects: self.objects.into_iter().map(Into::into).collect(),
            }),
            ObjectKind::Other(other) => Err(Error::Internal(format!(
                "unsupported network object type '{other}'"
            ))),
        }
    }
}

/// Turns a fetched rule body into the update body that disables it.
///
/// Read-only fields are dropped, `enabled` is cleared and `comment` is added
/// as the only new comment.
///
/// # Errors
///
/// Returns [`Error::Internal`] if `raw` is not a JSON object.
pub fn disable_body(mut raw: Value, comment: &str) -> Result<Value> {
    let Some(body) = raw.as_object_mut() else {
        return Err(Error::Internal("rule body is not a JSON object".to_string()));
    };

    for field in READ_ONLY_RULE_FIELDS {
        body.remove(field);
    }
    body.insert("enabled".to_string(), Value::Bool(false));
    body.insert(
        "newComments".to_string(),
        Value::Array(vec![Value::String(comment.to_string())]),
    );

    Ok(raw)
}

/// Entry of `/deployment/deployabledevices`: a device with undeployed changes
#[derive(Debug, Deserialize)]
pub struct WireDeployableDevice {
    /// Configuration version the deployment request must quote
    #[serde(default)]
    pub version: Value,
    pub device: IdRef,
}

/// Body of a deployment request for one device
pub fn deployment_request(version: &Value, device_id: &str) -> Value {
    serde_json::json!({
        "type": "DeploymentRequest",
        "version": version,
        "forceDeploy": false,
        "ignoreWarning": true,
        "deviceList": [device_id],
    })
}

/// Task id from a deployment request response
pub fn deployment_task_id(response: &Value) -> Option<String> {
    response
        .pointer("/metadata/task/id")
        .and_then(Value::as_str)
        .map(str::to_string)
}
