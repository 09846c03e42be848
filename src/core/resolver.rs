//! Network object resolution
//!
//! Flattens named network objects into the literals the prefix matcher
//! understands. Groups may nest other groups and the nesting graph may contain
//! cycles, so resolution tracks the path of ids currently being expanded and
//! stops at any id already on that path.
//!
//! # Caching
//!
//! Two run-scoped caches are kept:
//!
//! - fetched objects, so every distinct id costs at most one manager lookup
//!   per run (failed lookups are remembered too)
//! - resolved literal lists, populated once a resolution no longer depends on
//!   the path it was reached through
//!
//! A group inside a cycle resolved through a back edge only sees part of the
//! cycle. Its list is not memoized; the next resolution rebuilds it from the
//! fetched-object cache without another lookup.

use crate::core::backend::ObjectDirectory;
use crate::core::rule::{NetworkObject, NetworkObjectRef, ObjectKind};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use tracing::{debug, warn};

/// Resolved literals plus the shallowest ancestor depth hit by a back edge
struct Resolution {
    networks: Vec<String>,
    back_edge: Option<usize>,
}

impl Resolution {
    fn complete(networks: Vec<String>) -> Self {
        Self {
            networks,
            back_edge: None,
        }
    }
}

/// Run-scoped resolver for named network objects
#[derive(Debug, Default)]
pub struct NetworkResolver {
    fetched: HashMap<String, Option<NetworkObject>>,
    resolved: HashMap<String, Vec<String>>,
    lookups: usize,
}

impl NetworkResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of manager lookups issued so far
    pub fn lookups(&self) -> usize {
        self.lookups
    }

    /// Resolves `reference` to CIDR, address and range literals.
    ///
    /// Never fails: unknown types, cycles and lookup errors are logged and
    /// contribute nothing.
    pub async fn resolve<D: ObjectDirectory>(
        &mut self,
        directory: &D,
        reference: &NetworkObjectRef,
    ) -> Vec<String> {
        self.resolve_on_path(directory, reference, &[]).await.networks
    }

    async fn resolve_on_path<D: ObjectDirectory>(
        &mut self,
        directory: &D,
        reference: &NetworkObjectRef,
        path: &[String],
    ) -> Resolution {
        if let Some(networks) = self.resolved.get(&reference.id) {
            debug!("Using cached network object: {}", reference.id);
            return Resolution::complete(networks.clone());
        }

        if let Some(depth) = path.iter().position(|id| *id == reference.id) {
            warn!(
                "Circular reference detected for network object {} ({})",
                reference.label(),
                reference.id
            );
            return Resolution {
                networks: Vec::new(),
                back_edge: Some(depth),
            };
        }

        if let ObjectKind::Other(kind) = &reference.kind {
            warn!(
                "Unknown network object type '{kind}' for {} ({})",
                reference.label(),
                reference.id
            );
            self.resolved.insert(reference.id.clone(), Vec::new());
            return Resolution::complete(Vec::new());
        }

        let depth = path.len();
        let mut networks = Vec::new();
        let mut back_edge: Option<usize> = None;

        match self.fetch(directory, reference).await {
            Some(NetworkObject::Host { value }) => networks.push(host_literal(&value)),
            Some(NetworkObject::Network { value } | NetworkObject::Range { value }) => {
                networks.push(value);
            }
            Some(NetworkObject::Group { literals, objects }) => {
                networks.extend(literals);

                // Each branch gets its own copy of the path
                let mut branch = path.to_vec();
                branch.push(reference.id.clone());

                for nested in &objects {
                    let child = Box::pin(self.resolve_on_path(directory, nested, &branch)).await;
                    networks.extend(child.networks);
                    back_edge = match (back_edge, child.back_edge) {
                        (Some(a), Some(b)) => Some(a.min(b)),
                        (a, b) => a.or(b),
                    };
                }
            }
            None => {}
        }

        dedup_in_order(&mut networks);

        // Back edges to this node are closed here; only ancestors above it
        // make the list path-dependent
        let back_edge = back_edge.filter(|&d| d < depth);
        if back_edge.is_none() {
            debug!(
                "Resolved network object {} to {} networks",
                reference.id,
                networks.len()
            );
            self.resolved.insert(reference.id.clone(), networks.clone());
        }

        Resolution {
            networks,
            back_edge,
        }
    }

    async fn fetch<D: ObjectDirectory>(
        &mut self,
        directory: &D,
        reference: &NetworkObjectRef,
    ) -> Option<NetworkObject> {
        if let Some(object) = self.fetched.get(&reference.id) {
            return object.clone();
        }

        self.lookups += 1;
        let object = match directory.network_object(reference).await {
            Ok(object) => Some(object),
            Err(e) => {
                warn!(
                    "Error resolving network object {} ({}): {e}",
                    reference.label(),
                    reference.id
                );
                None
            }
        };

        self.fetched.insert(reference.id.clone(), object.clone());
        object
    }
}

/// Host objects carry a bare address; make it a single-address prefix
fn host_literal(value: &str) -> String {
    match value.trim().parse::<IpAddr>() {
        Ok(IpAddr::V4(addr)) => format!("{addr}/32"),
        Ok(IpAddr::V6(addr)) => format!("{addr}/128"),
        Err(_) => value.to_string(),
    }
}

fn dedup_in_order(networks: &mut Vec<String>) {
    let mut seen = HashSet::new();
    networks.retain(|n| seen.insert(n.clone()));
}
