//! Reserved annotation keys on the owning resource.

use std::collections::{BTreeMap, HashMap};

/// Set to `"true"` while the replica count is owned by an external autoscaler.
pub const REPLICAS_MANAGED_BY_AUTOSCALER: &str = "cluster.x-k8s.io/replicas-managed-by-autoscaler";

/// Annotations with this prefix are forwarded as HTTP headers on every
/// mutating cloud call, with the prefix stripped.
pub const CUSTOM_HEADER_PREFIX: &str = "infrastructure.cluster.x-k8s.io/custom-header-";

/// Which party owns the replica count of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaOwner {
    Reconciler,
    Autoscaler,
}

impl ReplicaOwner {
    /// Read ownership from the annotation value. Anything but `"true"` means
    /// the reconciler owns the count.
    pub fn from_annotation(value: Option<&str>) -> Self {
        match value {
            Some("true") => ReplicaOwner::Autoscaler,
            _ => ReplicaOwner::Reconciler,
        }
    }

    pub fn annotation_value(&self) -> &'static str {
        match self {
            ReplicaOwner::Autoscaler => "true",
            ReplicaOwner::Reconciler => "false",
        }
    }
}

/// Keep entries whose key starts with `prefix`, stripping the prefix.
pub fn filter_by_key_prefix(raw: &HashMap<String, String>, prefix: &str) -> BTreeMap<String, String> {
    raw.iter()
        .filter_map(|(key, value)| {
            key.strip_prefix(prefix)
                .map(|header| (header.to_string(), value.clone()))
        })
        .collect()
}

/// Headers to forward on mutating calls for a resource with `annotations`.
pub fn custom_headers(annotations: &HashMap<String, String>) -> BTreeMap<String, String> {
    filter_by_key_prefix(annotations, CUSTOM_HEADER_PREFIX)
}
