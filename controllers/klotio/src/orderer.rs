//! Install order for App resources.

use crate::cluster::resource_kind;
use serde_json::Value;

/// Kinds that must exist before anything else, in this order. Every other
/// kind follows them, keeping its manifest order.
pub const RESOURCE_PRIORITY: [&str; 8] = [
    "Namespace",
    "ConfigMap",
    "Secret",
    "ServiceAccount",
    "ClusterRole",
    "ClusterRoleBinding",
    "Role",
    "RoleBinding",
];

/// Position of `kind` in the priority list; unlisted kinds sort last.
pub fn kind_priority(kind: Option<&str>) -> usize {
    kind.and_then(|kind| RESOURCE_PRIORITY.iter().position(|k| *k == kind))
        .unwrap_or(RESOURCE_PRIORITY.len())
}

/// Stable sort of resources into install order. Uninstall walks the result backwards.
pub fn order_resources(mut resources: Vec<Value>) -> Vec<Value> {
    resources.sort_by_key(|resource| kind_priority(resource_kind(resource)));
    resources
}
