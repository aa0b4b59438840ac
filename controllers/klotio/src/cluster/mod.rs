//! Cluster API seam.
//!
//! Everything the reconcilers need from the cluster goes through
//! `ClusterApi`, so they can run against the in-memory `MockCluster` in
//! tests and against `KubeCluster` in production.

pub mod kinds;
pub mod kube_cluster;

use crate::error::ClusterError;
use crds::App;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Service};
use serde_json::Value;
use std::collections::BTreeMap;

pub use kinds::KindRegistry;
pub use kube_cluster::KubeCluster;

/// Operations on the cluster API used by the controller.
#[async_trait::async_trait]
pub trait ClusterApi: Send + Sync {
    /// Every App object, unconverted. Each one is converted on its own so
    /// a malformed App cannot hide the others.
    async fn list_apps(&self) -> Result<Vec<Value>, ClusterError>;

    /// One App by name.
    async fn get_app(&self, name: &str) -> Result<App, ClusterError>;

    /// Create a new App.
    async fn create_app(&self, app: &App) -> Result<App, ClusterError>;

    /// Overwrite an App with the revision it was read at.
    async fn replace_app(&self, app: &App) -> Result<App, ClusterError>;

    /// Overwrite an App from its raw document, for Apps that do not convert.
    async fn replace_app_document(&self, document: &Value) -> Result<(), ClusterError>;

    /// A ConfigMap, `None` when it does not exist.
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, ClusterError>;

    /// Replace a ConfigMap, creating it when it was never stored.
    async fn save_config_map(&self, config_map: &ConfigMap) -> Result<(), ClusterError>;

    /// One Service.
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ClusterError>;

    /// Services in every namespace.
    async fn list_services(&self) -> Result<Vec<Service>, ClusterError>;

    /// Pods in `namespace` matching every label of `selector`.
    async fn list_pods(&self, namespace: &str, selector: &BTreeMap<String, String>) -> Result<Vec<Pod>, ClusterError>;

    /// Replace a resource; on failure delete it and create it again.
    async fn apply_resource(&self, resource: &Value) -> Result<(), ClusterError>;

    /// Delete a resource. A resource that is already gone counts as deleted.
    async fn delete_resource(&self, resource: &Value) -> Result<(), ClusterError>;
}

/// `kind` of a resource document.
pub fn resource_kind(resource: &Value) -> Option<&str> {
    resource.get("kind").and_then(Value::as_str)
}

/// `metadata.name` of a resource document.
pub fn resource_name(resource: &Value) -> Option<&str> {
    resource.pointer("/metadata/name").and_then(Value::as_str)
}

/// `metadata.namespace` of a resource document, if set and non-empty.
pub fn resource_namespace(resource: &Value) -> Option<&str> {
    resource
        .pointer("/metadata/namespace")
        .and_then(Value::as_str)
        .filter(|ns| !ns.is_empty())
}

/// `kind/namespace/name` (namespace omitted when unset), used in logs and errors.
pub fn display_resource(resource: &Value) -> String {
    let mut parts = vec![resource_kind(resource).unwrap_or("?")];
    if let Some(ns) = resource_namespace(resource) {
        parts.push(ns);
    }
    parts.push(resource_name(resource).unwrap_or("?"));
    parts.join("/")
}

/// Label selector string for a map of labels.
pub fn label_selector(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}
