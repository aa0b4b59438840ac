//! Test utilities for unit testing reconcilers
//!
//! `MockCluster` is an in-memory `ClusterApi` that records every write as a
//! readable operation string (`apply Namespace/redis`, `replace App/x`), plus
//! helpers for building test objects.

use crate::cluster::{display_resource, ClusterApi, KindRegistry};
use crate::error::ClusterError;
use crds::{App, AppSpec, SourceFields};
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, ContainerPort, Pod, PodSpec, PodStatus, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

/// Descriptor URL of the `github.com` source `klot-io/redis`.
pub const REDIS_URL: &str = "https://raw.githubusercontent.com/klot-io/redis/master/klot-io-app.yaml";

#[derive(Default)]
struct MockState {
    /// Stored as documents so tests can hold Apps that do not convert
    apps: BTreeMap<String, Value>,
    config_maps: BTreeMap<(String, String), ConfigMap>,
    services: Vec<Service>,
    pods: Vec<Pod>,
    resources: BTreeMap<String, Value>,
    operations: Vec<String>,
    failing_applies: HashSet<String>,
    failing_replaces: HashSet<String>,
    revision: u64,
}

impl MockState {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }

    fn store_app(&mut self, app: &App) -> App {
        let mut stored = app.clone();
        stored.metadata.resource_version = Some(self.next_revision());
        self.apps.insert(stored.name().to_string(), serde_json::to_value(&stored).unwrap());
        stored
    }
}

/// In-memory cluster.
#[derive(Clone)]
pub struct MockCluster {
    state: Arc<Mutex<MockState>>,
    kinds: KindRegistry,
}

impl MockCluster {
    pub fn new() -> Self {
        Self { state: Arc::default(), kinds: KindRegistry::standard() }
    }

    /// Store an App directly, without recording an operation.
    pub fn add_app(&self, app: App) {
        self.state.lock().unwrap().store_app(&app);
    }

    /// Store a raw App document, which may not convert to an `App`.
    pub fn add_app_document(&self, mut document: Value) {
        let mut state = self.state.lock().unwrap();
        document["metadata"]["resourceVersion"] = json!(state.next_revision());
        let name = document["metadata"]["name"].as_str().unwrap().to_string();
        state.apps.insert(name, document);
    }

    pub fn app(&self, name: &str) -> Option<App> {
        self.app_document(name).and_then(|document| serde_json::from_value(document).ok())
    }

    pub fn app_document(&self, name: &str) -> Option<Value> {
        self.state.lock().unwrap().apps.get(name).cloned()
    }

    /// Every stored App that converts.
    pub fn apps(&self) -> Vec<App> {
        let documents: Vec<Value> = self.state.lock().unwrap().apps.values().cloned().collect();
        documents.into_iter().filter_map(|document| serde_json::from_value(document).ok()).collect()
    }

    pub fn add_config_map(&self, namespace: &str, name: &str, data: &[(&str, &str)]) {
        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                resource_version: Some("1".to_string()),
                ..Default::default()
            },
            data: Some(data.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
            ..Default::default()
        };
        self.state
            .lock()
            .unwrap()
            .config_maps
            .insert((namespace.to_string(), name.to_string()), config_map);
    }

    pub fn config_map(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        self.state
            .lock()
            .unwrap()
            .config_maps
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn add_service(&self, service: Service) {
        self.state.lock().unwrap().services.push(service);
    }

    pub fn add_pod(&self, pod: Pod) {
        self.state.lock().unwrap().pods.push(pod);
    }

    /// Make `apply` of the resource with this display name fail.
    pub fn fail_apply(&self, display: &str) {
        self.state.lock().unwrap().failing_applies.insert(display.to_string());
    }

    /// Make `replace_app` and `replace_app_document` of this App fail.
    pub fn fail_replace(&self, name: &str) {
        self.state.lock().unwrap().failing_replaces.insert(name.to_string());
    }

    /// Display names of the resources currently applied.
    pub fn resources(&self) -> Vec<String> {
        self.state.lock().unwrap().resources.keys().cloned().collect()
    }

    pub fn operations(&self) -> Vec<String> {
        self.state.lock().unwrap().operations.clone()
    }

    pub fn operations_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.operations().into_iter().filter(|op| op.starts_with(prefix)).collect()
    }

    pub fn operations_matching(&self, prefix: &str) -> usize {
        self.operations_with_prefix(prefix).len()
    }

    fn record(&self, operation: String) {
        self.state.lock().unwrap().operations.push(operation);
    }
}

#[async_trait::async_trait]
impl ClusterApi for MockCluster {
    async fn list_apps(&self) -> Result<Vec<Value>, ClusterError> {
        Ok(self.state.lock().unwrap().apps.values().cloned().collect())
    }

    async fn get_app(&self, name: &str) -> Result<App, ClusterError> {
        let document = self
            .app_document(name)
            .ok_or_else(|| ClusterError::NotFound { kind: "App".to_string(), name: name.to_string() })?;
        Ok(serde_json::from_value(document)?)
    }

    async fn create_app(&self, app: &App) -> Result<App, ClusterError> {
        self.record(format!("create App/{}", app.name()));
        let mut state = self.state.lock().unwrap();
        if state.apps.contains_key(app.name()) {
            return Err(ClusterError::InvalidResource(format!("App {} already exists", app.name())));
        }
        Ok(state.store_app(app))
    }

    async fn replace_app(&self, app: &App) -> Result<App, ClusterError> {
        self.record(format!("replace App/{}", app.name()));
        let mut state = self.state.lock().unwrap();
        if state.failing_replaces.contains(app.name()) {
            return Err(ClusterError::InvalidResource(format!("mock replace failure for {}", app.name())));
        }
        if !state.apps.contains_key(app.name()) {
            return Err(ClusterError::NotFound { kind: "App".to_string(), name: app.name().to_string() });
        }
        Ok(state.store_app(app))
    }

    async fn replace_app_document(&self, document: &Value) -> Result<(), ClusterError> {
        let name = document["metadata"]["name"].as_str().unwrap_or("?").to_string();
        self.record(format!("replace App/{}", name));
        let mut state = self.state.lock().unwrap();
        if state.failing_replaces.contains(&name) {
            return Err(ClusterError::InvalidResource(format!("mock replace failure for {}", name)));
        }
        if !state.apps.contains_key(&name) {
            return Err(ClusterError::NotFound { kind: "App".to_string(), name });
        }
        let mut stored = document.clone();
        stored["metadata"]["resourceVersion"] = json!(state.next_revision());
        state.apps.insert(name, stored);
        Ok(())
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, ClusterError> {
        Ok(self.config_map(namespace, name))
    }

    async fn save_config_map(&self, config_map: &ConfigMap) -> Result<(), ClusterError> {
        let namespace = config_map.metadata.namespace.clone().unwrap_or_default();
        let name = config_map.metadata.name.clone().unwrap_or_default();
        self.record(format!("save ConfigMap/{}/{}", namespace, name));
        let mut state = self.state.lock().unwrap();
        let mut stored = config_map.clone();
        stored.metadata.resource_version = Some(state.next_revision());
        state.config_maps.insert((namespace, name), stored);
        Ok(())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ClusterError> {
        self.state
            .lock()
            .unwrap()
            .services
            .iter()
            .find(|s| s.metadata.namespace.as_deref() == Some(namespace) && s.metadata.name.as_deref() == Some(name))
            .cloned()
            .ok_or_else(|| ClusterError::NotFound {
                kind: "Service".to_string(),
                name: format!("{}/{}", namespace, name),
            })
    }

    async fn list_services(&self) -> Result<Vec<Service>, ClusterError> {
        Ok(self.state.lock().unwrap().services.clone())
    }

    async fn list_pods(&self, namespace: &str, selector: &BTreeMap<String, String>) -> Result<Vec<Pod>, ClusterError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .pods
            .iter()
            .filter(|pod| pod.metadata.namespace.as_deref() == Some(namespace))
            .filter(|pod| {
                let labels = pod.metadata.labels.clone().unwrap_or_default();
                selector.iter().all(|(k, v)| labels.get(k) == Some(v))
            })
            .cloned()
            .collect())
    }

    async fn apply_resource(&self, resource: &Value) -> Result<(), ClusterError> {
        self.kinds.for_resource(resource)?;
        let display = display_resource(resource);
        self.record(format!("apply {}", display));

        let mut state = self.state.lock().unwrap();
        if state.failing_applies.contains(&display) {
            return Err(ClusterError::InvalidResource(format!("mock apply failure for {}", display)));
        }
        state.resources.insert(display, resource.clone());
        Ok(())
    }

    async fn delete_resource(&self, resource: &Value) -> Result<(), ClusterError> {
        self.kinds.for_resource(resource)?;
        let display = display_resource(resource);
        self.record(format!("delete {}", display));
        self.state.lock().unwrap().resources.remove(&display);
        Ok(())
    }
}

/// Source descriptor from field pairs.
pub fn source(fields: &[(&str, &str)]) -> SourceFields {
    fields.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

/// Helper to create a test App with the given `spec.source`
pub fn create_test_app(name: &str, source_fields: &[(&str, &str)]) -> App {
    App {
        api_version: crds::APP_API_VERSION.to_string(),
        kind: crds::APP_KIND.to_string(),
        metadata: ObjectMeta { name: Some(name.to_string()), ..Default::default() },
        spec: AppSpec { source: source(source_fields), ..Default::default() },
        action: None,
        status: None,
        resources: None,
        subscriptions: None,
        publications: None,
        url: None,
        error: None,
    }
}

/// Minimal resource document.
pub fn resource_doc(api_version: &str, kind: &str, namespace: Option<&str>, name: &str) -> Value {
    let mut metadata = json!({"name": name});
    if let Some(namespace) = namespace {
        metadata["namespace"] = json!(namespace);
    }
    json!({"apiVersion": api_version, "kind": kind, "metadata": metadata})
}

/// Helper to create a test Service selecting `app=<name>`, with
/// `(port name, port, target port)` entries.
pub fn create_test_service(name: &str, namespace: &str, type_: &str, ports: &[(&str, i32, i32)]) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some(type_.to_string()),
            selector: Some(BTreeMap::from([("app".to_string(), name.to_string())])),
            ports: Some(
                ports
                    .iter()
                    .map(|(port_name, port, target)| ServicePort {
                        name: Some(port_name.to_string()),
                        port: *port,
                        target_port: Some(IntOrString::Int(*target)),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        status: None,
    }
}

/// Helper to create a test Pod labelled `app=<app>`, scheduled on `node`
/// with `ip`, exposing named container ports.
pub fn create_test_pod(
    name: &str,
    namespace: &str,
    app: &str,
    node: Option<&str>,
    ip: Option<&str>,
    container_ports: &[(&str, i32)],
) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([("app".to_string(), app.to_string())])),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: node.map(String::from),
            containers: vec![Container {
                name: "main".to_string(),
                ports: Some(
                    container_ports
                        .iter()
                        .map(|(port_name, port)| ContainerPort {
                            name: Some(port_name.to_string()),
                            container_port: *port,
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }],
            ..Default::default()
        }),
        status: Some(PodStatus { pod_ip: ip.map(String::from), ..Default::default() }),
    }
}
