//! kube-rs implementation of `ClusterApi`.

use super::{display_resource, label_selector, resource_name, ClusterApi, KindRegistry};
use crate::error::{ClusterError, ControllerError};
use crds::App;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Service};
use kube::api::{Api, ApiResource, DynamicObject, ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Cluster access through a kube `Client`.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    kinds: KindRegistry,
}

impl std::fmt::Debug for KubeCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeCluster").field("kinds", &self.kinds.len()).finish_non_exhaustive()
    }
}

impl KubeCluster {
    /// Wrap a client, with the standard kind registry.
    pub fn new(client: Client) -> Self {
        Self { client, kinds: KindRegistry::standard() }
    }

    /// Build a client from a kubeconfig file, or from the in-cluster
    /// environment when `kubeconfig` is `None`.
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self, ControllerError> {
        let mut config = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?
            }
            None => Config::incluster().map_err(|e| ControllerError::InvalidConfig(e.to_string()))?,
        };
        config.connect_timeout = Some(CONNECT_TIMEOUT);
        config.read_timeout = Some(READ_TIMEOUT);

        Ok(Self::new(Client::try_from(config)?))
    }

    fn apps(&self) -> Api<App> {
        Api::all(self.client.clone())
    }

    /// App objects without conversion, so one bad object stays readable.
    fn app_documents(&self) -> Api<DynamicObject> {
        Api::all_with(self.client.clone(), &ApiResource::erase::<App>(&()))
    }
}

#[async_trait::async_trait]
impl ClusterApi for KubeCluster {
    async fn list_apps(&self) -> Result<Vec<Value>, ClusterError> {
        let items = self.app_documents().list(&ListParams::default()).await?.items;
        Ok(items.into_iter().map(serde_json::to_value).collect::<Result<_, _>>()?)
    }

    async fn get_app(&self, name: &str) -> Result<App, ClusterError> {
        Ok(self.apps().get(name).await?)
    }

    async fn create_app(&self, app: &App) -> Result<App, ClusterError> {
        Ok(self.apps().create(&PostParams::default(), app).await?)
    }

    async fn replace_app(&self, app: &App) -> Result<App, ClusterError> {
        Ok(self.apps().replace(app.name(), &PostParams::default(), app).await?)
    }

    async fn replace_app_document(&self, document: &Value) -> Result<(), ClusterError> {
        let name = resource_name(document).ok_or_else(|| {
            ClusterError::InvalidResource(format!("{} has no metadata.name", display_resource(document)))
        })?;
        let object: DynamicObject = serde_json::from_value(document.clone())?;
        self.app_documents().replace(name, &PostParams::default(), &object).await?;
        Ok(())
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, ClusterError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn save_config_map(&self, config_map: &ConfigMap) -> Result<(), ClusterError> {
        let namespace = config_map.metadata.namespace.as_deref().unwrap_or(super::kinds::DEFAULT_NAMESPACE);
        let name = config_map
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| ClusterError::InvalidResource("ConfigMap has no metadata.name".to_string()))?;
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);

        if config_map.metadata.resource_version.is_some() {
            api.replace(name, &PostParams::default(), config_map).await?;
        } else {
            debug!("Creating ConfigMap {}/{}", namespace, name);
            api.create(&PostParams::default(), config_map).await?;
        }

        Ok(())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ClusterError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn list_services(&self) -> Result<Vec<Service>, ClusterError> {
        let api: Api<Service> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_pods(&self, namespace: &str, selector: &BTreeMap<String, String>) -> Result<Vec<Pod>, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = if selector.is_empty() {
            ListParams::default()
        } else {
            ListParams::default().labels(&label_selector(selector))
        };
        Ok(api.list(&params).await?.items)
    }

    async fn apply_resource(&self, resource: &Value) -> Result<(), ClusterError> {
        self.kinds.for_resource(resource)?.apply(&self.client, resource).await
    }

    async fn delete_resource(&self, resource: &Value) -> Result<(), ClusterError> {
        self.kinds.for_resource(resource)?.delete(&self.client, resource).await
    }
}
