//! Kind registry for App resources.
//!
//! App manifests may only contain the kinds registered here. Each entry
//! knows how to address its kind through `Api<DynamicObject>` and how to
//! apply and delete one document of it.

use super::{display_resource, resource_name, resource_namespace};
use crate::error::ClusterError;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{
    ConfigMap, Namespace, PersistentVolume, PersistentVolumeClaim, Pod, Secret, Service, ServiceAccount,
};
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicy};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use kube::api::{Api, DeleteParams, DynamicObject, PostParams};
use kube::discovery::ApiResource;
use kube::Client;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Namespace used for namespaced resources that do not name one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Split `group/version` into its parts; core kinds have an empty group.
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Apply/delete capability for one kind.
#[derive(Debug, Clone)]
pub struct ResourceKind {
    api_resource: ApiResource,
    namespaced: bool,
}

impl ResourceKind {
    /// Entry for a typed k8s-openapi resource.
    pub fn of<K>(namespaced: bool) -> Self
    where
        K: kube::Resource<DynamicType = ()>,
    {
        Self { api_resource: ApiResource::erase::<K>(&()), namespaced }
    }

    /// Kind name, e.g. `Deployment`.
    pub fn kind(&self) -> &str {
        &self.api_resource.kind
    }

    /// Whether objects of this kind live in a namespace.
    pub fn is_namespaced(&self) -> bool {
        self.namespaced
    }

    /// API resource for a document, honouring the document's own `apiVersion`.
    pub fn api_resource_for(&self, resource: &Value) -> ApiResource {
        match resource.get("apiVersion").and_then(Value::as_str) {
            Some(api_version) if api_version != self.api_resource.api_version => {
                let (group, version) = parse_api_version(api_version);
                ApiResource {
                    group,
                    version,
                    api_version: api_version.to_string(),
                    kind: self.api_resource.kind.clone(),
                    plural: self.api_resource.plural.clone(),
                }
            }
            _ => self.api_resource.clone(),
        }
    }

    fn api(&self, client: &Client, resource: &Value) -> Result<(Api<DynamicObject>, String), ClusterError> {
        let name = resource_name(resource).ok_or_else(|| {
            ClusterError::InvalidResource(format!("{} has no metadata.name", display_resource(resource)))
        })?;

        let api_resource = self.api_resource_for(resource);
        let api = if self.is_namespaced() {
            let namespace = resource_namespace(resource).unwrap_or(DEFAULT_NAMESPACE);
            Api::namespaced_with(client.clone(), namespace, &api_resource)
        } else {
            Api::all_with(client.clone(), &api_resource)
        };

        Ok((api, name.to_string()))
    }

    /// Replace the object; if that fails for any reason delete it and create it.
    pub async fn apply(&self, client: &Client, resource: &Value) -> Result<(), ClusterError> {
        let (api, name) = self.api(client, resource)?;
        let object: DynamicObject = serde_json::from_value(resource.clone())?;
        let params = PostParams::default();

        if let Err(e) = api.replace(&name, &params, &object).await {
            debug!("Replacing {} failed ({}), recreating", display_resource(resource), e);
            delete_named(&api, &name).await?;
            api.create(&params, &object).await?;
        }

        Ok(())
    }

    /// Delete the object; a missing object is not an error.
    pub async fn delete(&self, client: &Client, resource: &Value) -> Result<(), ClusterError> {
        let (api, name) = self.api(client, resource)?;
        delete_named(&api, &name).await
    }
}

async fn delete_named(api: &Api<DynamicObject>, name: &str) -> Result<(), ClusterError> {
    match api.delete(name, &DeleteParams::background()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Kind name → apply/delete capability.
#[derive(Debug, Clone, Default)]
pub struct KindRegistry {
    kinds: HashMap<String, ResourceKind>,
}

impl KindRegistry {
    /// The kinds App manifests may contain.
    pub fn standard() -> Self {
        let mut registry = Self::default();

        registry.register(ResourceKind::of::<Namespace>(false));
        registry.register(ResourceKind::of::<ConfigMap>(true));
        registry.register(ResourceKind::of::<Secret>(true));
        registry.register(ResourceKind::of::<ServiceAccount>(true));
        registry.register(ResourceKind::of::<ClusterRole>(false));
        registry.register(ResourceKind::of::<ClusterRoleBinding>(false));
        registry.register(ResourceKind::of::<Role>(true));
        registry.register(ResourceKind::of::<RoleBinding>(true));
        registry.register(ResourceKind::of::<Service>(true));
        registry.register(ResourceKind::of::<Pod>(true));
        registry.register(ResourceKind::of::<PersistentVolume>(false));
        registry.register(ResourceKind::of::<PersistentVolumeClaim>(true));
        registry.register(ResourceKind::of::<Deployment>(true));
        registry.register(ResourceKind::of::<DaemonSet>(true));
        registry.register(ResourceKind::of::<StatefulSet>(true));
        registry.register(ResourceKind::of::<ReplicaSet>(true));
        registry.register(ResourceKind::of::<Job>(true));
        registry.register(ResourceKind::of::<CronJob>(true));
        registry.register(ResourceKind::of::<Ingress>(true));
        registry.register(ResourceKind::of::<NetworkPolicy>(true));
        registry.register(ResourceKind::of::<HorizontalPodAutoscaler>(true));

        registry
    }

    /// Add or replace an entry.
    pub fn register(&mut self, kind: ResourceKind) {
        self.kinds.insert(kind.kind().to_string(), kind);
    }

    /// Look up a kind by name.
    pub fn get(&self, kind: &str) -> Result<&ResourceKind, ClusterError> {
        self.kinds
            .get(kind)
            .ok_or_else(|| ClusterError::UnsupportedKind(kind.to_string()))
    }

    /// Entry for a resource document, by its `kind`.
    pub fn for_resource(&self, resource: &Value) -> Result<&ResourceKind, ClusterError> {
        let kind = resource.get("kind").and_then(Value::as_str).ok_or_else(|| {
            ClusterError::InvalidResource(format!("{} has no kind", display_resource(resource)))
        })?;
        self.get(kind)
    }

    /// Number of registered kinds.
    pub fn len(&self) -> usize {
        self.kinds.len()
    }
}
