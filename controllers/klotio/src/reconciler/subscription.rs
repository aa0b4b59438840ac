//! Subscriptions between Apps and the values Apps publish.
//!
//! An App waits for every App it subscribes to before installing. While it
//! waits it asks its dependencies to install too, one hop per pass, so a
//! chain of N dependencies converges within N passes.

use super::Reconciler;
use crate::error::AppError;
use crds::{App, AppAction, AppStatus, Publication, Subscription};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

impl Reconciler {
    /// Make sure every App this App subscribes to exists.
    pub(crate) async fn source(&self, app: &App) -> Result<(), AppError> {
        let action = app.current_action();

        for entry in &app.spec.subscribe {
            debug!("Sourcing {} for {}", entry.name, app.display());
            let dependency = self.registry.find_or_create(&entry.source, action.clone()).await?;
            debug!("Sourced {}", dependency.display());
        }

        Ok(())
    }

    /// Resolve every subscription. True when all of them are installed.
    ///
    /// A dependency that is not installed yet is asked to install when this
    /// App is installing, unless it is in `Error`.
    pub(crate) async fn subscribe(&self, app: &mut App) -> Result<bool, AppError> {
        if app.spec.subscribe.is_empty() {
            return Ok(true);
        }

        let action = app.current_action();
        let mut subscribed = true;
        let mut subscriptions = Vec::with_capacity(app.spec.subscribe.len());

        for entry in &app.spec.subscribe {
            let mut dependency = self.registry.find_or_create(&entry.source, action.clone()).await?;
            let status = dependency.current_status();

            if status != AppStatus::Installed {
                subscribed = false;

                if action == AppAction::Install
                    && status != AppStatus::Error
                    && dependency.current_action() != AppAction::Install
                {
                    info!("{} needs {}, requesting install", app.display(), dependency.display());
                    dependency.action = Some(AppAction::Install);
                    self.registry.upsert(&dependency).await?;
                    self.mark_written(dependency.name());
                }
            }

            let subscription = Subscription {
                name: entry.name.clone(),
                app: dependency.name().to_string(),
                project: entry.project.clone(),
            };
            debug!("Subscribed {:?}", subscription);
            subscriptions.push(subscription);
        }

        app.subscriptions = Some(subscriptions);
        Ok(subscribed)
    }

    /// Copy dependency publications into ConfigMaps, per subscription projection.
    pub(crate) async fn project(&self, app: &App) -> Result<(), AppError> {
        for subscription in app.subscriptions.iter().flatten() {
            let Some(project) = &subscription.project else {
                continue;
            };
            debug!("Projecting {:?}", project);

            let dependency = self.cluster.get_app(&subscription.app).await?;
            let Some(publication) = dependency.publication(&project.publication) else {
                warn!(
                    "{} publishes no {}, nothing to project for {}",
                    dependency.display(),
                    project.publication,
                    app.display()
                );
                continue;
            };

            let key = project.key_for(&subscription.name);
            let text = encode_publication(publication, project.encoding())?;

            let mut config_map = self
                .cluster
                .get_config_map(&project.namespace, &project.name)
                .await?
                .unwrap_or_else(|| ConfigMap {
                    metadata: ObjectMeta {
                        name: Some(project.name.clone()),
                        namespace: Some(project.namespace.clone()),
                        ..Default::default()
                    },
                    ..Default::default()
                });
            config_map.data.get_or_insert_with(Default::default).insert(key, text);

            self.cluster.save_config_map(&config_map).await?;
        }

        Ok(())
    }

    /// Build `publications` from `spec.publish`.
    pub(crate) async fn publish(&self, app: &mut App) -> Result<(), AppError> {
        if app.spec.publish.is_empty() {
            return Ok(());
        }

        let mut publications = Vec::with_capacity(app.spec.publish.len());

        for spec in &app.spec.publish {
            let mut fields = spec.fields.clone();

            if let Some(service_ref) = &spec.service {
                let service = self.cluster.get_service(&service_ref.namespace, &service_ref.name).await?;
                let name = service.metadata.name.as_deref().unwrap_or(&service_ref.name);
                let namespace = service.metadata.namespace.as_deref().unwrap_or(&service_ref.namespace);
                fields.insert("host".to_string(), json!(format!("{}.{}", name, namespace)));

                let service_spec = service.spec.as_ref();
                if let Some(port_name) = &service_ref.port {
                    let port = service_spec
                        .and_then(|s| s.ports.as_ref())
                        .and_then(|ports| ports.iter().find(|p| p.name.as_deref() == Some(port_name.as_str())));
                    match port {
                        Some(port) => {
                            fields.insert("port".to_string(), json!(port.port));
                        }
                        None => warn!("Service {}.{} has no port named {}", name, namespace, port_name),
                    }
                }

                if service_spec.and_then(|s| s.type_.as_deref()) == Some("LoadBalancer") {
                    fields.insert("ingress".to_string(), Value::Bool(true));
                }
            }

            let publication = Publication { name: spec.name.clone(), fields };
            debug!("Published {:?}", publication);
            publications.push(publication);
        }

        app.publications = Some(publications);
        Ok(())
    }

    /// Set `url` from the publication named by `spec.url`.
    pub(crate) fn url(&self, app: &mut App) {
        let Some(url_spec) = &app.spec.url else {
            return;
        };
        let Some(publication) = app.publication(&url_spec.publication) else {
            return;
        };

        match compose_url(publication, &self.node, url_spec.path.as_deref()) {
            Some(url) => {
                debug!("Created url {} for {}", url, app.display());
                app.url = Some(url);
            }
            None => warn!(
                "Publication {} of {} has no protocol or host, no url",
                publication.name,
                app.display()
            ),
        }
    }
}

/// `<protocol>://<host>.<node>.local[:<port>][/<path>]`. The port is left
/// out when it is the protocol's default or the publication has none.
pub fn compose_url(publication: &Publication, node: &str, path: Option<&str>) -> Option<String> {
    let protocol = publication.protocol()?;
    let host = publication.host()?;
    let mut url = format!("{}://{}.{}.local", protocol, host, node);

    if let Some(port) = publication.port() {
        let default_port = match protocol {
            "http" => Some(80),
            "https" => Some(443),
            _ => None,
        };
        if default_port != Some(port) {
            url = format!("{}:{}", url, port);
        }
    }

    if let Some(path) = path {
        url = format!("{}/{}", url, path.trim_start_matches('/'));
    }

    Some(url)
}

/// Serialize a publication as YAML, or as 2-space indented JSON.
pub fn encode_publication(publication: &Publication, encoding: &str) -> Result<String, AppError> {
    if encoding == "json" {
        Ok(serde_json::to_string_pretty(publication)?)
    } else {
        Ok(serde_yaml::to_string(publication)?)
    }
}
