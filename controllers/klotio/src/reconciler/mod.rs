//! Reconciliation of App objects.
//!
//! - `app`: the per-App state machine (download, install, uninstall)
//! - `subscription`: dependencies between Apps and their published values
//!
//! One pass visits every App exactly once and persists each one whatever
//! happened to it. A failing App is marked `Error` and does not stop the pass.
//! An App that does not convert is marked `Error` on its raw document.

pub mod app;
pub mod subscription;

use crate::cluster::{display_resource, resource_name, ClusterApi};
use crate::error::{ClusterError, ControllerError};
use crate::registry::AppRegistry;
use crds::{App, AppStatus};
use manifest_client::ManifestFetcher;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// Outcome of one pass over all Apps.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AppPass {
    /// Apps processed and persisted
    pub processed: usize,
    /// Names of Apps that ended this pass in `Error`
    pub failed: Vec<String>,
    /// Apps that could not be re-read or persisted
    pub persist_failures: usize,
    /// Apps whose stored document does not convert
    pub malformed: usize,
}

/// Reconciles App objects for one node.
pub struct Reconciler {
    pub(crate) cluster: Arc<dyn ClusterApi>,
    pub(crate) registry: AppRegistry,
    pub(crate) fetcher: Arc<dyn ManifestFetcher>,
    /// Canonical name of this node, used in App URLs
    pub(crate) node: String,
    /// Apps already written during the current pass
    written: Mutex<HashSet<String>>,
}

impl Reconciler {
    /// Creates a reconciler for `node`.
    pub fn new(cluster: Arc<dyn ClusterApi>, fetcher: Arc<dyn ManifestFetcher>, node: impl Into<String>) -> Self {
        Self {
            registry: AppRegistry::new(cluster.clone(), fetcher.clone()),
            cluster,
            fetcher,
            node: node.into(),
            written: Mutex::new(HashSet::new()),
        }
    }

    /// Remember that `name` was written during this pass.
    pub(crate) fn mark_written(&self, name: &str) {
        if let Ok(mut written) = self.written.lock() {
            written.insert(name.to_string());
        }
    }

    fn was_written(&self, name: &str) -> bool {
        self.written.lock().map(|written| written.contains(name)).unwrap_or(false)
    }

    fn reset_written(&self) {
        if let Ok(mut written) = self.written.lock() {
            written.clear();
        }
    }

    /// Process every App once and persist it.
    pub async fn reconcile_apps(&self) -> Result<AppPass, ControllerError> {
        self.reset_written();
        let documents = self.cluster.list_apps().await?;
        let mut pass = AppPass::default();

        debug!("Reconciling {} App(s)", documents.len());

        for document in documents {
            let listed: App = match serde_json::from_value(document.clone()) {
                Ok(app) => app,
                Err(e) => {
                    let shown = display_resource(&document);
                    error!("Malformed {}: {}", shown, e);
                    pass.malformed += 1;
                    pass.failed.push(resource_name(&document).unwrap_or("?").to_string());
                    if let Err(e) = self.mark_malformed(document, &e).await {
                        error!("Failed to persist {}: {}", shown, e);
                        pass.persist_failures += 1;
                    }
                    continue;
                }
            };
            let name = listed.name().to_string();

            // Rewritten earlier in this pass by a cascade: the listing is stale.
            let mut app = if self.was_written(&name) {
                match self.registry.refresh(&name).await {
                    Ok(app) => app,
                    Err(e) => {
                        warn!("Failed to re-read {}: {}", listed.display(), e);
                        pass.persist_failures += 1;
                        continue;
                    }
                }
            } else {
                listed
            };

            if let Err(e) = self.process_one(&mut app).await {
                error!("Failed to process {}: {}", app.display(), e);
                app.status = Some(AppStatus::Error);
                app.error = Some(e.lines());
            }

            if app.current_status() == AppStatus::Error {
                pass.failed.push(name.clone());
            }

            match self.registry.upsert(&app).await {
                Ok(stored) => {
                    debug!("Persisted {} ({:?})", stored.display(), stored.current_status());
                    self.mark_written(&name);
                    pass.processed += 1;
                }
                Err(e) => {
                    error!("Failed to persist {}: {}", app.display(), e);
                    pass.persist_failures += 1;
                }
            }
        }

        if !pass.failed.is_empty() {
            info!("{} App(s) in Error: {}", pass.failed.len(), pass.failed.join(", "));
        }

        Ok(pass)
    }

    /// Set `status: Error` and the conversion error on a raw App document,
    /// writing only when either changed.
    async fn mark_malformed(&self, mut document: Value, cause: &serde_json::Error) -> Result<(), ClusterError> {
        let status = serde_json::to_value(AppStatus::Error)?;
        let lines = Value::from(vec![format!("malformed App: {}", cause)]);

        if resource_name(&document).is_none() {
            return Err(ClusterError::InvalidResource(format!("{} has no name", display_resource(&document))));
        }
        let Some(fields) = document.as_object_mut() else {
            return Err(ClusterError::InvalidResource("App is not a mapping".to_string()));
        };
        if fields.get("status") == Some(&status) && fields.get("error") == Some(&lines) {
            return Ok(());
        }
        fields.insert("status".to_string(), status);
        fields.insert("error".to_string(), lines);

        self.cluster.replace_app_document(&document).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_app, MockCluster};
    use crds::AppAction;
    use manifest_client::MockFetcher;
    use serde_json::json;

    #[tokio::test]
    async fn test_pass_persists_every_app() {
        let cluster = MockCluster::new();
        let mut installed = create_test_app("a.klot.io", &[("url", "http://apps.local/a.yaml")]);
        installed.status = Some(AppStatus::Installed);
        installed.action = Some(AppAction::Install);
        installed.resources = Some(vec![]);
        cluster.add_app(installed);
        cluster.add_app(create_test_app("b.klot.io", &[("url", "http://apps.local/b.yaml")]));

        let reconciler = Reconciler::new(Arc::new(cluster.clone()), Arc::new(MockFetcher::new()), "pi-klot-io");
        let pass = reconciler.reconcile_apps().await.unwrap();

        assert_eq!(pass.processed, 2);
        assert_eq!(pass.persist_failures, 0);
        assert_eq!(cluster.operations_matching("replace App/"), 2);
    }

    #[tokio::test]
    async fn test_failed_persist_does_not_stop_pass() {
        let cluster = MockCluster::new();
        cluster.add_app(create_test_app("a.klot.io", &[("url", "http://apps.local/a.yaml")]));
        cluster.add_app(create_test_app("b.klot.io", &[("url", "http://apps.local/b.yaml")]));
        cluster.fail_replace("a.klot.io");

        let reconciler = Reconciler::new(Arc::new(cluster.clone()), Arc::new(MockFetcher::new()), "pi-klot-io");
        let pass = reconciler.reconcile_apps().await.unwrap();

        assert_eq!(pass.processed, 1);
        assert_eq!(pass.persist_failures, 1);
        assert_eq!(cluster.app("b.klot.io").unwrap().status, Some(AppStatus::Downloaded));
    }

    #[tokio::test]
    async fn test_malformed_app_does_not_stop_pass() {
        let cluster = MockCluster::new();
        cluster.add_app_document(json!({
            "apiVersion": "klot.io/v1",
            "kind": "App",
            "metadata": {"name": "a.klot.io"},
            "spec": {"source": {"url": "http://apps.local/a.yaml"}},
            "action": "install",
        }));
        cluster.add_app(create_test_app("b.klot.io", &[("url", "http://apps.local/b.yaml")]));

        let reconciler = Reconciler::new(Arc::new(cluster.clone()), Arc::new(MockFetcher::new()), "pi-klot-io");
        let pass = reconciler.reconcile_apps().await.unwrap();

        assert_eq!(pass.processed, 1);
        assert_eq!(pass.malformed, 1);
        assert_eq!(pass.failed, vec!["a.klot.io".to_string()]);
        assert_eq!(cluster.app("b.klot.io").unwrap().status, Some(AppStatus::Downloaded));

        let broken = cluster.app_document("a.klot.io").unwrap();
        assert_eq!(broken["status"], "Error");
        assert_eq!(broken["action"], "install");
        assert!(broken["error"][0].as_str().unwrap().starts_with("malformed App: "));

        reconciler.reconcile_apps().await.unwrap();
        assert_eq!(cluster.operations_matching("replace App/a.klot.io"), 1);
    }
}
