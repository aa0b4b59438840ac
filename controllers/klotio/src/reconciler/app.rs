//! Per-App state machine.
//!
//! `Discovered` → `Downloaded` once every manifest resolved; `Downloaded` →
//! `Installed` once the App is asked to install and every subscription is
//! installed; `Installed` → `Downloaded` on uninstall. `Error` is sticky.

use super::Reconciler;
use crate::cluster::display_resource;
use crate::error::{AppError, ClusterError};
use crate::orderer::order_resources;
use crds::{App, AppAction, AppStatus};
use manifest_client::{describe, merge_source, parse_documents, resolve_url};
use serde_json::Value;
use tracing::{debug, info};

impl Reconciler {
    /// Advance one App as far as it can go this pass. The caller persists it.
    pub async fn process_one(&self, app: &mut App) -> Result<(), AppError> {
        if app.status.is_none() {
            app.status = Some(AppStatus::Discovered);
        }
        if app.action.is_none() {
            app.action = Some(AppAction::Download);
        }
        if app.current_status() != AppStatus::Error {
            app.error = None;
        }

        if app.current_status() == AppStatus::Discovered && app.resources.is_none() {
            app.resources = Some(self.download(app).await?);
            self.source(app).await?;
            app.status = Some(AppStatus::Downloaded);
            info!("Downloaded {}", app.display());
        }

        let action = app.current_action();
        let status = app.current_status();

        if action == AppAction::Install
            && !matches!(status, AppStatus::Installed | AppStatus::Error)
            && self.subscribe(app).await?
        {
            self.install(app).await?;
            self.project(app).await?;
            self.publish(app).await?;
            self.url(app);
            app.status = Some(AppStatus::Installed);
            info!("Installed {}", app.display());
        } else if status == AppStatus::Installed && action == AppAction::Uninstall {
            self.uninstall(app).await?;
            app.subscriptions = None;
            app.publications = None;
            app.url = None;
            app.action = Some(AppAction::Download);
            app.status = Some(AppStatus::Downloaded);
            info!("Uninstalled {}", app.display());
        }

        Ok(())
    }

    /// Fetch and parse every manifest of the App, in install order.
    ///
    /// Nothing is returned unless every manifest succeeded.
    pub(crate) async fn download(&self, app: &App) -> Result<Vec<Value>, AppError> {
        let mut resources = Vec::new();

        for manifest in &app.spec.manifests {
            let source = merge_source(&app.spec.source, manifest);
            debug!("Parsing {}", describe(&source));

            let url = resolve_url(&source)?;
            debug!("Fetching {}", url);
            resources.extend(parse_documents(&self.fetcher.fetch(&url).await?)?);
        }

        Ok(order_resources(resources))
    }

    async fn install(&self, app: &App) -> Result<(), AppError> {
        info!("Installing {}", app.display());

        for resource in app.resources.iter().flatten() {
            let shown = display_resource(resource);
            debug!("Applying {}", shown);

            self.cluster.apply_resource(resource).await.map_err(|e| match e {
                ClusterError::UnsupportedKind(kind) => AppError::UnsupportedKind(kind),
                source => AppError::Apply { resource: shown, source },
            })?;
        }

        Ok(())
    }

    async fn uninstall(&self, app: &App) -> Result<(), AppError> {
        info!("Uninstalling {}", app.display());

        for resource in app.resources.iter().flatten().rev() {
            debug!("Deleting {}", display_resource(resource));
            self.cluster.delete_resource(resource).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::Reconciler;
    use crate::test_utils::{create_test_app, resource_doc, source, MockCluster};
    use manifest_client::MockFetcher;
    use std::sync::Arc;

    const MANIFEST_URL: &str = "http://apps.local/redis/kubernetes.yaml";
    const MANIFEST: &str = "\
apiVersion: rbac.authorization.k8s.io/v1
kind: RoleBinding
metadata:
  name: rb
  namespace: redis
---
apiVersion: v1
kind: Namespace
metadata:
  name: redis
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: cm
  namespace: redis
---
apiVersion: v1
kind: Pod
metadata:
  name: db
  namespace: redis
";

    fn redis_app() -> App {
        let mut app = create_test_app("redis.klot.io", &[("url", "http://apps.local/redis/klot-io-app.yaml")]);
        app.spec.manifests = vec![source(&[("url", MANIFEST_URL)])];
        app
    }

    fn setup() -> (MockCluster, MockFetcher, Reconciler) {
        let cluster = MockCluster::new();
        let fetcher = MockFetcher::new();
        fetcher.add_document(MANIFEST_URL, MANIFEST);
        let reconciler = Reconciler::new(Arc::new(cluster.clone()), Arc::new(fetcher.clone()), "pi-klot-io");
        (cluster, fetcher, reconciler)
    }

    fn kinds(app: &App) -> Vec<String> {
        app.resources
            .iter()
            .flatten()
            .filter_map(|r| r.get("kind").and_then(Value::as_str).map(String::from))
            .collect()
    }

    #[tokio::test]
    async fn test_download_action_only_downloads() {
        let (cluster, _fetcher, reconciler) = setup();
        let mut app = redis_app();

        reconciler.process_one(&mut app).await.unwrap();

        assert_eq!(app.status, Some(AppStatus::Downloaded));
        assert_eq!(app.action, Some(AppAction::Download));
        assert_eq!(kinds(&app), vec!["Namespace", "ConfigMap", "RoleBinding", "Pod"]);
        assert_eq!(cluster.operations_matching("apply "), 0);

        // Stable from here on.
        let before = app.clone();
        reconciler.process_one(&mut app).await.unwrap();
        assert_eq!(app, before);
    }

    #[tokio::test]
    async fn test_resources_are_resolved_once() {
        let (_cluster, fetcher, reconciler) = setup();
        let mut app = redis_app();

        reconciler.process_one(&mut app).await.unwrap();
        app.status = Some(AppStatus::Discovered);
        reconciler.process_one(&mut app).await.unwrap();

        assert_eq!(fetcher.requests(), vec![MANIFEST_URL]);
    }

    #[tokio::test]
    async fn test_install_applies_in_order_and_uninstall_reverses() {
        let (cluster, _fetcher, reconciler) = setup();
        let mut app = redis_app();
        app.action = Some(AppAction::Install);

        reconciler.process_one(&mut app).await.unwrap();

        assert_eq!(app.status, Some(AppStatus::Installed));
        assert_eq!(
            cluster.operations_with_prefix("apply "),
            vec![
                "apply Namespace/redis",
                "apply ConfigMap/redis/cm",
                "apply RoleBinding/redis/rb",
                "apply Pod/redis/db",
            ]
        );

        app.action = Some(AppAction::Uninstall);
        reconciler.process_one(&mut app).await.unwrap();

        assert_eq!(app.status, Some(AppStatus::Downloaded));
        assert_eq!(app.action, Some(AppAction::Download));
        assert_eq!(
            cluster.operations_with_prefix("delete "),
            vec![
                "delete Pod/redis/db",
                "delete RoleBinding/redis/rb",
                "delete ConfigMap/redis/cm",
                "delete Namespace/redis",
            ]
        );
        assert!(app.resources.is_some());
    }

    #[tokio::test]
    async fn test_installed_app_is_idempotent() {
        let (cluster, _fetcher, reconciler) = setup();
        let mut app = redis_app();
        app.action = Some(AppAction::Install);
        reconciler.process_one(&mut app).await.unwrap();
        let applied = cluster.operations_matching("apply ");

        let before = app.clone();
        reconciler.process_one(&mut app).await.unwrap();

        assert_eq!(app, before);
        assert_eq!(cluster.operations_matching("apply "), applied);
    }

    #[tokio::test]
    async fn test_unsupported_kind_fails_install() {
        let (cluster, _fetcher, reconciler) = setup();
        let mut app = redis_app();
        app.action = Some(AppAction::Install);
        app.status = Some(AppStatus::Downloaded);
        app.resources = Some(vec![
            resource_doc("v1", "Namespace", None, "redis"),
            resource_doc("example.com/v1", "Widget", Some("redis"), "w"),
        ]);

        let result = reconciler.process_one(&mut app).await;

        assert!(matches!(result, Err(AppError::UnsupportedKind(kind)) if kind == "Widget"));
        assert_eq!(cluster.operations_with_prefix("apply "), vec!["apply Namespace/redis"]);
    }

    #[tokio::test]
    async fn test_apply_failure_names_the_resource() {
        let (cluster, _fetcher, reconciler) = setup();
        cluster.fail_apply("ConfigMap/redis/cm");
        let mut app = redis_app();
        app.action = Some(AppAction::Install);

        let err = reconciler.process_one(&mut app).await.unwrap_err();

        assert!(matches!(&err, AppError::Apply { resource, .. } if resource == "ConfigMap/redis/cm"));
        assert_eq!(err.lines().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_download_leaves_no_resources() {
        let (_cluster, _fetcher, reconciler) = setup();
        let mut app = redis_app();
        app.spec.manifests.push(source(&[("url", "http://apps.local/redis/missing.yaml")]));

        let result = reconciler.process_one(&mut app).await;

        assert!(matches!(result, Err(AppError::Manifest(_))));
        assert!(app.resources.is_none());
    }

    #[tokio::test]
    async fn test_error_is_sticky_and_cleared_otherwise() {
        let (cluster, _fetcher, reconciler) = setup();

        let mut failed = redis_app();
        failed.action = Some(AppAction::Install);
        failed.status = Some(AppStatus::Error);
        failed.error = Some(vec!["boom".to_string()]);
        reconciler.process_one(&mut failed).await.unwrap();
        assert_eq!(failed.status, Some(AppStatus::Error));
        assert_eq!(failed.error, Some(vec!["boom".to_string()]));
        assert_eq!(cluster.operations_matching("apply "), 0);

        let mut recovered = redis_app();
        recovered.status = Some(AppStatus::Downloaded);
        recovered.resources = Some(vec![]);
        recovered.error = Some(vec!["old".to_string()]);
        reconciler.process_one(&mut recovered).await.unwrap();
        assert!(recovered.error.is_none());
    }

    #[tokio::test]
    async fn test_uninstall_tolerates_missing_resources() {
        let (cluster, _fetcher, reconciler) = setup();
        let mut app = redis_app();
        app.action = Some(AppAction::Uninstall);
        app.status = Some(AppStatus::Installed);
        app.resources = Some(vec![resource_doc("v1", "Namespace", None, "gone")]);

        reconciler.process_one(&mut app).await.unwrap();

        assert_eq!(app.status, Some(AppStatus::Downloaded));
        assert_eq!(cluster.operations_with_prefix("delete "), vec!["delete Namespace/gone"]);
    }
}
