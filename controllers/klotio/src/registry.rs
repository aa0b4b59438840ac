//! App registry: finding, creating and persisting App objects.

use crate::cluster::{display_resource, ClusterApi};
use crate::error::AppError;
use crds::{App, AppAction, AppStatus, SourceFields, APP_API_VERSION, APP_KIND};
use manifest_client::{describe, parse_document, resolve_url, ManifestFetcher};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

const DESCRIPTOR_KEYS: [&str; 4] = ["apiVersion", "kind", "metadata", "spec"];

/// Access to App objects by source.
#[derive(Clone)]
pub struct AppRegistry {
    cluster: Arc<dyn ClusterApi>,
    fetcher: Arc<dyn ManifestFetcher>,
}

impl AppRegistry {
    /// Registry over the given cluster, fetching descriptors with `fetcher`.
    pub fn new(cluster: Arc<dyn ClusterApi>, fetcher: Arc<dyn ManifestFetcher>) -> Self {
        Self { cluster, fetcher }
    }

    /// First App whose `spec.source` contains every field of `filter` with
    /// an equal value. Apps that do not convert are skipped.
    pub async fn find(&self, filter: &SourceFields) -> Result<Option<App>, AppError> {
        debug!("Searching for {}", describe(filter));

        for document in self.cluster.list_apps().await? {
            let shown = display_resource(&document);
            let app: App = match serde_json::from_value(document) {
                Ok(app) => app,
                Err(e) => {
                    warn!("Skipping malformed {}: {}", shown, e);
                    continue;
                }
            };
            if source_matches(&app.spec.source, filter) {
                debug!("Found {} {}", app.display(), describe(&app.spec.source));
                return Ok(Some(app));
            }
        }
        Ok(None)
    }

    /// Fetch the App descriptor `source` points at and create it with the
    /// given action and status `Discovered`.
    pub async fn create(&self, source: &SourceFields, action: AppAction) -> Result<App, AppError> {
        let url = resolve_url(source)?;
        debug!("Requesting {}", url);

        let document = parse_document(&self.fetcher.fetch(&url).await?)?;
        validate_descriptor(&document, source)?;

        let mut app: App = serde_json::from_value(document)?;
        app.action = Some(action);
        app.status = Some(AppStatus::Discovered);

        let created = self.cluster.create_app(&app).await?;
        info!("Created {} from {}", created.display(), describe(source));
        Ok(created)
    }

    /// `find`, falling back to `create`.
    pub async fn find_or_create(&self, source: &SourceFields, action: AppAction) -> Result<App, AppError> {
        match self.find(source).await? {
            Some(app) => Ok(app),
            None => self.create(source, action).await,
        }
    }

    /// Overwrite the stored App with `app`.
    pub async fn upsert(&self, app: &App) -> Result<App, AppError> {
        Ok(self.cluster.replace_app(app).await?)
    }

    /// Re-read one App.
    pub async fn refresh(&self, name: &str) -> Result<App, AppError> {
        Ok(self.cluster.get_app(name).await?)
    }
}

/// Every field of `filter` is present in `source` with the same value.
pub fn source_matches(source: &SourceFields, filter: &SourceFields) -> bool {
    filter.iter().all(|(field, value)| source.get(field) == Some(value))
}

fn validate_descriptor(document: &Value, source: &SourceFields) -> Result<(), AppError> {
    let malformed = |reason: String| AppError::MalformedDescriptor { origin: describe(source), reason };

    let Some(fields) = document.as_object() else {
        return Err(malformed("descriptor is not a mapping".to_string()));
    };

    if fields.len() != DESCRIPTOR_KEYS.len() || !DESCRIPTOR_KEYS.iter().all(|key| fields.contains_key(*key)) {
        let keys: Vec<&str> = fields.keys().map(String::as_str).collect();
        return Err(malformed(format!("expected exactly {:?}, found {:?}", DESCRIPTOR_KEYS, keys)));
    }

    let api_version = fields.get("apiVersion").and_then(Value::as_str);
    if api_version != Some(APP_API_VERSION) {
        return Err(malformed(format!("apiVersion {:?} is not {}", api_version, APP_API_VERSION)));
    }

    let kind = fields.get("kind").and_then(Value::as_str);
    if kind != Some(APP_KIND) {
        return Err(malformed(format!("kind {:?} is not {}", kind, APP_KIND)));
    }

    Ok(())
}
