//! Source resolution
//!
//! Turns a declarative source (`{url}` or `{site, repo, version?, path?}`)
//! into the single URL to fetch. Pure functions, no I/O.

use crate::error::ManifestError;
use std::collections::BTreeMap;

/// Host serving raw repository content for `github.com` sources.
pub const RAW_CONTENT_HOST: &str = "https://raw.githubusercontent.com";
/// Site name for repository-hosted sources.
pub const GITHUB_SITE: &str = "github.com";
/// Branch used when a source has no `version`.
pub const DEFAULT_VERSION: &str = "master";
/// Descriptor file used when a source has no `path`.
pub const DEFAULT_DESCRIPTOR: &str = "klot-io-app.yaml";

/// Resolve a source map to a fetch URL.
///
/// `url` wins when present. Otherwise the source must be a `github.com`
/// repository; `version` defaults to `master` and `path` to the App
/// descriptor file.
pub fn resolve_url(source: &BTreeMap<String, String>) -> Result<String, ManifestError> {
    if let Some(url) = source.get("url") {
        return Ok(url.clone());
    }

    match source.get("site").map(String::as_str) {
        Some(GITHUB_SITE) => {
            let repo = source.get("repo").ok_or_else(|| ManifestError::MissingField {
                field: "repo".to_string(),
                site: GITHUB_SITE.to_string(),
            })?;
            let version = source.get("version").map_or(DEFAULT_VERSION, String::as_str);
            let path = source.get("path").map_or(DEFAULT_DESCRIPTOR, String::as_str);

            Ok(format!("{}/{}/{}/{}", RAW_CONTENT_HOST, repo, version, path))
        }
        _ => Err(ManifestError::UnsupportedSource(describe(source))),
    }
}

/// Lay `overrides` over `defaults`.
pub fn merge_source(
    defaults: &BTreeMap<String, String>,
    overrides: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = defaults.clone();
    merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Render a source map for error messages and logs.
pub fn describe(source: &BTreeMap<String, String>) -> String {
    let fields: Vec<String> = source.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
    format!("{{{}}}", fields.join(", "))
}
