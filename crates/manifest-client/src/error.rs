//! Manifest client errors

use thiserror::Error;

/// Errors that can occur while resolving or fetching App sources
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The source names neither a URL nor a supported site
    #[error("unsupported source: {0}")]
    UnsupportedSource(String),

    /// A field the source's site requires is absent
    #[error("missing source.{field} for {site}")]
    MissingField {
        /// Name of the absent field
        field: String,
        /// Site that requires it
        site: String,
    },

    /// The remote answered with something other than 200
    #[error("{status} error from {url}: {body}")]
    Fetch {
        /// Requested URL
        url: String,
        /// HTTP status code
        status: u16,
        /// Response body, as text
        body: String,
    },

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The fetched text is not valid YAML
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The fetched document does not convert to JSON
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Expected exactly one document
    #[error("expected a single document, found {0}")]
    DocumentCount(usize),
}
