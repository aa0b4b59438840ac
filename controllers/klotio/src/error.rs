//! Controller-specific error types.
//!
//! Three layers: `ClusterError` for calls into the cluster API, `AppError`
//! for anything that fails while processing a single App (recorded on the
//! App itself), and `ControllerError` for failures that abort a whole tick.

use local_ingress::IngressError;
use manifest_client::ManifestError;
use std::error::Error as StdError;
use thiserror::Error;

/// Errors from the cluster API seam.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Object does not exist
    #[error("{kind} {name} not found")]
    NotFound {
        /// Kind of the missing object
        kind: String,
        /// `namespace/name` or `name`
        name: String,
    },

    /// Kind has no entry in the kind registry
    #[error("unsupported resource kind {0}")]
    UnsupportedKind(String),

    /// Resource document lacks something needed to address it
    #[error("invalid resource: {0}")]
    InvalidResource(String),

    /// Converting between typed objects and JSON failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClusterError {
    /// True for a missing object, whichever way the API reported it.
    pub fn is_not_found(&self) -> bool {
        match self {
            ClusterError::NotFound { .. } => true,
            ClusterError::Kube(kube::Error::Api(ae)) => ae.code == 404,
            _ => false,
        }
    }
}

/// Errors while processing one App. Stored on the App as `error` lines.
#[derive(Debug, Error)]
pub enum AppError {
    /// Resolving or fetching a source failed
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// A fetched App descriptor is not a bare `klot.io/v1` App
    #[error("source {origin} has malformed App: {reason}")]
    MalformedDescriptor {
        /// Source the descriptor came from
        origin: String,
        /// What is wrong with it
        reason: String,
    },

    /// Applying one resource failed
    #[error("failed to apply {resource}")]
    Apply {
        /// Display name of the resource
        resource: String,
        /// Underlying cluster failure
        source: ClusterError,
    },

    /// A resource kind outside the kind registry
    #[error("unsupported resource kind {0}")]
    UnsupportedKind(String),

    /// Any other cluster API failure
    #[error(transparent)]
    Cluster(ClusterError),

    /// JSON conversion failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML conversion failed
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl From<ClusterError> for AppError {
    fn from(e: ClusterError) -> Self {
        match e {
            ClusterError::UnsupportedKind(kind) => AppError::UnsupportedKind(kind),
            other => AppError::Cluster(other),
        }
    }
}

impl AppError {
    /// The error and its cause chain, one entry per line.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![self.to_string()];
        let mut cause = self.source();
        while let Some(e) = cause {
            lines.push(format!("caused by: {}", e));
            cause = e.source();
        }
        lines
    }
}

/// Errors that abort a tick or startup.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes client error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Kubeconfig could not be loaded
    #[error("Kubeconfig error: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    /// Cluster API error outside any single App
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// Publishing names or proxy routes failed
    #[error("Ingress error: {0}")]
    Ingress(#[from] IngressError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Reading node configuration failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Node configuration is not valid YAML
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
