//! Daemon configuration.
//!
//! Static settings come from the environment once at startup. The node's
//! identity comes from `<config_dir>/kubernetes.yaml`, written by the node
//! setup tooling, and is re-read every tick since setup may change it while
//! the daemon runs.

use crate::error::ControllerError;
use serde::Deserialize;
use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_DIR: &str = "/opt/klot-io/config";
const DEFAULT_KUBECONFIG: &str = "/home/pi/.kube/config";
const DEFAULT_NGINX_CONF_DIR: &str = "/etc/nginx/conf.d";
const DEFAULT_TICK_SECONDS: u64 = 5;
const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:8089";

/// Settings read from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Directory holding `kubernetes.yaml`
    pub config_dir: PathBuf,
    /// Canonical node name, overriding the derived one
    pub node_name: Option<String>,
    /// Cluster identifier, overriding `kubernetes.yaml`
    pub cluster: Option<String>,
    /// Kubeconfig used when not running inside the cluster
    pub kubeconfig: PathBuf,
    /// Running as a pod: use the in-cluster service account
    pub in_cluster: bool,
    /// Directory the reverse proxy reads its server blocks from
    pub nginx_conf_dir: PathBuf,
    /// Delay between ticks
    pub tick: Duration,
    /// Listener for health and metrics endpoints
    pub metrics_addr: SocketAddr,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let path = |key: &str, default: &str| PathBuf::from(lookup(key).unwrap_or_else(|| default.to_string()));

        let tick = match lookup("KLOTIO_TICK_SECONDS") {
            Some(value) => value.parse::<u64>().map_err(|e| {
                ControllerError::InvalidConfig(format!("KLOTIO_TICK_SECONDS {:?}: {}", value, e))
            })?,
            None => DEFAULT_TICK_SECONDS,
        };

        let metrics_addr = lookup("KLOTIO_METRICS_ADDR").unwrap_or_else(|| DEFAULT_METRICS_ADDR.to_string());
        let metrics_addr = metrics_addr.parse::<SocketAddr>().map_err(|e| {
            ControllerError::InvalidConfig(format!("KLOTIO_METRICS_ADDR {:?}: {}", metrics_addr, e))
        })?;

        Ok(Self {
            config_dir: path("KLOTIO_CONFIG_DIR", DEFAULT_CONFIG_DIR),
            node_name: lookup("KLOTIO_NODE_NAME").filter(|v| !v.is_empty()),
            cluster: lookup("KLOTIO_CLUSTER").filter(|v| !v.is_empty()),
            kubeconfig: path("KUBECONFIG", DEFAULT_KUBECONFIG),
            in_cluster: lookup("KUBERNETES_SERVICE_HOST").is_some(),
            nginx_conf_dir: path("KLOTIO_NGINX_CONF_DIR", DEFAULT_NGINX_CONF_DIR),
            tick: Duration::from_secs(tick),
            metrics_addr,
        })
    }

    /// Path of the node's bootstrap file.
    pub fn identity_path(&self) -> PathBuf {
        self.config_dir.join("kubernetes.yaml")
    }

    /// Read the node identity, applying the environment overrides.
    pub async fn load_identity(&self) -> Result<NodeIdentity, ControllerError> {
        let text = tokio::fs::read_to_string(self.identity_path()).await?;
        let file: NodeFile = serde_yaml::from_str(&text)?;
        self.identity(file)
    }

    /// Kubeconfig to use, or `None` for the in-cluster configuration.
    /// `Err` while neither is available yet.
    pub fn kubeconfig_source(&self) -> Result<Option<&Path>, ControllerError> {
        if self.in_cluster {
            return Ok(None);
        }
        if self.kubeconfig.exists() {
            return Ok(Some(self.kubeconfig.as_path()));
        }
        Err(ControllerError::InvalidConfig(format!(
            "kubeconfig {} does not exist yet",
            self.kubeconfig.display()
        )))
    }

    fn identity(&self, file: NodeFile) -> Result<NodeIdentity, ControllerError> {
        if file.role == NodeRole::Reset {
            return Ok(NodeIdentity { role: NodeRole::Reset, node: String::new(), cluster: String::new() });
        }

        let cluster = self
            .cluster
            .clone()
            .or(file.cluster)
            .ok_or_else(|| ControllerError::InvalidConfig("kubernetes.yaml has no cluster".to_string()))?;

        let node = match (&self.node_name, file.role) {
            (Some(node), _) => node.clone(),
            (None, NodeRole::Master) => format!("{}-klot-io", cluster),
            (None, _) => {
                let name = file.name.ok_or_else(|| {
                    ControllerError::InvalidConfig("kubernetes.yaml has no name for a worker".to_string())
                })?;
                format!("{}-{}-klot-io", name, cluster)
            }
        };

        Ok(NodeIdentity { role: file.role, node, cluster })
    }
}

/// What this node does in its cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Runs the App controller and the ingress publisher
    Master,
    /// Runs the ingress publisher only
    Worker,
    /// Being reset: runs nothing
    Reset,
}

/// Who this node is, as of the last read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    /// Node role
    pub role: NodeRole,
    /// Canonical node name (empty when resetting)
    pub node: String,
    /// Cluster identifier (empty when resetting)
    pub cluster: String,
}

#[derive(Debug, Deserialize)]
struct NodeFile {
    role: NodeRole,
    cluster: Option<String>,
    name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ControllerError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    fn identity(config: &Config, yaml: &str) -> Result<NodeIdentity, ControllerError> {
        config.identity(serde_yaml::from_str(yaml).unwrap())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();

        assert_eq!(config.config_dir, PathBuf::from("/opt/klot-io/config"));
        assert_eq!(config.kubeconfig, PathBuf::from("/home/pi/.kube/config"));
        assert_eq!(config.nginx_conf_dir, PathBuf::from("/etc/nginx/conf.d"));
        assert_eq!(config.tick, Duration::from_secs(5));
        assert_eq!(config.metrics_addr, "0.0.0.0:8089".parse::<SocketAddr>().unwrap());
        assert!(!config.in_cluster);
        assert!(config.node_name.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("KLOTIO_TICK_SECONDS", "30"),
            ("KLOTIO_METRICS_ADDR", "127.0.0.1:9000"),
            ("KLOTIO_NODE_NAME", "pi"),
            ("KUBERNETES_SERVICE_HOST", "10.96.0.1"),
        ])
        .unwrap();

        assert_eq!(config.tick, Duration::from_secs(30));
        assert_eq!(config.metrics_addr.port(), 9000);
        assert_eq!(config.node_name.as_deref(), Some("pi"));
        assert!(config.in_cluster);
        assert_eq!(config.kubeconfig_source().unwrap(), None);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(config(&[("KLOTIO_TICK_SECONDS", "soon")]), Err(ControllerError::InvalidConfig(_))));
        assert!(matches!(config(&[("KLOTIO_METRICS_ADDR", "nowhere")]), Err(ControllerError::InvalidConfig(_))));
    }

    #[test]
    fn test_node_names_are_derived_from_role() {
        let config = config(&[]).unwrap();

        let master = identity(&config, "role: master\ncluster: home\n").unwrap();
        assert_eq!(master.node, "home-klot-io");
        assert_eq!(master.cluster, "home");

        let worker = identity(&config, "role: worker\ncluster: home\nname: pi2\n").unwrap();
        assert_eq!(worker.node, "pi2-home-klot-io");
        assert_eq!(worker.role, NodeRole::Worker);

        let reset = identity(&config, "role: reset\n").unwrap();
        assert_eq!(reset.role, NodeRole::Reset);
    }

    #[test]
    fn test_incomplete_identity_is_rejected() {
        let config = config(&[]).unwrap();

        assert!(matches!(identity(&config, "role: master\n"), Err(ControllerError::InvalidConfig(_))));
        assert!(matches!(
            identity(&config, "role: worker\ncluster: home\n"),
            Err(ControllerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_environment_overrides_identity() {
        let config = config(&[("KLOTIO_CLUSTER", "lab"), ("KLOTIO_NODE_NAME", "bench")]).unwrap();

        let identity = identity(&config, "role: worker\ncluster: home\nname: pi2\n").unwrap();
        assert_eq!(identity.cluster, "lab");
        assert_eq!(identity.node, "bench");
    }

    #[tokio::test]
    async fn test_load_identity_from_file() {
        let dir = env::temp_dir().join(format!("klotio-config-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("kubernetes.yaml"), "role: master\ncluster: home\n").await.unwrap();
        let config = config(&[("KLOTIO_CONFIG_DIR", dir.to_str().unwrap())]).unwrap();

        let identity = config.load_identity().await.unwrap();
        assert_eq!(identity.node, "home-klot-io");

        tokio::fs::remove_dir_all(&dir).await.unwrap();
        assert!(matches!(config.load_identity().await, Err(ControllerError::Io(_))));
    }
}
