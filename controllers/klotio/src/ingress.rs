//! Ingress publisher.
//!
//! Every LoadBalancer Service with http(s) ports is published by exactly one
//! node: the smallest node name among the nodes running its pods. That node
//! advertises `<service>.<namespace>.<cluster>-klot-io.local` as a CNAME of
//! itself and proxies the Service's ports to its local pod.

use crate::cluster::ClusterApi;
use crate::error::ControllerError;
use k8s_openapi::api::core::v1::{Pod, Service, ServicePort};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use local_ingress::{NameRegistrar, ProxyServer, ReverseProxy, Route, RouteTable};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// A Service port to proxy, before its target port is resolved.
#[derive(Debug, Clone, PartialEq)]
struct CandidatePort {
    protocol: &'static str,
    external: i32,
    target: Option<IntOrString>,
}

/// Publishes the Services this node is elected for.
pub struct IngressPublisher {
    registrar: Box<dyn NameRegistrar>,
    proxy: Box<dyn ReverseProxy>,
    /// CNAMEs registered by the last successful registration
    cnames: BTreeSet<String>,
}

impl std::fmt::Debug for IngressPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngressPublisher").field("cnames", &self.cnames).finish_non_exhaustive()
    }
}

impl IngressPublisher {
    /// Creates a publisher that has registered nothing yet.
    pub fn new(registrar: Box<dyn NameRegistrar>, proxy: Box<dyn ReverseProxy>) -> Self {
        Self { registrar, proxy, cnames: BTreeSet::new() }
    }

    /// One ingress pass: compute routes, re-register CNAMEs when the host
    /// set changed, rewrite the proxy when its routes differ. Returns the
    /// number of hosts published.
    pub async fn publish(
        &mut self,
        cluster: &dyn ClusterApi,
        node: &str,
        cluster_name: &str,
    ) -> Result<usize, ControllerError> {
        let routes = expected_routes(cluster, node, cluster_name).await?;

        let cnames: BTreeSet<String> = routes.keys().cloned().collect();
        if cnames != self.cnames {
            debug!("CNAMEs differ: expected {:?}, actual {:?}", cnames, self.cnames);
            self.registrar.register(&cnames).await?;
            info!("Registered {} CNAME(s)", cnames.len());
            self.cnames = cnames;
        }

        let actual = self.proxy.routes().await?;
        if actual != routes {
            debug!("Routes differ: expected {:?}, actual {:?}", routes, actual);
            self.proxy.publish(&routes).await?;
            info!("Published {} proxy host(s)", routes.len());
        }

        Ok(routes.len())
    }
}

/// Routes `node` should serve: one per Service it is elected for.
pub async fn expected_routes(
    cluster: &dyn ClusterApi,
    node: &str,
    cluster_name: &str,
) -> Result<RouteTable, ControllerError> {
    let mut routes = RouteTable::new();

    for service in cluster.list_services().await? {
        let Some((name, namespace, selector, ports)) = candidate(&service) else {
            continue;
        };

        let pods = cluster.list_pods(namespace, selector).await?;
        let node_pods = pods_by_node(&pods);

        let Some(elected) = node_pods.keys().next().copied() else {
            debug!("No scheduled pods for {}/{}", namespace, name);
            continue;
        };
        if elected != node {
            debug!("{}/{} is published by {}", namespace, name, elected);
            continue;
        }
        let Some((ip, pod)) = node_pods.get(node) else {
            continue;
        };

        let mut servers = Vec::with_capacity(ports.len());
        for port in &ports {
            match resolve_target(port, pod) {
                Some(internal) => servers.push(ProxyServer {
                    protocol: port.protocol.to_string(),
                    external: port.external,
                    internal,
                }),
                None => warn!(
                    "Cannot resolve target port {:?} of {}/{} on this node, skipping",
                    port.target, namespace, name
                ),
            }
        }
        if servers.is_empty() {
            continue;
        }

        let host = format!("{}.{}.{}-klot-io.local", name, namespace, cluster_name);
        routes.insert(host, Route { ip: ip.to_string(), servers });
    }

    Ok(routes)
}

/// Name, namespace, selector and http(s) ports of a publishable Service.
fn candidate(service: &Service) -> Option<(&str, &str, &BTreeMap<String, String>, Vec<CandidatePort>)> {
    let spec = service.spec.as_ref()?;
    if spec.type_.as_deref() != Some("LoadBalancer") {
        return None;
    }

    let name = service.metadata.name.as_deref()?;
    let namespace = service.metadata.namespace.as_deref()?;
    let selector = spec.selector.as_ref()?;
    let ports: Vec<CandidatePort> = spec.ports.iter().flatten().filter_map(candidate_port).collect();

    if ports.is_empty() {
        return None;
    }
    Some((name, namespace, selector, ports))
}

fn candidate_port(port: &ServicePort) -> Option<CandidatePort> {
    let name = port.name.as_deref()?.to_lowercase();
    let protocol = if name.starts_with("https") {
        "https"
    } else if name.starts_with("http") {
        "http"
    } else {
        return None;
    };

    Some(CandidatePort { protocol, external: port.port, target: port.target_port.clone() })
}

/// Node name → (pod IP, pod) for pods with both set. A later pod on the
/// same node replaces an earlier one.
fn pods_by_node(pods: &[Pod]) -> BTreeMap<&str, (&str, &Pod)> {
    let mut node_pods = BTreeMap::new();
    for pod in pods {
        let node = pod.spec.as_ref().and_then(|s| s.node_name.as_deref());
        let ip = pod.status.as_ref().and_then(|s| s.pod_ip.as_deref());
        if let (Some(node), Some(ip)) = (node, ip) {
            node_pods.insert(node, (ip, pod));
        }
    }
    node_pods
}

/// Backend port: numeric target as is, named target looked up in the
/// pod's container ports, no target meaning the Service port itself.
fn resolve_target(port: &CandidatePort, pod: &Pod) -> Option<i32> {
    match &port.target {
        None => Some(port.external),
        Some(IntOrString::Int(target)) => Some(*target),
        Some(IntOrString::String(target)) => {
            if let Ok(number) = target.parse() {
                return Some(number);
            }
            pod.spec
                .as_ref()?
                .containers
                .iter()
                .flat_map(|c| c.ports.iter().flatten())
                .find(|p| p.name.as_deref() == Some(target.as_str()))
                .map(|p| p.container_port)
        }
    }
}
