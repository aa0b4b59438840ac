//! Main controller loop.
//!
//! One tick reads the node identity, makes sure a cluster handle exists,
//! runs the App pass on master nodes and the ingress pass on every node.
//! Ticks run back to back with a fixed delay and never overlap.

use crate::cluster::{ClusterApi, KubeCluster};
use crate::config::{Config, NodeRole};
use crate::error::ControllerError;
use crate::ingress::IngressPublisher;
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use manifest_client::ManifestFetcher;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Node controller.
pub struct Controller {
    config: Config,
    fetcher: Arc<dyn ManifestFetcher>,
    /// Created on the first tick a cluster is reachable, kept afterwards
    cluster: Option<Arc<dyn ClusterApi>>,
    ingress: IngressPublisher,
    metrics: Arc<Metrics>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.config)
            .field("connected", &self.cluster.is_some())
            .field("ingress", &self.ingress)
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Creates a controller that connects to the cluster lazily.
    pub fn new(
        config: Config,
        fetcher: Arc<dyn ManifestFetcher>,
        ingress: IngressPublisher,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { config, fetcher, cluster: None, ingress, metrics }
    }

    /// Run ticks until ctrl-c.
    pub async fn run(mut self) {
        info!("Starting tick loop every {:?}", self.config.tick);

        loop {
            match self.tick().await {
                Ok(()) => self.metrics.record_tick(),
                Err(e) => {
                    error!("Tick failed: {}", e);
                    self.metrics.record_tick_failure();
                }
            }

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutting down");
                    return;
                }
                () = tokio::time::sleep(self.config.tick) => {}
            }
        }
    }

    /// One tick.
    pub async fn tick(&mut self) -> Result<(), ControllerError> {
        let identity = self.config.load_identity().await?;
        if identity.role == NodeRole::Reset {
            debug!("Node is resetting, skipping tick");
            return Ok(());
        }

        let Some(cluster) = self.ensure_cluster().await? else {
            return Ok(());
        };

        if identity.role == NodeRole::Master {
            let reconciler = Reconciler::new(Arc::clone(&cluster), Arc::clone(&self.fetcher), identity.node.as_str());
            let pass = reconciler.reconcile_apps().await?;
            debug!("App pass: {:?}", pass);
            self.metrics.record_app_errors(&pass.failed);
        }

        let hosts = self.ingress.publish(cluster.as_ref(), &identity.node, &identity.cluster).await?;
        self.metrics.set_published_hosts(hosts);

        Ok(())
    }

    async fn ensure_cluster(&mut self) -> Result<Option<Arc<dyn ClusterApi>>, ControllerError> {
        if let Some(cluster) = &self.cluster {
            return Ok(Some(Arc::clone(cluster)));
        }

        let kubeconfig = match self.config.kubeconfig_source() {
            Ok(kubeconfig) => kubeconfig,
            Err(e) => {
                debug!("No cluster yet: {}", e);
                return Ok(None);
            }
        };

        let cluster: Arc<dyn ClusterApi> = Arc::new(KubeCluster::connect(kubeconfig).await?);
        info!("Connected to cluster");
        self.cluster = Some(Arc::clone(&cluster));
        Ok(Some(cluster))
    }
}
