//! klot-io node controller
//!
//! Runs on every node of a klot-io cluster:
//! - App: downloads, installs and uninstalls Apps and wires their
//!   subscriptions (master nodes only)
//! - Ingress: publishes LoadBalancer Services under `.local` names through
//!   avahi and nginx (every node)
//!
//! Health and metrics endpoints are served on `KLOTIO_METRICS_ADDR`.

mod cluster;
mod config;
mod controller;
mod error;
mod ingress;
mod metrics;
mod orderer;
mod reconciler;
mod registry;
mod server;
#[cfg(test)]
mod test_utils;

use anyhow::Result;
use config::Config;
use controller::Controller;
use ingress::IngressPublisher;
use local_ingress::{AvahiRegistrar, NginxProxy};
use manifest_client::ManifestClient;
use metrics::Metrics;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting klot-io node controller");

    let config = Config::from_env()?;
    info!("Configuration:");
    info!("  Config dir: {}", config.config_dir.display());
    info!("  Kubeconfig: {}", if config.in_cluster { "in-cluster".to_string() } else { config.kubeconfig.display().to_string() });
    info!("  Nginx conf dir: {}", config.nginx_conf_dir.display());
    info!("  Tick: {:?}", config.tick);
    info!("  Metrics: {}", config.metrics_addr);

    let metrics = Arc::new(Metrics::new()?);
    let server_metrics = Arc::clone(&metrics);
    let metrics_addr = config.metrics_addr;
    tokio::spawn(async move {
        if let Err(e) = server::serve(metrics_addr, server_metrics).await {
            error!("Metrics server failed: {}", e);
        }
    });

    let ingress = IngressPublisher::new(
        Box::new(AvahiRegistrar::new()),
        Box::new(NginxProxy::new(config.nginx_conf_dir.clone())),
    );
    let controller = Controller::new(config, Arc::new(ManifestClient::new()?), ingress, metrics);
    controller.run().await;

    Ok(())
}
