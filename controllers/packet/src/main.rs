//! Packet Controller
//!
//! cluster-api infrastructure provider for Equinix Metal (formerly Packet):
//! - PacketCluster: reserves the control-plane elastic IP and, for kube-vip
//!   clusters, enables BGP on the project
//! - PacketMachine: creates, tracks and deletes the device backing a Machine

mod backoff;
mod config;
mod controller;
mod error;
mod kube_store;
mod provider_id;
mod reconciler;
mod scope;
mod tags;
mod watcher;
mod workload;

#[cfg(test)]
mod test_utils;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting Packet Controller");

    let config = ControllerConfig::from_env()?;

    info!("Configuration:");
    info!("  Equinix Metal API: {}", config.api_url);
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!(
        "  Concurrency: {} PacketCluster, {} PacketMachine",
        config.cluster_concurrency, config.machine_concurrency
    );
    info!("  Workload cluster timeout: {:?}", config.workload_cluster_timeout);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
