//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the Equinix Metal
//! client, the Kubernetes store and the workload-cluster probe into a
//! `Reconciler`, then runs one watcher per infrastructure kind:
//! - PacketCluster: control-plane endpoint and cluster network
//! - PacketMachine: device lifecycle

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::kube_store::KubeApiStore;
use crate::reconciler::Reconciler;
use crate::watcher::Watcher;
use crate::workload::KubeconfigProbe;
use kube::Client;
use packet_client::{PacketClient, PacketClientTrait};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Main controller for Packet infrastructure resources.
pub struct Controller {
    packet_cluster_watcher: JoinHandle<Result<(), ControllerError>>,
    packet_machine_watcher: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance and starts its watchers.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing Packet Controller");

        let kube_client = Client::try_default().await?;

        let packet_client = PacketClient::new(config.api_url.clone(), config.api_token.clone())?;

        info!("Validating Equinix Metal token and connectivity...");
        packet_client.validate_token().await.map_err(|e| {
            error!("Failed to validate Equinix Metal token: {}", e);
            error!("Please ensure:");
            error!("  1. PACKET_API_KEY environment variable is set correctly");
            error!("  2. The token has access to the projects referenced by PacketClusters");
            error!("  3. The Equinix Metal API is reachable at {}", config.api_url);
            ControllerError::Packet(e)
        })?;
        info!("Equinix Metal token validated");

        let reconciler = Arc::new(Reconciler::new(
            Arc::new(packet_client),
            Arc::new(KubeApiStore::new(kube_client.clone())),
            Arc::new(KubeconfigProbe::new(kube_client.clone(), config.workload_cluster_timeout)),
        ));

        let watcher_instance = Arc::new(Watcher::new(
            reconciler,
            kube_client,
            config.namespace.clone(),
            config.cluster_concurrency,
            config.machine_concurrency,
        ));

        let packet_cluster_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_packet_clusters().await })
        };

        let packet_machine_watcher = {
            let watcher = watcher_instance;
            tokio::spawn(async move { watcher.watch_packet_machines().await })
        };

        Ok(Self {
            packet_cluster_watcher,
            packet_machine_watcher,
        })
    }

    /// Runs the controller until shutdown.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Packet Controller running");

        // Watchers run forever; the first one to exit stops the controller
        tokio::select! {
            result = &mut self.packet_cluster_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("PacketCluster watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("PacketCluster watcher error: {}", e)))?;
            }
            result = &mut self.packet_machine_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("PacketMachine watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("PacketMachine watcher error: {}", e)))?;
            }
        }

        Ok(())
    }
}
