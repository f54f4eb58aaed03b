//! Workload cluster inspection.
//!
//! The providerID resolver asks the workload cluster (the one being
//! provisioned) which Equinix Metal cloud controller it runs. During initial
//! bootstrap that API server does not exist yet, so timeouts are reported as
//! `Unreachable` instead of errors.

use crate::error::ControllerError;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Secret;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use std::time::Duration;
use tracing::{debug, info};

pub const CLOUD_PROVIDER_NAMESPACE: &str = "kube-system";
pub const EQUINIX_METAL_CCM_DEPLOYMENT: &str = "cloud-provider-equinix-metal";
pub const PACKET_CCM_DEPLOYMENT: &str = "packet-cloud-controller-manager";

/// Cloud controller found in a workload cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudProviderDeployment {
    /// `cloud-provider-equinix-metal` is deployed
    EquinixMetal,
    /// The deprecated `packet-cloud-controller-manager` is deployed
    Packet,
    /// The API server answered and neither deployment exists
    Absent,
    /// The API server could not be reached in time, or no kubeconfig exists yet
    Unreachable,
}

#[async_trait::async_trait]
pub trait WorkloadClusterProbe: Send + Sync {
    async fn cloud_provider(&self, namespace: &str, cluster_name: &str) -> Result<CloudProviderDeployment, ControllerError>;
}

/// Probe that connects with the `<cluster>-kubeconfig` secret written by cluster-api
pub struct KubeconfigProbe {
    management: Client,
    timeout: Duration,
}

impl KubeconfigProbe {
    pub fn new(management: Client, timeout: Duration) -> Self {
        Self { management, timeout }
    }

    async fn workload_client(&self, namespace: &str, cluster_name: &str) -> Result<Option<Client>, ControllerError> {
        let secret_name = format!("{}-kubeconfig", cluster_name);
        let secrets: Api<Secret> = Api::namespaced(self.management.clone(), namespace);
        let Some(secret) = secrets.get_opt(&secret_name).await? else {
            debug!("Kubeconfig secret {}/{} does not exist yet", namespace, secret_name);
            return Ok(None);
        };

        let raw = secret
            .data
            .as_ref()
            .and_then(|d| d.get("value"))
            .ok_or_else(|| ControllerError::ProviderId(format!("secret {}/{} has no value key", namespace, secret_name)))?;
        let yaml = String::from_utf8(raw.0.clone())
            .map_err(|e| ControllerError::ProviderId(format!("kubeconfig {} is not UTF-8: {}", secret_name, e)))?;
        let kubeconfig = Kubeconfig::from_yaml(&yaml)
            .map_err(|e| ControllerError::ProviderId(format!("invalid kubeconfig {}: {}", secret_name, e)))?;

        let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| ControllerError::ProviderId(format!("invalid kubeconfig {}: {}", secret_name, e)))?;
        config.connect_timeout = Some(self.timeout);
        config.read_timeout = Some(self.timeout);

        Ok(Some(Client::try_from(config)?))
    }

    /// Which cloud controller the workload cluster behind `client` runs
    async fn cloud_provider_in(
        &self,
        client: &Client,
        namespace: &str,
        cluster_name: &str,
    ) -> Result<CloudProviderDeployment, ControllerError> {
        for (name, found) in [
            (EQUINIX_METAL_CCM_DEPLOYMENT, CloudProviderDeployment::EquinixMetal),
            (PACKET_CCM_DEPLOYMENT, CloudProviderDeployment::Packet),
        ] {
            match self.deployment_exists(client, name).await? {
                None => {
                    info!("Workload cluster {}/{} is not reachable yet", namespace, cluster_name);
                    return Ok(CloudProviderDeployment::Unreachable);
                }
                Some(true) => return Ok(found),
                Some(false) => {}
            }
        }

        Ok(CloudProviderDeployment::Absent)
    }

    async fn deployment_exists(&self, client: &Client, name: &str) -> Result<Option<bool>, ControllerError> {
        let deployments: Api<Deployment> = Api::namespaced(client.clone(), CLOUD_PROVIDER_NAMESPACE);
        match tokio::time::timeout(self.timeout, deployments.get_opt(name)).await {
            Err(_elapsed) => Ok(None),
            Ok(Ok(found)) => Ok(Some(found.is_some())),
            Ok(Err(e)) if is_timeout(&e) => Ok(None),
            Ok(Err(e)) => Err(e.into()),
        }
    }
}

#[async_trait::async_trait]
impl WorkloadClusterProbe for KubeconfigProbe {
    async fn cloud_provider(&self, namespace: &str, cluster_name: &str) -> Result<CloudProviderDeployment, ControllerError> {
        let Some(client) = self.workload_client(namespace, cluster_name).await? else {
            return Ok(CloudProviderDeployment::Unreachable);
        };

        self.cloud_provider_in(&client, namespace, cluster_name).await
    }
}

/// True when any error in the source chain is an I/O timeout
pub fn is_timeout(error: &(dyn std::error::Error + 'static)) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(error);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::TimedOut {
                return true;
            }
        }
        if e.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
            return true;
        }
        current = e.source();
    }
    false
}
