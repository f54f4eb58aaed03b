//! Kubernetes access used by the reconcilers.
//!
//! Reconcilers never hold typed `Api` handles directly; they read and patch
//! through `KubeStore` so tests can run against an in-memory store.

use crate::error::ControllerError;
use crate::scope::patch::PatchTarget;
use crds::{Cluster, KubeadmConfig, Machine, PacketCluster, PacketMachine};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use serde_json::Value;
use tracing::debug;

/// Reads and patches the objects the controller works with.
///
/// All getters return `Ok(None)` when the object does not exist.
#[async_trait::async_trait]
pub trait KubeStore: Send + Sync {
    async fn get_packet_cluster(&self, namespace: &str, name: &str) -> Result<Option<PacketCluster>, ControllerError>;

    async fn get_packet_machine(&self, namespace: &str, name: &str) -> Result<Option<PacketMachine>, ControllerError>;

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>, ControllerError>;

    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Option<Machine>, ControllerError>;

    async fn get_kubeadm_config(&self, namespace: &str, name: &str) -> Result<Option<KubeadmConfig>, ControllerError>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ControllerError>;

    /// Apply a JSON merge patch to a PacketCluster or its status
    async fn patch_packet_cluster(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
        target: PatchTarget,
    ) -> Result<PacketCluster, ControllerError>;

    /// Apply a JSON merge patch to a PacketMachine or its status
    async fn patch_packet_machine(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
        target: PatchTarget,
    ) -> Result<PacketMachine, ControllerError>;
}

/// `KubeStore` backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeApiStore {
    client: Client,
}

impl KubeApiStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = kube::core::NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

async fn patch_with<K>(api: &Api<K>, name: &str, patch: &Value, target: PatchTarget) -> Result<K, ControllerError>
where
    K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
    K::DynamicType: Default,
{
    debug!("Patching {} {} ({:?}): {}", K::kind(&Default::default()), name, target, patch);
    let params = PatchParams::default();
    let updated = match target {
        PatchTarget::Object => api.patch(name, &params, &Patch::Merge(patch)).await?,
        PatchTarget::Status => api.patch_status(name, &params, &Patch::Merge(patch)).await?,
    };
    Ok(updated)
}

#[async_trait::async_trait]
impl KubeStore for KubeApiStore {
    async fn get_packet_cluster(&self, namespace: &str, name: &str) -> Result<Option<PacketCluster>, ControllerError> {
        Ok(self.api::<PacketCluster>(namespace).get_opt(name).await?)
    }

    async fn get_packet_machine(&self, namespace: &str, name: &str) -> Result<Option<PacketMachine>, ControllerError> {
        Ok(self.api::<PacketMachine>(namespace).get_opt(name).await?)
    }

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>, ControllerError> {
        Ok(self.api::<Cluster>(namespace).get_opt(name).await?)
    }

    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Option<Machine>, ControllerError> {
        Ok(self.api::<Machine>(namespace).get_opt(name).await?)
    }

    async fn get_kubeadm_config(&self, namespace: &str, name: &str) -> Result<Option<KubeadmConfig>, ControllerError> {
        Ok(self.api::<KubeadmConfig>(namespace).get_opt(name).await?)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ControllerError> {
        Ok(self.api::<Secret>(namespace).get_opt(name).await?)
    }

    async fn patch_packet_cluster(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
        target: PatchTarget,
    ) -> Result<PacketCluster, ControllerError> {
        patch_with(&self.api::<PacketCluster>(namespace), name, patch, target).await
    }

    async fn patch_packet_machine(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
        target: PatchTarget,
    ) -> Result<PacketMachine, ControllerError> {
        patch_with(&self.api::<PacketMachine>(namespace), name, patch, target).await
    }
}
