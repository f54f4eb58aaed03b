//! ClusterScope: one reconcile's view of a PacketCluster and its Cluster.

use super::patch::{PatchHelper, PatchTarget};
use super::{add_finalizer, first_error, remove_finalizer};
use crate::error::ControllerError;
use crate::kube_store::KubeStore;
use crate::tags;
use crds::{
    mark_false, mark_true, set_summary, ApiEndpoint, Cluster, ConditionSeverity, PacketCluster, VipManager,
    CLUSTER_FINALIZER, NETWORK_INFRASTRUCTURE_READY_CONDITION,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Inputs for `ClusterScope::new`
#[derive(Default)]
pub struct ClusterScopeParams {
    pub store: Option<Arc<dyn KubeStore>>,
    pub cluster: Option<Cluster>,
    pub packet_cluster: Option<PacketCluster>,
}

pub struct ClusterScope {
    store: Arc<dyn KubeStore>,
    pub cluster: Cluster,
    pub packet_cluster: PacketCluster,
    patch: PatchHelper,
    closed: bool,
}

impl std::fmt::Debug for ClusterScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterScope").field("key", &self.key()).finish()
    }
}

impl ClusterScope {
    pub fn new(params: ClusterScopeParams) -> Result<Self, ControllerError> {
        let store = params.store.ok_or(ControllerError::MissingScopeParameter("client"))?;
        let cluster = params.cluster.ok_or(ControllerError::MissingScopeParameter("Cluster"))?;
        let packet_cluster = params
            .packet_cluster
            .ok_or(ControllerError::MissingScopeParameter("PacketCluster"))?;
        let patch = PatchHelper::new(&packet_cluster)?;

        Ok(Self {
            store,
            cluster,
            packet_cluster,
            patch,
            closed: false,
        })
    }

    pub fn name(&self) -> &str {
        self.packet_cluster.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.packet_cluster.metadata.namespace.as_deref().unwrap_or("default")
    }

    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace(), self.name())
    }

    /// Name of the owning cluster-api Cluster
    pub fn cluster_name(&self) -> &str {
        self.cluster.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn project_id(&self) -> &str {
        &self.packet_cluster.spec.project_id
    }

    pub fn facility(&self) -> Option<&str> {
        self.packet_cluster.spec.facility.as_deref()
    }

    pub fn metro(&self) -> Option<&str> {
        self.packet_cluster.spec.metro.as_deref()
    }

    pub fn vip_manager(&self) -> VipManager {
        self.packet_cluster.spec.vip_manager
    }

    pub fn cluster_tag(&self) -> String {
        tags::cluster_tag(self.cluster_name())
    }

    pub fn control_plane_endpoint(&self) -> &ApiEndpoint {
        &self.packet_cluster.spec.control_plane_endpoint
    }

    /// Set the control-plane endpoint; an endpoint already set is left alone
    pub fn set_control_plane_endpoint(&mut self, host: &str, port: i32) {
        let key = self.key();
        let endpoint = &mut self.packet_cluster.spec.control_plane_endpoint;
        if !endpoint.host.is_empty() {
            if endpoint.host != host {
                warn!(
                    "PacketCluster {} keeps endpoint {} (reservation reports {})",
                    key,
                    endpoint.host,
                    host
                );
            }
            if endpoint.port == 0 {
                endpoint.port = port;
            }
            return;
        }
        endpoint.host = host.to_string();
        endpoint.port = port;
    }

    pub fn set_ready(&mut self) {
        self.packet_cluster.status.get_or_insert_with(Default::default).ready = true;
        mark_true(&mut self.packet_cluster, NETWORK_INFRASTRUCTURE_READY_CONDITION);
    }

    pub fn mark_network_not_ready(&mut self, reason: &str, severity: ConditionSeverity, message: impl Into<String>) {
        mark_false(
            &mut self.packet_cluster,
            NETWORK_INFRASTRUCTURE_READY_CONDITION,
            reason,
            severity,
            message,
        );
    }

    pub fn is_deleting(&self) -> bool {
        self.packet_cluster.metadata.deletion_timestamp.is_some()
    }

    pub fn add_finalizer(&mut self) -> bool {
        add_finalizer(&mut self.packet_cluster.metadata.finalizers, CLUSTER_FINALIZER)
    }

    pub fn remove_finalizer(&mut self) -> bool {
        remove_finalizer(&mut self.packet_cluster.metadata.finalizers, CLUSTER_FINALIZER)
    }

    /// Summarise conditions and persist every change made through this scope
    ///
    /// Always patches, whatever `result` holds; returns `result` unless it
    /// succeeded and the patch failed.
    pub async fn close<T>(mut self, result: Result<T, ControllerError>) -> Result<T, ControllerError> {
        self.closed = true;
        let closed = self.persist().await;
        first_error(result, closed, &self.key())
    }

    async fn persist(&mut self) -> Result<(), ControllerError> {
        let deleting = self.is_deleting();
        set_summary(&mut self.packet_cluster, &[NETWORK_INFRASTRUCTURE_READY_CONDITION], !deleting);

        let (namespace, name) = (self.namespace().to_string(), self.name().to_string());
        let mut resource_version = self.packet_cluster.metadata.resource_version.clone();
        let plan = self.patch.plan(&self.packet_cluster, resource_version.as_deref())?;
        if plan.is_empty() {
            debug!("PacketCluster {}/{} unchanged, skipping patch", namespace, name);
            return Ok(());
        }

        if let Some(object_patch) = plan.object {
            let updated = self
                .store
                .patch_packet_cluster(&namespace, &name, &object_patch, PatchTarget::Object)
                .await?;
            resource_version = updated.metadata.resource_version;
        }

        if let Some(status_patch) = plan.status {
            let status_patch = super::patch::with_resource_version(status_patch, resource_version.as_deref());
            match self
                .store
                .patch_packet_cluster(&namespace, &name, &status_patch, PatchTarget::Status)
                .await
            {
                Err(e) if e.is_kube_not_found() && self.is_deleting() => {
                    debug!("PacketCluster {}/{} is gone, dropping status patch", namespace, name);
                }
                other => {
                    other?;
                }
            }
        }
        Ok(())
    }
}

impl Drop for ClusterScope {
    fn drop(&mut self) {
        if !self.closed {
            warn!("ClusterScope for {} dropped without close, changes were not persisted", self.key());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_cluster, test_packet_cluster, FakeKubeStore};

    #[test]
    fn test_missing_parameters_fail_fast() {
        let err = ClusterScope::new(ClusterScopeParams::default()).unwrap_err();
        assert!(matches!(err, ControllerError::MissingScopeParameter("client")));

        let err = ClusterScope::new(ClusterScopeParams {
            store: Some(Arc::new(FakeKubeStore::new())),
            cluster: Some(test_cluster("c1", "default")),
            packet_cluster: None,
        })
        .unwrap_err();
        assert!(matches!(err, ControllerError::MissingScopeParameter("PacketCluster")));
    }

    #[test]
    fn test_endpoint_is_set_once() {
        let mut scope = ClusterScope::new(ClusterScopeParams {
            store: Some(Arc::new(FakeKubeStore::new())),
            cluster: Some(test_cluster("c1", "default")),
            packet_cluster: Some(test_packet_cluster("pc1", "default", "c1", "p1")),
        })
        .unwrap();

        scope.set_control_plane_endpoint("147.75.1.1", 6443);
        scope.set_control_plane_endpoint("147.75.9.9", 6443);
        assert_eq!(scope.control_plane_endpoint().host, "147.75.1.1");
        assert_eq!(scope.control_plane_endpoint().port, 6443);
        scope.closed = true;
    }

    #[tokio::test]
    async fn test_close_persists_changes_even_when_the_body_failed() {
        let store = Arc::new(FakeKubeStore::new());
        store.insert(&test_packet_cluster("pc1", "default", "c1", "p1"));
        let packet_cluster = store.packet_cluster("default", "pc1").unwrap();

        let mut scope = ClusterScope::new(ClusterScopeParams {
            store: Some(store.clone()),
            cluster: Some(test_cluster("c1", "default")),
            packet_cluster: Some(packet_cluster),
        })
        .unwrap();
        scope.add_finalizer();
        scope.set_control_plane_endpoint("147.75.1.1", 6443);

        let result: Result<(), _> = scope.close(Err(ControllerError::DeviceFailed("boom".to_string()))).await;
        assert!(matches!(result, Err(ControllerError::DeviceFailed(_))));

        let stored = store.packet_cluster("default", "pc1").unwrap();
        assert_eq!(stored.spec.control_plane_endpoint.host, "147.75.1.1");
        assert_eq!(stored.metadata.finalizers, Some(vec![CLUSTER_FINALIZER.to_string()]));
        assert!(stored.status.is_some_and(|s| !s.conditions.is_empty()));
    }
}
