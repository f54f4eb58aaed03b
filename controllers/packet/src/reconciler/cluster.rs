//! PacketCluster reconciliation.
//!
//! Reserves (or finds) the elastic IP used as the control-plane endpoint and
//! marks the cluster infrastructure ready. Deleting a PacketCluster never
//! releases that IP.

use super::{Reconciler, CONTROL_PLANE_PORT, OWNER_REQUEUE};
use crate::error::ControllerError;
use crate::scope::{ClusterScope, ClusterScopeParams};
use crds::{
    capi_owner_name, has_paused_annotation, Cluster, ClusterSpec, ConditionSeverity, PacketCluster, VipManager,
    DELETING_REASON, IP_RESERVATION_FAILED_REASON,
};
use kube_runtime::controller::Action;
use packet_client::{CreateIpReservationRequest, IpReservation, Lookup};
use tracing::{debug, info, warn};

impl Reconciler {
    /// Reconcile the PacketCluster `namespace/name`
    pub async fn reconcile_packet_cluster(&self, namespace: &str, name: &str) -> Result<Action, ControllerError> {
        info!("Reconciling PacketCluster {}/{}", namespace, name);

        let Some(packet_cluster) = self.store.get_packet_cluster(namespace, name).await? else {
            debug!("PacketCluster {}/{} no longer exists", namespace, name);
            return Ok(Action::await_change());
        };
        let deleting = packet_cluster.metadata.deletion_timestamp.is_some();

        let Some(cluster) = self.owner_cluster(&packet_cluster, deleting).await? else {
            info!("Waiting for Cluster Controller to set OwnerRef on PacketCluster {}/{}", namespace, name);
            return Ok(Action::requeue(OWNER_REQUEUE));
        };

        if cluster.is_paused() || has_paused_annotation(&packet_cluster.metadata) {
            info!("PacketCluster {}/{} or its Cluster is paused, skipping", namespace, name);
            return Ok(Action::await_change());
        }

        let mut scope = ClusterScope::new(ClusterScopeParams {
            store: Some(self.store.clone()),
            cluster: Some(cluster),
            packet_cluster: Some(packet_cluster),
        })?;

        let result = if scope.is_deleting() {
            self.reconcile_cluster_delete(&mut scope).await
        } else {
            self.reconcile_cluster_normal(&mut scope).await
        };
        scope.close(result).await
    }

    /// The owning Cluster; a deleting PacketCluster whose Cluster is already gone
    /// gets a stand-in so its finalizer can still be removed
    async fn owner_cluster(&self, packet_cluster: &PacketCluster, deleting: bool) -> Result<Option<Cluster>, ControllerError> {
        let namespace = packet_cluster.metadata.namespace.as_deref().unwrap_or("default");
        let owner = capi_owner_name(&packet_cluster.metadata, "Cluster");

        let found = match owner.as_deref() {
            Some(cluster_name) => self.store.get_cluster(namespace, cluster_name).await?,
            None => None,
        };
        if found.is_some() || !deleting {
            return Ok(found);
        }

        let name = owner.or_else(|| packet_cluster.metadata.name.clone()).unwrap_or_default();
        let mut stand_in = Cluster::new(&name, ClusterSpec::default());
        stand_in.metadata.namespace = Some(namespace.to_string());
        Ok(Some(stand_in))
    }

    async fn reconcile_cluster_normal(&self, scope: &mut ClusterScope) -> Result<Action, ControllerError> {
        scope.add_finalizer();

        if scope.control_plane_endpoint().host.is_empty() {
            let ip = match self.control_plane_ip(scope).await {
                Ok(ip) => ip,
                Err(e) => {
                    scope.mark_network_not_ready(IP_RESERVATION_FAILED_REASON, ConditionSeverity::Error, e.to_string());
                    return Err(e);
                }
            };
            scope.set_control_plane_endpoint(&ip.address, CONTROL_PLANE_PORT);
        } else {
            let host = scope.control_plane_endpoint().host.clone();
            debug!("PacketCluster {} already has control-plane endpoint {}", scope.key(), host);
            scope.set_control_plane_endpoint(&host, CONTROL_PLANE_PORT);
        }

        if scope.vip_manager() == VipManager::KubeVip {
            info!("Enabling BGP on project {} for kube-vip", scope.project_id());
            self.packet_client.enable_project_bgp(scope.project_id()).await?;
        }

        scope.set_ready();
        Ok(Action::await_change())
    }

    /// Find the cluster's elastic IP by tag, reserving one if none exists
    async fn control_plane_ip(&self, scope: &ClusterScope) -> Result<IpReservation, ControllerError> {
        let tags = vec![scope.cluster_tag()];
        match self.packet_client.get_ip_by_tags(scope.project_id(), &tags).await? {
            Lookup::Found(ip) => {
                info!("Reusing control-plane IP {} for PacketCluster {}", ip.address, scope.key());
                Ok(ip)
            }
            Lookup::NotFound => {
                let request = CreateIpReservationRequest::public_ipv4(
                    scope.facility().map(str::to_string),
                    scope.metro().map(str::to_string),
                    tags,
                );
                let ip = self.packet_client.create_ip_reservation(scope.project_id(), &request).await?;
                info!("Reserved control-plane IP {} for PacketCluster {}", ip.address, scope.key());
                Ok(ip)
            }
        }
    }

    async fn reconcile_cluster_delete(&self, scope: &mut ClusterScope) -> Result<Action, ControllerError> {
        info!("Reconciling PacketCluster deletion {}", scope.key());
        if !scope.control_plane_endpoint().host.is_empty() {
            warn!(
                "Control-plane IP {} of PacketCluster {} is not released; delete it in Equinix Metal if unused",
                scope.control_plane_endpoint().host,
                scope.key()
            );
        }

        scope.mark_network_not_ready(DELETING_REASON, ConditionSeverity::Info, "");
        scope.remove_finalizer();
        Ok(Action::await_change())
    }
}
