//! PacketCluster CRD
//!
//! Infrastructure for a cluster-api `Cluster`: the Equinix Metal project the
//! cluster lives in and the control-plane endpoint reserved for it.

use crate::conditions::{Condition, Conditioned};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Finalizer placed on PacketClusters by the controller.
pub const CLUSTER_FINALIZER: &str = "packetcluster.infrastructure.cluster.x-k8s.io";

/// Condition reporting whether the control-plane endpoint has been reserved.
pub const NETWORK_INFRASTRUCTURE_READY_CONDITION: &str = "NetworkInfrastructureReady";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "PacketCluster",
    namespaced,
    status = "PacketClusterStatus",
    shortname = "pcl",
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Endpoint","type":"string","jsonPath":".spec.controlPlaneEndpoint.host"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PacketClusterSpec {
    /// Equinix Metal project the cluster's devices and IPs belong to
    #[serde(rename = "projectID")]
    pub project_id: String,

    /// Facility used for the control-plane elastic IP (deprecated in favour of `metro`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facility: Option<String>,

    /// Metro used for the control-plane elastic IP
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metro: Option<String>,

    /// Endpoint used to reach the workload cluster's API server
    #[serde(default)]
    pub control_plane_endpoint: ApiEndpoint,

    /// How the control-plane virtual IP is managed
    #[serde(default)]
    pub vip_manager: VipManager,
}

/// Host/port pair of an API server endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApiEndpoint {
    #[serde(default)]
    pub host: String,

    #[serde(default)]
    pub port: i32,
}

impl ApiEndpoint {
    /// True when neither host nor port has been set.
    pub fn is_zero(&self) -> bool {
        self.host.is_empty() && self.port == 0
    }
}

/// Control-plane VIP management strategy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum VipManager {
    /// The cloud provider (CPEM) attaches the elastic IP to a control-plane device
    #[default]
    #[serde(rename = "CPEM")]
    Cpem,

    /// kube-vip announces the elastic IP over BGP
    #[serde(rename = "KUBE_VIP")]
    KubeVip,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct PacketClusterStatus {
    /// Network infrastructure is ready
    #[serde(default)]
    pub ready: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl Conditioned for PacketCluster {
    fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map_or(&[], |s| s.conditions.as_slice())
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status.get_or_insert_with(Default::default).conditions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_uses_upstream_field_names() {
        let spec: PacketClusterSpec = serde_json::from_value(serde_json::json!({
            "projectID": "p1",
            "metro": "da",
            "vipManager": "KUBE_VIP",
        }))
        .unwrap();

        assert_eq!(spec.project_id, "p1");
        assert_eq!(spec.metro.as_deref(), Some("da"));
        assert_eq!(spec.vip_manager, VipManager::KubeVip);
        assert!(spec.control_plane_endpoint.is_zero());
    }

    #[test]
    fn test_vip_manager_defaults_to_cpem() {
        let spec: PacketClusterSpec =
            serde_json::from_value(serde_json::json!({ "projectID": "p1" })).unwrap();
        assert_eq!(spec.vip_manager, VipManager::Cpem);
    }
}
