//! cluster-api types
//!
//! Minimal views of the cluster-api resources the Packet controller reads.
//! Only the fields the controller consumes are modelled; unknown fields are
//! ignored on deserialization.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::packet_cluster::ApiEndpoint;

/// API group of the core cluster-api resources.
pub const CLUSTER_API_GROUP: &str = "cluster.x-k8s.io";

/// Label naming the cluster a Machine belongs to.
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// Label present on control-plane Machines.
pub const CONTROL_PLANE_LABEL: &str = "cluster.x-k8s.io/control-plane";

/// Annotation pausing reconciliation of an object.
pub const PAUSED_ANNOTATION: &str = "cluster.x-k8s.io/paused";

/// Bootstrap config kind whose contents feed providerID resolution.
pub const KUBEADM_CONFIG_KIND: &str = "KubeadmConfig";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Cluster",
    namespaced,
    status = "ClusterStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    #[serde(default)]
    pub paused: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_endpoint: Option<ApiEndpoint>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_ref: Option<ObjectReference>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    #[serde(default)]
    pub infrastructure_ready: bool,

    #[serde(default)]
    pub control_plane_ready: bool,
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Machine",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    pub cluster_name: String,

    #[serde(default)]
    pub bootstrap: Bootstrap,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_ref: Option<ObjectReference>,

    /// Kubernetes version the machine runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_domain: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct Bootstrap {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_ref: Option<ObjectReference>,

    /// Secret holding the rendered bootstrap payload under the `value` key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_secret_name: Option<String>,
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "bootstrap.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "KubeadmConfig",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct KubeadmConfigSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_configuration: Option<KubeadmNodeConfiguration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_configuration: Option<KubeadmNodeConfiguration>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_kubeadm_commands: Vec<String>,
}

/// Shared shape of kubeadm's init and join configurations.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct KubeadmNodeConfiguration {
    #[serde(default)]
    pub node_registration: NodeRegistrationOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeRegistrationOptions {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub kubelet_extra_args: BTreeMap<String, String>,
}

/// Reference to another object, as used by cluster-api `*Ref` fields.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    #[serde(default)]
    pub api_version: String,

    #[serde(default)]
    pub kind: String,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Name of the owner of `kind` within the cluster-api group, if any.
pub fn capi_owner_name(meta: &ObjectMeta, kind: &str) -> Option<String> {
    meta.owner_references.as_ref()?.iter().find_map(|owner| {
        let group = owner.api_version.split('/').next().unwrap_or_default();
        (owner.kind == kind && group == CLUSTER_API_GROUP).then(|| owner.name.clone())
    })
}

/// Whether the object carries the cluster-api paused annotation.
pub fn has_paused_annotation(meta: &ObjectMeta) -> bool {
    meta.annotations
        .as_ref()
        .is_some_and(|a| a.contains_key(PAUSED_ANNOTATION))
}

impl Cluster {
    /// A cluster is paused via `spec.paused` or the paused annotation.
    pub fn is_paused(&self) -> bool {
        self.spec.paused || has_paused_annotation(&self.metadata)
    }

    pub fn infrastructure_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.infrastructure_ready)
    }
}

impl Machine {
    pub fn is_control_plane(&self) -> bool {
        self.metadata
            .labels
            .as_ref()
            .is_some_and(|l| l.contains_key(CONTROL_PLANE_LABEL))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

    fn owner(api_version: &str, kind: &str, name: &str) -> OwnerReference {
        OwnerReference {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            uid: "uid".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_capi_owner_ignores_other_groups() {
        let meta = ObjectMeta {
            owner_references: Some(vec![
                owner("fleet.cattle.io/v1alpha1", "Cluster", "not-this"),
                owner("cluster.x-k8s.io/v1beta1", "Cluster", "this"),
            ]),
            ..Default::default()
        };
        assert_eq!(capi_owner_name(&meta, "Cluster").as_deref(), Some("this"));
        assert_eq!(capi_owner_name(&meta, "Machine"), None);
    }

    #[test]
    fn test_cluster_paused_by_annotation_or_spec() {
        let mut cluster = Cluster::new("c", ClusterSpec::default());
        assert!(!cluster.is_paused());

        cluster.spec.paused = true;
        assert!(cluster.is_paused());

        cluster.spec.paused = false;
        cluster.metadata.annotations =
            Some(BTreeMap::from([(PAUSED_ANNOTATION.to_string(), String::new())]));
        assert!(cluster.is_paused());
    }

    #[test]
    fn test_kubeadm_config_reads_kubelet_args() {
        let config: KubeadmConfigSpec = serde_json::from_value(serde_json::json!({
            "joinConfiguration": {
                "nodeRegistration": {
                    "kubeletExtraArgs": { "provider-id": "packet://{{ v1.instance_id }}" }
                }
            },
            "postKubeadmCommands": ["echo done"],
            "files": []
        }))
        .unwrap();

        let join = config.join_configuration.unwrap();
        assert_eq!(
            join.node_registration.kubelet_extra_args.get("provider-id").map(String::as_str),
            Some("packet://{{ v1.instance_id }}")
        );
        assert!(config.init_configuration.is_none());
    }
}
