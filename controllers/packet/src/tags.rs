//! Device and IP reservation tags.
//!
//! Tags are the only link between an Equinix Metal resource and the
//! Kubernetes object that owns it; they are always re-derived from the
//! object's identity.

const TAG_PREFIX: &str = "cluster-api-provider-packet";

pub const CONTROL_PLANE_ROLE_TAG: &str = "kubernetes.io/role:master";
pub const WORKER_ROLE_TAG: &str = "kubernetes.io/role:node";

/// Tag identifying the device created for a cluster-api Machine
pub fn machine_tag(machine_uid: &str) -> String {
    format!("{}:machine-uid:{}", TAG_PREFIX, machine_uid)
}

/// Tag identifying resources belonging to a cluster
pub fn cluster_tag(cluster_name: &str) -> String {
    format!("{}:cluster-id:{}", TAG_PREFIX, cluster_name)
}

pub fn role_tag(control_plane: bool) -> &'static str {
    if control_plane {
        CONTROL_PLANE_ROLE_TAG
    } else {
        WORKER_ROLE_TAG
    }
}
