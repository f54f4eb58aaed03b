//! Unit tests for PacketCluster reconciler

#[cfg(test)]
mod tests {
    use crate::error::ControllerError;
    use crate::reconciler::{CONTROL_PLANE_PORT, OWNER_REQUEUE};
    use crate::scope::patch::PatchTarget;
    use crate::tags;
    use crate::test_utils::*;
    use crds::{
        ConditionStatus, Conditioned, PacketCluster, VipManager, CLUSTER_FINALIZER, IP_RESERVATION_FAILED_REASON,
        NETWORK_INFRASTRUCTURE_READY_CONDITION, PAUSED_ANNOTATION, READY_CONDITION,
    };
    use kube_runtime::controller::Action;
    use std::collections::BTreeMap;

    fn seed(harness: &TestHarness, packet_cluster: PacketCluster) {
        harness.store.insert(&test_cluster_with_infrastructure("c1", "default", "pc1"));
        harness.store.insert(&packet_cluster);
    }

    #[tokio::test]
    async fn test_reserves_one_ip_and_becomes_ready() {
        let harness = test_harness();
        seed(&harness, test_packet_cluster("pc1", "default", "c1", "p1"));

        let action = harness.reconciler.reconcile_packet_cluster("default", "pc1").await.unwrap();
        assert_eq!(action, Action::await_change());

        let ips = harness.packet.ip_reservations();
        assert_eq!(ips.len(), 1);
        assert_eq!(ips[0].tags, vec![tags::cluster_tag("c1")]);

        let requests = harness.packet.ip_requests();
        assert_eq!(requests[0].metro.as_deref(), Some("da"));

        let stored = harness.store.packet_cluster("default", "pc1").unwrap();
        assert_eq!(stored.spec.control_plane_endpoint.host, ips[0].address);
        assert_eq!(stored.spec.control_plane_endpoint.port, CONTROL_PLANE_PORT);
        assert!(stored.status.as_ref().unwrap().ready);
        assert!(stored.is_condition_true(NETWORK_INFRASTRUCTURE_READY_CONDITION));
        assert!(stored.is_condition_true(READY_CONDITION));
        assert_eq!(stored.metadata.finalizers, Some(vec![CLUSTER_FINALIZER.to_string()]));
    }

    #[tokio::test]
    async fn test_second_reconcile_changes_nothing() {
        let harness = test_harness();
        seed(&harness, test_packet_cluster("pc1", "default", "c1", "p1"));

        harness.reconciler.reconcile_packet_cluster("default", "pc1").await.unwrap();
        let patches = harness.store.patch_count();
        let before = harness.store.packet_cluster("default", "pc1").unwrap();

        harness.reconciler.reconcile_packet_cluster("default", "pc1").await.unwrap();

        assert_eq!(harness.packet.calls().create_ip_reservation, 1);
        assert_eq!(harness.store.patch_count(), patches, "no patch expected when nothing changed");
        let after = harness.store.packet_cluster("default", "pc1").unwrap();
        assert_eq!(after.spec.control_plane_endpoint, before.spec.control_plane_endpoint);
    }

    #[tokio::test]
    async fn test_reuses_existing_tagged_ip() {
        let harness = test_harness();
        harness.packet.add_ip_reservation(
            "p1",
            test_ip_reservation("ip-1", "147.75.9.9", vec![tags::cluster_tag("c1")]),
        );
        seed(&harness, test_packet_cluster("pc1", "default", "c1", "p1"));

        harness.reconciler.reconcile_packet_cluster("default", "pc1").await.unwrap();

        assert_eq!(harness.packet.calls().create_ip_reservation, 0);
        let stored = harness.store.packet_cluster("default", "pc1").unwrap();
        assert_eq!(stored.spec.control_plane_endpoint.host, "147.75.9.9");
    }

    #[tokio::test]
    async fn test_existing_endpoint_is_kept() {
        let harness = test_harness();
        let mut packet_cluster = test_packet_cluster("pc1", "default", "c1", "p1");
        packet_cluster.spec.control_plane_endpoint.host = "10.1.1.1".to_string();
        seed(&harness, packet_cluster);

        harness.reconciler.reconcile_packet_cluster("default", "pc1").await.unwrap();

        assert_eq!(harness.packet.calls().create_ip_reservation, 0);
        let stored = harness.store.packet_cluster("default", "pc1").unwrap();
        assert_eq!(stored.spec.control_plane_endpoint.host, "10.1.1.1");
        assert_eq!(stored.spec.control_plane_endpoint.port, CONTROL_PLANE_PORT);
    }

    #[tokio::test]
    async fn test_kube_vip_enables_project_bgp() {
        let harness = test_harness();
        let mut packet_cluster = test_packet_cluster("pc1", "default", "c1", "p1");
        packet_cluster.spec.vip_manager = VipManager::KubeVip;
        seed(&harness, packet_cluster);

        harness.reconciler.reconcile_packet_cluster("default", "pc1").await.unwrap();

        assert!(harness.packet.bgp_enabled("p1"));
    }

    #[tokio::test]
    async fn test_cpem_leaves_bgp_alone() {
        let harness = test_harness();
        seed(&harness, test_packet_cluster("pc1", "default", "c1", "p1"));

        harness.reconciler.reconcile_packet_cluster("default", "pc1").await.unwrap();

        assert_eq!(harness.packet.calls().enable_project_bgp, 0);
    }

    #[tokio::test]
    async fn test_waits_for_owner_reference() {
        let harness = test_harness();
        let mut packet_cluster = test_packet_cluster("pc1", "default", "c1", "p1");
        packet_cluster.metadata.owner_references = None;
        harness.store.insert(&packet_cluster);

        let action = harness.reconciler.reconcile_packet_cluster("default", "pc1").await.unwrap();

        assert_eq!(action, Action::requeue(OWNER_REQUEUE));
        assert_eq!(harness.store.patch_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_packet_cluster_is_not_an_error() {
        let harness = test_harness();
        let action = harness.reconciler.reconcile_packet_cluster("default", "gone").await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn test_paused_cluster_is_skipped() {
        let harness = test_harness();
        let mut packet_cluster = test_packet_cluster("pc1", "default", "c1", "p1");
        packet_cluster.metadata.annotations = Some(BTreeMap::from([(PAUSED_ANNOTATION.to_string(), String::new())]));
        seed(&harness, packet_cluster);

        harness.reconciler.reconcile_packet_cluster("default", "pc1").await.unwrap();

        assert_eq!(harness.packet.calls().create_ip_reservation, 0);
        assert_eq!(harness.store.patch_count(), 0);
    }

    #[tokio::test]
    async fn test_reservation_failure_is_recorded() {
        let harness = test_harness();
        harness.packet.fail_lookups("metal api unavailable");
        seed(&harness, test_packet_cluster("pc1", "default", "c1", "p1"));

        let err = harness.reconciler.reconcile_packet_cluster("default", "pc1").await.unwrap_err();
        assert!(matches!(err, ControllerError::Packet(_)));

        let stored = harness.store.packet_cluster("default", "pc1").unwrap();
        let condition = stored.get_condition(NETWORK_INFRASTRUCTURE_READY_CONDITION).unwrap();
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(condition.reason.as_deref(), Some(IP_RESERVATION_FAILED_REASON));
        assert_eq!(stored.metadata.finalizers, Some(vec![CLUSTER_FINALIZER.to_string()]));
        assert!(!stored.status.as_ref().unwrap().ready);
    }

    #[tokio::test]
    async fn test_patch_failure_surfaces_when_body_succeeds() {
        let harness = test_harness();
        seed(&harness, test_packet_cluster("pc1", "default", "c1", "p1"));
        harness.store.fail_patches(500);

        let err = harness.reconciler.reconcile_packet_cluster("default", "pc1").await.unwrap_err();

        assert!(matches!(err, ControllerError::Kube(_)));
        assert_eq!(harness.packet.calls().create_ip_reservation, 1);
    }

    #[tokio::test]
    async fn test_object_and_status_are_patched_separately() {
        let harness = test_harness();
        seed(&harness, test_packet_cluster("pc1", "default", "c1", "p1"));

        harness.reconciler.reconcile_packet_cluster("default", "pc1").await.unwrap();

        let patches = harness.store.patches();
        assert_eq!(patches.len(), 2);
        assert_eq!(patches[0].target, PatchTarget::Object);
        assert!(patches[0].patch.pointer("/spec/controlPlaneEndpoint/host").is_some());
        assert_eq!(patches[1].target, PatchTarget::Status);
        assert_eq!(patches[1].patch.pointer("/status/ready"), Some(&serde_json::Value::Bool(true)));
    }

    #[tokio::test]
    async fn test_deletion_removes_finalizer_and_keeps_ip() {
        let harness = test_harness();
        seed(&harness, test_packet_cluster("pc1", "default", "c1", "p1"));
        harness.reconciler.reconcile_packet_cluster("default", "pc1").await.unwrap();

        harness.store.mark_deleted::<PacketCluster>("default", "pc1");
        let action = harness.reconciler.reconcile_packet_cluster("default", "pc1").await.unwrap();

        assert_eq!(action, Action::await_change());
        assert!(harness.store.packet_cluster("default", "pc1").is_none());
        assert_eq!(harness.packet.ip_reservations().len(), 1);
    }

    #[tokio::test]
    async fn test_deletion_without_cluster_still_finalizes() {
        let harness = test_harness();
        let mut packet_cluster = test_packet_cluster("pc1", "default", "c1", "p1");
        packet_cluster.metadata.finalizers = Some(vec![CLUSTER_FINALIZER.to_string()]);
        harness.store.insert(&packet_cluster);
        harness.store.mark_deleted::<PacketCluster>("default", "pc1");

        harness.reconciler.reconcile_packet_cluster("default", "pc1").await.unwrap();

        assert!(harness.store.packet_cluster("default", "pc1").is_none());
    }
}
