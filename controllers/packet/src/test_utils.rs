//! Test utilities for unit testing reconcilers
//!
//! Provides an in-memory `KubeStore`, a scripted workload-cluster probe and
//! helpers for creating test objects.

use crate::error::ControllerError;
use crate::kube_store::KubeStore;
use crate::reconciler::Reconciler;
use crate::scope::patch::PatchTarget;
use crate::workload::{CloudProviderDeployment, WorkloadClusterProbe};
use crds::*;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;
use kube::core::ErrorResponse;
use kube::Resource;
use packet_client::{Device, DeviceState, IpAssignment, IpReservation, MockPacketClient};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

type ObjectKey = (String, String, String);

/// A recorded patch call
#[derive(Debug, Clone)]
pub struct RecordedPatch {
    pub kind: String,
    pub name: String,
    pub target: PatchTarget,
    pub patch: Value,
}

/// In-memory `KubeStore`
///
/// Patches are applied as JSON merge patches. A patch carrying
/// `metadata.resourceVersion` is rejected with 409 when it is stale, and an
/// object being deleted disappears once its last finalizer is removed.
#[derive(Default)]
pub struct FakeKubeStore {
    objects: Mutex<BTreeMap<ObjectKey, Value>>,
    patches: Mutex<Vec<RecordedPatch>>,
    next_resource_version: Mutex<u64>,
    fail_patches: Mutex<Option<u16>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn api_error(code: u16, reason: &str, message: String) -> ControllerError {
    ControllerError::Kube(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    }))
}

impl FakeKubeStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump_resource_version(&self) -> String {
        let mut rv = lock(&self.next_resource_version);
        *rv += 1;
        rv.to_string()
    }

    /// Store `obj`, assigning it a fresh resourceVersion
    pub fn insert<K>(&self, obj: &K)
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        let kind = K::kind(&()).to_string();
        let meta = obj.meta();
        let key = (
            kind,
            meta.namespace.clone().unwrap_or_else(|| "default".to_string()),
            meta.name.clone().unwrap_or_default(),
        );
        let Ok(mut value) = serde_json::to_value(obj) else {
            return;
        };
        let rv = self.bump_resource_version();
        if let Some(metadata) = value.get_mut("metadata").and_then(Value::as_object_mut) {
            metadata.insert("resourceVersion".to_string(), Value::String(rv));
        }
        lock(&self.objects).insert(key, value);
    }

    pub fn get<K>(&self, namespace: &str, name: &str) -> Option<K>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        let key = (K::kind(&()).to_string(), namespace.to_string(), name.to_string());
        let value = lock(&self.objects).get(&key).cloned()?;
        serde_json::from_value(value).ok()
    }

    pub fn packet_cluster(&self, namespace: &str, name: &str) -> Option<PacketCluster> {
        self.get(namespace, name)
    }

    pub fn packet_machine(&self, namespace: &str, name: &str) -> Option<PacketMachine> {
        self.get(namespace, name)
    }

    /// Mark an object as being deleted
    pub fn mark_deleted<K>(&self, namespace: &str, name: &str)
    where
        K: Resource<DynamicType = ()>,
    {
        let key = (K::kind(&()).to_string(), namespace.to_string(), name.to_string());
        if let Some(Value::Object(obj)) = lock(&self.objects).get_mut(&key) {
            if let Some(Value::Object(metadata)) = obj.get_mut("metadata") {
                metadata.insert("deletionTimestamp".to_string(), Value::String("2026-01-01T00:00:00Z".to_string()));
            }
        }
    }

    /// Make every patch fail with the given HTTP code
    pub fn fail_patches(&self, code: u16) {
        *lock(&self.fail_patches) = Some(code);
    }

    pub fn patches(&self) -> Vec<RecordedPatch> {
        lock(&self.patches).clone()
    }

    pub fn patch_count(&self) -> usize {
        lock(&self.patches).len()
    }

    fn apply_patch<K>(&self, namespace: &str, name: &str, patch: &Value, target: PatchTarget) -> Result<K, ControllerError>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        let kind = K::kind(&()).to_string();
        lock(&self.patches).push(RecordedPatch {
            kind: kind.clone(),
            name: name.to_string(),
            target,
            patch: patch.clone(),
        });

        if let Some(code) = *lock(&self.fail_patches) {
            return Err(api_error(code, "InternalError", format!("injected failure patching {}", name)));
        }

        let key = (kind.clone(), namespace.to_string(), name.to_string());
        let mut objects = lock(&self.objects);
        let Some(current) = objects.get_mut(&key) else {
            return Err(api_error(404, "NotFound", format!("{} {} not found", kind, name)));
        };

        let mut patch = patch.clone();
        if let Some(wanted) = patch
            .get_mut("metadata")
            .and_then(Value::as_object_mut)
            .and_then(|m| m.remove("resourceVersion"))
        {
            if current.pointer("/metadata/resourceVersion") != Some(&wanted) {
                return Err(api_error(409, "Conflict", format!("{} {} was modified", kind, name)));
            }
        }

        // The status subresource only accepts status; the main resource ignores it
        if let Value::Object(fields) = &mut patch {
            match target {
                PatchTarget::Status => fields.retain(|k, _| k == "status"),
                PatchTarget::Object => {
                    fields.remove("status");
                }
            }
        }

        json_patch::merge(current, &patch);
        let rv = self.bump_resource_version();
        if let Some(metadata) = current.get_mut("metadata").and_then(Value::as_object_mut) {
            metadata.insert("resourceVersion".to_string(), Value::String(rv));
        }

        let updated = current.clone();
        let deleting = updated.pointer("/metadata/deletionTimestamp").is_some();
        let finalized = updated
            .pointer("/metadata/finalizers")
            .and_then(Value::as_array)
            .is_none_or(Vec::is_empty);
        if deleting && finalized {
            objects.remove(&key);
        }

        Ok(serde_json::from_value(updated)?)
    }
}

#[async_trait::async_trait]
impl KubeStore for FakeKubeStore {
    async fn get_packet_cluster(&self, namespace: &str, name: &str) -> Result<Option<PacketCluster>, ControllerError> {
        Ok(self.get(namespace, name))
    }

    async fn get_packet_machine(&self, namespace: &str, name: &str) -> Result<Option<PacketMachine>, ControllerError> {
        Ok(self.get(namespace, name))
    }

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>, ControllerError> {
        Ok(self.get(namespace, name))
    }

    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Option<Machine>, ControllerError> {
        Ok(self.get(namespace, name))
    }

    async fn get_kubeadm_config(&self, namespace: &str, name: &str) -> Result<Option<KubeadmConfig>, ControllerError> {
        Ok(self.get(namespace, name))
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ControllerError> {
        Ok(self.get(namespace, name))
    }

    async fn patch_packet_cluster(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
        target: PatchTarget,
    ) -> Result<PacketCluster, ControllerError> {
        self.apply_patch(namespace, name, patch, target)
    }

    async fn patch_packet_machine(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
        target: PatchTarget,
    ) -> Result<PacketMachine, ControllerError> {
        self.apply_patch(namespace, name, patch, target)
    }
}

/// Workload-cluster probe returning a fixed answer
pub struct ScriptedProbe {
    answer: Mutex<Result<CloudProviderDeployment, String>>,
    calls: Mutex<usize>,
}

impl ScriptedProbe {
    pub fn new(answer: CloudProviderDeployment) -> Self {
        Self {
            answer: Mutex::new(Ok(answer)),
            calls: Mutex::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            answer: Mutex::new(Err(message.to_string())),
            calls: Mutex::new(0),
        }
    }

    pub fn set(&self, answer: CloudProviderDeployment) {
        *lock(&self.answer) = Ok(answer);
    }

    pub fn calls(&self) -> usize {
        *lock(&self.calls)
    }
}

#[async_trait::async_trait]
impl WorkloadClusterProbe for ScriptedProbe {
    async fn cloud_provider(&self, _namespace: &str, _cluster_name: &str) -> Result<CloudProviderDeployment, ControllerError> {
        *lock(&self.calls) += 1;
        lock(&self.answer).clone().map_err(ControllerError::ProviderId)
    }
}

/// Reconciler wired to in-memory fakes
pub struct TestHarness {
    pub reconciler: Reconciler,
    pub store: Arc<FakeKubeStore>,
    pub packet: MockPacketClient,
    pub probe: Arc<ScriptedProbe>,
}

pub fn test_harness() -> TestHarness {
    let store = Arc::new(FakeKubeStore::new());
    let packet = MockPacketClient::new();
    let probe = Arc::new(ScriptedProbe::new(CloudProviderDeployment::Unreachable));
    let reconciler = Reconciler::new(Arc::new(packet.clone()), store.clone(), probe.clone());
    TestHarness {
        reconciler,
        store,
        packet,
        probe,
    }
}

fn owner(kind: &str, name: &str) -> OwnerReference {
    OwnerReference {
        api_version: format!("{}/v1beta1", CLUSTER_API_GROUP),
        kind: kind.to_string(),
        name: name.to_string(),
        uid: format!("uid-{}", name),
        ..Default::default()
    }
}

fn meta(name: &str, namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        uid: Some(format!("uid-{}", name)),
        ..Default::default()
    }
}

/// Helper to create a test cluster-api Cluster whose infrastructure is ready
pub fn test_cluster(name: &str, namespace: &str) -> Cluster {
    Cluster {
        metadata: meta(name, namespace),
        spec: ClusterSpec::default(),
        status: Some(ClusterStatus {
            infrastructure_ready: true,
            control_plane_ready: false,
        }),
    }
}

/// Helper to create a test Cluster pointing at a PacketCluster
pub fn test_cluster_with_infrastructure(name: &str, namespace: &str, packet_cluster: &str) -> Cluster {
    let mut cluster = test_cluster(name, namespace);
    cluster.spec.infrastructure_ref = Some(ObjectReference {
        api_version: "infrastructure.cluster.x-k8s.io/v1beta1".to_string(),
        kind: "PacketCluster".to_string(),
        name: packet_cluster.to_string(),
        namespace: Some(namespace.to_string()),
    });
    cluster
}

/// Helper to create a test PacketCluster owned by `cluster_name`
pub fn test_packet_cluster(name: &str, namespace: &str, cluster_name: &str, project_id: &str) -> PacketCluster {
    let mut metadata = meta(name, namespace);
    metadata.owner_references = Some(vec![owner("Cluster", cluster_name)]);
    PacketCluster {
        metadata,
        spec: PacketClusterSpec {
            project_id: project_id.to_string(),
            metro: Some("da".to_string()),
            ..Default::default()
        },
        status: None,
    }
}

/// Helper to create a test Machine belonging to `cluster_name`
pub fn test_machine(name: &str, namespace: &str, cluster_name: &str, control_plane: bool) -> Machine {
    let mut metadata = meta(name, namespace);
    let mut labels = BTreeMap::from([(CLUSTER_NAME_LABEL.to_string(), cluster_name.to_string())]);
    if control_plane {
        labels.insert(CONTROL_PLANE_LABEL.to_string(), String::new());
    }
    metadata.labels = Some(labels);
    Machine {
        metadata,
        spec: MachineSpec {
            cluster_name: cluster_name.to_string(),
            ..Default::default()
        },
    }
}

/// Helper to create a test PacketMachine owned by `machine_name`
pub fn test_packet_machine(name: &str, namespace: &str, machine_name: &str) -> PacketMachine {
    let mut metadata = meta(name, namespace);
    metadata.owner_references = Some(vec![owner("Machine", machine_name)]);
    PacketMachine {
        metadata,
        spec: PacketMachineSpec {
            os: "ubuntu_22_04".to_string(),
            machine_type: "c3.small.x86".to_string(),
            billing_cycle: Some("hourly".to_string()),
            ..Default::default()
        },
        status: None,
    }
}

pub fn test_kubeadm_config(name: &str, namespace: &str, spec: KubeadmConfigSpec) -> KubeadmConfig {
    KubeadmConfig {
        metadata: meta(name, namespace),
        spec,
    }
}

pub fn test_bootstrap_secret(name: &str, namespace: &str, value: &str) -> Secret {
    Secret {
        metadata: meta(name, namespace),
        data: Some(BTreeMap::from([("value".to_string(), ByteString(value.as_bytes().to_vec()))])),
        ..Default::default()
    }
}

/// Helper to create a test Equinix Metal device
pub fn test_device(id: &str, state: DeviceState, tags: Vec<String>, addresses: &[&str]) -> Device {
    Device {
        id: id.to_string(),
        hostname: id.to_string(),
        state,
        tags,
        locked: false,
        ip_addresses: addresses.iter().map(|a| public_ipv4(a)).collect(),
        facility: None,
        metro: None,
    }
}

pub fn public_ipv4(address: &str) -> IpAssignment {
    IpAssignment {
        address: address.to_string(),
        address_family: 4,
        public: true,
        management: true,
    }
}

/// Helper to create a test elastic IP reservation
pub fn test_ip_reservation(id: &str, address: &str, tags: Vec<String>) -> IpReservation {
    IpReservation {
        id: id.to_string(),
        address: address.to_string(),
        tags,
        public: true,
        reservation_type: "public_ipv4".to_string(),
        assignments: Vec::new(),
        metro: None,
    }
}
