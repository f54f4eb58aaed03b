//! MachineScope: one reconcile's view of a PacketMachine, its Machine and
//! the cluster both belong to.

use super::patch::{with_resource_version, PatchHelper, PatchTarget};
use super::{add_finalizer, first_error, remove_finalizer};
use crate::error::ControllerError;
use crate::kube_store::KubeStore;
use crate::provider_id::{self, ProviderIdResolver};
use crate::tags;
use crate::workload::WorkloadClusterProbe;
use crds::{
    mark_false, mark_true, set_summary, Cluster, ConditionSeverity, InstanceStatus, Machine, MachineAddress,
    MachineFailureReason, PacketCluster, PacketMachine, DEVICE_READY_CONDITION, MACHINE_FINALIZER,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Inputs for `MachineScope::new`
#[derive(Default)]
pub struct MachineScopeParams {
    pub store: Option<Arc<dyn KubeStore>>,
    pub workload: Option<Arc<dyn WorkloadClusterProbe>>,
    pub cluster: Option<Cluster>,
    pub machine: Option<Machine>,
    pub packet_cluster: Option<PacketCluster>,
    pub packet_machine: Option<PacketMachine>,
}

pub struct MachineScope {
    store: Arc<dyn KubeStore>,
    pub cluster: Cluster,
    pub machine: Machine,
    pub packet_cluster: PacketCluster,
    pub packet_machine: PacketMachine,
    provider_id_prefix: String,
    patch: PatchHelper,
    closed: bool,
}

impl std::fmt::Debug for MachineScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineScope")
            .field("key", &self.key())
            .field("provider_id_prefix", &self.provider_id_prefix)
            .finish()
    }
}

impl MachineScope {
    /// Build the scope and resolve the providerID prefix for this reconcile
    pub async fn new(params: MachineScopeParams) -> Result<Self, ControllerError> {
        let store = params.store.ok_or(ControllerError::MissingScopeParameter("client"))?;
        let workload = params
            .workload
            .ok_or(ControllerError::MissingScopeParameter("workload cluster probe"))?;
        let cluster = params.cluster.ok_or(ControllerError::MissingScopeParameter("Cluster"))?;
        let machine = params.machine.ok_or(ControllerError::MissingScopeParameter("Machine"))?;
        let packet_cluster = params
            .packet_cluster
            .ok_or(ControllerError::MissingScopeParameter("PacketCluster"))?;
        let packet_machine = params
            .packet_machine
            .ok_or(ControllerError::MissingScopeParameter("PacketMachine"))?;
        if machine.metadata.uid.as_deref().is_none_or(str::is_empty) {
            return Err(ControllerError::MissingScopeParameter("Machine UID"));
        }

        let provider_id_prefix = ProviderIdResolver::new(store.as_ref(), workload.as_ref())
            .resolve(&packet_machine, &machine, &cluster)
            .await?;
        let patch = PatchHelper::new(&packet_machine)?;

        Ok(Self {
            store,
            cluster,
            machine,
            packet_cluster,
            packet_machine,
            provider_id_prefix,
            patch,
            closed: false,
        })
    }

    pub fn name(&self) -> &str {
        self.packet_machine.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.packet_machine.metadata.namespace.as_deref().unwrap_or("default")
    }

    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace(), self.name())
    }

    pub fn cluster_name(&self) -> &str {
        self.cluster.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn is_control_plane(&self) -> bool {
        self.machine.is_control_plane()
    }

    pub fn role(&self) -> &'static str {
        if self.is_control_plane() { "control-plane" } else { "node" }
    }

    pub fn machine_tag(&self) -> String {
        tags::machine_tag(self.machine.metadata.uid.as_deref().unwrap_or_default())
    }

    pub fn cluster_tag(&self) -> String {
        tags::cluster_tag(self.cluster_name())
    }

    /// Tags every device of this machine carries, in addition to `spec.tags`
    pub fn identity_tags(&self) -> Vec<String> {
        vec![self.machine_tag(), self.cluster_tag()]
    }

    pub fn additional_tags(&self) -> &[String] {
        &self.packet_machine.spec.tags
    }

    pub fn project_id(&self) -> &str {
        &self.packet_cluster.spec.project_id
    }

    pub fn facility(&self) -> Option<&str> {
        self.packet_machine
            .spec
            .facility
            .as_deref()
            .or(self.packet_cluster.spec.facility.as_deref())
    }

    pub fn metro(&self) -> Option<&str> {
        self.packet_machine
            .spec
            .metro
            .as_deref()
            .or(self.packet_cluster.spec.metro.as_deref())
    }

    pub fn provider_id(&self) -> Option<&str> {
        self.packet_machine.spec.provider_id.as_deref().filter(|id| !id.is_empty())
    }

    pub fn provider_id_prefix(&self) -> &str {
        &self.provider_id_prefix
    }

    /// Device ID taken from the providerID, if one is set
    pub fn device_id(&self) -> Result<Option<String>, ControllerError> {
        self.provider_id().map(provider_id::device_id).transpose()
    }

    /// Stamp `<prefix><device_id>` unless a providerID is already set
    pub fn set_provider_id(&mut self, device_id: &str) {
        if self.provider_id().is_some() {
            return;
        }
        self.packet_machine.spec.provider_id = Some(format!("{}{}", self.provider_id_prefix, device_id));
    }

    pub fn infrastructure_ready(&self) -> bool {
        self.cluster.infrastructure_ready()
    }

    pub fn data_secret_name(&self) -> Option<&str> {
        self.machine
            .spec
            .bootstrap
            .data_secret_name
            .as_deref()
            .filter(|name| !name.is_empty())
    }

    /// Cloud-init payload from the Machine's bootstrap data secret
    pub async fn bootstrap_data(&self) -> Result<String, ControllerError> {
        let secret_name = self.data_secret_name().ok_or_else(|| {
            ControllerError::BootstrapData(format!("Machine {} has no bootstrap data secret yet", self.key()))
        })?;
        let namespace = self.machine.metadata.namespace.as_deref().unwrap_or(self.namespace());

        let secret = self.store.get_secret(namespace, secret_name).await?.ok_or_else(|| {
            ControllerError::BootstrapData(format!("bootstrap data secret {}/{} not found", namespace, secret_name))
        })?;
        let value = secret.data.as_ref().and_then(|d| d.get("value")).ok_or_else(|| {
            ControllerError::BootstrapData(format!("secret {}/{} has no value key", namespace, secret_name))
        })?;

        String::from_utf8(value.0.clone()).map_err(|e| {
            ControllerError::BootstrapData(format!("secret {}/{} is not valid UTF-8: {}", namespace, secret_name, e))
        })
    }

    /// True once a permanent failure has been recorded
    pub fn has_failed(&self) -> bool {
        self.packet_machine
            .status
            .as_ref()
            .is_some_and(|s| s.failure_reason.is_some() || s.failure_message.is_some())
    }

    pub fn set_ready(&mut self) {
        self.packet_machine.status.get_or_insert_with(Default::default).ready = true;
    }

    pub fn set_not_ready(&mut self) {
        self.packet_machine.status.get_or_insert_with(Default::default).ready = false;
    }

    pub fn set_instance_status(&mut self, status: InstanceStatus) {
        self.packet_machine.status.get_or_insert_with(Default::default).instance_status = Some(status);
    }

    pub fn set_failure_reason(&mut self, reason: MachineFailureReason) {
        self.packet_machine.status.get_or_insert_with(Default::default).failure_reason = Some(reason);
    }

    pub fn set_failure_message(&mut self, message: impl Into<String>) {
        self.packet_machine.status.get_or_insert_with(Default::default).failure_message = Some(message.into());
    }

    pub fn set_addresses(&mut self, addresses: Vec<MachineAddress>) {
        self.packet_machine.status.get_or_insert_with(Default::default).addresses = addresses;
    }

    pub fn mark_device_ready(&mut self) {
        mark_true(&mut self.packet_machine, DEVICE_READY_CONDITION);
    }

    pub fn mark_device_not_ready(&mut self, reason: &str, severity: ConditionSeverity, message: impl Into<String>) {
        mark_false(&mut self.packet_machine, DEVICE_READY_CONDITION, reason, severity, message);
    }

    pub fn is_deleting(&self) -> bool {
        self.packet_machine.metadata.deletion_timestamp.is_some()
    }

    pub fn add_finalizer(&mut self) -> bool {
        add_finalizer(&mut self.packet_machine.metadata.finalizers, MACHINE_FINALIZER)
    }

    pub fn remove_finalizer(&mut self) -> bool {
        remove_finalizer(&mut self.packet_machine.metadata.finalizers, MACHINE_FINALIZER)
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
        set_summary(&mut self.packet_machine, &[DEVICE_READY_CONDITION], !deleting);

        let (namespace, name) = (self.namespace().to_string(), self.name().to_string());
        let mut resource_version = self.packet_machine.metadata.resource_version.clone();
        let plan = self.patch.plan(&self.packet_machine, resource_version.as_deref())?;
        if plan.is_empty() {
            debug!("PacketMachine {}/{} unchanged, skipping patch", namespace, name);
            return Ok(());
        }

        if let Some(object_patch) = plan.object {
            let updated = self
                .store
                .patch_packet_machine(&namespace, &name, &object_patch, PatchTarget::Object)
                .await?;
            resource_version = updated.metadata.resource_version;
        }

        if let Some(status_patch) = plan.status {
            let status_patch = with_resource_version(status_patch, resource_version.as_deref());
            match self
                .store
                .patch_packet_machine(&namespace, &name, &status_patch, PatchTarget::Status)
                .await
            {
                Err(e) if e.is_kube_not_found() && self.is_deleting() => {
                    debug!("PacketMachine {}/{} is gone, dropping status patch", namespace, name);
                }
                other => {
                    other?;
                }
            }
        }
        Ok(())
    }
}

impl Drop for MachineScope {
    fn drop(&mut self) {
        if !self.closed {
            warn!("MachineScope for {} dropped without close, changes were not persisted", self.key());
        }
    }
}
