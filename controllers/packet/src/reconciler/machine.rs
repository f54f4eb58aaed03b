//! PacketMachine reconciliation.
//!
//! Finds the Equinix Metal device backing a Machine (by providerID, then by
//! tags), creates it when missing, follows it through the provisioning queue
//! and deletes it when the PacketMachine goes away.

use super::{Reconciler, DEVICE_PENDING_REQUEUE};
use crate::error::ControllerError;
use crate::scope::{MachineScope, MachineScopeParams};
use crate::tags;
use crds::{
    capi_owner_name, has_paused_annotation, ConditionSeverity, InstanceStatus, MachineAddress, MachineAddressType,
    MachineFailureReason, VipManager, CLUSTER_NAME_LABEL, DELETING_REASON, INSTANCE_ERRORED_REASON,
    INSTANCE_NOT_FOUND_REASON, INSTANCE_NOT_READY_REASON, INSTANCE_PROVISION_FAILED_REASON, INSTANCE_STOPPED_REASON,
    INVALID_PROVIDER_ID_REASON, WAITING_FOR_BOOTSTRAP_DATA_REASON, WAITING_FOR_CLUSTER_INFRASTRUCTURE_REASON,
};
use kube_runtime::controller::Action;
use packet_client::{CreateDeviceRequest, DeleteOutcome, Device, DeviceState, Lookup};
use tracing::{debug, info, warn};

/// Where a machine's device stands
#[derive(Debug, Clone, PartialEq)]
pub enum MachineDevice {
    /// Still in the provisioning queue
    Pending(Device),
    /// Active but no address assigned yet
    AwaitingAddress(Device),
    /// Active with at least one address
    Addressed(Device),
    Errored(Device),
    Stopped(Device),
    /// Any state the controller does not drive (deprovisioning, deleted, unrecognised)
    Unexpected(Device),
}

impl MachineDevice {
    pub fn classify(device: Device) -> Self {
        match device.state {
            DeviceState::New | DeviceState::Queued | DeviceState::Provisioning | DeviceState::PoweringOn | DeviceState::Reinstalling => {
                MachineDevice::Pending(device)
            }
            DeviceState::Active if device.ip_addresses.is_empty() => MachineDevice::AwaitingAddress(device),
            DeviceState::Active => MachineDevice::Addressed(device),
            DeviceState::Errored => MachineDevice::Errored(device),
            DeviceState::Off | DeviceState::PoweringOff => MachineDevice::Stopped(device),
            DeviceState::Deprovisioning | DeviceState::Deleted | DeviceState::Unknown => MachineDevice::Unexpected(device),
        }
    }
}

/// Instance status reported on the PacketMachine for a device state
pub fn instance_status(state: DeviceState) -> Option<InstanceStatus> {
    match state {
        DeviceState::New => Some(InstanceStatus::New),
        DeviceState::Queued => Some(InstanceStatus::Queued),
        DeviceState::Provisioning | DeviceState::Reinstalling => Some(InstanceStatus::Provisioning),
        DeviceState::Active | DeviceState::PoweringOff => Some(InstanceStatus::Active),
        DeviceState::Errored => Some(InstanceStatus::Errored),
        DeviceState::Off | DeviceState::PoweringOn => Some(InstanceStatus::Off),
        DeviceState::Deprovisioning | DeviceState::Deleted | DeviceState::Unknown => None,
    }
}

/// Machine addresses for a device: its hostname plus every assigned IP
pub fn device_addresses(device: &Device) -> Vec<MachineAddress> {
    let mut addresses = Vec::with_capacity(device.ip_addresses.len() + 1);
    if !device.hostname.is_empty() {
        addresses.push(MachineAddress {
            address_type: MachineAddressType::Hostname,
            address: device.hostname.clone(),
        });
    }
    addresses.extend(device.ip_addresses.iter().map(|ip| MachineAddress {
        address_type: if ip.public {
            MachineAddressType::ExternalIP
        } else {
            MachineAddressType::InternalIP
        },
        address: ip.address.clone(),
    }));
    addresses
}

/// Result of looking for a machine's device
enum DeviceSearch {
    Found(Device),
    Missing,
    /// The providerID names a device Equinix Metal no longer knows
    Vanished(String),
}

impl Reconciler {
    /// Reconcile the PacketMachine `namespace/name`
    pub async fn reconcile_packet_machine(&self, namespace: &str, name: &str) -> Result<Action, ControllerError> {
        info!("Reconciling PacketMachine {}/{}", namespace, name);

        let Some(packet_machine) = self.store.get_packet_machine(namespace, name).await? else {
            debug!("PacketMachine {}/{} no longer exists", namespace, name);
            return Ok(Action::await_change());
        };

        let Some(machine_name) = capi_owner_name(&packet_machine.metadata, "Machine") else {
            info!("Waiting for Machine Controller to set OwnerRef on PacketMachine {}/{}", namespace, name);
            return Ok(Action::await_change());
        };
        let Some(machine) = self.store.get_machine(namespace, &machine_name).await? else {
            info!("Machine {}/{} owning PacketMachine {} not found", namespace, machine_name, name);
            return Ok(Action::await_change());
        };

        let cluster_name = machine
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(CLUSTER_NAME_LABEL))
            .cloned()
            .unwrap_or_else(|| machine.spec.cluster_name.clone());
        let Some(cluster) = self.store.get_cluster(namespace, &cluster_name).await? else {
            info!("Machine {}/{} is missing cluster label or cluster does not exist", namespace, machine_name);
            return Ok(Action::await_change());
        };

        if cluster.is_paused() || has_paused_annotation(&packet_machine.metadata) {
            info!("PacketMachine {}/{} or its Cluster is paused, skipping", namespace, name);
            return Ok(Action::await_change());
        }

        let Some(packet_cluster_name) = cluster.spec.infrastructure_ref.as_ref().map(|r| r.name.clone()) else {
            info!("Cluster {}/{} has no infrastructure reference yet", namespace, cluster_name);
            return Ok(Action::await_change());
        };
        let Some(packet_cluster) = self.store.get_packet_cluster(namespace, &packet_cluster_name).await? else {
            info!("PacketCluster {}/{} is not available yet", namespace, packet_cluster_name);
            return Ok(Action::await_change());
        };

        let mut scope = MachineScope::new(MachineScopeParams {
            store: Some(self.store.clone()),
            workload: Some(self.workload.clone()),
            cluster: Some(cluster),
            machine: Some(machine),
            packet_cluster: Some(packet_cluster),
            packet_machine: Some(packet_machine),
        })
        .await?;

        let result = if scope.is_deleting() {
            self.reconcile_machine_delete(&mut scope).await
        } else {
            self.reconcile_machine_normal(&mut scope).await
        };
        scope.close(result).await
    }

    async fn find_device(&self, scope: &MachineScope) -> Result<DeviceSearch, ControllerError> {
        let device_id = match scope.device_id() {
            Ok(device_id) => device_id,
            Err(e) if scope.is_deleting() => {
                warn!("PacketMachine {}: {}, looking the device up by tags", scope.key(), e);
                None
            }
            Err(e) => return Err(e),
        };
        if let Some(device_id) = device_id {
            return Ok(match self.packet_client.get_device(&device_id).await? {
                Lookup::Found(device) => DeviceSearch::Found(device),
                Lookup::NotFound => DeviceSearch::Vanished(device_id),
            });
        }

        Ok(match self
            .packet_client
            .get_device_by_tags(scope.project_id(), &scope.identity_tags())
            .await?
        {
            Lookup::Found(device) => DeviceSearch::Found(device),
            Lookup::NotFound => DeviceSearch::Missing,
        })
    }

    async fn reconcile_machine_normal(&self, scope: &mut MachineScope) -> Result<Action, ControllerError> {
        if scope.has_failed() {
            info!("PacketMachine {} has failed, skipping reconciliation", scope.key());
            return Ok(Action::await_change());
        }

        scope.add_finalizer();

        if !scope.infrastructure_ready() {
            info!("Cluster infrastructure of PacketMachine {} is not ready yet", scope.key());
            scope.mark_device_not_ready(WAITING_FOR_CLUSTER_INFRASTRUCTURE_REASON, ConditionSeverity::Info, "");
            return Ok(Action::await_change());
        }

        if scope.data_secret_name().is_none() {
            info!("Bootstrap data secret of PacketMachine {} is not yet available", scope.key());
            scope.mark_device_not_ready(WAITING_FOR_BOOTSTRAP_DATA_REASON, ConditionSeverity::Info, "");
            return Ok(Action::await_change());
        }

        if let Err(e) = scope.device_id() {
            let message = e.to_string();
            warn!("PacketMachine {}: {}", scope.key(), message);
            scope.set_not_ready();
            scope.set_failure_reason(MachineFailureReason::InvalidConfiguration);
            scope.set_failure_message(message.clone());
            scope.mark_device_not_ready(INVALID_PROVIDER_ID_REASON, ConditionSeverity::Error, message);
            return Ok(Action::await_change());
        }

        let device = match self.find_device(scope).await? {
            DeviceSearch::Found(device) => device,
            DeviceSearch::Vanished(device_id) => {
                let message = format!("device {} not found", device_id);
                scope.set_failure_reason(MachineFailureReason::UpdateError);
                scope.set_failure_message(message.clone());
                scope.set_not_ready();
                scope.mark_device_not_ready(INSTANCE_NOT_FOUND_REASON, ConditionSeverity::Error, message.clone());
                return Err(ControllerError::DeviceFailed(message));
            }
            DeviceSearch::Missing => self.create_device(scope).await?,
        };

        if let Some(status) = instance_status(device.state) {
            scope.set_instance_status(status);
        }

        match MachineDevice::classify(device) {
            MachineDevice::Pending(device) | MachineDevice::AwaitingAddress(device) => {
                info!(
                    "Device {} of PacketMachine {} is {:?} with {} address(es), waiting",
                    device.id,
                    scope.key(),
                    device.state,
                    device.ip_addresses.len()
                );
                scope.set_not_ready();
                scope.mark_device_not_ready(
                    INSTANCE_NOT_READY_REASON,
                    ConditionSeverity::Warning,
                    format!("device {} is not ready yet", device.id),
                );
                Ok(Action::requeue(DEVICE_PENDING_REQUEUE))
            }
            MachineDevice::Addressed(device) => self.device_ready(scope, &device).await,
            MachineDevice::Errored(device) => {
                let message = format!("device {} is in errored state", device.id);
                warn!("PacketMachine {}: {}", scope.key(), message);
                scope.set_not_ready();
                scope.set_failure_reason(MachineFailureReason::UpdateError);
                scope.set_failure_message(message.clone());
                scope.mark_device_not_ready(INSTANCE_ERRORED_REASON, ConditionSeverity::Error, message);
                Ok(Action::await_change())
            }
            MachineDevice::Stopped(device) => {
                info!("Device {} of PacketMachine {} is powered off", device.id, scope.key());
                scope.set_not_ready();
                scope.mark_device_not_ready(
                    INSTANCE_STOPPED_REASON,
                    ConditionSeverity::Warning,
                    format!("device {} is powered off", device.id),
                );
                Ok(Action::await_change())
            }
            MachineDevice::Unexpected(device) => {
                let message = format!("device {} has unexpected state {:?}", device.id, device.state);
                warn!("PacketMachine {}: {}", scope.key(), message);
                scope.set_not_ready();
                scope.set_failure_reason(MachineFailureReason::UpdateError);
                scope.set_failure_message(message.clone());
                scope.mark_device_not_ready(INSTANCE_NOT_READY_REASON, ConditionSeverity::Error, message);
                Ok(Action::await_change())
            }
        }
    }

    async fn create_device(&self, scope: &mut MachineScope) -> Result<Device, ControllerError> {
        let userdata = scope.bootstrap_data().await?;

        let mut device_tags = scope.additional_tags().to_vec();
        let required = scope
            .identity_tags()
            .into_iter()
            .chain(std::iter::once(tags::role_tag(scope.is_control_plane()).to_string()));
        for tag in required {
            if !device_tags.contains(&tag) {
                device_tags.push(tag);
            }
        }

        let spec = &scope.packet_machine.spec;
        let request = CreateDeviceRequest {
            hostname: scope.name().to_string(),
            plan: spec.machine_type.clone(),
            operating_system: spec.os.clone(),
            billing_cycle: spec.billing_cycle.clone(),
            facility: scope.facility().map(|f| vec![f.to_string()]).unwrap_or_default(),
            metro: scope.metro().map(str::to_string),
            userdata: Some(userdata),
            tags: device_tags,
            project_ssh_keys: spec.ssh_keys.clone(),
            hardware_reservation_id: spec.hardware_reservation_id.clone(),
        };

        info!(
            "Creating {} device {} ({}) in project {}",
            scope.role(),
            request.hostname,
            request.plan,
            scope.project_id()
        );
        match self.packet_client.create_device(scope.project_id(), &request).await {
            Ok(device) => {
                info!("Created device {} for PacketMachine {}", device.id, scope.key());
                Ok(device)
            }
            Err(e) => {
                let message = format!("failed to create device {}: {}", request.hostname, e);
                scope.set_failure_reason(MachineFailureReason::CreateError);
                scope.set_failure_message(message.clone());
                scope.mark_device_not_ready(INSTANCE_PROVISION_FAILED_REASON, ConditionSeverity::Error, message);
                Err(e.into())
            }
        }
    }

    async fn device_ready(&self, scope: &mut MachineScope, device: &Device) -> Result<Action, ControllerError> {
        scope.set_provider_id(&device.id);
        let mut addresses = device_addresses(device);

        if scope.is_control_plane() && scope.packet_cluster.spec.vip_manager == VipManager::Cpem {
            let cluster_tags = vec![scope.cluster_tag()];
            if let Lookup::Found(ip) = self.packet_client.get_ip_by_tags(scope.project_id(), &cluster_tags).await? {
                if ip.assignments.is_empty() {
                    info!("Assigning control-plane IP {} to device {}", ip.address, device.id);
                    if let Err(e) = self.packet_client.assign_ip_to_device(&device.id, &ip.address).await {
                        warn!("Failed to assign control-plane IP {} to device {}: {}", ip.address, device.id, e);
                        scope.set_addresses(addresses);
                        return Ok(Action::requeue(DEVICE_PENDING_REQUEUE));
                    }
                    addresses.push(MachineAddress {
                        address_type: MachineAddressType::ExternalIP,
                        address: ip.address,
                    });
                }
            }
        }

        info!("Device {} of PacketMachine {} is active", device.id, scope.key());
        scope.set_addresses(addresses);
        scope.set_ready();
        scope.mark_device_ready();
        Ok(Action::await_change())
    }

    async fn reconcile_machine_delete(&self, scope: &mut MachineScope) -> Result<Action, ControllerError> {
        info!("Reconciling PacketMachine deletion {}", scope.key());
        scope.set_not_ready();
        scope.mark_device_not_ready(DELETING_REASON, ConditionSeverity::Info, "");

        let device = match self.find_device(scope).await? {
            DeviceSearch::Found(device) => Some(device),
            DeviceSearch::Missing | DeviceSearch::Vanished(_) => None,
        };

        match device {
            None => info!("Device of PacketMachine {} is already gone", scope.key()),
            Some(device) => match self.packet_client.delete_device(&device.id).await? {
                DeleteOutcome::Deleted => info!("Deleted device {} of PacketMachine {}", device.id, scope.key()),
                DeleteOutcome::AlreadyGone => {
                    info!("Device {} of PacketMachine {} was already deleted", device.id, scope.key())
                }
            },
        }

        scope.remove_finalizer();
        Ok(Action::await_change())
    }
}
