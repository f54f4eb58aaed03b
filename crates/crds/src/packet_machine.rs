//! PacketMachine CRD
//!
//! Describes the Equinix Metal device backing a cluster-api `Machine`.

use crate::conditions::{Condition, Conditioned};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Finalizer placed on PacketMachines by the controller.
pub const MACHINE_FINALIZER: &str = "packetmachine.infrastructure.cluster.x-k8s.io";

/// Condition reporting whether the backing device is provisioned and reachable.
pub const DEVICE_READY_CONDITION: &str = "DeviceReady";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "PacketMachine",
    namespaced,
    status = "PacketMachineStatus",
    shortname = "pma",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.instanceStatus"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"ProviderID","type":"string","jsonPath":".spec.providerID"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PacketMachineSpec {
    /// Operating system slug
    pub os: String,

    /// Device plan (e.g. `c3.small.x86`)
    pub machine_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing_cycle: Option<String>,

    /// Facility to deploy into; falls back to the PacketCluster's facility
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facility: Option<String>,

    /// Metro to deploy into; falls back to the PacketCluster's metro
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metro: Option<String>,

    /// Project SSH key IDs installed on the device
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ssh_keys: Vec<String>,

    /// Hardware reservation to provision onto
    #[serde(default, rename = "hardwareReservationID", skip_serializing_if = "Option::is_none")]
    pub hardware_reservation_id: Option<String>,

    /// Device URI (`<prefix><device-id>`); immutable once set
    #[serde(default, rename = "providerID", skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,

    /// Additional device tags
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Device provisioning state as reported by Equinix Metal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    New,
    Queued,
    Provisioning,
    Active,
    Errored,
    Off,
}

/// Reason a machine has permanently failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum MachineFailureReason {
    InvalidConfiguration,
    CreateError,
    UpdateError,
    DeleteError,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct MachineAddress {
    #[serde(rename = "type")]
    pub address_type: MachineAddressType,

    pub address: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum MachineAddressType {
    Hostname,
    ExternalIP,
    InternalIP,
    ExternalDNS,
    InternalDNS,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct PacketMachineStatus {
    /// Device is active and addressed
    #[serde(default)]
    pub ready: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_status: Option<InstanceStatus>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<MachineAddress>,

    /// Terminal problem that needs operator attention
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<MachineFailureReason>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl Conditioned for PacketMachine {
    fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map_or(&[], |s| s.conditions.as_slice())
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status.get_or_insert_with(Default::default).conditions
    }
}
