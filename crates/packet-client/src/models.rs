//! Equinix Metal API models
//!
//! Only the fields the controller reads or writes are modelled. Response
//! types ignore unknown fields.

use serde::{Deserialize, Serialize};

/// Result of a lookup that may legitimately find nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

impl<T> Lookup<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::NotFound => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }
}

impl<T> From<Option<T>> for Lookup<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Lookup::NotFound, Lookup::Found)
    }
}

/// Outcome of a delete call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The resource did not exist (404)
    AlreadyGone,
}

/// Device provisioning state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    New,
    Queued,
    Provisioning,
    Active,
    #[serde(alias = "failed")]
    Errored,
    #[serde(alias = "inactive")]
    Off,
    PoweringOn,
    PoweringOff,
    Reinstalling,
    Deprovisioning,
    Deleted,
    #[serde(other)]
    Unknown,
}

/// Equinix Metal device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Device {
    pub id: String,

    #[serde(default)]
    pub hostname: String,

    pub state: DeviceState,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub locked: bool,

    #[serde(default)]
    pub ip_addresses: Vec<IpAssignment>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facility: Option<LocationRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metro: Option<LocationRef>,
}

impl Device {
    /// True when every tag in `tags` is present on the device.
    pub fn has_tags(&self, tags: &[String]) -> bool {
        tags.iter().all(|t| self.tags.contains(t))
    }
}

/// An address assigned to a device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IpAssignment {
    pub address: String,

    #[serde(default)]
    pub address_family: u8,

    #[serde(default)]
    pub public: bool,

    #[serde(default)]
    pub management: bool,
}

/// Facility or metro reference
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocationRef {
    #[serde(default)]
    pub code: String,
}

/// Link to another API object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Href {
    pub href: String,
}

/// Elastic IP reservation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IpReservation {
    pub id: String,

    pub address: String,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub public: bool,

    #[serde(default, rename = "type")]
    pub reservation_type: String,

    /// Devices this IP is currently assigned to
    #[serde(default)]
    pub assignments: Vec<Href>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metro: Option<LocationRef>,
}

impl IpReservation {
    pub fn has_tags(&self, tags: &[String]) -> bool {
        tags.iter().all(|t| self.tags.contains(t))
    }
}

/// Request body for `POST /projects/{id}/devices`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CreateDeviceRequest {
    pub hostname: String,

    pub plan: String,

    pub operating_system: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing_cycle: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub facility: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metro: Option<String>,

    /// cloud-init payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userdata: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub project_ssh_keys: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_reservation_id: Option<String>,
}

/// Request body for `POST /projects/{id}/ips`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateIpReservationRequest {
    #[serde(rename = "type")]
    pub reservation_type: String,

    pub quantity: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facility: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metro: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl CreateIpReservationRequest {
    /// A single public IPv4 address carrying `tags`.
    pub fn public_ipv4(facility: Option<String>, metro: Option<String>, tags: Vec<String>) -> Self {
        Self {
            reservation_type: "public_ipv4".to_string(),
            quantity: 1,
            facility,
            metro,
            tags,
        }
    }
}

/// Request body for `POST /projects/{id}/bgp-configs`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BgpConfigRequest {
    pub deployment_type: String,
    pub asn: u32,
    pub use_case: String,
}

/// Project BGP configuration; the API answers 200 with empty fields when none exists
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BgpConfig {
    #[serde(default)]
    pub status: String,

    #[serde(default)]
    pub asn: u32,
}

impl BgpConfig {
    pub fn is_enabled(&self) -> bool {
        !self.status.is_empty() || self.asn != 0
    }
}

/// Pagination metadata
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Meta {
    #[serde(default)]
    pub current_page: u32,

    #[serde(default)]
    pub last_page: u32,

    #[serde(default)]
    pub total: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceList {
    #[serde(default)]
    pub devices: Vec<Device>,

    #[serde(default)]
    pub meta: Option<Meta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpReservationList {
    #[serde(default)]
    pub ip_addresses: Vec<IpReservation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_decodes_api_payload() {
        let device: Device = serde_json::from_value(serde_json::json!({
            "id": "d1",
            "hostname": "cp-0",
            "state": "provisioning",
            "tags": ["a", "b"],
            "ip_addresses": [
                { "address": "147.75.1.2", "address_family": 4, "public": true, "cidr": 31 }
            ],
            "plan": { "slug": "c3.small.x86" }
        }))
        .unwrap();

        assert_eq!(device.state, DeviceState::Provisioning);
        assert!(device.has_tags(&["a".to_string()]));
        assert!(!device.has_tags(&["a".to_string(), "c".to_string()]));
        assert_eq!(device.ip_addresses[0].address, "147.75.1.2");
    }

    #[test]
    fn test_unfamiliar_device_states_decode() {
        let failed: DeviceState = serde_json::from_str("\"failed\"").unwrap();
        let inactive: DeviceState = serde_json::from_str("\"inactive\"").unwrap();
        let other: DeviceState = serde_json::from_str("\"migrating\"").unwrap();
        assert_eq!(failed, DeviceState::Errored);
        assert_eq!(inactive, DeviceState::Off);
        assert_eq!(other, DeviceState::Unknown);
    }

    #[test]
    fn test_ip_reservation_request_omits_unset_location() {
        let request = CreateIpReservationRequest::public_ipv4(None, Some("da".to_string()), vec!["t".to_string()]);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["type"], "public_ipv4");
        assert_eq!(value["quantity"], 1);
        assert_eq!(value["metro"], "da");
        assert!(value.get("facility").is_none());
    }

    #[test]
    fn test_empty_bgp_config_is_disabled() {
        assert!(!BgpConfig::default().is_enabled());
        assert!(BgpConfig { status: String::new(), asn: 65000 }.is_enabled());
    }
}
