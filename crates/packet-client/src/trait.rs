//! Capability traits for the Equinix Metal client
//!
//! The concrete `PacketClient` implements all of them; tests use
//! `MockPacketClient`. All async methods must be `Send` to work with Tokio's
//! work-stealing runtime.

use crate::error::PacketError;
use crate::models::*;

/// Finding devices.
#[async_trait::async_trait]
pub trait DeviceLookup: Send + Sync {
    async fn get_device(&self, device_id: &str) -> Result<Lookup<Device>, PacketError>;

    /// First device in the project carrying every tag in `tags`
    async fn get_device_by_tags(&self, project_id: &str, tags: &[String]) -> Result<Lookup<Device>, PacketError>;
}

/// Creating and deleting devices.
#[async_trait::async_trait]
pub trait DeviceCreator: Send + Sync {
    async fn create_device(&self, project_id: &str, request: &CreateDeviceRequest) -> Result<Device, PacketError>;

    async fn delete_device(&self, device_id: &str) -> Result<DeleteOutcome, PacketError>;
}

/// Finding and reserving elastic IPs.
#[async_trait::async_trait]
pub trait IpReservationLookup: Send + Sync {
    /// First reservation in the project carrying every tag in `tags`
    async fn get_ip_by_tags(&self, project_id: &str, tags: &[String]) -> Result<Lookup<IpReservation>, PacketError>;

    async fn create_ip_reservation(
        &self,
        project_id: &str,
        request: &CreateIpReservationRequest,
    ) -> Result<IpReservation, PacketError>;
}

/// Project-level networking used by the VIP managers.
#[async_trait::async_trait]
pub trait ProjectNetworking: Send + Sync {
    /// Enable local BGP on the project; a no-op when already enabled
    async fn enable_project_bgp(&self, project_id: &str) -> Result<(), PacketError>;

    async fn assign_ip_to_device(&self, device_id: &str, address: &str) -> Result<(), PacketError>;
}

/// Everything the controller needs from Equinix Metal.
#[async_trait::async_trait]
pub trait PacketClientTrait: DeviceLookup + DeviceCreator + IpReservationLookup + ProjectNetworking {
    fn base_url(&self) -> &str;

    /// Validate the API token
    async fn validate_token(&self) -> Result<(), PacketError>;
}
