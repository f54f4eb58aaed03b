//! Mock PacketClient for unit testing
//!
//! Stores devices and IP reservations in memory and records the calls made
//! against it, so controller tests can assert on side effects without an
//! Equinix Metal account.

use crate::error::PacketError;
use crate::models::*;
use crate::packet_trait::{DeviceCreator, DeviceLookup, IpReservationLookup, PacketClientTrait, ProjectNetworking};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// Calls observed by the mock
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub create_device: usize,
    pub delete_device: usize,
    pub create_ip_reservation: usize,
    pub enable_project_bgp: usize,
    pub assign_ip_to_device: usize,
}

#[derive(Default)]
struct State {
    // device id -> (project id, device)
    devices: BTreeMap<String, (String, Device)>,
    // reservation id -> (project id, reservation)
    reservations: BTreeMap<String, (String, IpReservation)>,
    bgp_enabled: HashSet<String>,
    create_requests: Vec<CreateDeviceRequest>,
    ip_requests: Vec<CreateIpReservationRequest>,
    assignments: Vec<(String, String)>,
    calls: CallCounts,
    fail_create_device: Option<String>,
    fail_delete_device: Option<String>,
    fail_lookups: Option<String>,
    next_id: u64,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{:04}", prefix, self.next_id)
    }
}

/// Mock PacketClient for testing
#[derive(Clone, Default)]
pub struct MockPacketClient {
    state: Arc<Mutex<State>>,
}

impl MockPacketClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a device to the mock store (for test setup)
    pub fn add_device(&self, project_id: &str, device: Device) {
        self.state().devices.insert(device.id.clone(), (project_id.to_string(), device));
    }

    /// Add an IP reservation to the mock store (for test setup)
    pub fn add_ip_reservation(&self, project_id: &str, reservation: IpReservation) {
        self.state()
            .reservations
            .insert(reservation.id.clone(), (project_id.to_string(), reservation));
    }

    /// Change a stored device's state and addresses
    pub fn set_device_state(&self, device_id: &str, state: DeviceState, addresses: Vec<IpAssignment>) {
        if let Some((_, device)) = self.state().devices.get_mut(device_id) {
            device.state = state;
            device.ip_addresses = addresses;
        }
    }

    /// Make every `create_device` call fail with an API error
    pub fn fail_create_device(&self, message: impl Into<String>) {
        self.state().fail_create_device = Some(message.into());
    }

    /// Make every `delete_device` call fail with an API error
    pub fn fail_delete_device(&self, message: impl Into<String>) {
        self.state().fail_delete_device = Some(message.into());
    }

    /// Make every lookup fail with an API error
    pub fn fail_lookups(&self, message: impl Into<String>) {
        self.state().fail_lookups = Some(message.into());
    }

    pub fn device(&self, device_id: &str) -> Option<Device> {
        self.state().devices.get(device_id).map(|(_, d)| d.clone())
    }

    pub fn devices(&self) -> Vec<Device> {
        self.state().devices.values().map(|(_, d)| d.clone()).collect()
    }

    pub fn ip_reservations(&self) -> Vec<IpReservation> {
        self.state().reservations.values().map(|(_, r)| r.clone()).collect()
    }

    pub fn create_requests(&self) -> Vec<CreateDeviceRequest> {
        self.state().create_requests.clone()
    }

    pub fn ip_requests(&self) -> Vec<CreateIpReservationRequest> {
        self.state().ip_requests.clone()
    }

    /// (device id, address) pairs passed to `assign_ip_to_device`
    pub fn assignments(&self) -> Vec<(String, String)> {
        self.state().assignments.clone()
    }

    pub fn bgp_enabled(&self, project_id: &str) -> bool {
        self.state().bgp_enabled.contains(project_id)
    }

    pub fn calls(&self) -> CallCounts {
        self.state().calls.clone()
    }

    fn check_lookups(state: &State) -> Result<(), PacketError> {
        match &state.fail_lookups {
            Some(message) => Err(PacketError::Api {
                status: 500,
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl DeviceLookup for MockPacketClient {
    async fn get_device(&self, device_id: &str) -> Result<Lookup<Device>, PacketError> {
        let state = self.state();
        Self::check_lookups(&state)?;
        Ok(state.devices.get(device_id).map(|(_, d)| d.clone()).into())
    }

    async fn get_device_by_tags(&self, project_id: &str, tags: &[String]) -> Result<Lookup<Device>, PacketError> {
        let state = self.state();
        Self::check_lookups(&state)?;
        Ok(state
            .devices
            .values()
            .find(|(project, d)| project == project_id && d.has_tags(tags))
            .map(|(_, d)| d.clone())
            .into())
    }
}

#[async_trait::async_trait]
impl DeviceCreator for MockPacketClient {
    async fn create_device(&self, project_id: &str, request: &CreateDeviceRequest) -> Result<Device, PacketError> {
        let mut state = self.state();
        state.calls.create_device += 1;
        state.create_requests.push(request.clone());

        if let Some(message) = &state.fail_create_device {
            return Err(PacketError::Api {
                status: 422,
                message: message.clone(),
            });
        }

        let device = Device {
            id: state.next_id("device"),
            hostname: request.hostname.clone(),
            state: DeviceState::Queued,
            tags: request.tags.clone(),
            locked: false,
            ip_addresses: Vec::new(),
            facility: request.facility.first().map(|code| LocationRef { code: code.clone() }),
            metro: request.metro.clone().map(|code| LocationRef { code }),
        };
        state
            .devices
            .insert(device.id.clone(), (project_id.to_string(), device.clone()));
        Ok(device)
    }

    async fn delete_device(&self, device_id: &str) -> Result<DeleteOutcome, PacketError> {
        let mut state = self.state();
        state.calls.delete_device += 1;

        if let Some(message) = &state.fail_delete_device {
            return Err(PacketError::Api {
                status: 500,
                message: message.clone(),
            });
        }

        Ok(match state.devices.remove(device_id) {
            Some(_) => DeleteOutcome::Deleted,
            None => DeleteOutcome::AlreadyGone,
        })
    }
}

#[async_trait::async_trait]
impl IpReservationLookup for MockPacketClient {
    async fn get_ip_by_tags(&self, project_id: &str, tags: &[String]) -> Result<Lookup<IpReservation>, PacketError> {
        let state = self.state();
        Self::check_lookups(&state)?;
        Ok(state
            .reservations
            .values()
            .find(|(project, r)| project == project_id && r.has_tags(tags))
            .map(|(_, r)| r.clone())
            .into())
    }

    async fn create_ip_reservation(
        &self,
        project_id: &str,
        request: &CreateIpReservationRequest,
    ) -> Result<IpReservation, PacketError> {
        let mut state = self.state();
        state.calls.create_ip_reservation += 1;
        state.ip_requests.push(request.clone());

        let octet = state.reservations.len() + 10;
        let reservation = IpReservation {
            id: state.next_id("ip"),
            address: format!("147.75.100.{}", octet),
            tags: request.tags.clone(),
            public: true,
            reservation_type: request.reservation_type.clone(),
            assignments: Vec::new(),
            metro: request.metro.clone().map(|code| LocationRef { code }),
        };
        state
            .reservations
            .insert(reservation.id.clone(), (project_id.to_string(), reservation.clone()));
        Ok(reservation)
    }
}

#[async_trait::async_trait]
impl ProjectNetworking for MockPacketClient {
    async fn enable_project_bgp(&self, project_id: &str) -> Result<(), PacketError> {
        let mut state = self.state();
        state.calls.enable_project_bgp += 1;
        state.bgp_enabled.insert(project_id.to_string());
        Ok(())
    }

    async fn assign_ip_to_device(&self, device_id: &str, address: &str) -> Result<(), PacketError> {
        let mut state = self.state();
        state.calls.assign_ip_to_device += 1;

        if !state.devices.contains_key(device_id) {
            return Err(PacketError::NotFound(format!("device {}", device_id)));
        }

        let href = Href {
            href: format!("/devices/{}", device_id),
        };
        for (_, reservation) in state.reservations.values_mut() {
            if reservation.address == address && !reservation.assignments.contains(&href) {
                reservation.assignments.push(href.clone());
            }
        }
        state.assignments.push((device_id.to_string(), address.to_string()));
        Ok(())
    }
}

#[async_trait::async_trait]
impl PacketClientTrait for MockPacketClient {
    fn base_url(&self) -> &str {
        "http://mock-metal.local/v1"
    }

    async fn validate_token(&self) -> Result<(), PacketError> {
        Ok(())
    }
}
