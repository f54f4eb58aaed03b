//! Equinix Metal API client
//!
//! Implements the subset of the Equinix Metal REST API used by the
//! cluster-api provider: `/devices`, `/projects/{id}/devices`,
//! `/projects/{id}/ips` and `/projects/{id}/bgp-config`.

use crate::error::PacketError;
use crate::models::*;
use crate::packet_trait::{DeviceCreator, DeviceLookup, IpReservationLookup, PacketClientTrait, ProjectNetworking};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

const AUTH_HEADER: &str = "X-Auth-Token";
const PAGE_SIZE: u32 = 100;
const LOCAL_BGP_ASN: u32 = 65000;

/// Equinix Metal API client
pub struct PacketClient {
    client: Client,
    base_url: String,
    token: String,
}

impl PacketClient {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.equinix.com/metal/v1";

    /// Create a new client
    ///
    /// # Arguments
    /// * `base_url` - API base URL (e.g., "https://api.equinix.com/metal/v1")
    /// * `token` - API token sent as `X-Auth-Token`
    pub fn new(base_url: String, token: String) -> Result<Self, PacketError> {
        if token.trim().is_empty() {
            return Err(PacketError::InvalidRequest("API token is empty".to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("cluster-api-provider-packet/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header(AUTH_HEADER, &self.token)
            .header("Accept", "application/json")
    }

    /// Map a non-success response onto a `PacketError`
    async fn check(response: Response, what: &str) -> Result<Response, PacketError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                PacketError::Authentication(format!("{}: {} - {}", what, status, body))
            }
            StatusCode::NOT_FOUND => PacketError::NotFound(what.to_string()),
            StatusCode::UNPROCESSABLE_ENTITY => PacketError::InvalidRequest(format!("{}: {}", what, body)),
            _ => PacketError::Api {
                status: status.as_u16(),
                message: format!("{}: {}", what, body),
            },
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<T, PacketError> {
        let url = self.url(path);
        debug!("GET {}", url);
        let response = self.authed(self.client.get(&url)).send().await?;
        let response = Self::check(response, what).await?;
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn post_json<B: serde::Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        what: &str,
    ) -> Result<T, PacketError> {
        let url = self.url(path);
        debug!("POST {}", url);
        let response = self.authed(self.client.post(&url)).json(body).send().await?;
        let response = Self::check(response, what).await?;
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Fetch every device in a project, following `meta.last_page`
    async fn list_project_devices(&self, project_id: &str) -> Result<Vec<Device>, PacketError> {
        let mut devices = Vec::new();
        let mut page = 1;

        loop {
            let path = format!("/projects/{}/devices?page={}&per_page={}", project_id, page, PAGE_SIZE);
            let list: DeviceList = self.get_json(&path, &format!("devices of project {}", project_id)).await?;
            devices.extend(list.devices);

            match list.meta {
                Some(meta) if meta.last_page > page => page += 1,
                _ => break,
            }
        }

        Ok(devices)
    }

    async fn list_project_ips(&self, project_id: &str) -> Result<Vec<IpReservation>, PacketError> {
        let path = format!("/projects/{}/ips", project_id);
        let list: IpReservationList = self.get_json(&path, &format!("IP reservations of project {}", project_id)).await?;
        Ok(list.ip_addresses)
    }
}

#[async_trait::async_trait]
impl DeviceLookup for PacketClient {
    async fn get_device(&self, device_id: &str) -> Result<Lookup<Device>, PacketError> {
        match self.get_json(&format!("/devices/{}", device_id), &format!("device {}", device_id)).await {
            Ok(device) => Ok(Lookup::Found(device)),
            Err(PacketError::NotFound(_)) => Ok(Lookup::NotFound),
            Err(e) => Err(e),
        }
    }

    async fn get_device_by_tags(&self, project_id: &str, tags: &[String]) -> Result<Lookup<Device>, PacketError> {
        let devices = self.list_project_devices(project_id).await?;
        debug!("Searching {} devices in project {} for tags {:?}", devices.len(), project_id, tags);
        Ok(devices.into_iter().find(|d| d.has_tags(tags)).into())
    }
}

#[async_trait::async_trait]
impl DeviceCreator for PacketClient {
    async fn create_device(&self, project_id: &str, request: &CreateDeviceRequest) -> Result<Device, PacketError> {
        if request.facility.is_empty() && request.metro.is_none() {
            return Err(PacketError::InvalidRequest(format!(
                "device {} needs a facility or a metro",
                request.hostname
            )));
        }

        self.post_json(
            &format!("/projects/{}/devices", project_id),
            request,
            &format!("create device {}", request.hostname),
        )
        .await
    }

    async fn delete_device(&self, device_id: &str) -> Result<DeleteOutcome, PacketError> {
        let url = self.url(&format!("/devices/{}?force_delete=false", device_id));
        debug!("DELETE {}", url);
        let response = self.authed(self.client.delete(&url)).send().await?;

        match Self::check(response, &format!("delete device {}", device_id)).await {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(PacketError::NotFound(_)) => Ok(DeleteOutcome::AlreadyGone),
            Err(e) => Err(e),
        }
    }
}

#[async_trait::async_trait]
impl IpReservationLookup for PacketClient {
    async fn get_ip_by_tags(&self, project_id: &str, tags: &[String]) -> Result<Lookup<IpReservation>, PacketError> {
        let reservations = self.list_project_ips(project_id).await?;
        Ok(reservations.into_iter().find(|r| r.has_tags(tags)).into())
    }

    async fn create_ip_reservation(
        &self,
        project_id: &str,
        request: &CreateIpReservationRequest,
    ) -> Result<IpReservation, PacketError> {
        self.post_json(
            &format!("/projects/{}/ips", project_id),
            request,
            &format!("reserve {} in project {}", request.reservation_type, project_id),
        )
        .await
    }
}

#[async_trait::async_trait]
impl ProjectNetworking for PacketClient {
    async fn enable_project_bgp(&self, project_id: &str) -> Result<(), PacketError> {
        let what = format!("BGP config of project {}", project_id);
        let current: BgpConfig = match self.get_json(&format!("/projects/{}/bgp-config", project_id), &what).await {
            Ok(config) => config,
            Err(PacketError::NotFound(_)) => BgpConfig::default(),
            Err(e) => return Err(e),
        };

        if current.is_enabled() {
            debug!("BGP already enabled for project {}", project_id);
            return Ok(());
        }

        let request = BgpConfigRequest {
            deployment_type: "local".to_string(),
            asn: LOCAL_BGP_ASN,
            use_case: "kubernetes-load-balancer".to_string(),
        };
        let url = self.url(&format!("/projects/{}/bgp-configs", project_id));
        debug!("POST {}", url);
        let response = self.authed(self.client.post(&url)).json(&request).send().await?;
        Self::check(response, &format!("enable BGP for project {}", project_id)).await?;
        Ok(())
    }

    async fn assign_ip_to_device(&self, device_id: &str, address: &str) -> Result<(), PacketError> {
        let url = self.url(&format!("/devices/{}/ips", device_id));
        debug!("POST {} address={}", url, address);
        let response = self
            .authed(self.client.post(&url))
            .json(&serde_json::json!({ "address": address }))
            .send()
            .await?;
        Self::check(response, &format!("assign {} to device {}", address, device_id)).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl PacketClientTrait for PacketClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn validate_token(&self) -> Result<(), PacketError> {
        debug!("Validating Equinix Metal token and connectivity");
        let url = self.url("/user");
        let response = self.authed(self.client.get(&url)).send().await?;
        Self::check(response, "validate token").await?;
        debug!("Token validated successfully");
        Ok(())
    }
}
