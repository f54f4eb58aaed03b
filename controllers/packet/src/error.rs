//! Controller-specific error types.
//!
//! Errors specific to the Packet infrastructure controller that are not
//! covered by upstream library errors.

use kube::Error as KubeError;
use packet_client::PacketError;
use thiserror::Error;

/// Errors that can occur in the Packet controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Equinix Metal API error
    #[error("Equinix Metal error: {0}")]
    Packet(#[from] PacketError),

    /// A scope was built without one of its required inputs
    #[error("failed to generate new scope from nil {0}")]
    MissingScopeParameter(&'static str),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Bootstrap data secret missing or unreadable
    #[error("Bootstrap data error: {0}")]
    BootstrapData(String),

    /// ProviderID could not be parsed or resolved
    #[error("ProviderID error: {0}")]
    ProviderId(String),

    /// JSON (de)serialization of a patch or object failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// The device reached a state the controller cannot recover from
    #[error("Device failed: {0}")]
    DeviceFailed(String),
}

impl ControllerError {
    /// True for Kubernetes 404 responses
    pub fn is_kube_not_found(&self) -> bool {
        matches!(self, ControllerError::Kube(KubeError::Api(response)) if response.code == 404)
    }

    /// True for Kubernetes 409 responses (stale resourceVersion)
    pub fn is_conflict(&self) -> bool {
        matches!(self, ControllerError::Kube(KubeError::Api(response)) if response.code == 409)
    }
}
