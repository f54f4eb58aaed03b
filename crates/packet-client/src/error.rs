//! Equinix Metal client errors

use thiserror::Error;

/// Errors that can occur when interacting with the Equinix Metal API
#[derive(Debug, Error)]
pub enum PacketError {
    /// HTTP request/response error (includes connection failures and timeouts)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Equinix Metal API returned an error
    #[error("Equinix Metal API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Authentication failed (invalid token, or the token lacks access to the project)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request (e.g., missing required fields)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl PacketError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, PacketError::NotFound(_))
    }
}
