//! Equinix Metal (Packet) API Client
//!
//! A small client for the parts of the Equinix Metal REST API the cluster-api
//! infrastructure controller needs: devices and elastic IP reservations, both
//! looked up by tag.
//!
//! # Example
//!
//! ```no_run
//! use packet_client::{DeviceLookup, Lookup, PacketClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = PacketClient::new(
//!     PacketClient::DEFAULT_BASE_URL.to_string(),
//!     "your-api-token".to_string(),
//! )?;
//!
//! let tags = vec!["cluster-api-provider-packet:machine-uid:1234".to_string()];
//! match client.get_device_by_tags("project-id", &tags).await? {
//!     Lookup::Found(device) => println!("device {} is {:?}", device.id, device.state),
//!     Lookup::NotFound => println!("no device yet"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! The capabilities are split into small traits (`DeviceLookup`,
//! `DeviceCreator`, `IpReservationLookup`, `ProjectNetworking`) so callers
//! can depend on exactly what they use and tests can swap in
//! `MockPacketClient` (feature `test-util`).

pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod packet_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::PacketClient;
pub use error::PacketError;
pub use models::*;
pub use packet_trait::{DeviceCreator, DeviceLookup, IpReservationLookup, PacketClientTrait, ProjectNetworking};
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockPacketClient;
