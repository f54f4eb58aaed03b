//! Packet infrastructure CRD definitions
//!
//! Kubernetes Custom Resource Definitions owned by the Packet infrastructure
//! controller (`PacketCluster`, `PacketMachine`), plus the subset of the
//! cluster-api types (`Cluster`, `Machine`, `KubeadmConfig`) it reads.

pub mod capi;
pub mod conditions;
pub mod packet_cluster;
pub mod packet_machine;

pub use capi::*;
pub use conditions::*;
pub use packet_cluster::*;
pub use packet_machine::*;
