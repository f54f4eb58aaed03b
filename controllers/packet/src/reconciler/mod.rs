//! Reconciliation logic for PacketCluster and PacketMachine.
//!
//! - `cluster`: control-plane endpoint reservation
//! - `machine`: device lifecycle

pub mod cluster;
pub mod machine;

#[cfg(test)]
mod cluster_test;

use crate::backoff::FibonacciBackoff;
use crate::kube_store::KubeStore;
use crate::workload::WorkloadClusterProbe;
use packet_client::PacketClientTrait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// Requeue delay while the owning cluster-api object is not linked yet
pub const OWNER_REQUEUE: Duration = Duration::from_secs(2);

/// Requeue delay while a device is provisioning or has no address yet
pub const DEVICE_PENDING_REQUEUE: Duration = Duration::from_secs(20);

/// Port of the control-plane endpoint
pub const CONTROL_PLANE_PORT: i32 = 6443;

/// Backoff state for a resource
#[derive(Debug, Clone, Default)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

/// Reconciles Packet infrastructure resources.
pub struct Reconciler {
    pub(crate) packet_client: Arc<dyn PacketClientTrait>,
    pub(crate) store: Arc<dyn KubeStore>,
    pub(crate) workload: Arc<dyn WorkloadClusterProbe>,
    /// Error count tracking per resource (kind/namespace/name -> BackoffState)
    backoff_states: Mutex<HashMap<String, BackoffState>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("packet_api", &self.packet_client.base_url())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        packet_client: Arc<dyn PacketClientTrait>,
        store: Arc<dyn KubeStore>,
        workload: Arc<dyn WorkloadClusterProbe>,
    ) -> Self {
        Self {
            packet_client,
            store,
            workload,
            backoff_states: Mutex::new(HashMap::new()),
        }
    }

    fn backoff_states(&self) -> MutexGuard<'_, HashMap<String, BackoffState>> {
        self.backoff_states.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a failed reconcile and return how long to wait before retrying
    pub fn record_error(&self, key: &str) -> Duration {
        let mut states = self.backoff_states();
        let state = states.entry(key.to_string()).or_default();
        state.error_count += 1;
        let delay = state.backoff.next_backoff();
        debug!("{} failed {} time(s) in a row, retrying in {:?}", key, state.error_count, delay);
        delay
    }

    /// Forget the error history of a resource after a successful reconcile
    pub fn reset_error(&self, key: &str) {
        if let Some(state) = self.backoff_states().get_mut(key) {
            state.backoff.reset();
            state.error_count = 0;
        }
    }

    pub fn error_count(&self, key: &str) -> u32 {
        self.backoff_states().get(key).map_or(0, |s| s.error_count)
    }
}
