//! Per-reconcile scopes.
//!
//! A scope wraps the objects one reconcile works on. Reconcilers mutate the
//! wrapped PacketCluster/PacketMachine through the scope's accessors and call
//! `close` on every exit path; `close` rolls the conditions up into `Ready`
//! and patches whatever changed since the scope was opened.

pub mod cluster;
pub mod machine;
pub mod patch;

pub use cluster::{ClusterScope, ClusterScopeParams};
pub use machine::{MachineScope, MachineScopeParams};

use crate::error::ControllerError;
use tracing::warn;

/// Combine the reconcile body's result with the result of closing its scope.
///
/// The body's error wins; a close error only surfaces when the body succeeded.
pub(crate) fn first_error<T>(
    body: Result<T, ControllerError>,
    closed: Result<(), ControllerError>,
    key: &str,
) -> Result<T, ControllerError> {
    match (body, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(close_err)) => Err(close_err),
        (Err(body_err), Ok(())) => Err(body_err),
        (Err(body_err), Err(close_err)) => {
            warn!("Failed to patch {} after reconcile error: {}", key, close_err);
            Err(body_err)
        }
    }
}

pub(crate) fn add_finalizer(finalizers: &mut Option<Vec<String>>, finalizer: &str) -> bool {
    let list = finalizers.get_or_insert_with(Vec::new);
    if list.iter().any(|f| f == finalizer) {
        return false;
    }
    list.push(finalizer.to_string());
    true
}

pub(crate) fn remove_finalizer(finalizers: &mut Option<Vec<String>>, finalizer: &str) -> bool {
    let Some(list) = finalizers.as_mut() else {
        return false;
    };
    let before = list.len();
    list.retain(|f| f != finalizer);
    let removed = list.len() != before;
    if list.is_empty() {
        *finalizers = None;
    }
    removed
}
