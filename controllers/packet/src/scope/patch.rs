//! Snapshot/diff patch helper.
//!
//! A `PatchHelper` records an object when a scope opens. On close it
//! compares the object against that snapshot and produces JSON merge patches
//! that carry only what changed: one for metadata and spec, one for the status
//! subresource.

use crate::error::ControllerError;
use serde::Serialize;
use serde_json::{Map, Value};

/// Which part of an object a patch targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchTarget {
    Object,
    Status,
}

/// Merge patches produced by comparing an object with its snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatchPlan {
    pub object: Option<Value>,
    pub status: Option<Value>,
}

impl PatchPlan {
    pub fn is_empty(&self) -> bool {
        self.object.is_none() && self.status.is_none()
    }
}

/// Snapshot of an object taken when a scope opens
#[derive(Debug, Clone)]
pub struct PatchHelper {
    before_object: Value,
    before_status: Value,
}

impl PatchHelper {
    pub fn new<K: Serialize>(obj: &K) -> Result<Self, ControllerError> {
        let value = serde_json::to_value(obj)?;
        Ok(Self {
            before_object: object_view(&value),
            before_status: status_view(&value),
        })
    }

    /// Diff `obj` against the snapshot
    ///
    /// Each non-empty patch carries `metadata.resourceVersion` so the API
    /// server rejects it if the object changed underneath us.
    pub fn plan<K: Serialize>(&self, obj: &K, resource_version: Option<&str>) -> Result<PatchPlan, ControllerError> {
        let value = serde_json::to_value(obj)?;

        let object = merge_diff(&self.before_object, &object_view(&value))
            .map(|diff| with_resource_version(diff, resource_version));
        let status = merge_diff(&self.before_status, &status_view(&value)).map(|diff| {
            let mut patch = Map::new();
            patch.insert("status".to_string(), diff);
            with_resource_version(Value::Object(patch), resource_version)
        });

        Ok(PatchPlan { object, status })
    }
}

/// Set `metadata.resourceVersion` on a merge patch
pub fn with_resource_version(mut patch: Value, resource_version: Option<&str>) -> Value {
    let Some(rv) = resource_version else {
        return patch;
    };
    if let Value::Object(root) = &mut patch {
        let metadata = root
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(metadata) = metadata {
            metadata.insert("resourceVersion".to_string(), Value::String(rv.to_string()));
        }
    }
    patch
}

// The fields the controller is allowed to write outside of status
fn object_view(value: &Value) -> Value {
    let mut metadata = Map::new();
    for key in ["labels", "annotations", "finalizers"] {
        metadata.insert(key.to_string(), value.pointer(&format!("/metadata/{}", key)).cloned().unwrap_or(Value::Null));
    }

    let mut view = Map::new();
    view.insert("metadata".to_string(), Value::Object(metadata));
    view.insert("spec".to_string(), value.get("spec").cloned().unwrap_or(Value::Null));
    Value::Object(view)
}

fn status_view(value: &Value) -> Value {
    value.get("status").cloned().unwrap_or(Value::Null)
}

/// RFC 7386 merge patch turning `before` into `after`, or `None` when equal
///
/// Arrays are replaced wholesale. Keys missing from `after` become `null`.
pub fn merge_diff(before: &Value, after: &Value) -> Option<Value> {
    if before == after {
        return None;
    }

    match (before, after) {
        (Value::Object(before), Value::Object(after)) => {
            let mut patch = Map::new();
            for (key, after_value) in after {
                match before.get(key) {
                    Some(before_value) => {
                        if let Some(diff) = merge_diff(before_value, after_value) {
                            patch.insert(key.clone(), diff);
                        }
                    }
                    None if after_value.is_null() => {}
                    None => {
                        patch.insert(key.clone(), strip_nulls(after_value));
                    }
                }
            }
            for (key, before_value) in before {
                if !after.contains_key(key) && !before_value.is_null() {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            (!patch.is_empty()).then_some(Value::Object(patch))
        }
        // An object appearing from nothing: nulls inside it mean "absent", not "delete"
        (_, Value::Object(_)) => Some(strip_nulls(after)),
        _ => Some(after.clone()),
    }
}

fn strip_nulls(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), strip_nulls(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}
