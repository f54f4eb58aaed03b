//! cluster-api style conditions
//!
//! Fine-grained conditions are set by the reconcilers; the `Ready` condition
//! is a summary derived from them when a scope is closed.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Summary condition type.
pub const READY_CONDITION: &str = "Ready";

// Reasons shared by the Packet conditions
pub const WAITING_FOR_CLUSTER_INFRASTRUCTURE_REASON: &str = "WaitingForClusterInfrastructure";
pub const WAITING_FOR_BOOTSTRAP_DATA_REASON: &str = "WaitingForBootstrapData";
pub const INSTANCE_NOT_READY_REASON: &str = "InstanceNotReady";
pub const INSTANCE_PROVISION_FAILED_REASON: &str = "InstanceProvisionFailed";
pub const INSTANCE_NOT_FOUND_REASON: &str = "InstanceNotFound";
pub const INSTANCE_STOPPED_REASON: &str = "InstanceStopped";
pub const INSTANCE_ERRORED_REASON: &str = "InstanceErrored";
pub const INVALID_PROVIDER_ID_REASON: &str = "InvalidProviderID";
pub const IP_RESERVATION_FAILED_REASON: &str = "IPReservationFailed";
pub const DELETING_REASON: &str = "Deleting";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConditionSeverity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub r#type: String,

    pub status: ConditionStatus,

    /// Only meaningful when status is False
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<ConditionSeverity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Objects carrying a conditions list.
pub trait Conditioned {
    fn conditions(&self) -> &[Condition];
    fn conditions_mut(&mut self) -> &mut Vec<Condition>;

    fn get_condition(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions().iter().find(|c| c.r#type == condition_type)
    }

    fn is_condition_true(&self, condition_type: &str) -> bool {
        self.get_condition(condition_type)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }
}

/// Insert or replace a condition.
///
/// `lastTransitionTime` only moves when the status flips, so re-asserting an
/// unchanged condition leaves the object byte-identical.
pub fn set_condition<T: Conditioned + ?Sized>(obj: &mut T, mut condition: Condition) {
    let conditions = obj.conditions_mut();
    match conditions.iter_mut().find(|c| c.r#type == condition.r#type) {
        Some(existing) => {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            } else {
                condition.last_transition_time = Some(Utc::now());
            }
            *existing = condition;
        }
        None => {
            condition.last_transition_time = Some(Utc::now());
            conditions.push(condition);
            conditions.sort_by(|a, b| condition_order(&a.r#type).cmp(&condition_order(&b.r#type)));
        }
    }
}

// Ready first, then alphabetical
fn condition_order(condition_type: &str) -> (bool, String) {
    (condition_type != READY_CONDITION, condition_type.to_string())
}

pub fn mark_true<T: Conditioned + ?Sized>(obj: &mut T, condition_type: &str) {
    set_condition(
        obj,
        Condition {
            r#type: condition_type.to_string(),
            status: ConditionStatus::True,
            severity: None,
            last_transition_time: None,
            reason: None,
            message: None,
        },
    );
}

pub fn mark_false<T: Conditioned + ?Sized>(
    obj: &mut T,
    condition_type: &str,
    reason: &str,
    severity: ConditionSeverity,
    message: impl Into<String>,
) {
    let message = message.into();
    set_condition(
        obj,
        Condition {
            r#type: condition_type.to_string(),
            status: ConditionStatus::False,
            severity: Some(severity),
            last_transition_time: None,
            reason: Some(reason.to_string()),
            message: (!message.is_empty()).then_some(message),
        },
    );
}

pub fn mark_unknown<T: Conditioned + ?Sized>(
    obj: &mut T,
    condition_type: &str,
    reason: &str,
    message: impl Into<String>,
) {
    let message = message.into();
    set_condition(
        obj,
        Condition {
            r#type: condition_type.to_string(),
            status: ConditionStatus::Unknown,
            severity: None,
            last_transition_time: None,
            reason: Some(reason.to_string()),
            message: (!message.is_empty()).then_some(message),
        },
    );
}

/// Recompute `Ready` from the given condition types.
///
/// All true: `Ready=True`. Otherwise the worst condition wins (False/Error,
/// False/Warning, False/Info, then Unknown; missing conditions count as
/// Unknown) and lends its reason and severity to `Ready`. With the step
/// counter the message reads "N of M completed", without it the message of
/// the worst condition is used.
pub fn set_summary<T: Conditioned + ?Sized>(obj: &mut T, condition_types: &[&str], step_counter: bool) {
    let completed = condition_types
        .iter()
        .filter(|t| obj.is_condition_true(t))
        .count();

    if completed == condition_types.len() {
        mark_true(obj, READY_CONDITION);
        return;
    }

    let worst = condition_types
        .iter()
        .map(|t| {
            obj.get_condition(t).cloned().unwrap_or_else(|| Condition {
                r#type: (*t).to_string(),
                status: ConditionStatus::Unknown,
                severity: None,
                last_transition_time: None,
                reason: None,
                message: None,
            })
        })
        .filter(|c| c.status != ConditionStatus::True)
        .max_by_key(|c| match c.status {
            ConditionStatus::False => (1, c.severity.unwrap_or(ConditionSeverity::Info)),
            _ => (0, ConditionSeverity::Info),
        });

    let Some(worst) = worst else {
        return;
    };

    let message = if step_counter {
        format!("{completed} of {} completed", condition_types.len())
    } else {
        worst.message.clone().unwrap_or_default()
    };
    let reason = worst.reason.clone().unwrap_or_default();

    match worst.status {
        ConditionStatus::False => mark_false(
            obj,
            READY_CONDITION,
            &reason,
            worst.severity.unwrap_or(ConditionSeverity::Info),
            message,
        ),
        _ => mark_unknown(obj, READY_CONDITION, &reason, message),
    }
}
