//! Supporting types for the Sandbox and SandboxSet CRDs

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group owning the Sandpool resources
pub const API_GROUP: &str = "sandpool.dev";

/// Label carrying the user a sandbox is claimed by
///
/// Absent on unclaimed pool sandboxes; set when the allocator hands the
/// sandbox to a user.
pub const LABEL_USER: &str = "sandpool.dev/user";

/// Label carrying the pool a sandbox was created for
pub const LABEL_POOL: &str = "sandpool.dev/pool";

/// Label carrying the stable external sandbox identifier
///
/// Unlike the object name this survives recreation of the backing resource,
/// which is why routing looks sandboxes up by it. At most one live object may
/// carry a given value.
pub const LABEL_SANDBOX_ID: &str = "sandpool.dev/sandbox-id";

/// Condition type reporting whether a sandbox is ready to serve traffic
pub const CONDITION_READY: &str = "Ready";

/// Sandbox lifecycle phase as published by the reconciler
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[non_exhaustive]
pub enum SandboxPhase {
    /// Sandbox has been accepted but its pod is not running yet
    #[default]
    Pending,
    /// Sandbox pod is running
    Running,
    /// Sandbox terminated successfully
    Succeeded,
    /// Sandbox terminated with an error
    Failed,
    /// Phase could not be determined
    Unknown,
}

impl std::fmt::Display for SandboxPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Running => write!(f, "Running"),
            Self::Succeeded => write!(f, "Succeeded"),
            Self::Failed => write!(f, "Failed"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Coarse lifecycle classification derived from a sandbox's status fields
///
/// This is what read paths act on; it folds phase, conditions, pod info and
/// the deletion timestamp into one value. See [`crate::state`] for the
/// memoized computation.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[non_exhaustive]
pub enum SandboxState {
    /// Not yet running, or running but not yet usable
    Pending,
    /// Running, ready and reachable
    Running,
    /// Running phase but failing its readiness contract
    NotReady,
    /// Deletion in progress
    Terminating,
    /// Terminated successfully
    Succeeded,
    /// Terminated with an error
    Failed,
}

impl std::fmt::Display for SandboxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Running => write!(f, "Running"),
            Self::NotReady => write!(f, "NotReady"),
            Self::Terminating => write!(f, "Terminating"),
            Self::Succeeded => write!(f, "Succeeded"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

/// Kubernetes-style condition on a sandbox's status
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct SandboxCondition {
    /// Type of condition (e.g. Ready)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// Last time the condition transitioned
    #[serde(
        rename = "lastTransitionTime",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl SandboxCondition {
    /// Create a new condition with the current timestamp
    pub fn new(type_: impl Into<String>, status: ConditionStatus, reason: impl Into<String>) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: String::new(),
            last_transition_time: Some(Utc::now()),
        }
    }

    /// Returns true if the condition's status is True
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Runtime info about the pod backing a sandbox
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodInfo {
    /// Name of the backing pod
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pod_name: String,

    /// IP address assigned to the backing pod
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pod_ip: String,
}
