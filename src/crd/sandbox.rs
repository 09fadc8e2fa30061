//! Sandbox Custom Resource Definition
//!
//! A Sandbox is one ephemeral workload in a pool. Its spec is written by the
//! SandboxSet reconciler; its status is written by an external reconciler that
//! tracks the backing pod. This layer only ever reads these fields.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    PodInfo, SandboxCondition, SandboxPhase, CONDITION_READY, LABEL_POOL, LABEL_SANDBOX_ID,
    LABEL_USER,
};

/// Specification for a Sandbox
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "sandpool.dev",
    version = "v1alpha1",
    kind = "Sandbox",
    plural = "sandboxes",
    shortname = "sbx",
    status = "SandboxStatus",
    namespaced,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Pod-IP","type":"string","jsonPath":".status.podInfo.podIp"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SandboxSpec {
    /// Name of the sandbox template to instantiate
    pub template: String,

    /// Seconds of inactivity after which the sandbox may be reclaimed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<i64>,

    /// When true, the reconciler leaves the backing pod untouched
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub paused: bool,
}

/// Observed status of a Sandbox, published by the external reconciler
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SandboxStatus {
    /// Lifecycle phase of the sandbox
    #[serde(default)]
    pub phase: SandboxPhase,

    /// Typed conditions, most importantly Ready
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<SandboxCondition>,

    /// Runtime info about the backing pod
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_info: Option<PodInfo>,
}

impl Sandbox {
    /// Returns the Ready condition if the reconciler has published one
    pub fn ready_condition(&self) -> Option<&SandboxCondition> {
        self.status
            .as_ref()?
            .conditions
            .iter()
            .find(|c| c.type_ == CONDITION_READY)
    }

    /// Returns true if deletion of this sandbox has begun
    pub fn is_terminating(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// IP of the backing pod, if one has been assigned
    pub fn pod_ip(&self) -> Option<&str> {
        let ip = &self.status.as_ref()?.pod_info.as_ref()?.pod_ip;
        (!ip.is_empty()).then_some(ip.as_str())
    }

    /// Value of the user label, if the sandbox has been claimed
    pub fn user(&self) -> Option<&str> {
        self.label(LABEL_USER)
    }

    /// Value of the pool label
    pub fn pool(&self) -> Option<&str> {
        self.label(LABEL_POOL)
    }

    /// Value of the stable sandbox identifier label
    pub fn sandbox_id(&self) -> Option<&str> {
        self.label(LABEL_SANDBOX_ID)
    }

    fn label(&self, key: &str) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(key))
            .map(String::as_str)
    }
}
