//! SandboxSet Custom Resource Definition
//!
//! A SandboxSet maintains a pool of interchangeable Sandboxes, the way a
//! ReplicaSet maintains pods. The scaling decisions themselves live in an
//! external reconciler; this crate only needs the set's identity and the
//! template it stamps onto children.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::sandbox::SandboxSpec;

/// Specification for a SandboxSet
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "sandpool.dev",
    version = "v1alpha1",
    kind = "SandboxSet",
    plural = "sandboxsets",
    shortname = "sbs",
    status = "SandboxSetStatus",
    namespaced,
    printcolumn = r#"{"name":"Desired","type":"integer","jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Ready","type":"integer","jsonPath":".status.readyReplicas"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SandboxSetSpec {
    /// Desired number of pooled sandboxes
    pub replicas: i32,

    /// Template stamped onto every sandbox this set creates
    pub template: SandboxSpec,

    /// When true, scaling is suspended
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub paused: bool,
}

/// Observed status of a SandboxSet
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SandboxSetStatus {
    /// Number of child sandboxes observed
    #[serde(default)]
    pub replicas: i32,

    /// Number of child sandboxes classified Running
    #[serde(default)]
    pub ready_replicas: i32,

    /// Generation most recently acted on by the reconciler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}
