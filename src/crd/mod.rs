//! Custom Resource Definitions for Sandpool
//!
//! This module contains the two resources the consistency layer mirrors:
//! Sandbox (the ephemeral child workload) and SandboxSet (its controller).

mod sandbox;
mod sandbox_set;
mod types;

pub use sandbox::{Sandbox, SandboxSpec, SandboxStatus};
pub use sandbox_set::{SandboxSet, SandboxSetSpec, SandboxSetStatus};
pub use types::{
    ConditionStatus, PodInfo, SandboxCondition, SandboxPhase, SandboxState, API_GROUP,
    CONDITION_READY, LABEL_POOL, LABEL_SANDBOX_ID, LABEL_USER,
};
