//! Controller-side plumbing for SandboxSet reconciliation
//!
//! This module holds the event dispatch gate that turns raw sandbox watch
//! notifications into reconcile-queue entries, and the key type those entries
//! are made of. The reconcile worker that drains the queue lives outside this
//! crate.

mod sandbox_set;

pub use sandbox_set::{controller_key, ReconcileQueue, ReconcileRequest, SandboxEventHandler};
