//! Sandpool - consistency layer for a pooled-sandbox Kubernetes operator
//!
//! Sandpool keeps the control loop of a sandbox-pool operator correct under
//! asynchronous, eventually-consistent observation of the Kubernetes API.
//! Sandboxes are ephemeral workloads owned by a SandboxSet; the reconcile
//! worker scales the pool optimistically, long before its create/delete calls
//! become visible through the watch stream. Everything in this crate exists to
//! keep those two views consistent.
//!
//! # Modules
//!
//! - [`crd`] - Sandbox and SandboxSet custom resource definitions
//! - [`expectations`] - Outstanding create/delete bookkeeping per SandboxSet
//! - [`controller`] - Event dispatch gate feeding the reconcile work queue
//! - [`state`] - Memoized coarse lifecycle classification of sandboxes
//! - [`mirror`] - Secondary-indexed, watch-synchronized local object mirror
//! - [`error`] - Error types for the consistency layer
//!
//! # Data flow
//!
//! The [`mirror`] ingests raw add/update/delete notifications from the API
//! server's list-then-watch stream and forwards them to registered observers.
//! The [`controller`] gate checks ownership, records observations against the
//! [`expectations`] trackers, and enqueues reconcile requests. The reconcile
//! worker (external to this crate) reads current state through the mirror and
//! the [`state`] cache, then registers fresh expectations before issuing new
//! create/delete calls.

#![deny(missing_docs)]

pub mod controller;
pub mod crd;
pub mod error;
pub mod expectations;
pub mod mirror;
pub mod state;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Default staleness bound for scale expectations
///
/// An expectation older than this is force-satisfied so that a watch event
/// lost out-of-band (for example a create that silently failed) can never
/// stall reconciliation of its SandboxSet forever.
pub const DEFAULT_EXPECTATION_TIMEOUT: std::time::Duration =
    std::time::Duration::from_secs(300);
