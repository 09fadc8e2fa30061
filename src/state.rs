//! Memoized coarse lifecycle classification of sandboxes
//!
//! Read paths classify a sandbox from its phase, condition list and pod info
//! on every request; routing alone does this for each proxied call. The API
//! server's contract makes the computation memoizable: a given (uid,
//! resourceVersion) pair's observable fields never change once published.
//! [`SandboxStateCache`] exploits exactly that, and nothing more - any
//! identity or revision mismatch falls back to recomputation.
//!
//! Entries are removed only by explicit [`SandboxStateCache::invalidate`],
//! typically on confirmed deletion. That both bounds memory and keeps a
//! future sandbox reusing the same name from being misclassified before its
//! own revision is observed; the uid check on lookup is the second,
//! independent guard against the same hazard.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use tracing::debug;

use crate::crd::{Sandbox, SandboxPhase, SandboxState};

/// Reason attached to sandboxes whose deletion has begun
const REASON_TERMINATING: &str = "Terminating";
/// Reason attached to sandboxes whose pod has not started
const REASON_POD_PENDING: &str = "PodPending";
/// Reason attached to running sandboxes that have not passed readiness
const REASON_NOT_READY: &str = "NotReady";
/// Reason attached to running sandboxes with no assigned pod address
const REASON_MISSING_POD_IP: &str = "MissingPodIp";

/// Classify a sandbox from its live fields
///
/// The deletion timestamp wins over everything; terminal phases pass through;
/// Running demands a true Ready condition and an assigned pod IP.
pub fn compute_state(sandbox: &Sandbox) -> (SandboxState, String) {
    if sandbox.is_terminating() {
        return (SandboxState::Terminating, REASON_TERMINATING.to_string());
    }

    let phase = sandbox
        .status
        .as_ref()
        .map(|s| s.phase.clone())
        .unwrap_or_default();

    match phase {
        SandboxPhase::Succeeded => (SandboxState::Succeeded, String::new()),
        SandboxPhase::Failed => (SandboxState::Failed, failure_reason(sandbox)),
        SandboxPhase::Running => match sandbox.ready_condition() {
            Some(cond) if cond.is_true() => {
                if sandbox.pod_ip().is_some() {
                    (SandboxState::Running, String::new())
                } else {
                    (SandboxState::NotReady, REASON_MISSING_POD_IP.to_string())
                }
            }
            Some(cond) if !cond.reason.is_empty() => {
                (SandboxState::NotReady, cond.reason.clone())
            }
            _ => (SandboxState::NotReady, REASON_NOT_READY.to_string()),
        },
        SandboxPhase::Pending | SandboxPhase::Unknown => {
            (SandboxState::Pending, REASON_POD_PENDING.to_string())
        }
    }
}

/// First machine-readable reason on a false condition, if any
fn failure_reason(sandbox: &Sandbox) -> String {
    sandbox
        .status
        .as_ref()
        .and_then(|s| {
            s.conditions
                .iter()
                .find(|c| !c.is_true() && !c.reason.is_empty())
        })
        .map(|c| c.reason.clone())
        .unwrap_or_default()
}

/// One memoized classification, valid while uid and revision both match
#[derive(Clone, Debug)]
struct CachedState {
    uid: String,
    resource_version: String,
    state: SandboxState,
    reason: String,
}

/// Memoization cache for [`compute_state`], keyed by (namespace, name)
///
/// The map is guarded by a single reader/writer lock: lookups share the read
/// lock, recompute-and-store takes the write lock. The lock is never held
/// across the classification itself.
pub struct SandboxStateCache {
    entries: RwLock<HashMap<(String, String), CachedState>>,
    memoize: AtomicBool,
}

impl SandboxStateCache {
    /// Create an empty cache with memoization enabled
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            memoize: AtomicBool::new(true),
        }
    }

    /// Enable or disable memoization
    ///
    /// With memoization off every call recomputes from live fields and stores
    /// nothing, which keeps tests deterministic.
    pub fn set_memoize(&self, enabled: bool) {
        self.memoize.store(enabled, Ordering::Relaxed);
    }

    /// Classify `sandbox`, serving from cache when identity and revision match
    ///
    /// A hit returns the stored pair verbatim, deliberately ignoring any
    /// fields a caller mutated on its in-memory copy without a revision bump.
    pub fn get_state(&self, sandbox: &Sandbox) -> (SandboxState, String) {
        if !self.memoize.load(Ordering::Relaxed) {
            return compute_state(sandbox);
        }

        let key = object_key(sandbox);
        let uid = sandbox.metadata.uid.clone().unwrap_or_default();
        let resource_version = sandbox.metadata.resource_version.clone().unwrap_or_default();

        {
            let entries = self.entries.read().expect("state cache lock poisoned");
            if let Some(entry) = entries.get(&key) {
                if entry.uid == uid && entry.resource_version == resource_version {
                    return (entry.state, entry.reason.clone());
                }
            }
        }

        let (state, reason) = compute_state(sandbox);
        debug!(
            namespace = %key.0,
            name = %key.1,
            %state,
            resource_version = %resource_version,
            "computed sandbox state"
        );

        let mut entries = self.entries.write().expect("state cache lock poisoned");
        entries.insert(
            key,
            CachedState {
                uid,
                resource_version,
                state,
                reason: reason.clone(),
            },
        );
        (state, reason)
    }

    /// Remove the entry for (namespace, name)
    ///
    /// Called when a sandbox is confirmed deleted. A subsequent
    /// [`SandboxStateCache::get_state`] recomputes from live fields.
    pub fn invalidate(&self, namespace: &str, name: &str) {
        let mut entries = self.entries.write().expect("state cache lock poisoned");
        if entries
            .remove(&(namespace.to_string(), name.to_string()))
            .is_some()
        {
            debug!(namespace, name, "invalidated sandbox state cache entry");
        }
    }

    /// Number of cached classifications
    pub fn len(&self) -> usize {
        self.entries.read().expect("state cache lock poisoned").len()
    }

    /// Returns true if nothing is cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SandboxStateCache {
    fn default() -> Self {
        Self::new()
    }
}

fn object_key(sandbox: &Sandbox) -> (String, String) {
    (
        sandbox.metadata.namespace.clone().unwrap_or_default(),
        sandbox.metadata.name.clone().unwrap_or_default(),
    )
}
