//! Scale expectations for SandboxSet controllers
//!
//! A reconcile pass decides to create or delete N sandboxes and acts on that
//! decision immediately, but the effects only become visible once the API
//! server's watch stream delivers them. A second pass that runs in between
//! would see a stale child count and repeat the action. Expectations bridge
//! that gap: the reconciler registers the names it is about to create or
//! delete, the event dispatch gate marks them observed as notifications
//! arrive, and reconciliation of a set is deferred while any name is still
//! outstanding.
//!
//! Two independent instances are wired in practice - one tracking Create, one
//! tracking Delete - so a create observation can never satisfy a delete
//! expectation. Within an instance the two action sets are kept separate as
//! well.
//!
//! Expectations that are never observed (for example because the underlying
//! create failed out-of-band and no watch event will ever come) age out after
//! a configurable staleness bound and are force-satisfied, trading a possible
//! duplicate action for liveness.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::DEFAULT_EXPECTATION_TIMEOUT;

/// The kind of scaling operation an expectation tracks
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScaleAction {
    /// Expecting a child-created notification
    Create,
    /// Expecting a child-deleted notification
    Delete,
}

impl std::fmt::Display for ScaleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Result of a satisfaction check for one controller key
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Satisfaction {
    /// True when no expectation is outstanding for the key
    pub satisfied: bool,
    /// Names registered since the record was created or last reset
    pub expected: usize,
    /// Names observed since the record was created or last reset
    pub observed: usize,
}

impl Satisfaction {
    fn empty() -> Self {
        Self {
            satisfied: true,
            expected: 0,
            observed: 0,
        }
    }
}

/// Outstanding names for one controller key
///
/// Counters survive a full drain so callers can still report how much of the
/// last scaling decision was confirmed; they reset only when the record is
/// deleted before the next decision.
#[derive(Debug)]
struct ExpectationRecord {
    create: HashSet<String>,
    delete: HashSet<String>,
    expected: usize,
    observed: usize,
    recorded_at: Instant,
}

impl ExpectationRecord {
    fn new() -> Self {
        Self {
            create: HashSet::new(),
            delete: HashSet::new(),
            expected: 0,
            observed: 0,
            recorded_at: Instant::now(),
        }
    }

    fn set_mut(&mut self, action: ScaleAction) -> &mut HashSet<String> {
        match action {
            ScaleAction::Create => &mut self.create,
            ScaleAction::Delete => &mut self.delete,
        }
    }

    fn outstanding(&self) -> usize {
        self.create.len() + self.delete.len()
    }

    fn status(&self, satisfied: bool) -> Satisfaction {
        Satisfaction {
            satisfied,
            expected: self.expected,
            observed: self.observed,
        }
    }
}

/// Per-controller bookkeeping of outstanding create/delete obligations
///
/// All operations take `&self`; the record map is guarded by a single mutex
/// that is never held across anything but map access.
pub struct ScaleExpectations {
    records: Mutex<HashMap<String, ExpectationRecord>>,
    timeout: Duration,
}

impl ScaleExpectations {
    /// Create a tracker with the default staleness bound
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_EXPECTATION_TIMEOUT)
    }

    /// Create a tracker with a custom staleness bound
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Register `name` as an outstanding `action` for `controller_key`
    ///
    /// Idempotent: registering a name already outstanding changes nothing.
    /// Distinct names accumulate in the same record.
    pub fn expect_scale(&self, controller_key: &str, action: ScaleAction, name: &str) {
        let mut records = self.records.lock().expect("expectations lock poisoned");
        let record = records
            .entry(controller_key.to_string())
            .or_insert_with(ExpectationRecord::new);
        if record.set_mut(action).insert(name.to_string()) {
            record.expected += 1;
            debug!(
                controller = %controller_key,
                %action,
                name,
                "registered scale expectation"
            );
        }
    }

    /// Record that a matching watch notification arrived
    ///
    /// Removes `name` from the outstanding set if present; a no-op otherwise,
    /// which makes redelivered notifications safe.
    pub fn observe_scale(&self, controller_key: &str, action: ScaleAction, name: &str) {
        let mut records = self.records.lock().expect("expectations lock poisoned");
        if let Some(record) = records.get_mut(controller_key) {
            if record.set_mut(action).remove(name) {
                record.observed += 1;
                debug!(
                    controller = %controller_key,
                    %action,
                    name,
                    "observed scale expectation"
                );
            }
        }
    }

    /// Check whether `controller_key` has anything outstanding
    ///
    /// Satisfied when nothing was ever registered, when every registered name
    /// has been observed, or when the registration aged past the staleness
    /// bound. Aged-out records are force-satisfied, logged and dropped so a
    /// permanently missing watch event cannot stall reconciliation forever.
    pub fn satisfied_expectations(&self, controller_key: &str) -> Satisfaction {
        let mut records = self.records.lock().expect("expectations lock poisoned");
        let Some(record) = records.get(controller_key) else {
            return Satisfaction::empty();
        };

        if record.outstanding() == 0 {
            return record.status(true);
        }

        if record.recorded_at.elapsed() > self.timeout {
            warn!(
                controller = %controller_key,
                outstanding = record.outstanding(),
                "scale expectations expired before being observed, force-satisfying"
            );
            let status = record.status(true);
            records.remove(controller_key);
            return status;
        }

        record.status(false)
    }

    /// Drop all outstanding names and counters for `controller_key`
    ///
    /// Called before a fresh scaling decision is registered and on controller
    /// teardown.
    pub fn delete_expectations(&self, controller_key: &str) {
        let mut records = self.records.lock().expect("expectations lock poisoned");
        if records.remove(controller_key).is_some() {
            debug!(controller = %controller_key, "deleted scale expectations");
        }
    }
}

impl Default for ScaleExpectations {
    fn default() -> Self {
        Self::new()
    }
}
