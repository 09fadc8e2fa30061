//! Most-recently-observed revision bookkeeping
//!
//! Every successful indexed read records the revision token of each object it
//! returned. Other code paths consult this to tell whether a given generation
//! of an object has already been seen by a read - for example to decide
//! whether a just-written status is visible in the mirror yet. Revision
//! tokens are opaque: they are compared for equality only, never ordered.
//!
//! This is deliberately separate from, and independent of, the derived-state
//! cache: that one memoizes a computation, this one only remembers sightings.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::mirror::store::ObjectKey;

/// Last revision token seen per object, keyed by namespace/name
pub struct RevisionTracker {
    seen: Mutex<HashMap<ObjectKey, String>>,
}

impl RevisionTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Record `revision` as the most recently observed token for `key`
    pub fn observe(&self, key: ObjectKey, revision: &str) {
        let mut seen = self.seen.lock().expect("revision tracker lock poisoned");
        seen.insert(key, revision.to_string());
    }

    /// Returns true if `revision` is exactly the last observed token for `key`
    pub fn has_observed(&self, key: &ObjectKey, revision: &str) -> bool {
        let seen = self.seen.lock().expect("revision tracker lock poisoned");
        seen.get(key).is_some_and(|r| r == revision)
    }

    /// The last observed token for `key`, if any read returned the object
    pub fn latest(&self, key: &ObjectKey) -> Option<String> {
        let seen = self.seen.lock().expect("revision tracker lock poisoned");
        seen.get(key).cloned()
    }

    /// Drop the record for `key`, typically on confirmed deletion
    pub fn forget(&self, key: &ObjectKey) {
        let mut seen = self.seen.lock().expect("revision tracker lock poisoned");
        seen.remove(key);
    }
}

impl Default for RevisionTracker {
    fn default() -> Self {
        Self::new()
    }
}
