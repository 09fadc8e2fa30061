//! Object map with named secondary indexes
//!
//! The store holds every mirrored object of a collection, keyed by namespace
//! and name, plus one inverted index per registered indexer. Mirrored kinds
//! form a closed set ([`StoredObject`]); read paths downcast through
//! [`FromStored`] and silently skip entries of a kind they did not ask for,
//! which is what lets one store type serve both collections.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::crd::{Sandbox, SandboxSet};
use crate::error::Error;
use crate::mirror::revision::RevisionTracker;
use crate::Result;

/// Namespace/name identity of a mirrored object
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    /// Namespace of the object
    pub namespace: String,
    /// Name of the object
    pub name: String,
}

impl ObjectKey {
    /// Build a key from namespace and name
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Build a key from an object's metadata
    pub fn from_meta(meta: &ObjectMeta) -> Self {
        Self {
            namespace: meta.namespace.clone().unwrap_or_default(),
            name: meta.name.clone().unwrap_or_default(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// One mirrored object; the closed set of kinds this layer synchronizes
#[derive(Clone, Debug)]
pub enum StoredObject {
    /// A mirrored Sandbox
    Sandbox(Arc<Sandbox>),
    /// A mirrored SandboxSet
    SandboxSet(Arc<SandboxSet>),
}

impl StoredObject {
    /// Metadata of the wrapped object
    pub fn meta(&self) -> &ObjectMeta {
        match self {
            Self::Sandbox(s) => &s.metadata,
            Self::SandboxSet(s) => &s.metadata,
        }
    }

    /// Namespace/name key of the wrapped object
    pub fn key(&self) -> ObjectKey {
        ObjectKey::from_meta(self.meta())
    }

    /// Revision token of the wrapped object, if the store published one
    pub fn resource_version(&self) -> Option<&str> {
        self.meta().resource_version.as_deref()
    }
}

/// Capability check used by typed reads over the polymorphic store
pub trait FromStored: Sized {
    /// Downcast a stored object, returning None for other kinds
    fn from_stored(obj: &StoredObject) -> Option<Arc<Self>>;
}

impl FromStored for Sandbox {
    fn from_stored(obj: &StoredObject) -> Option<Arc<Self>> {
        match obj {
            StoredObject::Sandbox(s) => Some(Arc::clone(s)),
            _ => None,
        }
    }
}

impl FromStored for SandboxSet {
    fn from_stored(obj: &StoredObject) -> Option<Arc<Self>> {
        match obj {
            StoredObject::SandboxSet(s) => Some(Arc::clone(s)),
            _ => None,
        }
    }
}

/// Computes the index values an object is filed under for one index
pub type IndexFn = Box<dyn Fn(&StoredObject) -> Vec<String> + Send + Sync>;

#[derive(Default)]
struct Inner {
    objects: HashMap<ObjectKey, StoredObject>,
    indexers: HashMap<String, IndexFn>,
    indices: HashMap<String, HashMap<String, HashSet<ObjectKey>>>,
}

/// One collection's mirrored objects plus their secondary indexes
///
/// A single reader/writer lock guards the object map and the index tables
/// together; it is held for map access only, never across an indexer call
/// into foreign code (indexers are crate-local and pure).
pub struct IndexedStore {
    inner: RwLock<Inner>,
    started: AtomicBool,
}

impl IndexedStore {
    /// Create an empty store with no indexes
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            started: AtomicBool::new(false),
        }
    }

    /// Register a named secondary index
    ///
    /// Must happen before synchronization starts: an index registered later
    /// could not cover already-ingested objects, so this fails once the store
    /// has started or holds objects.
    pub fn add_indexer(&self, name: &str, index_fn: IndexFn) -> Result<()> {
        if self.started.load(Ordering::Acquire) {
            return Err(Error::wiring(format!(
                "index {name} registered after sync started"
            )));
        }
        let mut inner = self.inner.write().expect("store lock poisoned");
        if !inner.objects.is_empty() {
            return Err(Error::wiring(format!(
                "index {name} registered on a non-empty store"
            )));
        }
        if inner.indexers.contains_key(name) {
            return Err(Error::wiring(format!("index {name} registered twice")));
        }
        inner.indexers.insert(name.to_string(), index_fn);
        inner.indices.insert(name.to_string(), HashMap::new());
        Ok(())
    }

    /// Mark the store as synchronizing; further index registration fails
    pub(crate) fn mark_started(&self) {
        self.started.store(true, Ordering::Release);
    }

    /// Insert or replace an object, refiling it under every index
    ///
    /// Returns the previous object under the same key, if any.
    pub fn upsert(&self, obj: StoredObject) -> Option<StoredObject> {
        let key = obj.key();
        let mut inner = self.inner.write().expect("store lock poisoned");
        let Inner {
            objects,
            indexers,
            indices,
        } = &mut *inner;

        let old = objects.insert(key.clone(), obj);
        let new_ref = &objects[&key];
        for (name, index_fn) in indexers.iter() {
            let index = indices.get_mut(name).expect("index table missing");
            if let Some(old_obj) = &old {
                unfile(index, index_fn(old_obj), &key);
            }
            for value in index_fn(new_ref) {
                index.entry(value).or_default().insert(key.clone());
            }
        }
        old
    }

    /// Remove the object under `key` from the map and every index
    pub fn remove(&self, key: &ObjectKey) -> Option<StoredObject> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        let Inner {
            objects,
            indexers,
            indices,
        } = &mut *inner;

        let old = objects.remove(key)?;
        for (name, index_fn) in indexers.iter() {
            let index = indices.get_mut(name).expect("index table missing");
            unfile(index, index_fn(&old), key);
        }
        Some(old)
    }

    /// Fetch the object under `key`, if mirrored
    pub fn get(&self, key: &ObjectKey) -> Option<StoredObject> {
        self.inner
            .read()
            .expect("store lock poisoned")
            .objects
            .get(key)
            .cloned()
    }

    /// Every mirrored object whose computed `index` values contain `value`
    ///
    /// Fails with [`Error::UnknownIndex`] when no such index was registered.
    pub fn by_index(&self, index: &str, value: &str) -> Result<Vec<StoredObject>> {
        let inner = self.inner.read().expect("store lock poisoned");
        let table = inner
            .indices
            .get(index)
            .ok_or_else(|| Error::UnknownIndex(index.to_string()))?;
        let Some(keys) = table.get(value) else {
            return Ok(Vec::new());
        };
        Ok(keys
            .iter()
            .filter_map(|k| inner.objects.get(k).cloned())
            .collect())
    }

    /// Keys of every mirrored object
    pub fn keys(&self) -> Vec<ObjectKey> {
        self.inner
            .read()
            .expect("store lock poisoned")
            .objects
            .keys()
            .cloned()
            .collect()
    }

    /// Number of mirrored objects
    pub fn len(&self) -> usize {
        self.inner.read().expect("store lock poisoned").objects.len()
    }

    /// Returns true if nothing is mirrored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for IndexedStore {
    fn default() -> Self {
        Self::new()
    }
}

fn unfile(index: &mut HashMap<String, HashSet<ObjectKey>>, values: Vec<String>, key: &ObjectKey) {
    for value in values {
        if let Some(keys) = index.get_mut(&value) {
            keys.remove(key);
            if keys.is_empty() {
                index.remove(&value);
            }
        }
    }
}

/// Typed indexed read: downcast matches, skip foreign kinds, record revisions
///
/// Every object returned has its revision token recorded against `revisions`,
/// so other code paths can later tell whether a given generation has already
/// been seen by a read.
pub fn select_with_index<T: FromStored>(
    store: &IndexedStore,
    revisions: &RevisionTracker,
    index: &str,
    value: &str,
) -> Result<Vec<Arc<T>>> {
    let mut results = Vec::new();
    for obj in store.by_index(index, value)? {
        let Some(typed) = T::from_stored(&obj) else {
            continue;
        };
        if let Some(rv) = obj.resource_version() {
            revisions.observe(obj.key(), rv);
        }
        results.push(typed);
    }
    Ok(results)
}
