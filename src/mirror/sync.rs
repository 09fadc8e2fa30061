//! List-then-watch synchronization of the mirrored collections
//!
//! [`Mirror`] owns one [`IndexedStore`] per mirrored collection and keeps both
//! in step with the API server: a background task per collection consumes a
//! `kube` watcher stream and applies every notification to the store before
//! fanning it out to registered observers. Readers must await
//! [`Mirror::wait_for_sync`] before trusting mirror reads; after
//! [`Mirror::stop`] reads keep serving the last-known snapshot rather than
//! erroring.
//!
//! The watcher protocol redelivers the full collection on every relist
//! (`Init` .. `InitDone`); objects that vanished while the watch was broken
//! are pruned when the relist completes, so the mirror converges even across
//! missed delete events.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use futures::StreamExt;
use kube::api::Api;
use kube::runtime::watcher::{watcher, Config as WatcherConfig, Event};
use kube::runtime::WatchStreamExt;
use kube::Client;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::crd::{Sandbox, SandboxSet};
use crate::error::Error;
use crate::mirror::indexers::{
    register_sandbox_indexers, INDEX_POOL_AVAILABLE, INDEX_SANDBOX_ID, INDEX_USER,
};
use crate::mirror::revision::RevisionTracker;
use crate::mirror::store::{
    select_with_index, FromStored, IndexFn, IndexedStore, ObjectKey, StoredObject,
};
use crate::Result;

/// Observer of sandbox add/update/remove notifications
///
/// Implementations must be cheap and non-blocking: they run on the watch
/// ingestion task, after the store has been updated for the same event.
pub trait SandboxEventObserver: Send + Sync {
    /// A sandbox appeared in the collection
    fn on_added(&self, sandbox: &Sandbox);

    /// A mirrored sandbox changed (or was redelivered unchanged on resync)
    fn on_updated(&self, _old: &Sandbox, _new: &Sandbox) {}

    /// A sandbox left the collection
    fn on_removed(&self, sandbox: &Sandbox);
}

/// Observer of SandboxSet add/remove notifications
pub trait SandboxSetEventObserver: Send + Sync {
    /// A sandbox set appeared in the collection
    fn on_added(&self, _set: &SandboxSet) {}

    /// A sandbox set left the collection
    fn on_removed(&self, _set: &SandboxSet) {}
}

/// One mirrored collection: its store, sync flag and relist scratchpad
struct Collection {
    store: IndexedStore,
    ready_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,
    relist: Mutex<Option<HashSet<ObjectKey>>>,
}

impl Collection {
    fn new(store: IndexedStore) -> Self {
        let (ready_tx, ready_rx) = watch::channel(false);
        Self {
            store,
            ready_tx,
            ready_rx,
            relist: Mutex::new(None),
        }
    }

    fn begin_relist(&self) {
        *self.relist.lock().expect("relist lock poisoned") = Some(HashSet::new());
    }

    fn note_listed(&self, key: ObjectKey) {
        if let Some(buf) = self
            .relist
            .lock()
            .expect("relist lock poisoned")
            .as_mut()
        {
            buf.insert(key);
        }
    }

    /// Keys mirrored before the relist but absent from it
    fn finish_relist(&self) -> Vec<ObjectKey> {
        let listed = self
            .relist
            .lock()
            .expect("relist lock poisoned")
            .take();
        let Some(listed) = listed else {
            return Vec::new();
        };
        self.store
            .keys()
            .into_iter()
            .filter(|k| !listed.contains(k))
            .collect()
    }

    fn mark_synced(&self, what: &str) {
        if !*self.ready_rx.borrow() {
            info!(collection = what, "mirror collection synced");
        }
        self.ready_tx.send_replace(true);
    }

    async fn wait_synced(&self) {
        let mut rx = self.ready_rx.clone();
        let _ = rx.wait_for(|ready| *ready).await;
    }
}

/// Continuously synchronized mirror of the Sandbox and SandboxSet collections
///
/// Construction registers every secondary index; [`Mirror::start`] begins the
/// list-then-watch synchronization in the background. The mirror is driven
/// either by those background tasks or, in tests and embedders with their own
/// watch plumbing, by feeding [`Event`]s to [`Mirror::apply_sandbox_event`]
/// directly.
pub struct Mirror {
    sandboxes: Collection,
    sandbox_sets: Option<Collection>,
    revisions: RevisionTracker,
    sandbox_observers: RwLock<Vec<Arc<dyn SandboxEventObserver>>>,
    set_observers: RwLock<Vec<Arc<dyn SandboxSetEventObserver>>>,
    started: AtomicBool,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl Mirror {
    /// Create a mirror of both collections with the standard sandbox indexes
    pub fn new() -> Result<Self> {
        let sandboxes = IndexedStore::new();
        register_sandbox_indexers(&sandboxes)?;
        let (stop_tx, stop_rx) = watch::channel(false);
        Ok(Self {
            sandboxes: Collection::new(sandboxes),
            sandbox_sets: Some(Collection::new(IndexedStore::new())),
            revisions: RevisionTracker::new(),
            sandbox_observers: RwLock::new(Vec::new()),
            set_observers: RwLock::new(Vec::new()),
            started: AtomicBool::new(false),
            stop_tx,
            stop_rx,
        })
    }

    /// Create a mirror of the sandbox collection only
    ///
    /// Deployments that never reconcile SandboxSets (pure read paths) skip
    /// the second watch; registering a SandboxSet event handler on such a
    /// mirror is a programmer error and panics.
    pub fn sandbox_only() -> Result<Self> {
        let mut mirror = Self::new()?;
        mirror.sandbox_sets = None;
        Ok(mirror)
    }

    /// Register an additional sandbox index before synchronization starts
    pub fn add_sandbox_indexer(&self, name: &str, index_fn: IndexFn) -> Result<()> {
        self.sandboxes.store.add_indexer(name, index_fn)
    }

    /// Begin list-then-watch synchronization in the background
    ///
    /// Fails if called twice. Watches span all namespaces. Callers must await
    /// [`Mirror::wait_for_sync`] before treating reads as trustworthy.
    pub fn start(self: &Arc<Self>, client: Client) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(Error::wiring("mirror already started"));
        }
        self.sandboxes.store.mark_started();

        let sandbox_api: Api<Sandbox> = Api::all(client.clone());
        let mirror = Arc::clone(self);
        let mut stop = self.stop_rx.clone();
        tokio::spawn(async move {
            let mut stream = watcher(sandbox_api, WatcherConfig::default())
                .default_backoff()
                .boxed();
            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    item = stream.next() => match item {
                        Some(Ok(event)) => mirror.apply_sandbox_event(event),
                        Some(Err(err)) => warn!(error = %err, "sandbox watch stream error"),
                        None => break,
                    },
                }
            }
            debug!("sandbox watch task exited");
        });

        if let Some(sets) = &self.sandbox_sets {
            sets.store.mark_started();
            let set_api: Api<SandboxSet> = Api::all(client);
            let mirror = Arc::clone(self);
            let mut stop = self.stop_rx.clone();
            tokio::spawn(async move {
                let mut stream = watcher(set_api, WatcherConfig::default())
                    .default_backoff()
                    .boxed();
                loop {
                    tokio::select! {
                        _ = stop.changed() => break,
                        item = stream.next() => match item {
                            Some(Ok(event)) => mirror.apply_sandbox_set_event(event),
                            Some(Err(err)) => warn!(error = %err, "sandboxset watch stream error"),
                            None => break,
                        },
                    }
                }
                debug!("sandboxset watch task exited");
            });
        }

        info!("mirror started");
        Ok(())
    }

    /// Resolve once every mirrored collection has ingested its initial list
    pub async fn wait_for_sync(&self) {
        self.sandboxes.wait_synced().await;
        if let Some(sets) = &self.sandbox_sets {
            sets.wait_synced().await;
        }
    }

    /// Re-await synchronization; returns immediately once synced
    pub async fn refresh(&self) {
        self.wait_for_sync().await;
    }

    /// Halt synchronization; reads keep serving the last-known snapshot
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
        info!("mirror stopped");
    }

    /// Attach an observer to the sandbox notification stream
    pub fn add_sandbox_event_handler(&self, observer: Arc<dyn SandboxEventObserver>) {
        self.sandbox_observers
            .write()
            .expect("observer lock poisoned")
            .push(observer);
    }

    /// Attach an observer to the SandboxSet notification stream
    ///
    /// # Panics
    ///
    /// Panics when the mirror was built with [`Mirror::sandbox_only`]: wiring
    /// a handler to a collection that is never synchronized is a deployment
    /// bug that must not be ignored silently.
    pub fn add_sandbox_set_event_handler(&self, observer: Arc<dyn SandboxSetEventObserver>) {
        assert!(
            self.sandbox_sets.is_some(),
            "SandboxSet collection is not mirrored"
        );
        self.set_observers
            .write()
            .expect("observer lock poisoned")
            .push(observer);
    }

    /// Apply one sandbox watch event to the mirror
    ///
    /// Normally driven by the task started via [`Mirror::start`]; exposed so
    /// tests and embedders with their own watch plumbing can inject events.
    pub fn apply_sandbox_event(&self, event: Event<Sandbox>) {
        match event {
            Event::Init => self.sandboxes.begin_relist(),
            Event::InitApply(obj) => self.ingest_sandbox(obj, true),
            Event::InitDone => {
                for key in self.sandboxes.finish_relist() {
                    if let Some(StoredObject::Sandbox(gone)) = self.sandboxes.store.remove(&key) {
                        self.revisions.forget(&key);
                        for observer in self.sandbox_observers() {
                            observer.on_removed(&gone);
                        }
                    }
                }
                self.sandboxes.mark_synced("sandboxes");
            }
            Event::Apply(obj) => self.ingest_sandbox(obj, false),
            Event::Delete(obj) => {
                let sandbox = Arc::new(obj);
                let key = ObjectKey::from_meta(&sandbox.metadata);
                self.sandboxes.store.remove(&key);
                self.revisions.forget(&key);
                for observer in self.sandbox_observers() {
                    observer.on_removed(&sandbox);
                }
            }
        }
    }

    /// Apply one SandboxSet watch event to the mirror
    ///
    /// # Panics
    ///
    /// Panics when the mirror was built with [`Mirror::sandbox_only`].
    pub fn apply_sandbox_set_event(&self, event: Event<SandboxSet>) {
        let sets = self
            .sandbox_sets
            .as_ref()
            .expect("SandboxSet collection is not mirrored");
        match event {
            Event::Init => sets.begin_relist(),
            Event::InitApply(obj) => self.ingest_sandbox_set(obj, true),
            Event::InitDone => {
                for key in sets.finish_relist() {
                    if let Some(StoredObject::SandboxSet(gone)) = sets.store.remove(&key) {
                        for observer in self.set_observers() {
                            observer.on_removed(&gone);
                        }
                    }
                }
                sets.mark_synced("sandboxsets");
            }
            Event::Apply(obj) => self.ingest_sandbox_set(obj, false),
            Event::Delete(obj) => {
                let set = Arc::new(obj);
                sets.store.remove(&ObjectKey::from_meta(&set.metadata));
                for observer in self.set_observers() {
                    observer.on_removed(&set);
                }
            }
        }
    }

    /// Every mirrored sandbox whose `index` values contain `value`
    pub fn list_by_index(&self, index: &str, value: &str) -> Result<Vec<Arc<Sandbox>>> {
        select_with_index(&self.sandboxes.store, &self.revisions, index, value)
    }

    /// Every sandbox claimed by `user`
    pub fn list_sandboxes_for_user(&self, user: &str) -> Result<Vec<Arc<Sandbox>>> {
        self.list_by_index(INDEX_USER, user)
    }

    /// Every unclaimed, running sandbox in `pool`
    pub fn list_available_sandboxes(&self, pool: &str) -> Result<Vec<Arc<Sandbox>>> {
        self.list_by_index(INDEX_POOL_AVAILABLE, pool)
    }

    /// The one sandbox carrying `sandbox_id`
    ///
    /// Zero matches is [`Error::NotFound`]; more than one is
    /// [`Error::MultipleMatches`], a data-integrity fault surfaced to the
    /// caller rather than resolved by picking a winner.
    pub fn get_sandbox(&self, sandbox_id: &str) -> Result<Arc<Sandbox>> {
        let mut matches = self.list_by_index(INDEX_SANDBOX_ID, sandbox_id)?;
        match matches.len() {
            0 => Err(Error::NotFound(sandbox_id.to_string())),
            1 => Ok(matches.remove(0)),
            _ => Err(Error::MultipleMatches(sandbox_id.to_string())),
        }
    }

    /// The mirrored SandboxSet under namespace/name, if any
    pub fn get_sandbox_set(&self, namespace: &str, name: &str) -> Option<Arc<SandboxSet>> {
        let sets = self.sandbox_sets.as_ref()?;
        let obj = sets.store.get(&ObjectKey::new(namespace, name))?;
        SandboxSet::from_stored(&obj)
    }

    /// Revision bookkeeping fed by every successful indexed read
    pub fn revisions(&self) -> &RevisionTracker {
        &self.revisions
    }

    fn ingest_sandbox(&self, obj: Sandbox, from_relist: bool) {
        let sandbox = Arc::new(obj);
        let key = ObjectKey::from_meta(&sandbox.metadata);
        if from_relist {
            self.sandboxes.note_listed(key.clone());
        }
        let old = self
            .sandboxes
            .store
            .upsert(StoredObject::Sandbox(Arc::clone(&sandbox)));
        match old {
            Some(StoredObject::Sandbox(prev)) => {
                for observer in self.sandbox_observers() {
                    observer.on_updated(&prev, &sandbox);
                }
            }
            _ => {
                for observer in self.sandbox_observers() {
                    observer.on_added(&sandbox);
                }
            }
        }
    }

    fn ingest_sandbox_set(&self, obj: SandboxSet, from_relist: bool) {
        let sets = self
            .sandbox_sets
            .as_ref()
            .expect("SandboxSet collection is not mirrored");
        let set = Arc::new(obj);
        let key = ObjectKey::from_meta(&set.metadata);
        if from_relist {
            sets.note_listed(key.clone());
        }
        let old = sets.store.upsert(StoredObject::SandboxSet(Arc::clone(&set)));
        if old.is_none() {
            for observer in self.set_observers() {
                observer.on_added(&set);
            }
        }
    }

    fn sandbox_observers(&self) -> Vec<Arc<dyn SandboxEventObserver>> {
        self.sandbox_observers
            .read()
            .expect("observer lock poisoned")
            .clone()
    }

    fn set_observers(&self) -> Vec<Arc<dyn SandboxSetEventObserver>> {
        self.set_observers
            .read()
            .expect("observer lock poisoned")
            .clone()
    }
}
