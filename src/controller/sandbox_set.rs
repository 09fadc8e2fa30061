//! Event dispatch gate for the SandboxSet controller
//!
//! The gate converts a raw add/remove notification for a Sandbox into at most
//! one reconcile-queue entry and feeds the expectation trackers. Ownership is
//! the filter: only objects whose controlling owner reference names a
//! SandboxSet trigger this controller; unowned or foreign-owned sandboxes
//! never do, no matter what expectations are registered.
//!
//! An event that passes the filter always enqueues the owner - whether or not
//! an expectation was outstanding. Any child creation or deletion changes the
//! actual-state count and must be re-evaluated; the tracker's only job is to
//! keep the next decision from over-acting, not to decide whether an event is
//! interesting. Enqueue collapse of duplicate keys belongs to the external
//! work queue.

use std::sync::Arc;

use kube::Resource;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::crd::{Sandbox, SandboxSet};
use crate::expectations::{ScaleAction, ScaleExpectations};
use crate::mirror::SandboxEventObserver;

/// Key of one SandboxSet on the reconcile work queue
///
/// Rendered as `"<namespace>/<name>"`; the default (empty) request renders as
/// the sentinel `"/"`, the no-identity value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ReconcileRequest {
    /// Namespace of the SandboxSet to reconcile
    pub namespace: String,
    /// Name of the SandboxSet to reconcile
    pub name: String,
}

impl ReconcileRequest {
    /// Build a request from namespace and name
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ReconcileRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Reconcile work queue the gate produces entries for
///
/// Coalescing and draining are the queue's own responsibility; the gate only
/// adds keys.
#[cfg_attr(test, automock)]
pub trait ReconcileQueue: Send + Sync {
    /// Enqueue a reconcile request
    fn add(&self, request: ReconcileRequest);
}

/// Render the bookkeeping key of a SandboxSet
pub fn controller_key(set: &SandboxSet) -> String {
    format!(
        "{}/{}",
        set.metadata.namespace.as_deref().unwrap_or_default(),
        set.metadata.name.as_deref().unwrap_or_default()
    )
}

/// The event dispatch gate: one per SandboxSet controller
///
/// Holds the two expectation trackers (scale-up observes creations,
/// scale-down observes deletions) and the work queue. Attached to the mirror
/// via [`crate::mirror::Mirror::add_sandbox_event_handler`].
pub struct SandboxEventHandler {
    scale_up: Arc<ScaleExpectations>,
    scale_down: Arc<ScaleExpectations>,
    queue: Arc<dyn ReconcileQueue>,
}

impl SandboxEventHandler {
    /// Wire the gate to its trackers and queue
    pub fn new(
        scale_up: Arc<ScaleExpectations>,
        scale_down: Arc<ScaleExpectations>,
        queue: Arc<dyn ReconcileQueue>,
    ) -> Self {
        Self {
            scale_up,
            scale_down,
            queue,
        }
    }

    /// The reconcile request for a sandbox's controlling SandboxSet owner
    ///
    /// None when the sandbox carries no owner entry of the SandboxSet kind
    /// with the controlling flag set.
    fn owner_request(sandbox: &Sandbox) -> Option<ReconcileRequest> {
        let owners = sandbox.metadata.owner_references.as_ref()?;
        let owner = owners.iter().find(|o| {
            o.controller.unwrap_or(false)
                && o.kind == SandboxSet::kind(&())
                && o.api_version == SandboxSet::api_version(&())
        })?;
        Some(ReconcileRequest::new(
            sandbox.metadata.namespace.clone().unwrap_or_default(),
            owner.name.clone(),
        ))
    }
}

impl SandboxEventObserver for SandboxEventHandler {
    fn on_added(&self, sandbox: &Sandbox) {
        let Some(request) = Self::owner_request(sandbox) else {
            debug!(
                sandbox = sandbox.metadata.name.as_deref().unwrap_or_default(),
                "ignoring sandbox without controlling SandboxSet owner"
            );
            return;
        };
        if let Some(name) = sandbox.metadata.name.as_deref() {
            self.scale_up
                .observe_scale(&request.to_string(), ScaleAction::Create, name);
        }
        self.queue.add(request);
    }

    fn on_updated(&self, _old: &Sandbox, new: &Sandbox) {
        if let Some(request) = Self::owner_request(new) {
            self.queue.add(request);
        }
    }

    fn on_removed(&self, sandbox: &Sandbox) {
        let Some(request) = Self::owner_request(sandbox) else {
            debug!(
                sandbox = sandbox.metadata.name.as_deref().unwrap_or_default(),
                "ignoring sandbox without controlling SandboxSet owner"
            );
            return;
        };
        if let Some(name) = sandbox.metadata.name.as_deref() {
            self.scale_down
                .observe_scale(&request.to_string(), ScaleAction::Delete, name);
        }
        self.queue.add(request);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{SandboxSetSpec, SandboxSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
    use std::sync::Mutex;

    /// Records the last request added; the sentinel "/" before any add
    #[derive(Default)]
    struct FakeQueue {
        request: Mutex<ReconcileRequest>,
    }

    impl FakeQueue {
        fn recorded(&self) -> String {
            self.request.lock().unwrap().to_string()
        }
    }

    impl ReconcileQueue for FakeQueue {
        fn add(&self, request: ReconcileRequest) {
            *self.request.lock().unwrap() = request;
        }
    }

    fn sandbox_set() -> SandboxSet {
        SandboxSet {
            metadata: ObjectMeta {
                name: Some("test-sandboxset".to_string()),
                namespace: Some("default".to_string()),
                uid: Some("123456789".to_string()),
                ..Default::default()
            },
            spec: SandboxSetSpec::default(),
            status: None,
        }
    }

    fn owned_sandbox(set: &SandboxSet) -> Sandbox {
        sandbox_with_owner(OwnerReference {
            api_version: SandboxSet::api_version(&()).into_owned(),
            kind: SandboxSet::kind(&()).into_owned(),
            name: set.metadata.name.clone().unwrap(),
            uid: set.metadata.uid.clone().unwrap(),
            controller: Some(true),
            ..Default::default()
        })
    }

    fn foreign_owned_sandbox(set: &SandboxSet) -> Sandbox {
        sandbox_with_owner(OwnerReference {
            api_version: "apps/v1".to_string(),
            kind: "Deployment".to_string(),
            name: set.metadata.name.clone().unwrap(),
            uid: set.metadata.uid.clone().unwrap(),
            controller: Some(true),
            ..Default::default()
        })
    }

    fn sandbox_with_owner(owner: OwnerReference) -> Sandbox {
        Sandbox {
            metadata: ObjectMeta {
                name: Some("test-sandbox".to_string()),
                namespace: Some("default".to_string()),
                owner_references: Some(vec![owner]),
                ..Default::default()
            },
            spec: SandboxSpec {
                template: "base".to_string(),
                ..Default::default()
            },
            status: None,
        }
    }

    struct Fixture {
        scale_up: Arc<ScaleExpectations>,
        scale_down: Arc<ScaleExpectations>,
        queue: Arc<FakeQueue>,
        handler: SandboxEventHandler,
    }

    fn fixture() -> Fixture {
        let scale_up = Arc::new(ScaleExpectations::new());
        let scale_down = Arc::new(ScaleExpectations::new());
        let queue = Arc::new(FakeQueue::default());
        let handler = SandboxEventHandler::new(
            Arc::clone(&scale_up),
            Arc::clone(&scale_down),
            queue.clone(),
        );
        Fixture {
            scale_up,
            scale_down,
            queue,
            handler,
        }
    }

    // =========================================================================
    // Create Dispatch Stories
    // =========================================================================
    //
    // Four cases: owned/foreign-owned crossed with expectation/no expectation.
    // Ownership alone decides whether the owner is enqueued; the expectation
    // only changes what the next reconcile pass will believe.

    #[test]
    fn test_create_owned_with_expectation_enqueues_and_satisfies() {
        let f = fixture();
        let set = sandbox_set();
        let key = controller_key(&set);
        f.scale_up
            .expect_scale(&key, ScaleAction::Create, "test-sandbox");

        f.handler.on_added(&owned_sandbox(&set));

        assert_eq!(f.queue.recorded(), key);
        let status = f.scale_up.satisfied_expectations(&key);
        assert!(status.satisfied);
        assert_eq!(status.expected, 1);
        assert_eq!(status.observed, 1);
    }

    #[test]
    fn test_create_owned_without_expectation_still_enqueues() {
        let f = fixture();
        let set = sandbox_set();
        let key = controller_key(&set);

        f.handler.on_added(&owned_sandbox(&set));

        // Unexpected creations change the actual-state count too.
        assert_eq!(f.queue.recorded(), key);
        assert!(f.scale_up.satisfied_expectations(&key).satisfied);
    }

    #[test]
    fn test_create_foreign_owned_with_expectation_is_ignored() {
        let f = fixture();
        let set = sandbox_set();
        let key = controller_key(&set);
        f.scale_up
            .expect_scale(&key, ScaleAction::Create, "test-sandbox");

        f.handler.on_added(&foreign_owned_sandbox(&set));

        assert_eq!(f.queue.recorded(), "/");
        // The expectation was never observed, so it still blocks.
        assert!(!f.scale_up.satisfied_expectations(&key).satisfied);
    }

    #[test]
    fn test_create_foreign_owned_without_expectation_is_ignored() {
        let f = fixture();
        let set = sandbox_set();

        f.handler.on_added(&foreign_owned_sandbox(&set));

        assert_eq!(f.queue.recorded(), "/");
        assert!(f
            .scale_up
            .satisfied_expectations(&controller_key(&set))
            .satisfied);
    }

    #[test]
    fn test_create_without_any_owner_is_ignored() {
        let f = fixture();
        let mut orphan = owned_sandbox(&sandbox_set());
        orphan.metadata.owner_references = None;

        f.handler.on_added(&orphan);
        assert_eq!(f.queue.recorded(), "/");
    }

    #[test]
    fn test_create_with_non_controlling_owner_is_ignored() {
        let f = fixture();
        let set = sandbox_set();
        let mut sandbox = owned_sandbox(&set);
        sandbox.metadata.owner_references.as_mut().unwrap()[0].controller = Some(false);

        f.handler.on_added(&sandbox);
        assert_eq!(f.queue.recorded(), "/");
    }

    // =========================================================================
    // Delete Dispatch Stories
    // =========================================================================

    #[test]
    fn test_delete_owned_with_expectation_enqueues_and_satisfies() {
        let f = fixture();
        let set = sandbox_set();
        let key = controller_key(&set);
        f.scale_down
            .expect_scale(&key, ScaleAction::Delete, "test-sandbox");

        f.handler.on_removed(&owned_sandbox(&set));

        assert_eq!(f.queue.recorded(), key);
        assert!(f.scale_down.satisfied_expectations(&key).satisfied);
    }

    #[test]
    fn test_delete_owned_without_expectation_still_enqueues() {
        let f = fixture();
        let set = sandbox_set();

        f.handler.on_removed(&owned_sandbox(&set));
        assert_eq!(f.queue.recorded(), controller_key(&set));
    }

    #[test]
    fn test_delete_foreign_owned_is_ignored() {
        let f = fixture();
        let set = sandbox_set();
        let key = controller_key(&set);
        f.scale_down
            .expect_scale(&key, ScaleAction::Delete, "test-sandbox");

        f.handler.on_removed(&foreign_owned_sandbox(&set));

        assert_eq!(f.queue.recorded(), "/");
        assert!(!f.scale_down.satisfied_expectations(&key).satisfied);
    }

    /// Story: a creation never satisfies a delete expectation
    ///
    /// The two trackers are independent instances; the create path only ever
    /// touches scale-up.
    #[test]
    fn test_create_leaves_scale_down_untouched() {
        let f = fixture();
        let set = sandbox_set();
        let key = controller_key(&set);
        f.scale_down
            .expect_scale(&key, ScaleAction::Delete, "test-sandbox");

        f.handler.on_added(&owned_sandbox(&set));

        assert!(!f.scale_down.satisfied_expectations(&key).satisfied);
    }

    // =========================================================================
    // Update Dispatch Stories
    // =========================================================================

    /// Story: updates re-enqueue the owner without touching expectations
    #[test]
    fn test_update_enqueues_owner_only() {
        let f = fixture();
        let set = sandbox_set();
        let key = controller_key(&set);
        f.scale_up
            .expect_scale(&key, ScaleAction::Create, "test-sandbox");

        let sandbox = owned_sandbox(&set);
        f.handler.on_updated(&sandbox, &sandbox);

        assert_eq!(f.queue.recorded(), key);
        assert!(!f.scale_up.satisfied_expectations(&key).satisfied);
    }

    // =========================================================================
    // Queue Seam Stories
    // =========================================================================

    /// Story: the gate pushes exactly one precise key per accepted event
    #[test]
    fn test_enqueued_key_is_exact() {
        let mut queue = MockReconcileQueue::new();
        queue
            .expect_add()
            .withf(|req| req.to_string() == "default/test-sandboxset")
            .times(1)
            .return_const(());

        let handler = SandboxEventHandler::new(
            Arc::new(ScaleExpectations::new()),
            Arc::new(ScaleExpectations::new()),
            Arc::new(queue),
        );
        handler.on_added(&owned_sandbox(&sandbox_set()));
    }

    #[test]
    fn test_default_request_renders_the_sentinel() {
        assert_eq!(ReconcileRequest::default().to_string(), "/");
        assert_eq!(
            ReconcileRequest::new("default", "test-sandboxset").to_string(),
            "default/test-sandboxset"
        );
    }

    #[test]
    fn test_controller_key_renders_namespace_and_name() {
        assert_eq!(controller_key(&sandbox_set()), "default/test-sandboxset");
    }
}
