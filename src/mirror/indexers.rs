//! The concrete secondary indexes on the sandbox collection
//!
//! Three indexes serve the pool manager's read paths:
//!
//! - `user` - every sandbox claimed by a given user
//! - `sandbox-id` - lookup by stable external identifier; expected unique
//! - `pool-available` - pool name, for sandboxes that are unclaimed,
//!   classified Running and not terminating; the allocator's free list

use crate::crd::{Sandbox, SandboxState};
use crate::mirror::store::{FromStored, IndexedStore, StoredObject};
use crate::state::compute_state;
use crate::Result;

/// Index of sandboxes by claiming user
pub const INDEX_USER: &str = "user";

/// Index of sandboxes by stable sandbox identifier (expected unique)
pub const INDEX_SANDBOX_ID: &str = "sandbox-id";

/// Index of unclaimed, running sandboxes by pool name
pub const INDEX_POOL_AVAILABLE: &str = "pool-available";

/// Register the three sandbox indexes on a not-yet-started store
pub(crate) fn register_sandbox_indexers(store: &IndexedStore) -> Result<()> {
    store.add_indexer(INDEX_USER, Box::new(index_user))?;
    store.add_indexer(INDEX_SANDBOX_ID, Box::new(index_sandbox_id))?;
    store.add_indexer(INDEX_POOL_AVAILABLE, Box::new(index_pool_available))?;
    Ok(())
}

fn index_user(obj: &StoredObject) -> Vec<String> {
    sandbox_label(obj, Sandbox::user)
}

fn index_sandbox_id(obj: &StoredObject) -> Vec<String> {
    sandbox_label(obj, Sandbox::sandbox_id)
}

/// A sandbox is available to its pool only while nobody claimed it and it is
/// actually usable (classified Running, which also rules out termination).
fn index_pool_available(obj: &StoredObject) -> Vec<String> {
    let Some(sandbox) = Sandbox::from_stored(obj) else {
        return Vec::new();
    };
    let Some(pool) = sandbox.pool() else {
        return Vec::new();
    };
    if sandbox.user().is_some() {
        return Vec::new();
    }
    if compute_state(&sandbox).0 != SandboxState::Running {
        return Vec::new();
    }
    vec![pool.to_string()]
}

fn sandbox_label(obj: &StoredObject, get: impl Fn(&Sandbox) -> Option<&str>) -> Vec<String> {
    Sandbox::from_stored(obj)
        .as_deref()
        .and_then(|s| get(s).map(str::to_string))
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        ConditionStatus, PodInfo, SandboxCondition, SandboxPhase, SandboxSpec, SandboxStatus,
        CONDITION_READY, LABEL_POOL, LABEL_SANDBOX_ID, LABEL_USER,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn pooled_sandbox(name: &str, pool: &str, user: Option<&str>, running: bool) -> StoredObject {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_POOL.to_string(), pool.to_string());
        labels.insert(LABEL_SANDBOX_ID.to_string(), format!("id-{name}"));
        if let Some(user) = user {
            labels.insert(LABEL_USER.to_string(), user.to_string());
        }
        let status = if running {
            SandboxStatus {
                phase: SandboxPhase::Running,
                conditions: vec![SandboxCondition::new(
                    CONDITION_READY,
                    ConditionStatus::True,
                    "PodReady",
                )],
                pod_info: Some(PodInfo {
                    pod_name: format!("{name}-pod"),
                    pod_ip: "1.2.3.4".to_string(),
                }),
            }
        } else {
            SandboxStatus::default()
        };
        StoredObject::Sandbox(Arc::new(Sandbox {
            metadata: ObjectMeta {
                namespace: Some("default".to_string()),
                name: Some(name.to_string()),
                resource_version: Some("1".to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            spec: SandboxSpec {
                template: "base".to_string(),
                ..Default::default()
            },
            status: Some(status),
        }))
    }

    fn indexed_store() -> IndexedStore {
        let store = IndexedStore::new();
        register_sandbox_indexers(&store).unwrap();
        store
    }

    /// Story: the free list contains exactly the claimable sandboxes
    ///
    /// Claimed, not-yet-running and foreign-pool sandboxes all stay off the
    /// `pool-available` index even though they are mirrored.
    #[test]
    fn story_pool_availability_is_a_composite() {
        let store = indexed_store();
        store.upsert(pooled_sandbox("free", "gpu-small", None, true));
        store.upsert(pooled_sandbox("claimed", "gpu-small", Some("alice"), true));
        store.upsert(pooled_sandbox("warming", "gpu-small", None, false));
        store.upsert(pooled_sandbox("other", "cpu-large", None, true));

        let available = store.by_index(INDEX_POOL_AVAILABLE, "gpu-small").unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].meta().name.as_deref(), Some("free"));
    }

    /// Story: claiming a sandbox moves it between indexes atomically
    #[test]
    fn story_claim_moves_sandbox_from_pool_to_user() {
        let store = indexed_store();
        store.upsert(pooled_sandbox("sbx-0", "gpu-small", None, true));
        assert_eq!(
            store.by_index(INDEX_POOL_AVAILABLE, "gpu-small").unwrap().len(),
            1
        );

        store.upsert(pooled_sandbox("sbx-0", "gpu-small", Some("alice"), true));
        assert!(store
            .by_index(INDEX_POOL_AVAILABLE, "gpu-small")
            .unwrap()
            .is_empty());
        assert_eq!(store.by_index(INDEX_USER, "alice").unwrap().len(), 1);
    }

    #[test]
    fn test_sandbox_id_index_files_by_label() {
        let store = indexed_store();
        store.upsert(pooled_sandbox("sbx-0", "gpu-small", None, true));
        let hits = store.by_index(INDEX_SANDBOX_ID, "id-sbx-0").unwrap();
        assert_eq!(hits.len(), 1);
    }
}
