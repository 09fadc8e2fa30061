//! Secondary-indexed, watch-synchronized local object mirror
//!
//! The mirror is the crate's only view of the remote store: a continuously
//! synchronized local copy of the Sandbox and SandboxSet collections,
//! queryable by secondary index instead of full scan.
//!
//! # Layout
//!
//! - [`IndexedStore`] - the object map plus named secondary indexes, over a
//!   closed set of mirrored kinds
//! - [`INDEX_USER`] / [`INDEX_SANDBOX_ID`] / [`INDEX_POOL_AVAILABLE`] - the
//!   concrete sandbox indexes
//! - [`RevisionTracker`] - most-recently-observed revision bookkeeping, fed
//!   by every successful indexed read
//! - [`Mirror`] - list-then-watch ingestion, sync signalling and event
//!   dispatch to registered observers
//!
//! # Ordering precondition
//!
//! All indexes are registered at construction, before synchronization starts.
//! An index added later could not retroactively cover already-ingested
//! objects, so late registration is rejected as a wiring fault.

mod indexers;
mod revision;
mod store;
mod sync;

pub use indexers::{INDEX_POOL_AVAILABLE, INDEX_SANDBOX_ID, INDEX_USER};
pub use revision::RevisionTracker;
pub use store::{select_with_index, FromStored, IndexFn, IndexedStore, ObjectKey, StoredObject};
pub use sync::{Mirror, SandboxEventObserver, SandboxSetEventObserver};
