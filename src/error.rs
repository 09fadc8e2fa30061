//! Error types for the Sandpool consistency layer
//!
//! Steady-state absence (no cache entry, nothing expected) is never an error
//! here; it is represented by plain values at the call sites. The variants
//! below cover integrity faults on supposedly-unique reads, wiring faults in
//! setup paths, and transport failures from the Kubernetes API.

use thiserror::Error;

/// Main error type for Sandpool operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// No sandbox matched a supposedly-unique index value
    #[error("sandbox {0} not found in cache")]
    NotFound(String),

    /// More than one sandbox matched a supposedly-unique index value
    ///
    /// This signals a data-integrity fault in the mirrored collection and is
    /// surfaced to the caller rather than resolved by picking one match.
    #[error("multiple sandboxes found with id {0}")]
    MultipleMatches(String),

    /// An indexed read named an index that was never registered
    #[error("no index named {0} is registered")]
    UnknownIndex(String),

    /// Mirror setup fault (for example, registering an index after sync started)
    #[error("mirror wiring error: {0}")]
    Wiring(String),
}

impl Error {
    /// Create a wiring error with the given message
    pub fn wiring(msg: impl Into<String>) -> Self {
        Self::Wiring(msg.into())
    }

    /// Returns true if this error is the not-found absence of a unique match
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
