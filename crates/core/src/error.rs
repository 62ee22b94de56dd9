//! Snapshot store error model.

use std::time::Duration;

use thiserror::Error;

use crate::entity::{EntityKind, StreamKey};
use crate::id::{Identity, PeerKind};
use crate::snapshot::Timestamp;

/// Result type used across the snapshot store.
pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Failure of a single observation or store operation.
///
/// Every variant is scoped to one observation; callers processing a run of
/// observations keep going after any of them. Only [`SnapshotError::Timeout`]
/// and [`SnapshotError::Storage`] are transient, and even those are never
/// retried by the store itself.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    /// The raw id is outside the range the normalizer can map without collisions.
    #[error("invalid {kind} id {raw}: outside the representable range")]
    InvalidIdentity { kind: PeerKind, raw: i64 },

    /// An entity kind name could not be parsed.
    #[error("unknown entity kind '{0}'")]
    UnknownKind(String),

    /// A field required for this kind is absent.
    #[error("schema violation: {kind} requires field '{field}'")]
    SchemaViolation { kind: EntityKind, field: &'static str },

    /// The record's fields belong to a different kind than its stream key.
    #[error("schema violation: {key} cannot store {found} fields")]
    KindMismatch { key: StreamKey, found: EntityKind },

    /// A row for this key and timestamp already exists.
    #[error("duplicate snapshot for {key} at {observed_at}")]
    DuplicateKey { key: StreamKey, observed_at: Timestamp },

    /// The observation is older than the newest stored snapshot.
    #[error("observation for {key} at {observed_at} precedes stored snapshot at {latest}")]
    OutOfOrder {
        key: StreamKey,
        latest: Timestamp,
        observed_at: Timestamp,
    },

    /// The archive belongs to another account.
    #[error("archive belongs to {stored}, refusing to record for {requested}")]
    OwnerMismatch { stored: Identity, requested: Identity },

    /// A store call did not complete in time.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The persistence layer failed or is unavailable.
    #[error("storage error: {0}")]
    Storage(String),
}

impl SnapshotError {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Whether the caller may reasonably retry the observation later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Storage(_))
    }
}
