use std::sync::Arc;

use tgarchive_core::{Identity, Snapshot, SnapshotResult, StreamKey};

use super::query::TimeRange;

/// Append-only, time-versioned snapshot store.
///
/// The `SnapshotStore` is the **persistence layer** of the archive. Each entity
/// has one history (keyed by [`StreamKey`]) whose rows are ordered by
/// `observed_at` and never updated or deleted.
///
/// ## Append Semantics
///
/// `append()`:
/// - Validates the record against the field policy (`SchemaViolation`,
///   `KindMismatch`)
/// - Rejects a second row for the same `(key, observed_at)` (`DuplicateKey`)
/// - Persists durably; the row is visible to `latest`/`history` immediately
///   and, for persistent backends, across restarts
///
/// Deciding *whether* to append is not the store's job; see
/// [`crate::recorder::SnapshotRecorder`].
///
/// ## Read Semantics
///
/// - `latest()` returns the row with the greatest `observed_at` for a key. It
///   runs once per observed entity, so backends serve it from an index.
/// - `history()` returns the rows inside an inclusive time range in ascending
///   `observed_at` order. Calling it again yields the same sequence plus any
///   rows appended since.
///
/// ## Concurrency
///
/// Implementations are safe to share across tasks, but a `latest` followed by
/// an `append` is not atomic. Callers that make write decisions must serialize
/// them per key.
#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Append an immutable snapshot.
    async fn append(&self, snapshot: &Snapshot) -> SnapshotResult<()>;

    /// Newest snapshot for the key, if any was ever written.
    async fn latest(&self, key: &StreamKey) -> SnapshotResult<Option<Snapshot>>;

    /// Snapshots observed inside `range`, oldest first.
    async fn history(&self, key: &StreamKey, range: TimeRange) -> SnapshotResult<Vec<Snapshot>>;

    /// Number of snapshots stored for the key.
    async fn count(&self, key: &StreamKey) -> SnapshotResult<u64>;

    /// Bind the archive to the exporting account.
    ///
    /// The first call records `owner`; later calls succeed only with the same
    /// identity and fail with `OwnerMismatch` otherwise.
    async fn claim_owner(&self, owner: Identity) -> SnapshotResult<()>;
}

#[async_trait::async_trait]
impl<S> SnapshotStore for Arc<S>
where
    S: SnapshotStore + ?Sized,
{
    async fn append(&self, snapshot: &Snapshot) -> SnapshotResult<()> {
        (**self).append(snapshot).await
    }

    async fn latest(&self, key: &StreamKey) -> SnapshotResult<Option<Snapshot>> {
        (**self).latest(key).await
    }

    async fn history(&self, key: &StreamKey, range: TimeRange) -> SnapshotResult<Vec<Snapshot>> {
        (**self).history(key, range).await
    }

    async fn count(&self, key: &StreamKey) -> SnapshotResult<u64> {
        (**self).count(key).await
    }

    async fn claim_owner(&self, owner: Identity) -> SnapshotResult<()> {
        (**self).claim_owner(owner).await
    }
}
