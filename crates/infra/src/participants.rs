//! Chat membership history stored as deltas.
//!
//! Member lists are large and change slowly, so instead of full snapshots only
//! the members added and removed since the previous observation are stored.
//! The membership at any time is rebuilt by folding the deltas up to it.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use tgarchive_core::{EntityKind, Identity, SnapshotError, SnapshotResult, StreamKey, Timestamp};

use crate::snapshot_store::TimeRange;

/// Membership change of one chat between two observations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantDelta {
    pub context: StreamKey,
    pub observed_at: Timestamp,
    pub added: BTreeSet<Identity>,
    pub removed: BTreeSet<Identity>,
}

impl ParticipantDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Append-only storage for membership deltas.
#[async_trait::async_trait]
pub trait ParticipantStore: Send + Sync {
    /// Append a delta; fails with `DuplicateKey` if one exists at the same time.
    async fn append_delta(&self, delta: &ParticipantDelta) -> SnapshotResult<()>;

    /// Deltas for a context inside `range`, oldest first.
    ///
    /// Contexts are matched by identity alone, so a channel and a supergroup
    /// with the same identity share one history.
    async fn deltas(
        &self,
        context: &StreamKey,
        range: TimeRange,
    ) -> SnapshotResult<Vec<ParticipantDelta>>;
}

/// Records membership observations as deltas on top of a [`ParticipantStore`].
pub struct ParticipantLog<S> {
    store: S,
}

impl<S> ParticipantLog<S>
where
    S: ParticipantStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Store the difference between `members` and the last known membership.
    ///
    /// Returns `None` (and writes nothing) when the membership is unchanged.
    /// The first observation of a context stores every member as added.
    pub async fn record_delta(
        &self,
        context: StreamKey,
        observed_at: Timestamp,
        members: impl IntoIterator<Item = Identity>,
    ) -> SnapshotResult<Option<ParticipantDelta>> {
        if context.kind() == EntityKind::Message {
            return Err(SnapshotError::KindMismatch {
                key: context,
                found: EntityKind::Message,
            });
        }

        let history = self.store.deltas(&context, TimeRange::all()).await?;
        if let Some(last) = history.last() {
            if observed_at < last.observed_at {
                return Err(SnapshotError::OutOfOrder {
                    key: context,
                    latest: last.observed_at,
                    observed_at,
                });
            }
        }

        let current: BTreeSet<Identity> = members.into_iter().collect();
        let known = fold(&history);
        let delta = ParticipantDelta {
            context,
            observed_at,
            added: current.difference(&known).copied().collect(),
            removed: known.difference(&current).copied().collect(),
        };

        if !history.is_empty() && delta.is_empty() {
            debug!(%context, "membership unchanged");
            return Ok(None);
        }

        self.store.append_delta(&delta).await?;
        Ok(Some(delta))
    }

    /// Membership of `context` as last observed at or before `at`.
    pub async fn members_at(
        &self,
        context: &StreamKey,
        at: Timestamp,
    ) -> SnapshotResult<BTreeSet<Identity>> {
        let history = self.store.deltas(context, TimeRange::until(at)).await?;
        Ok(fold(&history))
    }
}

fn fold(deltas: &[ParticipantDelta]) -> BTreeSet<Identity> {
    let mut members = BTreeSet::new();
    for delta in deltas {
        members.extend(delta.added.iter().copied());
        for gone in &delta.removed {
            members.remove(gone);
        }
    }
    members
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot_store::InMemorySnapshotStore;
    use tgarchive_core::{PeerKind, normalize};

    fn users(raw: &[i64]) -> Vec<Identity> {
        raw.iter()
            .map(|r| normalize(PeerKind::User, *r).unwrap())
            .collect()
    }

    fn chat() -> StreamKey {
        StreamKey::peer(PeerKind::Chat, 77).unwrap()
    }

    #[tokio::test]
    async fn first_observation_adds_everyone() {
        let log = ParticipantLog::new(InMemorySnapshotStore::new());
        let delta = log
            .record_delta(chat(), Timestamp::from_secs(0), users(&[1, 2]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delta.added, users(&[1, 2]).into_iter().collect());
        assert!(delta.removed.is_empty());
    }

    #[tokio::test]
    async fn later_observations_store_only_the_difference() {
        let log = ParticipantLog::new(InMemorySnapshotStore::new());
        log.record_delta(chat(), Timestamp::from_secs(0), users(&[1, 2]))
            .await
            .unwrap();
        let delta = log
            .record_delta(chat(), Timestamp::from_secs(10), users(&[2, 3]))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(delta.added, users(&[3]).into_iter().collect());
        assert_eq!(delta.removed, users(&[1]).into_iter().collect());
    }

    #[tokio::test]
    async fn unchanged_membership_writes_nothing() {
        let log = ParticipantLog::new(InMemorySnapshotStore::new());
        log.record_delta(chat(), Timestamp::from_secs(0), users(&[1]))
            .await
            .unwrap();
        let delta = log
            .record_delta(chat(), Timestamp::from_secs(5), users(&[1]))
            .await
            .unwrap();
        assert!(delta.is_none());
        assert_eq!(log.store().deltas(&chat(), TimeRange::all()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn members_are_rebuilt_at_any_point_in_time() {
        let log = ParticipantLog::new(InMemorySnapshotStore::new());
        log.record_delta(chat(), Timestamp::from_secs(0), users(&[1, 2]))
            .await
            .unwrap();
        log.record_delta(chat(), Timestamp::from_secs(10), users(&[2, 3]))
            .await
            .unwrap();

        let early = log.members_at(&chat(), Timestamp::from_secs(5)).await.unwrap();
        let late = log.members_at(&chat(), Timestamp::from_secs(10)).await.unwrap();
        assert_eq!(early, users(&[1, 2]).into_iter().collect());
        assert_eq!(late, users(&[2, 3]).into_iter().collect());
    }

    #[tokio::test]
    async fn older_observation_is_rejected() {
        let log = ParticipantLog::new(InMemorySnapshotStore::new());
        log.record_delta(chat(), Timestamp::from_secs(10), users(&[1]))
            .await
            .unwrap();
        let err = log
            .record_delta(chat(), Timestamp::from_secs(5), users(&[2]))
            .await
            .unwrap_err();
        assert!(matches!(err, SnapshotError::OutOfOrder { .. }));
    }
}
