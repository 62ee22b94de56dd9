use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use tgarchive_core::{
    EntityKind, Identity, Snapshot, SnapshotError, SnapshotResult, StreamKey, Timestamp, schema,
};

use super::query::TimeRange;
use super::r#trait::SnapshotStore;
use crate::participants::{ParticipantDelta, ParticipantStore};

type History<T> = BTreeMap<Timestamp, T>;

/// In-memory append-only snapshot store.
///
/// Intended for tests/dev. Nothing survives the process.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    streams: RwLock<HashMap<StreamKey, History<Snapshot>>>,
    /// Keyed by context identity; a channel and a supergroup with the same
    /// identity share one membership history.
    deltas: RwLock<HashMap<Identity, History<ParticipantDelta>>>,
    owner: RwLock<Option<Identity>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> SnapshotError {
    SnapshotError::storage("lock poisoned")
}

fn in_range<T: Clone>(history: Option<&History<T>>, range: TimeRange) -> Vec<T> {
    match history {
        Some(history) if !range.is_empty() => history
            .range(range.from..=range.to)
            .map(|(_, row)| row.clone())
            .collect(),
        _ => Vec::new(),
    }
}

#[async_trait::async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn append(&self, snapshot: &Snapshot) -> SnapshotResult<()> {
        schema::validate(&snapshot.key, &snapshot.fields)?;

        let mut streams = self.streams.write().map_err(|_| poisoned())?;
        let stream = streams.entry(snapshot.key).or_default();
        if stream.contains_key(&snapshot.observed_at) {
            return Err(SnapshotError::DuplicateKey {
                key: snapshot.key,
                observed_at: snapshot.observed_at,
            });
        }
        stream.insert(snapshot.observed_at, snapshot.clone());
        Ok(())
    }

    async fn latest(&self, key: &StreamKey) -> SnapshotResult<Option<Snapshot>> {
        let streams = self.streams.read().map_err(|_| poisoned())?;
        Ok(streams
            .get(key)
            .and_then(|stream| stream.last_key_value())
            .map(|(_, snapshot)| snapshot.clone()))
    }

    async fn history(&self, key: &StreamKey, range: TimeRange) -> SnapshotResult<Vec<Snapshot>> {
        let streams = self.streams.read().map_err(|_| poisoned())?;
        Ok(in_range(streams.get(key), range))
    }

    async fn count(&self, key: &StreamKey) -> SnapshotResult<u64> {
        let streams = self.streams.read().map_err(|_| poisoned())?;
        Ok(streams.get(key).map_or(0, |stream| stream.len() as u64))
    }

    async fn claim_owner(&self, owner: Identity) -> SnapshotResult<()> {
        let mut stored = self.owner.write().map_err(|_| poisoned())?;
        match *stored {
            Some(existing) if existing != owner => Err(SnapshotError::OwnerMismatch {
                stored: existing,
                requested: owner,
            }),
            Some(_) => Ok(()),
            None => {
                *stored = Some(owner);
                Ok(())
            }
        }
    }
}

#[async_trait::async_trait]
impl ParticipantStore for InMemorySnapshotStore {
    async fn append_delta(&self, delta: &ParticipantDelta) -> SnapshotResult<()> {
        if delta.context.kind() == EntityKind::Message {
            return Err(SnapshotError::KindMismatch {
                key: delta.context,
                found: EntityKind::Message,
            });
        }
        let mut deltas = self.deltas.write().map_err(|_| poisoned())?;
        let history = deltas.entry(delta.context.identity()).or_default();
        if history.contains_key(&delta.observed_at) {
            return Err(SnapshotError::DuplicateKey {
                key: delta.context,
                observed_at: delta.observed_at,
            });
        }
        history.insert(delta.observed_at, delta.clone());
        Ok(())
    }

    async fn deltas(
        &self,
        context: &StreamKey,
        range: TimeRange,
    ) -> SnapshotResult<Vec<ParticipantDelta>> {
        let deltas = self.deltas.read().map_err(|_| poisoned())?;
        Ok(in_range(deltas.get(&context.identity()), range))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgarchive_core::{ChatFields, Fields, PeerKind};

    fn chat(at: i64, title: &str) -> Snapshot {
        Snapshot::new(
            StreamKey::peer(PeerKind::Chat, 5).unwrap(),
            Timestamp::from_secs(at),
            Fields::Chat(ChatFields {
                title: Some(title.into()),
                ..Default::default()
            }),
        )
    }

    #[tokio::test]
    async fn latest_is_the_newest_row() {
        let store = InMemorySnapshotStore::new();
        store.append(&chat(10, "b")).await.unwrap();
        store.append(&chat(0, "a")).await.unwrap();

        let latest = store.latest(&chat(0, "a").key).await.unwrap().unwrap();
        assert_eq!(latest, chat(10, "b"));
    }

    #[tokio::test]
    async fn duplicate_timestamp_is_rejected_and_first_row_kept() {
        let store = InMemorySnapshotStore::new();
        store.append(&chat(0, "a")).await.unwrap();

        let err = store.append(&chat(0, "changed")).await.unwrap_err();
        assert!(matches!(err, SnapshotError::DuplicateKey { .. }));

        let rows = store.history(&chat(0, "a").key, TimeRange::all()).await.unwrap();
        assert_eq!(rows, vec![chat(0, "a")]);
    }

    #[tokio::test]
    async fn schema_violations_are_not_stored() {
        let store = InMemorySnapshotStore::new();
        let mut untitled = chat(0, "a");
        untitled.fields = Fields::Chat(ChatFields::default());

        assert!(matches!(
            store.append(&untitled).await,
            Err(SnapshotError::SchemaViolation { field: "title", .. })
        ));
        assert_eq!(store.count(&untitled.key).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn history_is_ascending_and_inclusive() {
        let store = InMemorySnapshotStore::new();
        for (at, title) in [(30, "c"), (10, "a"), (20, "b")] {
            store.append(&chat(at, title)).await.unwrap();
        }
        let key = chat(0, "").key;
        let rows = store
            .history(&key, TimeRange::new(Timestamp::from_secs(10), Timestamp::from_secs(20)))
            .await
            .unwrap();
        assert_eq!(rows, vec![chat(10, "a"), chat(20, "b")]);

        let empty = store
            .history(&key, TimeRange::new(Timestamp::from_secs(20), Timestamp::from_secs(10)))
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn owner_can_only_be_claimed_once() {
        let store = InMemorySnapshotStore::new();
        let me = Identity::from_normalized(1);
        store.claim_owner(me).await.unwrap();
        store.claim_owner(me).await.unwrap();
        assert!(matches!(
            store.claim_owner(Identity::from_normalized(2)).await,
            Err(SnapshotError::OwnerMismatch { .. })
        ));
    }
}
