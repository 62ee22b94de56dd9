//! Snapshot write pipeline (application-level orchestration).
//!
//! The recorder turns raw observations from a polling run into stored
//! snapshots. It composes the pure pieces from `tgarchive-core` (identity
//! normalization, field policy, comparator, invalidation policy) with a
//! [`SnapshotStore`].
//!
//! ## Write Flow
//!
//! ```text
//! Observation
//!   ↓
//! 1. Normalize (kind, raw id) into a stream key
//!   ↓
//! 2. Validate fields against the per-kind policy
//!   ↓
//! 3. Acquire the per-key lock
//!   ↓
//! 4. Load the latest snapshot (indexed lookup, bounded by the store timeout)
//!   ↓
//! 5. Reject observations older than the latest snapshot
//!   ↓
//! 6. Decide: first observation / changed / checkpoint / skip
//!   ↓
//! 7. Append if the decision writes (bounded by the store timeout)
//!   ↓
//! 8. Notify observers
//! ```
//!
//! Steps 4-7 hold the key's lock, so two observations of the same entity never
//! interleave. Different keys proceed concurrently.
//!
//! ## Failure Semantics
//!
//! Every failure is scoped to one observation. Nothing is retried here:
//! `Timeout` and `Storage` are transient and left to the caller, every other
//! error is deterministic. `record_batch` never aborts a run because one
//! observation failed.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Serialize, Serializer};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{Instrument, Span, error, info, info_span, instrument, warn};
use uuid::Uuid;

use tgarchive_core::{
    InvalidationPolicy, Observation, Snapshot, SnapshotError, SnapshotResult, StreamKey, Target,
    Timestamp, WriteDecision, schema,
};

use crate::locks::KeyLocks;
use crate::snapshot_store::SnapshotStore;

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(5_000);
pub const DEFAULT_BATCH_CONCURRENCY: usize = 8;

/// Callback notified of every validated observation and its write decision.
///
/// Observers run after the key's lock is released and must not block.
pub trait SnapshotObserver: Send + Sync {
    fn on_observation(&self, snapshot: &Snapshot, decision: WriteDecision);
}

/// Reusable write engine for snapshot histories.
pub struct SnapshotRecorder<S> {
    store: S,
    policy: InvalidationPolicy,
    locks: KeyLocks,
    store_timeout: Duration,
    concurrency: usize,
    observers: Vec<Arc<dyn SnapshotObserver>>,
}

impl<S> SnapshotRecorder<S> {
    pub fn new(store: S, policy: InvalidationPolicy) -> Self {
        Self {
            store,
            policy,
            locks: KeyLocks::new(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            concurrency: DEFAULT_BATCH_CONCURRENCY,
            observers: Vec::new(),
        }
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Maximum number of keys processed at once by `record_batch` (at least 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn SnapshotObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> &InvalidationPolicy {
        &self.policy
    }
}

impl<S> SnapshotRecorder<S>
where
    S: SnapshotStore,
{
    /// Record one observation.
    ///
    /// Returns the write decision; only `WriteDecision::Skip` leaves the store
    /// untouched.
    #[instrument(
        skip(self, observation),
        fields(
            entity = ?observation.target,
            observed_at = observation.observed_at.as_secs(),
            decision
        ),
        err
    )]
    pub async fn record(&self, observation: Observation) -> SnapshotResult<WriteDecision> {
        let snapshot = observation.into_snapshot().inspect_err(|e| {
            if let SnapshotError::InvalidIdentity { kind, raw } = e {
                warn!(%kind, raw, "skipping observation with invalid identity");
            }
        })?;
        schema::validate(&snapshot.key, &snapshot.fields)?;

        let decision = {
            let _guard = self.locks.lock(snapshot.key).await;

            let previous = self.timed("latest", self.store.latest(&snapshot.key)).await?;
            if let Some(previous) = &previous {
                if snapshot.observed_at < previous.observed_at {
                    return Err(SnapshotError::OutOfOrder {
                        key: snapshot.key,
                        latest: previous.observed_at,
                        observed_at: snapshot.observed_at,
                    });
                }
            }

            let decision = self.policy.decide(previous.as_ref(), &snapshot);
            if decision.writes() {
                self.timed("append", self.store.append(&snapshot)).await?;
            }
            decision
        };

        Span::current().record("decision", tracing::field::debug(decision));
        for observer in &self.observers {
            observer.on_observation(&snapshot, decision);
        }
        Ok(decision)
    }

    /// Newest stored snapshot for `key`, bounded by the store timeout.
    pub async fn latest(&self, key: &StreamKey) -> SnapshotResult<Option<Snapshot>> {
        self.timed("latest", self.store.latest(key)).await
    }

    async fn timed<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = SnapshotResult<T>>,
    ) -> SnapshotResult<T> {
        tokio::time::timeout(self.store_timeout, call)
            .await
            .map_err(|_| SnapshotError::Timeout {
                operation,
                after: self.store_timeout,
            })?
    }
}

impl<S> SnapshotRecorder<S>
where
    S: SnapshotStore + 'static,
{
    /// Record every observation of a polling run.
    ///
    /// Observations are grouped by key. Each group is processed in
    /// `observed_at` order on its own task; at most `concurrency` groups run
    /// at once. A failed observation is reported and the run continues.
    pub async fn record_batch(self: &Arc<Self>, observations: Vec<Observation>) -> RunReport {
        let mut report = RunReport::new();
        let span = info_span!(
            "record_batch",
            run_id = %report.run_id,
            observations = observations.len()
        );

        async {
            let mut groups: HashMap<StreamKey, Vec<Observation>> = HashMap::new();
            for observation in observations {
                match observation.stream_key() {
                    Ok(key) => groups.entry(key).or_default().push(observation),
                    Err(err) => {
                        warn!(entity = ?observation.target, error = %err, "skipping observation");
                        report.fail(observation.target, observation.observed_at, err);
                    }
                }
            }

            let semaphore = Arc::new(Semaphore::new(self.concurrency));
            let mut tasks = JoinSet::new();
            for (_, mut group) in groups {
                group.sort_by_key(|o| o.observed_at);
                let recorder = Arc::clone(self);
                let semaphore = Arc::clone(&semaphore);
                tasks.spawn(
                    async move {
                        // The semaphore is never closed.
                        let _permit = semaphore.acquire_owned().await.ok();
                        let mut outcomes = Vec::with_capacity(group.len());
                        for observation in group {
                            let target = observation.target;
                            let observed_at = observation.observed_at;
                            let result = recorder.record(observation).await;
                            outcomes.push((target, observed_at, result));
                        }
                        outcomes
                    }
                    .in_current_span(),
                );
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(outcomes) => {
                        for (target, observed_at, outcome) in outcomes {
                            match outcome {
                                Ok(decision) => report.tally(decision),
                                Err(err) => report.fail(target, observed_at, err),
                            }
                        }
                    }
                    Err(err) => error!(error = %err, "recorder task failed"),
                }
            }

            info!(
                written = report.written(),
                skipped = report.skipped,
                failed = report.failures.len(),
                "run complete"
            );
        }
        .instrument(span)
        .await;

        report
    }
}

/// Outcome counters of one `record_batch` run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Correlates the run's log lines.
    pub run_id: Uuid,
    pub first_observations: usize,
    pub changed: usize,
    pub checkpoints: usize,
    pub skipped: usize,
    pub failures: Vec<ObservationFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ObservationFailure {
    pub target: Target,
    pub observed_at: Timestamp,
    #[serde(serialize_with = "serialize_display")]
    pub error: SnapshotError,
}

impl RunReport {
    fn new() -> Self {
        Self {
            run_id: Uuid::now_v7(),
            first_observations: 0,
            changed: 0,
            checkpoints: 0,
            skipped: 0,
            failures: Vec::new(),
        }
    }

    /// Snapshots appended during the run.
    pub fn written(&self) -> usize {
        self.first_observations + self.changed + self.checkpoints
    }

    /// Observations processed, successful or not.
    pub fn total(&self) -> usize {
        self.written() + self.skipped + self.failures.len()
    }

    fn tally(&mut self, decision: WriteDecision) {
        match decision {
            WriteDecision::FirstObservation => self.first_observations += 1,
            WriteDecision::Changed => self.changed += 1,
            WriteDecision::Checkpoint => self.checkpoints += 1,
            WriteDecision::Skip => self.skipped += 1,
        }
    }

    fn fail(&mut self, target: Target, observed_at: Timestamp, error: SnapshotError) {
        self.failures.push(ObservationFailure {
            target,
            observed_at,
            error,
        });
    }
}

fn serialize_display<S: Serializer>(
    error: &SnapshotError,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use tgarchive_core::{Fields, PeerKind, UserFields};

    use crate::snapshot_store::{InMemorySnapshotStore, TimeRange};

    fn user(id: i64, at: i64, name: &str) -> Observation {
        Observation::peer(
            PeerKind::User,
            id,
            Timestamp::from_secs(at),
            Fields::User(UserFields {
                first_name: Some(name.into()),
                common_chats_count: Some(0),
                ..Default::default()
            }),
        )
    }

    fn recorder() -> SnapshotRecorder<InMemorySnapshotStore> {
        SnapshotRecorder::new(
            InMemorySnapshotStore::new(),
            InvalidationPolicy::new(chrono::Duration::seconds(100)),
        )
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<(Timestamp, WriteDecision)>>);

    impl SnapshotObserver for Collect {
        fn on_observation(&self, snapshot: &Snapshot, decision: WriteDecision) {
            self.0.lock().unwrap().push((snapshot.observed_at, decision));
        }
    }

    #[tokio::test]
    async fn decisions_follow_content_and_interval() {
        let recorder = recorder();
        assert_eq!(
            recorder.record(user(1, 0, "a")).await.unwrap(),
            WriteDecision::FirstObservation
        );
        assert_eq!(recorder.record(user(1, 50, "a")).await.unwrap(), WriteDecision::Skip);
        assert_eq!(recorder.record(user(1, 60, "b")).await.unwrap(), WriteDecision::Changed);
        assert_eq!(recorder.record(user(1, 160, "b")).await.unwrap(), WriteDecision::Checkpoint);

        let key = StreamKey::peer(PeerKind::User, 1).unwrap();
        assert_eq!(recorder.store().count(&key).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn older_observation_is_out_of_order() {
        let recorder = recorder();
        recorder.record(user(1, 100, "a")).await.unwrap();

        let err = recorder.record(user(1, 99, "b")).await.unwrap_err();
        assert!(matches!(err, SnapshotError::OutOfOrder { .. }));
    }

    #[tokio::test]
    async fn invalid_identity_is_rejected_before_the_store() {
        let recorder = recorder();
        let err = recorder.record(user(0, 0, "a")).await.unwrap_err();
        assert!(matches!(err, SnapshotError::InvalidIdentity { .. }));
    }

    #[tokio::test]
    async fn observers_see_skipped_observations_too() {
        let seen = Arc::new(Collect::default());
        let recorder = recorder().with_observer(seen.clone());
        recorder.record(user(1, 0, "a")).await.unwrap();
        recorder.record(user(1, 10, "a")).await.unwrap();

        assert_eq!(
            *seen.0.lock().unwrap(),
            vec![
                (Timestamp::from_secs(0), WriteDecision::FirstObservation),
                (Timestamp::from_secs(10), WriteDecision::Skip),
            ]
        );
    }

    #[tokio::test]
    async fn batch_orders_each_key_and_reports_failures() {
        let recorder = Arc::new(recorder().with_concurrency(2));
        let report = recorder
            .record_batch(vec![
                user(1, 60, "b"),
                user(2, 0, "x"),
                user(1, 0, "a"),
                user(-5, 0, "bad"),
            ])
            .await;

        assert_eq!(report.first_observations, 2);
        assert_eq!(report.changed, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.total(), 4);
        assert!(matches!(report.failures[0].error, SnapshotError::InvalidIdentity { .. }));

        let key = StreamKey::peer(PeerKind::User, 1).unwrap();
        let rows = recorder.store().history(&key, TimeRange::all()).await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn report_serializes_errors_as_text() {
        let mut report = RunReport::new();
        report.fail(
            Target::Peer { kind: PeerKind::User, id: 0 },
            Timestamp::from_secs(0),
            SnapshotError::storage("disk full"),
        );
        let json = serde_json::to_value(&report).unwrap();
        assert!(json["failures"][0]["error"].as_str().unwrap().contains("disk full"));
    }
}
