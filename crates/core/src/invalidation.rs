//! Checkpoint policy for unchanged entities.
//!
//! Without periodic checkpoints a long stretch with no rows would be ambiguous
//! between "nothing changed" and "nobody looked". An unchanged observation is
//! therefore still written once the invalidation interval has elapsed since the
//! latest stored snapshot, which bounds the gap between confirmed states.

use std::collections::BTreeMap;

use chrono::Duration;

use crate::compare::is_changed;
use crate::entity::EntityKind;
use crate::snapshot::{Snapshot, Timestamp};

/// `true` iff at least `interval` has elapsed since `previous` was observed.
///
/// The boundary is inclusive: an observation exactly one interval later is
/// written.
pub fn should_force_write(previous: &Snapshot, now: Timestamp, interval: Duration) -> bool {
    now.seconds_since(previous.observed_at) >= interval.num_seconds()
}

/// Why a candidate observation is (or is not) written.
#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteDecision {
    /// No snapshot exists for the key yet.
    FirstObservation,
    /// Some content field differs from the latest snapshot.
    Changed,
    /// Content is unchanged but the invalidation interval has elapsed.
    Checkpoint,
    /// Content is unchanged and the interval has not elapsed; discard.
    Skip,
}

impl WriteDecision {
    pub fn writes(self) -> bool {
        !matches!(self, WriteDecision::Skip)
    }
}

/// Invalidation intervals: one global default plus optional per-kind overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationPolicy {
    default_interval: Duration,
    overrides: BTreeMap<EntityKind, Duration>,
}

impl InvalidationPolicy {
    pub fn new(default_interval: Duration) -> Self {
        Self {
            default_interval,
            overrides: BTreeMap::new(),
        }
    }

    pub fn with_override(mut self, kind: EntityKind, interval: Duration) -> Self {
        self.overrides.insert(kind, interval);
        self
    }

    pub fn interval_for(&self, kind: EntityKind) -> Duration {
        self.overrides
            .get(&kind)
            .copied()
            .unwrap_or(self.default_interval)
    }

    /// Combined write decision: `is_changed || should_force_write`.
    pub fn decide(&self, previous: Option<&Snapshot>, candidate: &Snapshot) -> WriteDecision {
        let Some(prev) = previous else {
            return WriteDecision::FirstObservation;
        };
        if is_changed(previous, candidate) {
            return WriteDecision::Changed;
        }
        let interval = self.interval_for(candidate.key.kind());
        if should_force_write(prev, candidate.observed_at, interval) {
            WriteDecision::Checkpoint
        } else {
            WriteDecision::Skip
        }
    }
}

impl Default for InvalidationPolicy {
    /// Five days, the exporter's historical default.
    fn default() -> Self {
        Self::new(Duration::seconds(432_000))
    }
}
