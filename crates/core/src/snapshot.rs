//! Immutable, timestamped observations of an entity.

use core::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{Fields, StreamKey};

/// Observation time, whole seconds since the Unix epoch.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const MIN: Timestamp = Timestamp(i64::MIN);
    pub const MAX: Timestamp = Timestamp(i64::MAX);

    pub fn from_secs(secs: i64) -> Self {
        Self(secs)
    }

    pub fn now() -> Self {
        Self(Utc::now().timestamp())
    }

    pub fn as_secs(self) -> i64 {
        self.0
    }

    /// Seconds elapsed from `earlier` to `self` (negative if `earlier` is later).
    pub fn seconds_since(self, earlier: Timestamp) -> i64 {
        self.0.saturating_sub(earlier.0)
    }

    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.0, 0)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value.timestamp())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339()),
            None => write!(f, "@{}", self.0),
        }
    }
}

/// One versioned observation of an entity.
///
/// Snapshots are created once, by the store's `append`, and never mutated.
/// The successor of a snapshot is the next one for the same key with a greater
/// `observed_at`; it is found by range query, not by pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub key: StreamKey,
    pub observed_at: Timestamp,
    pub fields: Fields,
}

impl Snapshot {
    pub fn new(key: StreamKey, observed_at: Timestamp, fields: Fields) -> Self {
        Self {
            key,
            observed_at,
            fields,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_since_saturates() {
        assert_eq!(Timestamp::from_secs(90_000).seconds_since(Timestamp::from_secs(0)), 90_000);
        assert_eq!(Timestamp::MAX.seconds_since(Timestamp::MIN), i64::MAX);
    }

    #[test]
    fn displays_as_rfc3339() {
        assert_eq!(Timestamp::from_secs(0).to_string(), "1970-01-01T00:00:00+00:00");
    }
}
