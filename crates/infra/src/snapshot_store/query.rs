//! Read-side query parameters for snapshot history.

use serde::{Deserialize, Serialize};

use tgarchive_core::Timestamp;

/// Inclusive `[from, to]` range of observation times.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: Timestamp,
    pub to: Timestamp,
}

impl TimeRange {
    pub fn new(from: Timestamp, to: Timestamp) -> Self {
        Self { from, to }
    }

    /// Every snapshot ever stored.
    pub fn all() -> Self {
        Self::new(Timestamp::MIN, Timestamp::MAX)
    }

    /// Everything observed at or before `to`.
    pub fn until(to: Timestamp) -> Self {
        Self::new(Timestamp::MIN, to)
    }

    pub fn is_empty(&self) -> bool {
        self.from > self.to
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::all()
    }
}
