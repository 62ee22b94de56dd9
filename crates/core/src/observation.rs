//! Raw observations as delivered by the entity poller.

use serde::{Deserialize, Serialize};

use crate::entity::{Fields, StreamKey};
use crate::error::SnapshotError;
use crate::id::PeerKind;
use crate::snapshot::{Snapshot, Timestamp};

/// What was observed, in source (un-normalized) ids.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Target {
    Peer {
        kind: PeerKind,
        id: i64,
    },
    Message {
        context_kind: PeerKind,
        context_id: i64,
        message_id: i64,
    },
}

/// One `(kind, raw id, observed_at, fields)` tuple from a polling run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub target: Target,
    pub observed_at: Timestamp,
    pub fields: Fields,
}

impl Observation {
    pub fn peer(kind: PeerKind, id: i64, observed_at: Timestamp, fields: Fields) -> Self {
        Self {
            target: Target::Peer { kind, id },
            observed_at,
            fields,
        }
    }

    pub fn message(
        context_kind: PeerKind,
        context_id: i64,
        message_id: i64,
        observed_at: Timestamp,
        fields: Fields,
    ) -> Self {
        Self {
            target: Target::Message {
                context_kind,
                context_id,
                message_id,
            },
            observed_at,
            fields,
        }
    }

    /// Normalize the target into a stream key.
    pub fn stream_key(&self) -> Result<StreamKey, SnapshotError> {
        match self.target {
            Target::Peer { kind, id } => StreamKey::peer(kind, id),
            Target::Message {
                context_kind,
                context_id,
                message_id,
            } => StreamKey::message(context_kind, context_id, message_id),
        }
    }

    pub fn into_snapshot(self) -> Result<Snapshot, SnapshotError> {
        let key = self.stream_key()?;
        Ok(Snapshot::new(key, self.observed_at, self.fields))
    }
}
