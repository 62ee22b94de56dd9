//! Identity normalization: one flat, collision-free key space for every peer.
//!
//! The source system hands out raw numeric ids per peer kind, and those raw ids
//! overlap freely (user `42` and channel `42` are unrelated entities). Every id
//! stored by the archive is first passed through [`normalize`], which applies
//! the per-kind rule from [`IDENTITY_MAPPINGS`]:
//!
//! ```text
//! identity = sign * (offset + raw)        raw in 1..RAW_ID_LIMIT
//! ```
//!
//! | kind       | sign | offset |
//! |------------|------|--------|
//! | User       |  +   | 0      |
//! | Chat       |  -   | 0      |
//! | Channel    |  -   | 10^12  |
//! | Supergroup |  -   | 10^12  |
//!
//! Because raw ids are bounded by [`RAW_ID_LIMIT`], the three resulting ranges
//! are disjoint. Channels and supergroups are the same kind at the source and
//! share one raw id space, so they share a mapping row.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SnapshotError;

/// Offset applied to channel and supergroup ids.
pub const CHANNEL_OFFSET: i64 = 1_000_000_000_000;

/// Exclusive upper bound for raw ids accepted by [`normalize`].
pub const RAW_ID_LIMIT: i64 = CHANNEL_OFFSET;

/// Kind of a peer (an entity that owns an identity).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerKind {
    User,
    Chat,
    Channel,
    Supergroup,
}

impl PeerKind {
    pub const ALL: [PeerKind; 4] = [
        PeerKind::User,
        PeerKind::Chat,
        PeerKind::Channel,
        PeerKind::Supergroup,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PeerKind::User => "user",
            PeerKind::Chat => "chat",
            PeerKind::Channel => "channel",
            PeerKind::Supergroup => "supergroup",
        }
    }

    /// The underlying source class; channels and supergroups collapse into one.
    pub fn class(self) -> PeerClass {
        match self {
            PeerKind::User => PeerClass::User,
            PeerKind::Chat => PeerClass::Chat,
            PeerKind::Channel | PeerKind::Supergroup => PeerClass::Channel,
        }
    }
}

impl fmt::Display for PeerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for PeerKind {
    type Err = SnapshotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PeerKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| SnapshotError::UnknownKind(s.to_string()))
    }
}

/// Raw id space a peer kind draws from at the source.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerClass {
    User,
    Chat,
    Channel,
}

/// One row of the normalization table.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct IdentityMapping {
    pub class: PeerClass,
    /// `true` when the normalized identity is negated.
    pub negative: bool,
    pub offset: i64,
}

/// Normalization rules, one per source class.
///
/// New peer classes must pick an offset that keeps every range disjoint from
/// the existing ones for raw ids in `1..RAW_ID_LIMIT`.
pub const IDENTITY_MAPPINGS: [IdentityMapping; 3] = [
    IdentityMapping {
        class: PeerClass::User,
        negative: false,
        offset: 0,
    },
    IdentityMapping {
        class: PeerClass::Chat,
        negative: true,
        offset: 0,
    },
    IdentityMapping {
        class: PeerClass::Channel,
        negative: true,
        offset: CHANNEL_OFFSET,
    },
];

fn mapping_for(class: PeerClass) -> &'static IdentityMapping {
    // The table covers every class; the fallback is the user row.
    IDENTITY_MAPPINGS
        .iter()
        .find(|m| m.class == class)
        .unwrap_or(&IDENTITY_MAPPINGS[0])
}

/// Normalized, collision-free identity of a peer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(i64);

impl Identity {
    /// Wrap an already-normalized value (e.g. read back from storage).
    pub fn from_normalized(value: i64) -> Self {
        Self(value)
    }

    pub fn get(self) -> i64 {
        self.0
    }

    /// Map the identity back to its source class and raw id.
    pub fn resolve(self) -> (PeerClass, i64) {
        if self.0 >= 0 {
            (PeerClass::User, self.0)
        } else if -self.0 < CHANNEL_OFFSET {
            (PeerClass::Chat, -self.0)
        } else {
            (PeerClass::Channel, -self.0 - CHANNEL_OFFSET)
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Normalize a raw source id of the given kind.
///
/// Pure and stable across runs. Fails with [`SnapshotError::InvalidIdentity`]
/// when `raw` is outside `1..RAW_ID_LIMIT`.
pub fn normalize(kind: PeerKind, raw: i64) -> Result<Identity, SnapshotError> {
    if raw <= 0 || raw >= RAW_ID_LIMIT {
        return Err(SnapshotError::InvalidIdentity { kind, raw });
    }
    let mapping = mapping_for(kind.class());
    let magnitude = mapping.offset + raw;
    Ok(Identity(if mapping.negative { -magnitude } else { magnitude }))
}
