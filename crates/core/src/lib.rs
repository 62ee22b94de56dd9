//! `tgarchive-core`: temporal snapshot building blocks.
//!
//! This crate contains the **pure** parts of the snapshot store (no IO):
//! identity normalization, the per-kind field records and policy, change
//! detection and the invalidation policy.

pub mod compare;
pub mod entity;
pub mod error;
pub mod id;
pub mod invalidation;
pub mod observation;
pub mod schema;
pub mod snapshot;

pub use compare::is_changed;
pub use entity::{
    ChannelFields, ChatFields, EntityKind, FieldValue, Fields, MessageFields, StreamKey,
    UserFields,
};
pub use error::{SnapshotError, SnapshotResult};
pub use id::{Identity, PeerClass, PeerKind, normalize};
pub use invalidation::{InvalidationPolicy, WriteDecision, should_force_write};
pub use observation::{Observation, Target};
pub use schema::{FieldRole, FieldSpec, Presence, validate};
pub use snapshot::{Snapshot, Timestamp};
