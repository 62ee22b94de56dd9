//! Infrastructure layer: snapshot persistence, the write pipeline and
//! configuration.

pub mod config;
pub mod locks;
pub mod participants;
pub mod recorder;
pub mod snapshot_store;


pub use config::{ArchiveConfig, ConfigError, StorageConfig};
pub use participants::{ParticipantDelta, ParticipantLog, ParticipantStore};
pub use recorder::{ObservationFailure, RunReport, SnapshotObserver, SnapshotRecorder};
pub use snapshot_store::{InMemorySnapshotStore, SnapshotStore, SqliteSnapshotStore, TimeRange};
