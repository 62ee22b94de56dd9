//! Append-only snapshot store boundary.
//!
//! This module defines the storage abstraction for per-entity snapshot
//! histories plus its two backends: an in-memory store for tests/dev and a
//! SQLite store for real archives.

pub mod in_memory;
pub mod query;
pub mod sqlite;
pub mod r#trait;

pub use in_memory::InMemorySnapshotStore;
pub use query::TimeRange;
pub use r#trait::SnapshotStore;
pub use sqlite::SqliteSnapshotStore;
