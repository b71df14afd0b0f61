//! couchriver-storage: checkpoint storage backends for couchriver.
//!
//! Backends:
//! - [`memory`]: in-memory (dev/testing, no persistence)
//! - [`sqlite`]: SQLite via `sqlx` (embedded, single-file persistence)
//!
//! Both keep a [`CheckpointRecord`] per river so tooling can show when the
//! checkpoint last moved, not only where it is.

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::{CheckpointRecord, InMemoryStorage};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;
