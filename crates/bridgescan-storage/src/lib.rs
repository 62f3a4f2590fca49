//! bridgescan-storage — record and block storage backends for bridgescan.
//!
//! Backends:
//! - [`memory`] — in-memory record store (dev/testing, no persistence)
//! - [`sqlite`] — SQLite via `sqlx`: records and scanner blocks in one file

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "memory")]
pub use memory::InMemoryStorage;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;
